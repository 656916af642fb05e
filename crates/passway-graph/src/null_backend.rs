//! A [FrameBackend] without GPU. Swapchain images are created on a [NullDevice], commands are recorded into a
//! [CommandLog], submission and presentation only count.

use std::{sync::Arc, time::Duration};

use passway::{
    ash::vk,
    device::{GpuDevice, ImageInfo},
    null_device::{NullDevice, NullMemory},
};
use passway_commands::CommandLog;

use crate::{
    FrameError,
    backend::{AcquiredImage, FrameBackend, PresentOutcome, RecordCallback},
};

///Commands of the [NullBackend].
#[derive(Debug, Default)]
pub struct NullCommands {
    pub log: CommandLog,
    has_recording: bool,
}

impl NullCommands {
    pub fn has_recording(&self) -> bool {
        self.has_recording
    }
}

struct NullSwapchainImage {
    image: vk::Image,
    view: vk::ImageView,
    memory: NullMemory,
}

pub struct NullBackend {
    device: Arc<NullDevice>,
    format: vk::Format,
    extent: vk::Extent2D,
    image_count: usize,
    images: Vec<NullSwapchainImage>,
    next_image: usize,
    ///If set, the next acquire fails with [FrameError::SurfaceOutOfDate].
    pub out_of_date: bool,
    pub acquires: usize,
    pub records: usize,
    pub submits: usize,
    pub presents: usize,
    ///Copy of the commands submitted last.
    pub last_submitted: Option<CommandLog>,
}

impl NullBackend {
    pub fn new(
        device: &Arc<NullDevice>,
        format: vk::Format,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> Result<Self, FrameError> {
        let mut backend = NullBackend {
            device: device.clone(),
            format,
            extent,
            image_count: image_count.max(1),
            images: Vec::new(),
            next_image: 0,
            out_of_date: false,
            acquires: 0,
            records: 0,
            submits: 0,
            presents: 0,
            last_submitted: None,
        };
        backend.create_images()?;
        Ok(backend)
    }

    fn create_images(&mut self) -> Result<(), FrameError> {
        let info = ImageInfo::new(
            self.format,
            self.extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        );
        for idx in 0..self.image_count {
            let name = format!("swapchain image {idx}");
            let (image, memory) = self.device.create_image(&name, &info)?;
            let view = match self.device.create_image_view(&name, image, &info) {
                Ok(view) => view,
                Err(e) => {
                    self.device.destroy_image(image);
                    self.device.free_memory(memory);
                    return Err(e.into());
                }
            };
            self.images.push(NullSwapchainImage {
                image,
                view,
                memory,
            });
        }
        self.next_image = 0;
        Ok(())
    }

    fn destroy_images(&mut self) {
        for img in self.images.drain(..) {
            self.device.destroy_image_view(img.view);
            self.device.destroy_image(img.image);
            self.device.free_memory(img.memory);
        }
    }

    pub fn images(&self) -> Vec<(vk::Image, vk::ImageView)> {
        self.images.iter().map(|i| (i.image, i.view)).collect()
    }
}

impl FrameBackend for NullBackend {
    type Device = NullDevice;
    type Commands = NullCommands;

    fn device(&self) -> &Arc<NullDevice> {
        &self.device
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn allocate_commands(&mut self) -> Result<NullCommands, FrameError> {
        Ok(NullCommands::default())
    }

    fn acquire(&mut self, _timeout: Duration) -> Result<AcquiredImage, FrameError> {
        if self.out_of_date {
            return Err(FrameError::SurfaceOutOfDate);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.images.len().max(1);
        let img = self.images.get(index).ok_or(FrameError::SurfaceOutOfDate)?;
        self.acquires += 1;

        Ok(AcquiredImage {
            index: index as u32,
            image: img.image,
            view: img.view,
            extent: self.extent,
            suboptimal: false,
        })
    }

    fn wait_commands(&self, _commands: &NullCommands, _timeout: Duration) -> Result<(), FrameError> {
        Ok(())
    }

    fn record(
        &mut self,
        commands: &mut NullCommands,
        record: &mut RecordCallback<'_>,
    ) -> Result<(), FrameError> {
        commands.has_recording = false;
        commands.log.clear();
        self.records += 1;
        record(&mut commands.log)?;
        commands.has_recording = true;
        Ok(())
    }

    fn submit(&mut self, commands: &mut NullCommands, _image: &AcquiredImage) -> Result<(), FrameError> {
        self.submits += 1;
        self.last_submitted = Some(commands.log.clone());
        Ok(())
    }

    fn present(&mut self, _image: &AcquiredImage) -> Result<PresentOutcome, FrameError> {
        self.presents += 1;
        Ok(PresentOutcome::Presented)
    }

    fn resize(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D, FrameError> {
        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::Device(
                passway::DeviceError::InvalidSwapchainSize(extent),
            ));
        }
        self.destroy_images();
        self.extent = extent;
        self.out_of_date = false;
        self.create_images()?;
        Ok(extent)
    }

    fn wait_idle(&self) -> Result<(), FrameError> {
        self.device.wait_idle().map_err(|result| FrameError::Vk {
            op: "device idle",
            result,
        })
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.destroy_images();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn acquires_round_robin() {
        let device = Arc::new(NullDevice::new());
        let mut backend =
            NullBackend::new(&device, vk::Format::B8G8R8A8_UNORM, extent(64, 64), 3).unwrap();
        let indices = (0..4)
            .map(|_| backend.acquire(Duration::from_secs(1)).unwrap().index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 0]);
        assert_eq!(backend.acquires, 4);
    }

    #[test]
    fn resize_replaces_images() {
        let device = Arc::new(NullDevice::new());
        let mut backend =
            NullBackend::new(&device, vk::Format::B8G8R8A8_UNORM, extent(64, 64), 2).unwrap();
        let old = backend.images();
        backend.out_of_date = true;
        assert!(matches!(
            backend.acquire(Duration::from_secs(1)),
            Err(FrameError::SurfaceOutOfDate)
        ));

        assert_eq!(backend.resize(extent(128, 32)).unwrap(), extent(128, 32));
        assert!(old.iter().all(|(image, _)| !device.is_live_image(*image)));
        assert_eq!(device.live_images(), 2);
        assert!(backend.acquire(Duration::from_secs(1)).is_ok());

        assert!(backend.resize(extent(0, 32)).is_err());
        drop(backend);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_memory(), 0);
    }
}
