//! # Frame backends
//!
//! The [FrameOrchestrator](crate::FrameOrchestrator) does not talk to a swapchain or queue directly. Everything
//! that involves presentation, command buffers and submission goes through a [FrameBackend]. The
//! [VulkanBackend] implements it for a real swapchain, the [NullBackend](crate::null_backend::NullBackend) for dry
//! runs without a GPU.

use std::{sync::Arc, time::Duration};

use passway::{
    SyncOperation, SynchronizationTimeoutError,
    ash::vk,
    command_buffer::CommandPool,
    context::RenderContext,
    device::GpuDevice,
    surface::Surface,
    swapchain::{Swapchain, SwapchainImage},
};
use passway_commands::{CommandRecorder, ManagedCommands};

use crate::{FrameError, GraphError};

///The swapchain image a frame renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    ///Presented, but the swapchain should be recreated soon.
    Suboptimal,
}

pub type RecordCallback<'a> = dyn FnMut(&mut dyn CommandRecorder) -> Result<(), GraphError> + 'a;

///Presentation and submission for a [FrameOrchestrator](crate::FrameOrchestrator).
pub trait FrameBackend {
    type Device: GpuDevice;
    ///One command buffer, including whatever signals the end of its execution.
    type Commands;

    fn device(&self) -> &Arc<Self::Device>;
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
    fn image_count(&self) -> usize;

    fn allocate_commands(&mut self) -> Result<Self::Commands, FrameError>;

    ///Acquires the next image. Must fail with [FrameError::SurfaceOutOfDate] if the swapchain has to be recreated.
    fn acquire(&mut self, timeout: Duration) -> Result<AcquiredImage, FrameError>;

    ///Blocks until the last submission of `commands` has finished executing.
    fn wait_commands(&self, commands: &Self::Commands, timeout: Duration) -> Result<(), FrameError>;

    ///Records `commands` anew through `record`. If `record` fails, `commands` must not be submitted.
    fn record(
        &mut self,
        commands: &mut Self::Commands,
        record: &mut RecordCallback<'_>,
    ) -> Result<(), FrameError>;

    ///Submits `commands`, waiting for `image` to be acquired and signaling its presentation.
    fn submit(&mut self, commands: &mut Self::Commands, image: &AcquiredImage) -> Result<(), FrameError>;

    fn present(&mut self, image: &AcquiredImage) -> Result<PresentOutcome, FrameError>;

    ///Recreates the swapchain. Returns the extent actually used, which might be clamped by the surface.
    fn resize(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D, FrameError>;

    fn wait_idle(&self) -> Result<(), FrameError>;
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

///Maps a swapchain or queue result to a [FrameError].
fn map_result(op: &'static str, sync: SyncOperation, timeout: Duration, result: vk::Result) -> FrameError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::SurfaceOutOfDate,
        vk::Result::TIMEOUT | vk::Result::NOT_READY | vk::Result::ERROR_DEVICE_LOST => {
            FrameError::Timeout(SynchronizationTimeoutError::new(sync, timeout, result))
        }
        result => FrameError::Vk { op, result },
    }
}

///Renders into a window's swapchain on the context's graphics queue.
pub struct VulkanBackend {
    swapchain: Swapchain,
    pool: Arc<CommandPool>,
    ///Keeps the semaphores of the image in flight alive until it was presented.
    acquired: Option<SwapchainImage>,
    context: Arc<RenderContext>,
}

impl VulkanBackend {
    ///Creates a swapchain for `surface`. `extent` is used if the surface does not dictate one.
    pub fn new(
        context: &Arc<RenderContext>,
        surface: &Arc<Surface>,
        extent: vk::Extent2D,
    ) -> Result<Self, FrameError> {
        let swapchain = Swapchain::builder(&context.device, surface, extent)?
            .with_vsync()
            .build()?;
        let pool = CommandPool::new(
            &context.device,
            context.queue.family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
        .map_err(|result| FrameError::Vk {
            op: "command pool creation",
            result,
        })?;

        Ok(VulkanBackend {
            swapchain,
            pool,
            acquired: None,
            context: context.clone(),
        })
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }
}

impl FrameBackend for VulkanBackend {
    type Device = RenderContext;
    type Commands = ManagedCommands;

    fn device(&self) -> &Arc<RenderContext> {
        &self.context
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn allocate_commands(&mut self) -> Result<ManagedCommands, FrameError> {
        ManagedCommands::new(&self.pool).map_err(|result| FrameError::Vk {
            op: "command buffer allocation",
            result,
        })
    }

    fn acquire(&mut self, timeout: Duration) -> Result<AcquiredImage, FrameError> {
        let image = self
            .swapchain
            .acquire_next_image(timeout_nanos(timeout))
            .map_err(|result| {
                map_result("image acquire", SyncOperation::AcquireImage, timeout, result)
            })?;

        let acquired = AcquiredImage {
            index: image.index,
            image: image.image,
            view: image.view,
            extent: image.extent,
            suboptimal: image.suboptimal,
        };
        self.acquired = Some(image);
        Ok(acquired)
    }

    fn wait_commands(&self, commands: &ManagedCommands, timeout: Duration) -> Result<(), FrameError> {
        commands
            .wait(timeout)
            .map_err(|result| map_result("fence wait", SyncOperation::FenceWait, timeout, result))
    }

    fn record(
        &mut self,
        commands: &mut ManagedCommands,
        record: &mut RecordCallback<'_>,
    ) -> Result<(), FrameError> {
        let mut recorder = commands.start_recording().map_err(|result| FrameError::Vk {
            op: "begin command buffer",
            result,
        })?;
        //on error the recorder is dropped unfinished, which ends the buffer without marking it reusable
        record(&mut recorder)?;
        recorder.finish_recording().map_err(|result| FrameError::Vk {
            op: "end command buffer",
            result,
        })
    }

    fn submit(&mut self, commands: &mut ManagedCommands, image: &AcquiredImage) -> Result<(), FrameError> {
        let Some(swapchain_image) = self.acquired.as_ref().filter(|i| i.index == image.index) else {
            return Err(FrameError::Vk {
                op: "submit",
                result: vk::Result::ERROR_UNKNOWN,
            });
        };

        commands
            .submit(
                &self.context.device,
                &self.context.queue,
                Some((
                    &swapchain_image.sem_acquire,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                )),
                Some(&swapchain_image.sem_present),
            )
            .map_err(|result| map_result("submit", SyncOperation::FenceWait, Duration::ZERO, result))
    }

    fn present(&mut self, image: &AcquiredImage) -> Result<PresentOutcome, FrameError> {
        let Some(swapchain_image) = self.acquired.take().filter(|i| i.index == image.index) else {
            return Err(FrameError::Vk {
                op: "present",
                result: vk::Result::ERROR_UNKNOWN,
            });
        };

        match self
            .swapchain
            .present_image(&swapchain_image, self.context.queue.inner)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(result) => Err(map_result(
                "present",
                SyncOperation::AcquireImage,
                Duration::ZERO,
                result,
            )),
        }
    }

    fn resize(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D, FrameError> {
        self.acquired = None;
        self.swapchain.recreate(extent)?;
        Ok(self.swapchain.extent())
    }

    fn wait_idle(&self) -> Result<(), FrameError> {
        self.context.wait_idle().map_err(|result| {
            map_result("device idle", SyncOperation::DeviceIdle, Duration::MAX, result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_its_own_error() {
        assert!(matches!(
            map_result(
                "image acquire",
                SyncOperation::AcquireImage,
                Duration::from_secs(1),
                vk::Result::ERROR_OUT_OF_DATE_KHR
            ),
            FrameError::SurfaceOutOfDate
        ));
    }

    #[test]
    fn timeouts_carry_the_operation() {
        match map_result(
            "fence wait",
            SyncOperation::FenceWait,
            Duration::from_millis(5),
            vk::Result::TIMEOUT,
        ) {
            FrameError::Timeout(e) => {
                assert_eq!(e.operation, SyncOperation::FenceWait);
                assert_eq!(e.timeout, Duration::from_millis(5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            map_result(
                "submit",
                SyncOperation::FenceWait,
                Duration::ZERO,
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ),
            FrameError::Vk { op: "submit", .. }
        ));
    }
}
