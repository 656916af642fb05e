use std::sync::Arc;

use ash::vk;

use crate::{context::Device, error::DeviceError, surface::Surface, sync::Semaphore};

pub struct SwapchainBuilder {
    ///Surface based on which the swapchain will be build.
    pub surface: Arc<Surface>,
    ///Device for which the swapchain will be build.
    pub device: Arc<Device>,

    ///Ordered preferred image formats. If none is available, the first supported format is taken.
    pub format_preference: Vec<vk::SurfaceFormatKHR>,
    ///Ordered list of preferred present modes. FIFO is used if none of those is supported.
    pub present_mode_preference: Vec<vk::PresentModeKHR>,

    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainBuilder {
    ///Enables you to chain multiple assignments to a constructed builder.
    pub fn with(mut self, mut f: impl FnMut(&mut Self)) -> Self {
        f(&mut self);
        self
    }

    ///Prefers FIFO_RELAXED, then FIFO.
    pub fn with_vsync(mut self) -> Self {
        self.present_mode_preference = vec![
            vk::PresentModeKHR::FIFO_RELAXED,
            vk::PresentModeKHR::FIFO,
        ];
        self
    }

    ///Prefers MAILBOX, then IMMEDIATE.
    pub fn with_immediate_present(mut self) -> Self {
        self.present_mode_preference = vec![
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        self
    }

    fn choose_format(&self) -> Result<vk::SurfaceFormatKHR, DeviceError> {
        let supported = self.surface.get_formats(self.device.physical_device)?;
        self.format_preference
            .iter()
            .find(|p| supported.contains(p))
            .copied()
            .or_else(|| supported.first().copied())
            .ok_or(DeviceError::VkError(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))
    }

    fn choose_present_mode(&self) -> Result<vk::PresentModeKHR, DeviceError> {
        let supported = self.surface.get_present_modes(self.device.physical_device)?;
        Ok(self
            .present_mode_preference
            .iter()
            .find(|p| supported.contains(p))
            .copied()
            //FIFO support is mandatory
            .unwrap_or(vk::PresentModeKHR::FIFO))
    }

    pub fn build(self) -> Result<Swapchain, DeviceError> {
        let format = self.choose_format()?;
        let present_mode = self.choose_present_mode()?;

        let loader = ash::khr::swapchain::Device::new(&self.device.instance.inner, &self.device.inner);
        let config = SwapchainConfig {
            format,
            present_mode,
            image_count: self.image_count,
            usage: self.usage,
            transform: self.transform,
            composite_alpha: self.composite_alpha,
        };

        let mut swapchain = Swapchain {
            loader,
            swapchain: vk::SwapchainKHR::null(),
            surface: self.surface,
            device: self.device,
            images: Vec::new(),
            acquire_semaphore: Vec::new(),
            render_finished_semaphore: Vec::new(),
            next_semaphore: 0,
            extent: self.extent,
            config,
        };
        swapchain.recreate(self.extent)?;

        Ok(swapchain)
    }
}

#[derive(Clone, Copy, Debug)]
struct SwapchainConfig {
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    image_count: u32,
    usage: vk::ImageUsageFlags,
    transform: vk::SurfaceTransformFlagsKHR,
    composite_alpha: vk::CompositeAlphaFlagsKHR,
}

///Image owned by the swapchain, plus the view created for it.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainImageView {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

///An acquired swapchain image with the semaphores needed to render to and present it.
#[derive(Clone, Debug)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    ///Index identifying the image when presenting
    pub index: u32,
    ///True if the swapchain no longer matches the surface exactly, but can still be presented to.
    pub suboptimal: bool,
    ///Signaled once the image can be written to.
    pub sem_acquire: Arc<Semaphore>,
    ///Must be signaled by the submission that writes the image. Present waits on it.
    pub sem_present: Arc<Semaphore>,
}

pub struct Swapchain {
    pub loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    ///Needed to keep the surface alive until the swapchain is dropped.
    pub surface: Arc<Surface>,
    pub device: Arc<Device>,
    images: Vec<SwapchainImageView>,
    acquire_semaphore: Vec<Arc<Semaphore>>,
    //indexed by image, not round robin.
    render_finished_semaphore: Vec<Arc<Semaphore>>,
    next_semaphore: usize,
    extent: vk::Extent2D,
    config: SwapchainConfig,
}

impl Swapchain {
    ///Creates a new swapchain builder. Format and present mode preferences are empty (meaning "first supported"
    /// and FIFO), the extent is the surface's current extent, or `fallback_extent` if the platform does not report one.
    pub fn builder(
        device: &Arc<Device>,
        surface: &Arc<Surface>,
        fallback_extent: vk::Extent2D,
    ) -> Result<SwapchainBuilder, DeviceError> {
        let capabilities = surface.get_capabilities(device.physical_device)?;

        let max_count = if capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            capabilities.max_image_count
        };

        Ok(SwapchainBuilder {
            surface: surface.clone(),
            device: device.clone(),
            format_preference: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_mode_preference: Vec::new(),
            //triple buffering if possible
            image_count: 3.clamp(capabilities.min_image_count, max_count),
            extent: surface
                .get_current_extent(device.physical_device)
                .unwrap_or(fallback_extent),
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            transform: if capabilities
                .supported_transforms
                .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
            {
                vk::SurfaceTransformFlagsKHR::IDENTITY
            } else {
                capabilities.current_transform
            },
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.config.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[SwapchainImageView] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn clamp_extent(&self, extent: vk::Extent2D) -> Result<vk::Extent2D, DeviceError> {
        let caps = self.surface.get_capabilities(self.device.physical_device)?;
        let clamped = vk::Extent2D {
            width: extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        };

        if clamped.width == 0 || clamped.height == 0 {
            return Err(DeviceError::InvalidSwapchainSize(clamped));
        }
        Ok(clamped)
    }

    fn destroy_views(&mut self) {
        for img in self.images.drain(..) {
            unsafe { self.device.inner.destroy_image_view(img.view, None) };
        }
    }

    ///Recreates the swapchain for `extent`, using the settings it was created with. The old swapchain is handed to
    /// the driver as `old_swapchain` and destroyed afterwards. The caller must make sure no work references the old
    /// images anymore.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> Result<(), DeviceError> {
        let extent = self.clamp_extent(extent)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.surface)
            .min_image_count(self.config.image_count)
            .image_format(self.config.format.format)
            .image_color_space(self.config.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.config.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(self.config.transform)
            .composite_alpha(self.config.composite_alpha)
            .present_mode(self.config.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        let new_swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        }
        self.swapchain = new_swapchain;
        self.extent = extent;

        let raw_images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };
        for image in raw_images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.config.format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.inner.create_image_view(&view_info, None)? };
            self.images.push(SwapchainImageView { image, view });
        }

        //the image count can change between recreations.
        if self.acquire_semaphore.len() != self.images.len() {
            self.acquire_semaphore = (0..self.images.len())
                .map(|_| Semaphore::new(&self.device))
                .collect::<Result<_, _>>()?;
            self.render_finished_semaphore = (0..self.images.len())
                .map(|_| Semaphore::new(&self.device))
                .collect::<Result<_, _>>()?;
            self.next_semaphore = 0;
        }

        #[cfg(feature = "logging")]
        log::info!(
            "Created swapchain with {} images of {:?} at {:?}",
            self.images.len(),
            self.config.format.format,
            extent
        );

        Ok(())
    }

    ///Acquires the next image to render to. `OUT_OF_DATE` is returned as error, a suboptimal image is flagged.
    pub fn acquire_next_image(&mut self, timeout: u64) -> Result<SwapchainImage, vk::Result> {
        let acquire_semaphore = self.acquire_semaphore[self.next_semaphore].clone();

        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                timeout,
                acquire_semaphore.inner,
                vk::Fence::null(),
            )?
        };
        //only advance after the semaphore was actually used for a pending acquire.
        self.next_semaphore = (self.next_semaphore + 1) % self.acquire_semaphore.len();

        #[cfg(feature = "logging")]
        if suboptimal {
            log::warn!("Acquired image is suboptimal!");
        }

        let img = self.images[index as usize];
        Ok(SwapchainImage {
            image: img.image,
            view: img.view,
            extent: self.extent,
            index,
            suboptimal,
            sem_acquire: acquire_semaphore,
            sem_present: self.render_finished_semaphore[index as usize].clone(),
        })
    }

    ///Enqueues the present of `image`, waiting on `image.sem_present`. Returns `Ok(true)` if the swapchain
    /// is suboptimal.
    pub fn present_image(&self, image: &SwapchainImage, queue: vk::Queue) -> Result<bool, vk::Result> {
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(core::slice::from_ref(&self.swapchain))
            .image_indices(core::slice::from_ref(&image.index))
            .wait_semaphores(core::slice::from_ref(&image.sem_present.inner));

        unsafe { self.loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
