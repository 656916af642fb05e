//! ## Context
//!
//! [RenderContext] bundles the Vulkan [Instance], the logical [Device] with its single graphics queue and a
//! [gpu_allocator](gpu_allocator::vulkan::Allocator) for image memory. It is the Vulkan implementation of
//! [GpuDevice], which is all a pass graph needs to create and destroy its attachments.
//!
//! The context is either created headless, or together with a [Surface] for some window. In the latter case the
//! graphics queue is guaranteed to be able to present to that surface.

use std::{
    ffi::CString,
    sync::{Arc, Mutex, MutexGuard},
};

use ash::vk;
use gpu_allocator::{
    AllocationSizes, AllocatorDebugSettings, MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod device;
pub use device::{Device, PhysicalDeviceChoice, Queue};

mod instance;
pub use instance::{Debugger, Instance, InstanceBuilder, vulkan_debug_callback};

use crate::{
    device::{GpuDevice, ImageInfo, SampledImageWrite, SamplerInfo},
    error::{DeviceError, PasswayError, ResourceCreationError},
    surface::Surface,
};

///Creation parameters of a [RenderContext].
#[derive(Clone, Debug)]
pub struct ContextConfig {
    ///Enables the khronos validation layer. Messages are routed into `log`.
    pub validation: bool,
    pub app_name: CString,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            validation: false,
            app_name: CString::from(c"passway"),
        }
    }
}

pub struct RenderContext {
    //NOTE: must be dropped before the device.
    allocator: Mutex<Allocator>,
    pub device: Arc<Device>,
    pub instance: Arc<Instance>,
    ///The graphics (and present) queue.
    pub queue: Queue,
}

impl RenderContext {
    ///Creates a context that does not check for any surface availability.
    pub fn headless(config: &ContextConfig) -> Result<Arc<Self>, PasswayError> {
        let mut builder = Instance::load()?;
        if config.validation {
            builder = builder.enable_validation();
        }
        let instance = builder.build(&config.app_name)?;
        let choice = PhysicalDeviceChoice::select(&instance, None)?;
        Ok(Arc::new(Self::from_instance(instance, &choice, false)?))
    }

    ///Creates a context whose graphics queue can present to a surface created for `window`.
    pub fn with_surface<T>(
        window: &T,
        config: &ContextConfig,
    ) -> Result<(Arc<Self>, Arc<Surface>), PasswayError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let mut builder = Instance::load()?.for_surface(window)?;
        if config.validation {
            builder = builder.enable_validation();
        }
        let instance = builder.build(&config.app_name)?;

        let surface = Arc::new(Surface::new(&instance, window)?);
        let choice = PhysicalDeviceChoice::select(
            &instance,
            Some((&surface.surface_loader, surface.surface)),
        )?;
        let ctx = Self::from_instance(instance, &choice, true)?;

        Ok((Arc::new(ctx), surface))
    }

    fn from_instance(
        instance: Arc<Instance>,
        choice: &PhysicalDeviceChoice,
        with_swapchain: bool,
    ) -> Result<Self, DeviceError> {
        let mut extensions = Vec::new();
        if with_swapchain {
            extensions.push(ash::khr::swapchain::NAME);
        }
        let device = Device::new(instance.clone(), choice, &extensions)?;

        let queue = device
            .get_first_queue_for_family(choice.queue_family)
            .cloned()
            .ok_or(DeviceError::NoGraphicsQueue)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.inner.clone(),
            device: device.inner.clone(),
            physical_device: device.physical_device,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })?;

        Ok(RenderContext {
            allocator: Mutex::new(allocator),
            device,
            instance,
            queue,
        })
    }

    fn allocator(&self) -> MutexGuard<'_, Allocator> {
        match self.allocator.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    ///Returns the first depth format in order of preference that can be used as depth attachment.
    pub fn supported_depth_format(&self) -> Option<vk::Format> {
        [
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM_S8_UINT,
            vk::Format::D16_UNORM,
        ]
        .into_iter()
        .find(|f| self.supports_format(*f, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
    }
}

impl GpuDevice for RenderContext {
    type Memory = Allocation;

    fn supports_format(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool {
        self.device
            .format_properties(format)
            .optimal_tiling_features
            .contains(features)
    }

    fn create_image(
        &self,
        name: &str,
        info: &ImageInfo,
    ) -> Result<(vk::Image, Allocation), ResourceCreationError> {
        if info.extent.width == 0 || info.extent.height == 0 {
            return Err(ResourceCreationError::ZeroExtent {
                name: name.to_owned(),
                extent: info.extent,
            });
        }
        if !self.supports_format(info.format, info.required_features()) {
            return Err(ResourceCreationError::UnsupportedFormat {
                name: name.to_owned(),
                format: info.format,
                features: info.required_features(),
            });
        }

        let vk_err = |object: &'static str| {
            move |result: vk::Result| ResourceCreationError::Vk {
                name: name.to_owned(),
                object,
                result,
            }
        };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(info.extent_3d())
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.inner.create_image(&create_info, None) }
            .map_err(vk_err("image"))?;
        let requirements = unsafe { self.device.inner.get_image_memory_requirements(image) };

        let allocation = match self.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(a) => a,
            Err(e) => {
                unsafe { self.device.inner.destroy_image(image, None) };
                return Err(ResourceCreationError::Allocation {
                    name: name.to_owned(),
                    message: e.to_string(),
                });
            }
        };

        if let Err(e) = unsafe {
            self.device
                .inner
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.inner.destroy_image(image, None) };
            self.free_memory(allocation);
            return Err(vk_err("image memory binding")(e));
        }

        #[cfg(feature = "logging")]
        log::trace!(
            "Created image \"{}\" {:?} {}x{}",
            name,
            info.format,
            info.extent.width,
            info.extent.height
        );

        Ok((image, allocation))
    }

    fn create_image_view(
        &self,
        name: &str,
        image: vk::Image,
        info: &ImageInfo,
    ) -> Result<vk::ImageView, ResourceCreationError> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(info.format)
            .subresource_range(info.subresource_all());

        unsafe { self.device.inner.create_image_view(&create_info, None) }.map_err(|result| {
            ResourceCreationError::Vk {
                name: name.to_owned(),
                object: "image view",
                result,
            }
        })
    }

    fn create_sampler(
        &self,
        name: &str,
        info: &SamplerInfo,
    ) -> Result<vk::Sampler, ResourceCreationError> {
        unsafe {
            self.device
                .inner
                .create_sampler(&info.as_create_info(), None)
        }
        .map_err(|result| ResourceCreationError::Vk {
            name: name.to_owned(),
            object: "sampler",
            result,
        })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.inner.destroy_image_view(view, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.inner.destroy_image(image, None) }
    }

    fn free_memory(&self, memory: Allocation) {
        if let Err(e) = self.allocator().free(memory) {
            #[cfg(feature = "logging")]
            log::error!("Failed to free image memory: {}", e);
            #[cfg(not(feature = "logging"))]
            let _ = e;
        }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.inner.destroy_sampler(sampler, None) }
    }

    fn write_sampled_images(&self, writes: &[SampledImageWrite]) {
        if writes.is_empty() {
            return;
        }
        //image infos must outlive the update call
        let infos = writes
            .iter()
            .map(|w| {
                [vk::DescriptorImageInfo {
                    sampler: w.sampler,
                    image_view: w.view,
                    image_layout: w.layout,
                }]
            })
            .collect::<Vec<_>>();
        let vk_writes = writes
            .iter()
            .zip(infos.iter())
            .map(|(w, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(w.set)
                    .dst_binding(w.binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(info)
            })
            .collect::<Vec<_>>();

        unsafe { self.device.inner.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.inner.device_wait_idle() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(RenderContext: Send, Sync, GpuDevice);
        assert_impl_all!(Instance: Send, Sync);
    }
}
