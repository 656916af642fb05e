use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{context::Instance, error::InstanceError};

///Window surface created through [ash-window](https://crates.io/crates/ash-window). Keeps the instance alive
/// long enough to destroy the surface in time.
pub struct Surface {
    pub instance: Arc<Instance>,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    pub fn new<T>(instance: &Arc<Instance>, window_handle: &T) -> Result<Self, InstanceError>
    where
        T: HasWindowHandle + HasDisplayHandle,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.inner,
                window_handle.display_handle()?.as_raw(),
                window_handle.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&instance.entry, &instance.inner);

        Ok(Surface {
            instance: instance.clone(),
            surface,
            surface_loader,
        })
    }

    pub fn get_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
    }

    pub fn get_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, vk::Result> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
    }

    pub fn get_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, vk::Result> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
    }

    ///Tries to read the current surface extent. Returns `None` if the platform leaves the choice to the
    /// swapchain (Wayland reports `u32::MAX`), or the surface is minimized.
    pub fn get_current_extent(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Extent2D> {
        let extent = self.get_capabilities(physical_device).ok()?.current_extent;
        match extent {
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            } => None,
            vk::Extent2D { width, height } if width == 0 || height == 0 => None,
            extent => Some(extent),
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}
