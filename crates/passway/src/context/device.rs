use std::{ffi::CStr, sync::Arc};

use ash::vk;

use crate::{context::Instance, error::DeviceError};

///Queue handle together with its family.
#[derive(Clone, Debug)]
pub struct Queue {
    pub inner: vk::Queue,
    pub family_index: u32,
    pub properties: vk::QueueFamilyProperties,
}

///Physical device and graphics queue family a [Device] will be created for.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_family: u32,
    pub queue_properties: vk::QueueFamilyProperties,
}

impl PhysicalDeviceChoice {
    ///Picks the first graphics capable device. If a surface is given, the graphics family must also be able to
    /// present to it. Discrete GPUs are preferred.
    pub fn select(
        instance: &Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> Result<Self, DeviceError> {
        let devices = unsafe { instance.inner.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(DeviceError::NoPhysicalDevice);
        }

        let mut candidates = Vec::with_capacity(devices.len());
        for phydev in devices {
            let properties = unsafe { instance.inner.get_physical_device_properties(phydev) };
            let families = unsafe {
                instance
                    .inner
                    .get_physical_device_queue_family_properties(phydev)
            };

            let family = families.iter().enumerate().find(|(idx, props)| {
                if !props.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    return false;
                }
                match surface {
                    Some((loader, surface)) => unsafe {
                        loader
                            .get_physical_device_surface_support(phydev, *idx as u32, surface)
                            .unwrap_or(false)
                    },
                    None => true,
                }
            });

            if let Some((idx, queue_properties)) = family {
                candidates.push(PhysicalDeviceChoice {
                    physical_device: phydev,
                    properties,
                    queue_family: idx as u32,
                    queue_properties: *queue_properties,
                });
            }
        }

        candidates.sort_by_key(|c| match c.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            _ => 2,
        });

        let choice = candidates
            .into_iter()
            .next()
            .ok_or(DeviceError::NoGraphicsQueue)?;

        #[cfg(feature = "logging")]
        log::info!(
            "Selected {:?} with queue family {}",
            choice.properties.device_name_as_c_str().unwrap_or(c"unknown"),
            choice.queue_family
        );

        Ok(choice)
    }
}

///Logical device. Keeps the instance alive and destroys itself when dropped.
pub struct Device {
    pub inner: ash::Device,
    pub instance: Arc<Instance>,
    pub physical_device: vk::PhysicalDevice,
    pub queues: Vec<Queue>,
}

impl Device {
    ///Creates the device with a single queue of the chosen family. Dynamic rendering and synchronization2 are
    /// always enabled, `extensions` are checked for support first.
    pub fn new(
        instance: Arc<Instance>,
        choice: &PhysicalDeviceChoice,
        extensions: &[&'static CStr],
    ) -> Result<Arc<Self>, DeviceError> {
        let supported = unsafe {
            instance
                .inner
                .enumerate_device_extension_properties(choice.physical_device)?
        };
        for ext in extensions {
            let is_supported = supported.iter().any(|s| {
                s.extension_name_as_c_str()
                    .map(|name| name == *ext)
                    .unwrap_or(false)
            });
            if !is_supported {
                return Err(DeviceError::UnsupportedExtension(
                    ext.to_string_lossy().into_owned(),
                ));
            }
        }

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(choice.queue_family)
            .queue_priorities(&priorities);
        let extension_names = extensions.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();

        let mut vk13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(core::slice::from_ref(&queue_info))
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut vk13);

        let inner = unsafe {
            instance
                .inner
                .create_device(choice.physical_device, &create_info, None)?
        };

        let queue = Queue {
            inner: unsafe { inner.get_device_queue(choice.queue_family, 0) },
            family_index: choice.queue_family,
            properties: choice.queue_properties,
        };

        Ok(Arc::new(Device {
            inner,
            instance,
            physical_device: choice.physical_device,
            queues: vec![queue],
        }))
    }

    ///Returns the first queue for the given family, if there is any.
    pub fn get_first_queue_for_family(&self, family: u32) -> Option<&Queue> {
        self.queues.iter().find(|q| q.family_index == family)
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .inner
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { self.inner.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Device: Send, Sync);
        assert_impl_all!(Queue: Send, Sync);
    }
}
