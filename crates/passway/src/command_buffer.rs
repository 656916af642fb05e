use std::sync::Arc;

use ash::vk;

use crate::context::Device;

pub struct CommandPool {
    ///Device this pool was created on.
    pub device: Arc<Device>,
    ///The queue family this pool's buffers can be used on.
    pub queue_family: u32,
    pub inner: vk::CommandPool,
    pub can_reset_buffer: bool,
}

impl CommandPool {
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Arc<Self>, vk::Result> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(queue_family);

        let pool = unsafe { device.inner.create_command_pool(&create_info, None)? };

        Ok(Arc::new(CommandPool {
            device: device.clone(),
            inner: pool,
            queue_family,
            can_reset_buffer: flags.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
        }))
    }

    ///Allocates a single primary command buffer.
    pub fn allocate_buffer(self: &Arc<Self>) -> Result<CommandBuffer, vk::Result> {
        let buffers = unsafe {
            self.device.inner.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(self.inner)
                    .command_buffer_count(1)
                    .level(vk::CommandBufferLevel::PRIMARY),
            )?
        };

        let inner = buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;

        Ok(CommandBuffer {
            pool: self.clone(),
            inner,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_command_pool(self.inner, None) }
    }
}

pub struct CommandBuffer {
    ///Pool this command buffer was created from. Used for reset operations, and freeing on drop.
    pub pool: Arc<CommandPool>,
    pub inner: vk::CommandBuffer,
}

impl CommandBuffer {
    ///Resets the buffer into the initial state. Fails with `ERROR_FEATURE_NOT_PRESENT` if the pool was created
    /// without `RESET_COMMAND_BUFFER`.
    pub fn reset(&mut self, release_resources: bool) -> Result<(), vk::Result> {
        if !self.pool.can_reset_buffer {
            return Err(vk::Result::ERROR_FEATURE_NOT_PRESENT);
        }
        let flags = if release_resources {
            vk::CommandBufferResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandBufferResetFlags::empty()
        };
        unsafe {
            self.pool
                .device
                .inner
                .reset_command_buffer(self.inner, flags)
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.pool.device
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .device
                .inner
                .free_command_buffers(self.pool.inner, core::slice::from_ref(&self.inner))
        }
    }
}
