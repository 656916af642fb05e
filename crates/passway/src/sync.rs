//! # Synchronisation
//!
//! Thin self destroying wrappers around the two primitives the frame loop needs.
//!
//! - [Semaphore]: binary semaphore. Orders GPU work against swapchain acquire and present. The acquire operation
//!   signals one, the frame's submission waits on it and signals the render-complete semaphore, which in turn is
//!   waited on by present.
//! - [Fence]: signals the host that a submission has finished. Command buffers and the attachments they reference
//!   are only touched again after their fence was signaled.
//!
//! All layout and access ordering *within* a frame is expressed with pipeline barriers. See the `layout` module.

use std::{fmt::Debug, sync::Arc};

use ash::vk;

use crate::context::Device;

///Binary semaphore.
pub struct Semaphore {
    pub inner: vk::Semaphore,
    pub device: Arc<Device>,
}

impl Semaphore {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Self>, vk::Result> {
        let ci = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.inner.create_semaphore(&ci, None)? };

        Ok(Arc::new(Semaphore {
            inner: semaphore,
            device: device.clone(),
        }))
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_semaphore(self.inner, None) }
    }
}

impl Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

///Host visible completion signal of a queue submission.
pub struct Fence {
    pub inner: vk::Fence,
    pub device: Arc<Device>,
}

impl Fence {
    ///Creates a new fence. If `signaled` is set, the first wait returns immediately.
    pub fn new(device: &Arc<Device>, signaled: bool) -> Result<Self, vk::Result> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            device
                .inner
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };

        Ok(Fence {
            inner: fence,
            device: device.clone(),
        })
    }

    ///Blocks until the fence is signaled or `timeout` nanoseconds have passed. A timeout
    /// is reported as `Err(vk::Result::TIMEOUT)`.
    pub fn wait(&self, timeout: u64) -> Result<(), vk::Result> {
        unsafe {
            self.device
                .inner
                .wait_for_fences(core::slice::from_ref(&self.inner), true, timeout)
        }
    }

    ///Returns true if the fence is signaled.
    pub fn status(&self) -> Result<bool, vk::Result> {
        unsafe { self.device.inner.get_fence_status(self.inner) }
    }

    pub fn reset(&self) -> Result<(), vk::Result> {
        unsafe {
            self.device
                .inner
                .reset_fences(core::slice::from_ref(&self.inner))
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if let Ok(false) = self.status() {
            #[cfg(feature = "logging")]
            log::warn!("Dropping unsignaled fence, blocking in drop implementation!");

            if let Err(e) = self.wait(u64::MAX) {
                #[cfg(feature = "logging")]
                log::error!("Failed to wait for fence on drop: {}", e);
                #[cfg(not(feature = "logging"))]
                let _ = e;
            }
        }
        unsafe { self.device.inner.destroy_fence(self.inner, None) }
    }
}

impl Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Semaphore: Send, Sync);
        assert_impl_all!(Fence: Send, Sync);
    }
}
