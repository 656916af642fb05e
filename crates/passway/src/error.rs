use std::{fmt, time::Duration};

use ash::{LoadingError, vk};

use thiserror::Error;

use crate::layout::Layout;

///Raised whenever the device rejects an image, view, sampler or memory request.
#[derive(Error, Debug)]
pub enum ResourceCreationError {
    #[error("Format {format:?} does not support {features:?} (needed by attachment \"{name}\")")]
    UnsupportedFormat {
        name: String,
        format: vk::Format,
        features: vk::FormatFeatureFlags,
    },
    #[error("Attachment \"{name}\" can't have a extent of 0 on either axis, was: {extent:?}")]
    ZeroExtent { name: String, extent: vk::Extent2D },
    #[error("Failed to create {object} for attachment \"{name}\": {result}")]
    Vk {
        name: String,
        object: &'static str,
        #[source]
        result: vk::Result,
    },
    #[error("Failed to allocate memory for attachment \"{name}\": {message}")]
    Allocation { name: String, message: String },
}

///A layout transition was requested that has no valid access/stage mapping. Always a bug in the
/// pass setup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    #[error("No transition from {from:?} to {to:?} exists for attachment \"{attachment}\"")]
    NoMapping {
        attachment: String,
        from: Layout,
        to: Layout,
    },
    #[error("Attachment \"{attachment}\" was destroyed, can't transition it to {to:?}")]
    Destroyed { attachment: String, to: Layout },
}

///Operation that was waited on when a [SynchronizationTimeoutError] occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOperation {
    AcquireImage,
    FenceWait,
    DeviceIdle,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::AcquireImage => write!(f, "swapchain image acquire"),
            SyncOperation::FenceWait => write!(f, "fence wait"),
            SyncOperation::DeviceIdle => write!(f, "device idle wait"),
        }
    }
}

///A bounded wait did not finish in time, or the device got lost while waiting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} did not finish within {timeout:?}: {result}")]
pub struct SynchronizationTimeoutError {
    pub operation: SyncOperation,
    pub timeout: Duration,
    #[source]
    pub result: vk::Result,
}

impl SynchronizationTimeoutError {
    pub fn new(operation: SyncOperation, timeout: Duration, result: vk::Result) -> Self {
        SynchronizationTimeoutError {
            operation,
            timeout,
            result,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Extension {0} is not supported by device")]
    UnsupportedExtension(String),
    #[error("No physical device found. Is a Vulkan capable GPU and driver installed?")]
    NoPhysicalDevice,
    #[error("No graphics queue family found on the selected device")]
    NoGraphicsQueue,
    #[error("Swapchain can't have a extent of 0 on either axis, was: {0:?}")]
    InvalidSwapchainSize(vk::Extent2D),
    #[error("GpuAllocator error: {0}")]
    GpuAllocatorError(#[from] gpu_allocator::AllocationError),
    #[error("Vulkan error: {0}")]
    VkError(#[from] vk::Result),
}

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Vulkan error: {0}")]
    VkError(#[from] vk::Result),
    #[error("Failed to load Vulkan entry point: {0}")]
    EntryLoading(#[from] LoadingError),
    #[error("Instance layer {0:?} is not available")]
    MissingLayer(std::ffi::CString),
    #[error("Instance extension {0:?} is not available")]
    MissingExtension(std::ffi::CString),
    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

#[derive(Error, Debug)]
pub enum PasswayError {
    #[error("Device error: {0}")]
    DeviceError(#[from] DeviceError),
    #[error("Instance error: {0}")]
    InstanceError(#[from] InstanceError),
    #[error("Resource creation error: {0}")]
    ResourceCreationError(#[from] ResourceCreationError),
    #[error("Barrier error: {0}")]
    BarrierError(#[from] BarrierError),
    #[error("Synchronization error: {0}")]
    SynchronizationTimeoutError(#[from] SynchronizationTimeoutError),
}

#[cfg(test)]
mod test {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(ResourceCreationError: Send, Sync);
        assert_impl_all!(BarrierError: Send, Sync);
        assert_impl_all!(SynchronizationTimeoutError: Send, Sync);
        assert_impl_all!(DeviceError: Send, Sync);
        assert_impl_all!(InstanceError: Send, Sync);
        assert_impl_all!(PasswayError: Send, Sync);
    }

    #[test]
    fn messages_name_the_failing_object() {
        let err = BarrierError::NoMapping {
            attachment: "bloom color".to_owned(),
            from: Layout::ShaderReadOnly,
            to: Layout::Undefined,
        };
        let msg = err.to_string();
        assert!(msg.contains("bloom color"));
        assert!(msg.contains("ShaderReadOnly"));

        let err = SynchronizationTimeoutError::new(
            SyncOperation::FenceWait,
            Duration::from_millis(100),
            vk::Result::TIMEOUT,
        );
        assert!(err.to_string().starts_with("fence wait"));
    }
}
