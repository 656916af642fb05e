//! # Passway
//!
//! Vulkan foundation for multi-pass offscreen rendering. This crate provides self destroying wrappers around the
//! objects a frame loop needs ([Instance](context::Instance), [Device](context::Device),
//! [Swapchain](swapchain::Swapchain), [Semaphore](sync::Semaphore) and [Fence](sync::Fence)), the [layout] table
//! that maps attachment states to access masks and pipeline stages, and the [GpuDevice](device::GpuDevice) seam
//! attachments are created through.
//!
//! The pass graph itself lives in `passway-graph`, command recording in `passway-commands`.
//!
//! # Usage
//!
//! Create a [RenderContext](context::RenderContext), either headless or for a window. Everything that allocates
//! image memory goes through its [GpuDevice](device::GpuDevice) implementation. For dry runs and tests the
//! [NullDevice](null_device::NullDevice) can be used instead.

pub use ash;
pub use gpu_allocator;

///Instance, device and allocator setup. See [RenderContext](context::RenderContext).
pub mod context;

///The narrow device interface attachments are created through.
pub mod device;

///Attachment layouts and the barrier scopes between them.
pub mod layout;

///A device that hands out synthetic handles. Used for dry runs.
pub mod null_device;

///Window surface handling.
pub mod surface;

///[Swapchain](swapchain::Swapchain) that can be created from a [Surface](surface::Surface).
pub mod swapchain;

///Vulkan synchronisation primitives
pub mod sync;

///Command pool and buffer wrappers.
pub mod command_buffer;

mod error;
pub use error::{
    BarrierError, DeviceError, InstanceError, PasswayError, ResourceCreationError, SyncOperation,
    SynchronizationTimeoutError,
};

///Viewport and offset helpers.
pub mod util;
