//! # Passway-Graph
//!
//! Declarative multi-pass rendering on top of passway. A technique is described as a set of passes and the
//! attachments they read and write. The crate derives the execution order, the layout transitions between passes
//! and keeps all attachments alive, sized and bound across frames.
//!
//! ```ignore
//! let mut builder = GraphBuilder::new(&device, extent);
//! let scene = builder.attachment(AttachmentInfo::color("scene", format, AttachmentSize::Swapchain));
//! let backbuffer = builder.backbuffer(swapchain_format);
//! builder
//!     .add_pass(PassDescriptor::render("scene", PassKind::Scene).write_color(scene, LoadPolicy::Clear(ClearValue::BLACK)))
//!     .add_pass(PassDescriptor::render("present", PassKind::Composite).sample(scene, Some(binding)).write_color(backbuffer, LoadPolicy::DontCare));
//!
//! let mut frames = FrameOrchestrator::new(backend, builder.build()?, FrameConfig::default())?;
//! loop {
//!     match frames.render_frame() {
//!         Err(FrameError::SurfaceOutOfDate) => { frames.handle_resize(window_extent)?; }
//!         other => { other?; }
//!     }
//! }
//! ```
//!
//! Recording goes through [passway_commands::CommandRecorder], so a graph can also be executed into a
//! [CommandLog](passway_commands::CommandLog) on a [NullDevice](passway::null_device::NullDevice) to inspect the
//! barriers it produces.

mod error;
pub use error::{FrameError, GraphError};

pub mod attachment;
pub use attachment::{Attachment, AttachmentInfo, AttachmentSize};

pub mod pass;
pub use pass::{
    Access, AttachmentUse, DescriptorBinding, LoadPolicy, PassContext, PassDescriptor, PassKind,
    PassMode, ResolvedAttachment, StorePolicy,
};

pub mod graph;
pub use graph::{AttachmentKey, Framebuffer, GraphBuilder, PassGraph};

mod executor;
pub use executor::{ExecutionReport, Executor};

pub mod backend;
pub use backend::{AcquiredImage, FrameBackend, PresentOutcome, VulkanBackend};

pub mod null_backend;

mod frame;
pub use frame::{FrameConfig, FrameOrchestrator, FrameReport, FrameState};
