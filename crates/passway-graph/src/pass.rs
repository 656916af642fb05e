//! # Passes
//!
//! A [PassDescriptor] is the static description of one unit of work. It names the attachments it touches,
//! the layout each of them must be in while the pass runs (entry) and after it (exit), and how render targets are
//! loaded and stored. The actual commands are recorded by a closure that is called every time the graph is
//! recorded.

use std::any::Any;

use passway::{ash::vk, layout::Layout};
use passway_commands::{BlitDesc, ClearValue, CommandRecorder};
use smallvec::SmallVec;

use crate::graph::AttachmentKey;

///Kind of technique a pass implements. Mostly used to find payloads and for debugging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    ///Renders (parts of) the scene into offscreen targets.
    Offscreen,
    ///Renders into several targets at once.
    GeometryBuffer,
    Blur,
    Blit,
    Skybox,
    Scene,
    ///Combines earlier results into the final image.
    Composite,
}

///How a render target is initialised when a pass begins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoadPolicy {
    Clear(ClearValue),
    ///Keep the current content.
    Load,
    DontCare,
}

impl LoadPolicy {
    pub fn load_op(&self) -> vk::AttachmentLoadOp {
        match self {
            LoadPolicy::Clear(_) => vk::AttachmentLoadOp::CLEAR,
            LoadPolicy::Load => vk::AttachmentLoadOp::LOAD,
            LoadPolicy::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }

    ///True if the old content of the target is discarded.
    pub fn discards(&self) -> bool {
        !matches!(self, LoadPolicy::Load)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorePolicy {
    Store,
    DontCare,
}

impl StorePolicy {
    pub fn store_op(&self) -> vk::AttachmentStoreOp {
        match self {
            StorePolicy::Store => vk::AttachmentStoreOp::STORE,
            StorePolicy::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

///Combined image sampler descriptor that is kept pointing at an attachment, even after it was recreated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub set: vk::DescriptorSet,
    pub binding: u32,
}

///One attachment a pass touches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentUse {
    pub attachment: AttachmentKey,
    pub access: Access,
    ///Layout the attachment must be in while the pass runs.
    pub entry: Layout,
    ///Layout the attachment is left in. Equal to `entry` unless changed.
    pub exit: Layout,
    pub load: LoadPolicy,
    pub store: StorePolicy,
    pub binding: Option<DescriptorBinding>,
}

impl AttachmentUse {
    pub fn is_color_target(&self) -> bool {
        self.access == Access::Write && self.entry == Layout::ColorAttachment
    }

    pub fn is_depth_target(&self) -> bool {
        self.access == Access::Write && self.entry == Layout::DepthStencilAttachment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassMode {
    ///Commands run inside a dynamic rendering scope over the pass's color and depth targets.
    Render,
    ///Blits and copies, no rendering scope.
    Transfer,
}

pub type RecordFn = Box<dyn FnMut(&mut PassContext<'_>) -> anyhow::Result<()> + Send>;

pub struct PassDescriptor {
    pub name: String,
    pub kind: PassKind,
    pub mode: PassMode,
    pub uses: SmallVec<[AttachmentUse; 4]>,
    pub(crate) record: Option<RecordFn>,
    pub(crate) payload: Option<Box<dyn Any + Send>>,
    pub enabled: bool,
}

impl std::fmt::Debug for PassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("uses", &self.uses)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl PassDescriptor {
    fn new(name: impl Into<String>, kind: PassKind, mode: PassMode) -> Self {
        PassDescriptor {
            name: name.into(),
            kind,
            mode,
            uses: SmallVec::new(),
            record: None,
            payload: None,
            enabled: true,
        }
    }

    ///A pass that renders into its color and depth targets.
    pub fn render(name: impl Into<String>, kind: PassKind) -> Self {
        Self::new(name, kind, PassMode::Render)
    }

    pub fn transfer(name: impl Into<String>, kind: PassKind) -> Self {
        Self::new(name, kind, PassMode::Transfer)
    }

    ///Blits `src` into `dst` with `filter`, converting format and size. `dst` is left in `ShaderReadOnly`
    /// so it can be sampled afterwards.
    pub fn blit(
        name: impl Into<String>,
        src: AttachmentKey,
        dst: AttachmentKey,
        filter: vk::Filter,
    ) -> Self {
        Self::transfer(name, PassKind::Blit)
            .read(src, Layout::TransferSrc)
            .write(dst, Layout::TransferDst, LoadPolicy::DontCare)
            .exit_layout(dst, Layout::ShaderReadOnly)
            .record(move |ctx| ctx.blit(src, dst, filter))
    }

    fn push_use(
        mut self,
        attachment: AttachmentKey,
        access: Access,
        entry: Layout,
        load: LoadPolicy,
        binding: Option<DescriptorBinding>,
    ) -> Self {
        self.uses.push(AttachmentUse {
            attachment,
            access,
            entry,
            exit: entry,
            load,
            store: StorePolicy::Store,
            binding,
        });
        self
    }

    pub fn write_color(self, attachment: AttachmentKey, load: LoadPolicy) -> Self {
        self.push_use(attachment, Access::Write, Layout::ColorAttachment, load, None)
    }

    pub fn write_depth(self, attachment: AttachmentKey, load: LoadPolicy) -> Self {
        self.push_use(
            attachment,
            Access::Write,
            Layout::DepthStencilAttachment,
            load,
            None,
        )
    }

    ///Samples `attachment` in the fragment shader. If `binding` is set, the descriptor is (re)written whenever the
    /// attachment is created.
    pub fn sample(self, attachment: AttachmentKey, binding: Option<DescriptorBinding>) -> Self {
        self.push_use(
            attachment,
            Access::Read,
            Layout::ShaderReadOnly,
            LoadPolicy::Load,
            binding,
        )
    }

    pub fn read(self, attachment: AttachmentKey, layout: Layout) -> Self {
        self.push_use(attachment, Access::Read, layout, LoadPolicy::Load, None)
    }

    pub fn write(self, attachment: AttachmentKey, layout: Layout, load: LoadPolicy) -> Self {
        self.push_use(attachment, Access::Write, layout, load, None)
    }

    ///Sets the layout `attachment` is left in after the pass.
    pub fn exit_layout(mut self, attachment: AttachmentKey, layout: Layout) -> Self {
        for u in self.uses.iter_mut().filter(|u| u.attachment == attachment) {
            u.exit = layout;
        }
        self
    }

    pub fn store(mut self, attachment: AttachmentKey, store: StorePolicy) -> Self {
        for u in self.uses.iter_mut().filter(|u| u.attachment == attachment) {
            u.store = store;
        }
        self
    }

    ///Sets the closure that records the pass's commands.
    pub fn record<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut PassContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.record = Some(Box::new(f));
        self
    }

    pub fn with_payload<T: Any + Send>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref())
    }

    pub(crate) fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.as_mut().and_then(|p| p.downcast_mut())
    }

    pub fn reads(&self, attachment: AttachmentKey) -> bool {
        self.uses
            .iter()
            .any(|u| u.attachment == attachment && u.access == Access::Read)
    }

    pub fn writes(&self, attachment: AttachmentKey) -> bool {
        self.uses
            .iter()
            .any(|u| u.attachment == attachment && u.access == Access::Write)
    }
}

///Everything a record closure may know about an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub key: AttachmentKey,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: Option<vk::Sampler>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    ///The layout the attachment is in while the pass runs.
    pub layout: Layout,
}

impl ResolvedAttachment {
    pub fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

///Handed to a pass's record closure.
pub struct PassContext<'a> {
    pub recorder: &'a mut dyn CommandRecorder,
    pub(crate) pass: &'a str,
    pub(crate) attachments: &'a [ResolvedAttachment],
    pub(crate) payload: Option<&'a (dyn Any + Send)>,
    pub(crate) extent: vk::Extent2D,
}

impl PassContext<'_> {
    pub fn pass_name(&self) -> &str {
        self.pass
    }

    ///Render area of the pass. For transfer passes the extent of the first attachment.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn attachment(&self, key: AttachmentKey) -> Option<&ResolvedAttachment> {
        self.attachments.iter().find(|a| a.key == key)
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.and_then(|p| p.downcast_ref())
    }

    ///Blits the whole of `src` into `dst`. Both must be declared by the pass, `src` in `TransferSrc` and `dst` in
    /// `TransferDst`.
    pub fn blit(
        &mut self,
        src: AttachmentKey,
        dst: AttachmentKey,
        filter: vk::Filter,
    ) -> anyhow::Result<()> {
        let (src, dst) = match (self.attachment(src), self.attachment(dst)) {
            (Some(s), Some(d)) => (*s, *d),
            _ => anyhow::bail!("blit attachments are not declared by pass \"{}\"", self.pass),
        };
        if src.layout != Layout::TransferSrc || dst.layout != Layout::TransferDst {
            anyhow::bail!(
                "blit needs TransferSrc -> TransferDst, got {:?} -> {:?}",
                src.layout,
                dst.layout
            );
        }

        self.recorder.blit_image(&BlitDesc {
            src_image: src.image,
            src_extent: src.extent,
            src_subresource: src.subresource_layers(),
            dst_image: dst.image,
            dst_extent: dst.extent,
            dst_subresource: dst.subresource_layers(),
            filter,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn blit_reads_source_and_returns_target_to_sampling() {
        let mut keys = SlotMap::<AttachmentKey, ()>::with_key();
        let src = keys.insert(());
        let dst = keys.insert(());

        let pass = PassDescriptor::blit("blit", src, dst, vk::Filter::LINEAR);
        assert_eq!(pass.mode, PassMode::Transfer);
        assert!(pass.reads(src) && !pass.writes(src));
        assert!(pass.writes(dst));

        let dst_use = pass.uses.iter().find(|u| u.attachment == dst).unwrap();
        assert_eq!(dst_use.entry, Layout::TransferDst);
        assert_eq!(dst_use.exit, Layout::ShaderReadOnly);
        assert!(pass.record.is_some());
    }

    #[test]
    fn payload_is_typed() {
        let pass = PassDescriptor::render("blur", PassKind::Blur).with_payload(1.5f32);
        assert_eq!(pass.payload::<f32>(), Some(&1.5));
        assert_eq!(pass.payload::<u32>(), None);
    }

    #[test]
    fn load_policies_map_to_ops() {
        assert_eq!(
            LoadPolicy::Clear(ClearValue::BLACK).load_op(),
            vk::AttachmentLoadOp::CLEAR
        );
        assert!(!LoadPolicy::Load.discards());
        assert!(LoadPolicy::DontCare.discards());
    }
}
