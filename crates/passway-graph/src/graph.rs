//! # Pass graph
//!
//! Passes are declared on a [GraphBuilder] together with the attachments they use. Building the graph
//!
//! 1. validates every pass (known attachments, no read/write aliasing, layouts that fit the attachment's format),
//! 2. derives the dependency edges: a reader follows the writer declared last before it, and the next writer of
//!    the same attachment waits for that writer and all of its readers,
//! 3. rejects cycles,
//! 4. creates all attachments, the per-pass framebuffers and writes the sampled image descriptors.
//!
//! The resulting [PassGraph] owns all attachments and persists across frames. Execution order is a stable
//! topological order: passes keep their declared order wherever the edges allow it.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::Arc,
};

use ahash::AHashMap;
use passway::{
    ash::vk,
    device::{GpuDevice, SampledImageWrite},
    layout::Layout,
};
use passway_commands::{BarrierBuilder, CommandRecorder};
use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

use crate::{
    GraphError,
    attachment::{Attachment, AttachmentInfo, AttachmentSize},
    pass::{PassDescriptor, PassMode},
};

slotmap::new_key_type!(
    ///Key of an attachment within its graph.
    pub struct AttachmentKey;
);

///Color and depth targets of a render pass, resolved against the current attachments.
#[derive(Clone, Debug, PartialEq)]
pub struct Framebuffer {
    pub color: SmallVec<[AttachmentKey; 4]>,
    pub depth: Option<AttachmentKey>,
    pub extent: vk::Extent2D,
}

pub(crate) struct AttachmentSlot<D: GpuDevice> {
    pub(crate) info: AttachmentInfo,
    pub(crate) attachment: Attachment<D>,
    pub(crate) is_backbuffer: bool,
}

fn create_attachment<D: GpuDevice>(
    device: &Arc<D>,
    info: &AttachmentInfo,
    swapchain_extent: vk::Extent2D,
) -> Result<Attachment<D>, GraphError> {
    let attachment = Attachment::create(device, info.name.clone(), &info.image_info(swapchain_extent))?;
    match &info.sampler {
        Some(sampler) => Ok(attachment.with_sampler(sampler)?),
        None => Ok(attachment),
    }
}

fn unbound_backbuffer<D: GpuDevice>(
    device: &Arc<D>,
    info: &AttachmentInfo,
    extent: vk::Extent2D,
) -> Attachment<D> {
    Attachment::imported(
        device,
        info.name.clone(),
        vk::Image::null(),
        vk::ImageView::null(),
        &info.image_info(extent),
    )
}

///Collects attachments and passes before the graph is built.
pub struct GraphBuilder<D: GpuDevice> {
    device: Arc<D>,
    extent: vk::Extent2D,
    attachments: SlotMap<AttachmentKey, AttachmentInfo>,
    backbuffer: Option<AttachmentKey>,
    passes: Vec<PassDescriptor>,
}

impl<D: GpuDevice> GraphBuilder<D> {
    ///Starts a graph whose swapchain-sized attachments have `extent`.
    pub fn new(device: &Arc<D>, extent: vk::Extent2D) -> Self {
        GraphBuilder {
            device: device.clone(),
            extent,
            attachments: SlotMap::with_key(),
            backbuffer: None,
            passes: Vec::new(),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    ///Declares an attachment that is created when the graph is built.
    pub fn attachment(&mut self, info: AttachmentInfo) -> AttachmentKey {
        self.attachments.insert(info)
    }

    ///Declares the presented image. It is bound per frame via [PassGraph::bind_backbuffer] and
    /// transitioned to `Present` after the last pass.
    pub fn backbuffer(&mut self, format: vk::Format) -> AttachmentKey {
        if let Some(key) = self.backbuffer {
            return key;
        }
        let key = self.attachments.insert(AttachmentInfo {
            name: "backbuffer".to_owned(),
            format,
            size: AttachmentSize::Swapchain,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            sampler: None,
            initial_layout: None,
        });
        self.backbuffer = Some(key);
        key
    }

    ///Appends a pass. Declaration order is the execution order wherever dependencies allow it.
    pub fn add_pass(&mut self, pass: PassDescriptor) -> &mut Self {
        self.passes.push(pass);
        self
    }

    fn validate(&self) -> Result<(), GraphError> {
        let mut names = AHashMap::default();
        for info in self.attachments.values() {
            if names.insert(info.name.as_str(), ()).is_some() {
                return Err(GraphError::DuplicateName(info.name.clone()));
            }
        }
        let mut pass_names = AHashMap::default();
        for pass in &self.passes {
            if pass_names.insert(pass.name.as_str(), ()).is_some() {
                return Err(GraphError::DuplicateName(pass.name.clone()));
            }
        }

        for pass in &self.passes {
            for u in &pass.uses {
                let Some(info) = self.attachments.get(u.attachment) else {
                    return Err(GraphError::UnknownAttachment {
                        pass: pass.name.clone(),
                    });
                };

                if pass.reads(u.attachment) && pass.writes(u.attachment) {
                    return Err(GraphError::ReadWriteAlias {
                        pass: pass.name.clone(),
                        attachment: info.name.clone(),
                    });
                }

                let aspect = passway::layout::format_aspect(info.format);
                for layout in [u.entry, u.exit] {
                    if layout == Layout::Undefined || !layout.supports_aspect(aspect) {
                        return Err(GraphError::UnsupportedLayout {
                            pass: pass.name.clone(),
                            attachment: info.name.clone(),
                            layout,
                        });
                    }
                }

                if u.binding.is_some() && info.sampler.is_none() {
                    return Err(GraphError::MissingSampler {
                        pass: pass.name.clone(),
                        attachment: info.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    ///Builds the dependency graph. Node weights are pass indices.
    ///
    /// Per attachment, every write starts a new version. A reader consumes the version of the last writer declared
    /// before it, or the first version if no writer precedes it. Each version must be done being read before the
    /// next one is written.
    fn dependencies(&self) -> DiGraph<usize, AttachmentKey> {
        let mut graph = DiGraph::with_capacity(self.passes.len(), self.passes.len());
        let nodes = (0..self.passes.len())
            .map(|idx| graph.add_node(idx))
            .collect::<Vec<_>>();

        for key in self.attachments.keys() {
            let mut versions: SmallVec<[(usize, SmallVec<[usize; 4]>); 4]> = SmallVec::new();
            let mut early_readers = SmallVec::<[usize; 4]>::new();
            for (idx, pass) in self.passes.iter().enumerate() {
                if pass.writes(key) {
                    versions.push((idx, SmallVec::new()));
                } else if pass.reads(key) {
                    match versions.last_mut() {
                        Some((_, readers)) => readers.push(idx),
                        None => early_readers.push(idx),
                    }
                }
            }
            if let Some((_, readers)) = versions.first_mut() {
                readers.extend(early_readers);
            }

            for (writer, readers) in &versions {
                for reader in readers {
                    graph.update_edge(nodes[*writer], nodes[*reader], key);
                }
            }
            for pair in versions.windows(2) {
                let (prev, readers) = &pair[0];
                let (next, _) = &pair[1];
                graph.update_edge(nodes[*prev], nodes[*next], key);
                for reader in readers {
                    graph.update_edge(nodes[*reader], nodes[*next], key);
                }
            }
        }

        graph
    }

    pub fn build(self) -> Result<PassGraph<D>, GraphError> {
        self.validate()?;

        let dependencies = self.dependencies();
        if let Err(cycle) = toposort(&dependencies, None) {
            let pass = dependencies[cycle.node_id()];
            return Err(GraphError::Cycle {
                pass: self.passes[pass].name.clone(),
            });
        }

        let GraphBuilder {
            device,
            extent,
            attachments: infos,
            backbuffer,
            passes,
        } = self;

        let mut attachments = SecondaryMap::with_capacity(infos.len());
        for (key, info) in infos {
            let is_backbuffer = Some(key) == backbuffer;
            let attachment = if is_backbuffer {
                unbound_backbuffer(&device, &info, extent)
            } else {
                create_attachment(&device, &info, extent)?
            };
            attachments.insert(
                key,
                AttachmentSlot {
                    info,
                    attachment,
                    is_backbuffer,
                },
            );
        }

        let pass_names = passes
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.name.clone(), idx))
            .collect();

        let mut graph = PassGraph {
            framebuffers: vec![None; passes.len()],
            device,
            extent,
            attachments,
            backbuffer,
            passes,
            pass_names,
            dependencies,
            order: Vec::new(),
            generation: 0,
            needs_initialization: true,
        };
        graph.compute_order();
        graph.rebuild_framebuffers()?;
        graph.write_descriptors();

        #[cfg(feature = "logging")]
        log::info!(
            "Built pass graph with {} attachments, order: {:?}",
            graph.attachments.len(),
            graph.order_names()
        );

        Ok(graph)
    }
}

///Owns the attachments and passes of one rendering technique. Created by [GraphBuilder::build].
pub struct PassGraph<D: GpuDevice> {
    device: Arc<D>,
    extent: vk::Extent2D,
    pub(crate) attachments: SecondaryMap<AttachmentKey, AttachmentSlot<D>>,
    backbuffer: Option<AttachmentKey>,
    pub(crate) passes: Vec<PassDescriptor>,
    pass_names: AHashMap<String, usize>,
    dependencies: DiGraph<usize, AttachmentKey>,
    order: Vec<usize>,
    pub(crate) framebuffers: Vec<Option<Framebuffer>>,
    generation: u64,
    needs_initialization: bool,
}

impl<D: GpuDevice> PassGraph<D> {
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    ///Extent of swapchain-sized attachments.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    ///Changes whenever recorded commands of this graph become invalid.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    ///Marks all recordings of this graph invalid.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    ///Pass indices of all enabled passes in execution order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn order_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|idx| self.passes[*idx].name.as_str())
            .collect()
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    pub fn pass(&self, name: &str) -> Option<&PassDescriptor> {
        self.pass_names.get(name).map(|idx| &self.passes[*idx])
    }

    pub fn attachment(&self, key: AttachmentKey) -> Option<&Attachment<D>> {
        self.attachments.get(key).map(|s| &s.attachment)
    }

    pub fn attachment_by_name(&self, name: &str) -> Option<(AttachmentKey, &Attachment<D>)> {
        self.attachments
            .iter()
            .find(|(_, s)| s.info.name == name)
            .map(|(k, s)| (k, &s.attachment))
    }

    pub fn attachment_info(&self, key: AttachmentKey) -> Option<&AttachmentInfo> {
        self.attachments.get(key).map(|s| &s.info)
    }

    pub fn layout(&self, key: AttachmentKey) -> Option<Layout> {
        self.attachments.get(key).map(|s| s.attachment.layout())
    }

    pub fn backbuffer(&self) -> Option<AttachmentKey> {
        self.backbuffer
    }

    pub fn framebuffer(&self, pass: usize) -> Option<&Framebuffer> {
        self.framebuffers.get(pass).and_then(|f| f.as_ref())
    }

    ///Snapshot of every attachment's current layout.
    pub fn layouts(&self) -> Vec<(AttachmentKey, Layout)> {
        self.attachments
            .iter()
            .map(|(k, s)| (k, s.attachment.layout()))
            .collect()
    }

    ///Sets the tracked layouts without recording barriers. Used after replaying a recording that performed
    /// those transitions.
    pub fn assume_layouts(&mut self, layouts: &[(AttachmentKey, Layout)]) {
        for (key, layout) in layouts {
            if let Some(slot) = self.attachments.get_mut(*key) {
                slot.attachment.assume_layout(*layout);
            }
        }
    }

    ///True if [initialize](Self::initialize) has to run before the next execution.
    pub fn needs_initialization(&self) -> bool {
        self.needs_initialization
    }

    pub(crate) fn request_initialization(&mut self) {
        self.needs_initialization = true;
    }

    ///Moves every attachment that declares an initial layout into it. Returns the number of barriers recorded.
    pub fn initialize(&mut self, recorder: &mut dyn CommandRecorder) -> Result<usize, GraphError> {
        let mut barriers = BarrierBuilder::new();
        for slot in self.attachments.values_mut() {
            if let Some(layout) = slot.info.initial_layout {
                slot.attachment.transition_to(&mut barriers, layout)?;
            }
        }
        self.needs_initialization = false;
        Ok(barriers.flush(recorder))
    }

    ///Binds the swapchain image of the current frame. It starts in `Undefined`, as its content is never loaded.
    pub fn bind_backbuffer(
        &mut self,
        image: vk::Image,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<(), GraphError> {
        let Some(key) = self.backbuffer else {
            return Ok(());
        };
        if extent != self.extent {
            return Err(GraphError::ExtentMismatch {
                pass: "backbuffer".to_owned(),
            });
        }

        let device = self.device.clone();
        if let Some(slot) = self.attachments.get_mut(key) {
            slot.attachment = Attachment::imported(
                &device,
                slot.info.name.clone(),
                image,
                view,
                &slot.info.image_info(extent),
            );
        }
        Ok(())
    }

    pub fn is_backbuffer_bound(&self) -> bool {
        match self.backbuffer.and_then(|k| self.attachments.get(k)) {
            Some(slot) => slot.attachment.image() != vk::Image::null(),
            None => false,
        }
    }

    ///True if any enabled pass touches the backbuffer.
    pub fn uses_backbuffer(&self) -> bool {
        let Some(key) = self.backbuffer else {
            return false;
        };
        self.order
            .iter()
            .any(|idx| self.passes[*idx].uses.iter().any(|u| u.attachment == key))
    }

    ///Enables or disables a pass. The execution order is recomputed and recordings are invalidated.
    pub fn set_pass_enabled(&mut self, name: &str, enabled: bool) -> Result<(), GraphError> {
        let idx = *self
            .pass_names
            .get(name)
            .ok_or_else(|| GraphError::UnknownPass(name.to_owned()))?;
        if self.passes[idx].enabled == enabled {
            return Ok(());
        }
        self.passes[idx].enabled = enabled;
        self.compute_order();
        self.invalidate();

        #[cfg(feature = "logging")]
        log::info!(
            "{} pass \"{}\", new order: {:?}",
            if enabled { "Enabled" } else { "Disabled" },
            name,
            self.order_names()
        );
        Ok(())
    }

    pub fn is_pass_enabled(&self, name: &str) -> Option<bool> {
        self.pass(name).map(|p| p.enabled)
    }

    ///Returns the payload of the named pass, if it has one of type `T`. Invalidates recordings, since the
    /// payload might change what is recorded.
    pub fn payload_mut<T: std::any::Any>(&mut self, name: &str) -> Option<&mut T> {
        let idx = *self.pass_names.get(name)?;
        self.invalidate();
        self.passes[idx].payload_mut::<T>()
    }

    ///Recreates all swapchain-sized attachments for `extent`, then rebuilds framebuffers and descriptors.
    /// Fixed-size attachments are untouched. The graph must be initialized again afterwards.
    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<(), GraphError> {
        self.extent = extent;
        let device = self.device.clone();

        for slot in self.attachments.values_mut() {
            if !slot.info.size.follows_swapchain() {
                continue;
            }
            if slot.is_backbuffer {
                slot.attachment = unbound_backbuffer(&device, &slot.info, extent);
                continue;
            }
            //release before allocating the replacement
            slot.attachment.destroy();
            slot.attachment = create_attachment(&device, &slot.info, extent)?;
        }

        self.rebuild_framebuffers()?;
        self.write_descriptors();
        self.needs_initialization = true;
        self.invalidate();

        #[cfg(feature = "logging")]
        log::info!("Resized pass graph to {}x{}", extent.width, extent.height);

        Ok(())
    }

    ///Stable Kahn ordering over the enabled passes. The lowest declared index is scheduled first.
    fn compute_order(&mut self) {
        let node_count = self.dependencies.node_count();
        let enabled = |idx: usize| self.passes[idx].enabled;

        let mut in_degree = vec![0usize; node_count];
        for node in self.dependencies.node_indices() {
            let idx = self.dependencies[node];
            if !enabled(idx) {
                continue;
            }
            in_degree[idx] = self
                .dependencies
                .neighbors_directed(node, Direction::Incoming)
                .filter(|n| enabled(self.dependencies[*n]))
                .count();
        }

        let mut ready = (0..node_count)
            .filter(|idx| enabled(*idx) && in_degree[*idx] == 0)
            .map(Reverse)
            .collect::<BinaryHeap<_>>();

        let mut order = Vec::with_capacity(node_count);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for next in self
                .dependencies
                .neighbors_directed(NodeIndex::new(idx), Direction::Outgoing)
            {
                let next_idx = self.dependencies[next];
                if !enabled(next_idx) {
                    continue;
                }
                in_degree[next_idx] -= 1;
                if in_degree[next_idx] == 0 {
                    ready.push(Reverse(next_idx));
                }
            }
        }

        self.order = order;
    }

    fn rebuild_framebuffers(&mut self) -> Result<(), GraphError> {
        for (idx, pass) in self.passes.iter().enumerate() {
            if pass.mode != PassMode::Render {
                self.framebuffers[idx] = None;
                continue;
            }

            let color = pass
                .uses
                .iter()
                .filter(|u| u.is_color_target())
                .map(|u| u.attachment)
                .collect::<SmallVec<[AttachmentKey; 4]>>();
            let depth = pass
                .uses
                .iter()
                .find(|u| u.is_depth_target())
                .map(|u| u.attachment);

            let mut extents = color
                .iter()
                .chain(depth.iter())
                .filter_map(|k| self.attachments.get(*k))
                .map(|s| s.info.size.resolve(self.extent));
            //passes without targets render at swapchain size.
            let extent = extents.next().unwrap_or(self.extent);
            if extents.any(|e| e != extent) {
                return Err(GraphError::ExtentMismatch {
                    pass: pass.name.clone(),
                });
            }

            self.framebuffers[idx] = Some(Framebuffer {
                color,
                depth,
                extent,
            });
        }
        Ok(())
    }

    fn write_descriptors(&self) {
        let writes = self
            .passes
            .iter()
            .flat_map(|p| p.uses.iter())
            .filter_map(|u| {
                let binding = u.binding?;
                let slot = self.attachments.get(u.attachment)?;
                Some(SampledImageWrite {
                    set: binding.set,
                    binding: binding.binding,
                    view: slot.attachment.view(),
                    sampler: slot.attachment.sampler()?,
                    layout: u.entry.to_vk(),
                })
            })
            .collect::<Vec<_>>();

        #[cfg(feature = "logging")]
        log::trace!("Writing {} sampled image descriptors", writes.len());

        self.device.write_sampled_images(&writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{DescriptorBinding, LoadPolicy, PassKind};
    use passway::null_device::NullDevice;
    use passway_commands::{ClearValue, CommandLog};
    use vk::Handle;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 640,
            height: 480,
        }
    }

    fn color(name: &str) -> AttachmentInfo {
        AttachmentInfo::color(name, vk::Format::R8G8B8A8_UNORM, AttachmentSize::Swapchain)
    }

    #[test]
    fn impl_send_sync() {
        static_assertions::assert_impl_all!(PassGraph<NullDevice>: Send);
    }

    #[test]
    fn cycles_are_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let a = builder.attachment(color("a"));
        let b = builder.attachment(color("b"));
        builder
            .add_pass(
                PassDescriptor::render("first", PassKind::Offscreen)
                    .sample(b, None)
                    .write_color(a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("second", PassKind::Offscreen)
                    .sample(a, None)
                    .write_color(b, LoadPolicy::DontCare),
            );

        assert!(matches!(builder.build(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn read_write_alias_is_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let a = builder.attachment(color("a"));
        builder.add_pass(
            PassDescriptor::render("feedback", PassKind::Blur)
                .sample(a, None)
                .write_color(a, LoadPolicy::Load),
        );
        match builder.build() {
            Err(GraphError::ReadWriteAlias { pass, attachment }) => {
                assert_eq!(pass, "feedback");
                assert_eq!(attachment, "a");
            }
            other => panic!("expected alias error, got {:?}", other.err()),
        }
    }

    #[test]
    fn order_follows_edges_and_keeps_declaration_order() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let a = builder.attachment(color("a"));
        let b = builder.attachment(color("b"));
        let c = builder.attachment(color("c"));
        builder
            //declared first, but consumes what "produce" writes
            .add_pass(
                PassDescriptor::render("consume", PassKind::Composite)
                    .sample(a, None)
                    .write_color(b, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("produce", PassKind::Offscreen)
                    .write_color(a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("independent", PassKind::Offscreen)
                    .write_color(c, LoadPolicy::DontCare),
            );

        let graph = builder.build().unwrap();
        assert_eq!(graph.order_names(), vec!["produce", "consume", "independent"]);
    }

    #[test]
    fn rewritten_attachment_keeps_readers_between_writers() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let x = builder.attachment(color("x"));
        let out_a = builder.attachment(color("out a"));
        let out_b = builder.attachment(color("out b"));
        builder
            .add_pass(
                PassDescriptor::render("write x", PassKind::Offscreen)
                    .write_color(x, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("read x", PassKind::Composite)
                    .sample(x, None)
                    .write_color(out_a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("rewrite x", PassKind::Offscreen)
                    .write_color(x, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("read x again", PassKind::Composite)
                    .sample(x, None)
                    .write_color(out_b, LoadPolicy::DontCare),
            );

        let graph = builder.build().unwrap();
        assert_eq!(
            graph.order_names(),
            vec!["write x", "read x", "rewrite x", "read x again"]
        );
    }

    #[test]
    fn ping_pong_chain_is_not_a_cycle() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let x = builder.attachment(color("x"));
        let y = builder.attachment(color("y"));
        let z = builder.attachment(color("z"));
        builder
            .add_pass(
                PassDescriptor::render("fill x", PassKind::Offscreen)
                    .write_color(x, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("x to y", PassKind::Blur)
                    .sample(x, None)
                    .write_color(y, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("y to x", PassKind::Blur)
                    .sample(y, None)
                    .write_color(x, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("x to z", PassKind::Composite)
                    .sample(x, None)
                    .write_color(z, LoadPolicy::DontCare),
            );

        let graph = builder.build().unwrap();
        assert_eq!(
            graph.order_names(),
            vec!["fill x", "x to y", "y to x", "x to z"]
        );
    }

    #[test]
    fn disabling_a_pass_changes_order_and_generation() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let a = builder.attachment(color("a"));
        let b = builder.attachment(color("b"));
        builder
            .add_pass(
                PassDescriptor::render("produce", PassKind::Offscreen)
                    .write_color(a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("consume", PassKind::Composite)
                    .sample(a, None)
                    .write_color(b, LoadPolicy::DontCare),
            );
        let mut graph = builder.build().unwrap();
        let generation = graph.generation();

        graph.set_pass_enabled("produce", false).unwrap();
        assert_eq!(graph.order_names(), vec!["consume"]);
        assert!(graph.generation() > generation);

        assert!(matches!(
            graph.set_pass_enabled("missing", true),
            Err(GraphError::UnknownPass(_))
        ));
    }

    #[test]
    fn descriptor_bindings_need_a_sampler() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let a = builder.attachment(color("a"));
        let b = builder.attachment(color("b"));
        builder
            .add_pass(
                PassDescriptor::render("produce", PassKind::Offscreen)
                    .write_color(a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("consume", PassKind::Composite)
                    .sample(
                        a,
                        Some(DescriptorBinding {
                            set: vk::DescriptorSet::from_raw(7),
                            binding: 0,
                        }),
                    )
                    .write_color(b, LoadPolicy::DontCare),
            );
        assert!(matches!(
            builder.build(),
            Err(GraphError::MissingSampler { .. })
        ));
    }

    #[test]
    fn resize_recreates_only_swapchain_sized_attachments() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let fixed = builder.attachment(
            AttachmentInfo::color("fixed", vk::Format::R8G8B8A8_UNORM, AttachmentSize::fixed(256, 256))
                .with_sampler(Default::default()),
        );
        let sized = builder.attachment(color("sized").with_sampler(Default::default()));
        let target = builder.attachment(color("target"));
        let set = vk::DescriptorSet::from_raw(3);
        builder
            .add_pass(
                PassDescriptor::render("produce", PassKind::Offscreen)
                    .write_color(fixed, LoadPolicy::Clear(ClearValue::BLACK)),
            )
            .add_pass(
                PassDescriptor::render("produce sized", PassKind::Offscreen)
                    .write_color(sized, LoadPolicy::Clear(ClearValue::BLACK)),
            )
            .add_pass(
                PassDescriptor::render("consume", PassKind::Composite)
                    .sample(fixed, Some(DescriptorBinding { set, binding: 0 }))
                    .sample(sized, Some(DescriptorBinding { set, binding: 1 }))
                    .write_color(target, LoadPolicy::DontCare),
            );
        let mut graph = builder.build().unwrap();
        assert_eq!(device.descriptor_writes().len(), 2);

        let fixed_image = graph.attachment(fixed).unwrap().image();
        let old_sized = graph.attachment(sized).unwrap().image();
        let new_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        graph.resize(new_extent).unwrap();

        assert_eq!(graph.attachment(fixed).unwrap().image(), fixed_image);
        assert!(!device.is_live_image(old_sized));
        let new_sized = graph.attachment(sized).unwrap();
        assert!(device.is_live_image(new_sized.image()));
        assert_eq!(new_sized.extent().width, 1024);
        assert_eq!(graph.framebuffer(2).unwrap().extent.height, 768);
        assert!(graph.needs_initialization());

        let writes = device.descriptor_writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[3].view, new_sized.view());
    }

    #[test]
    fn initialize_moves_textures_once() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let tex = builder.attachment(AttachmentInfo::texture(
            "tex",
            vk::Format::R8G8B8A8_UNORM,
            AttachmentSize::fixed(64, 64),
        ));
        let mut graph = builder.build().unwrap();
        let mut log = CommandLog::new();

        assert_eq!(graph.initialize(&mut log).unwrap(), 1);
        assert_eq!(graph.layout(tex), Some(Layout::ShaderReadOnly));
        assert!(!graph.needs_initialization());
        assert_eq!(graph.initialize(&mut log).unwrap(), 0);
        assert_eq!(log.barrier_count(), 1);
    }
}
