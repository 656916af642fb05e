//! Records a [PassGraph] into a [CommandRecorder].
//!
//! For every enabled pass, in execution order, the executor
//!
//! 1. transitions all used attachments into the pass's entry layouts, sampled inputs first,
//! 2. opens a dynamic rendering scope for render passes,
//! 3. calls the pass's record closure,
//! 4. moves attachments into their exit layouts where those differ.
//!
//! After the last pass the bound backbuffer is moved to `Present`.

use passway::{ash::vk, device::GpuDevice, layout::Layout, util};
use passway_commands::{
    BarrierBuilder, ClearValue, CommandRecorder, RenderTargetDesc, RenderingDesc,
};
use smallvec::SmallVec;

use crate::{
    GraphError,
    graph::{AttachmentKey, Framebuffer, PassGraph},
    pass::{Access, AttachmentUse, LoadPolicy, PassContext, ResolvedAttachment},
};

///Summary of one recording of a graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    ///Number of image barriers recorded, including the final present transition.
    pub barriers: usize,
    pub passes: usize,
    pub pass_names: Vec<String>,
}

pub struct Executor {
    barriers: BarrierBuilder,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Executor {
            barriers: BarrierBuilder::new(),
        }
    }

    ///Records all enabled passes of `graph`. On error, the tracked layouts reflect the barriers recorded so far.
    pub fn execute<D: GpuDevice>(
        &mut self,
        graph: &mut PassGraph<D>,
        recorder: &mut dyn CommandRecorder,
    ) -> Result<ExecutionReport, GraphError> {
        if graph.uses_backbuffer() && !graph.is_backbuffer_bound() {
            return Err(GraphError::BackbufferUnbound);
        }

        self.barriers.clear();
        let mut report = ExecutionReport::default();
        let order = graph.order().to_vec();

        for pass_idx in order {
            self.enter_pass(graph, pass_idx)?;
            report.barriers += self.barriers.flush(recorder);

            self.record_pass(graph, pass_idx, recorder)?;

            self.leave_pass(graph, pass_idx)?;
            report.barriers += self.barriers.flush(recorder);

            report.passes += 1;
            report.pass_names.push(graph.passes[pass_idx].name.clone());
        }

        if let Some(key) = graph.backbuffer() {
            if graph.is_backbuffer_bound() {
                if let Some(slot) = graph.attachments.get_mut(key) {
                    //a backbuffer nobody rendered to is still presented
                    slot.attachment
                        .transition_to(&mut self.barriers, Layout::Present)?;
                }
                report.barriers += self.barriers.flush(recorder);
            }
        }

        #[cfg(feature = "logging")]
        log::trace!(
            "Recorded {} passes with {} barriers",
            report.passes,
            report.barriers
        );

        Ok(report)
    }

    fn enter_pass<D: GpuDevice>(
        &mut self,
        graph: &mut PassGraph<D>,
        pass_idx: usize,
    ) -> Result<(), GraphError> {
        let PassGraph {
            passes,
            attachments,
            ..
        } = graph;
        let pass = &passes[pass_idx];

        //inputs first, so reads are made visible before targets are touched
        let uses = pass
            .uses
            .iter()
            .filter(|u| u.access == Access::Read)
            .chain(pass.uses.iter().filter(|u| u.access == Access::Write));

        for u in uses {
            let Some(slot) = attachments.get_mut(u.attachment) else {
                return Err(GraphError::UnknownAttachment {
                    pass: pass.name.clone(),
                });
            };
            slot.attachment.transition_to(&mut self.barriers, u.entry)?;
        }
        Ok(())
    }

    fn leave_pass<D: GpuDevice>(
        &mut self,
        graph: &mut PassGraph<D>,
        pass_idx: usize,
    ) -> Result<(), GraphError> {
        let PassGraph {
            passes,
            attachments,
            ..
        } = graph;
        for u in passes[pass_idx].uses.iter().filter(|u| u.exit != u.entry) {
            if let Some(slot) = attachments.get_mut(u.attachment) {
                slot.attachment.transition_to(&mut self.barriers, u.exit)?;
            }
        }
        Ok(())
    }

    fn record_pass<D: GpuDevice>(
        &mut self,
        graph: &mut PassGraph<D>,
        pass_idx: usize,
        recorder: &mut dyn CommandRecorder,
    ) -> Result<(), GraphError> {
        let resolved = graph.passes[pass_idx]
            .uses
            .iter()
            .filter_map(|u| resolve(graph, u))
            .collect::<SmallVec<[ResolvedAttachment; 4]>>();

        let framebuffer = graph.framebuffers[pass_idx].clone();
        let extent = match &framebuffer {
            Some(fb) => fb.extent,
            None => resolved
                .first()
                .map(|a| a.extent)
                .unwrap_or(graph.extent()),
        };

        let pass = &mut graph.passes[pass_idx];
        if let Some(fb) = &framebuffer {
            recorder.begin_rendering(&rendering_desc(fb, &pass.uses, &resolved));
            recorder.set_viewport(util::full_viewport(extent));
            recorder.set_scissor(util::full_rect(extent));
        }

        let result = match pass.record.as_mut() {
            Some(record) => {
                let mut ctx = PassContext {
                    recorder: &mut *recorder,
                    pass: &pass.name,
                    attachments: &resolved,
                    payload: pass.payload.as_deref(),
                    extent,
                };
                record(&mut ctx)
            }
            None => Ok(()),
        };

        if framebuffer.is_some() {
            recorder.end_rendering();
        }

        result.map_err(|source| {
            #[cfg(feature = "logging")]
            log::error!("Recording pass \"{}\" failed: {:#}", pass.name, source);
            GraphError::Record {
                pass: pass.name.clone(),
                source,
            }
        })
    }
}

fn resolve<D: GpuDevice>(graph: &PassGraph<D>, u: &AttachmentUse) -> Option<ResolvedAttachment> {
    let slot = graph.attachments.get(u.attachment)?;
    let att = &slot.attachment;
    Some(ResolvedAttachment {
        key: u.attachment,
        image: att.image(),
        view: att.view(),
        sampler: att.sampler(),
        extent: att.extent(),
        format: att.format(),
        aspect: att.aspect(),
        layout: att.layout(),
    })
}

fn rendering_desc(
    framebuffer: &Framebuffer,
    uses: &[AttachmentUse],
    resolved: &[ResolvedAttachment],
) -> RenderingDesc {
    let target = |key: AttachmentKey| -> Option<RenderTargetDesc> {
        let u = uses.iter().find(|u| u.attachment == key && u.access == Access::Write)?;
        let att = resolved.iter().find(|a| a.key == key)?;
        Some(RenderTargetDesc {
            image: att.image,
            view: att.view,
            layout: att.layout.to_vk(),
            load_op: u.load.load_op(),
            store_op: u.store.store_op(),
            clear: match u.load {
                LoadPolicy::Clear(value) => value,
                _ if att.aspect.contains(vk::ImageAspectFlags::DEPTH) => ClearValue::FAR_DEPTH,
                _ => ClearValue::TRANSPARENT,
            },
        })
    };

    RenderingDesc {
        extent: framebuffer.extent,
        color: framebuffer.color.iter().filter_map(|k| target(*k)).collect(),
        depth: framebuffer.depth.and_then(target),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use passway::{
        device::ImageInfo,
        null_device::{NullDevice, NullMemory},
    };
    use passway_commands::{CommandLog, RecordedCommand};

    use super::*;
    use crate::{AttachmentInfo, AttachmentSize, GraphBuilder, PassDescriptor, PassKind};

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    fn swapchain_image(device: &Arc<NullDevice>) -> (vk::Image, vk::ImageView, NullMemory) {
        let info = ImageInfo::new(
            vk::Format::B8G8R8A8_UNORM,
            extent(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        let (image, memory) = device.create_image("swapchain", &info).unwrap();
        let view = device.create_image_view("swapchain", image, &info).unwrap();
        (image, view, memory)
    }

    #[test]
    fn offscreen_then_blit_needs_four_transitions() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let p = builder.attachment(
            AttachmentInfo::color("P", vk::Format::R16G16B16A16_SFLOAT, AttachmentSize::Swapchain)
                .add_usage(vk::ImageUsageFlags::TRANSFER_SRC),
        );
        let t = builder.attachment(AttachmentInfo::texture(
            "T",
            vk::Format::R8G8B8A8_UNORM,
            AttachmentSize::fixed(256, 256),
        ));
        builder
            .add_pass(
                PassDescriptor::render("offscreen", PassKind::Offscreen)
                    .write_color(p, LoadPolicy::Clear(ClearValue::BLACK)),
            )
            .add_pass(PassDescriptor::blit("blit", p, t, vk::Filter::LINEAR));
        let mut graph = builder.build().unwrap();

        let mut init = CommandLog::new();
        graph.initialize(&mut init).unwrap();

        let mut log = CommandLog::new();
        let report = Executor::new().execute(&mut graph, &mut log).unwrap();
        assert_eq!(report.pass_names, vec!["offscreen", "blit"]);
        assert_eq!(report.barriers, 4);

        let p_image = graph.attachment(p).unwrap().image();
        let t_image = graph.attachment(t).unwrap().image();
        let transitions = log
            .transitions()
            .iter()
            .map(|t| (t.image, t.from, t.to))
            .collect::<Vec<_>>();
        assert_eq!(
            transitions,
            vec![
                (
                    p_image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                ),
                (
                    p_image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL
                ),
                (
                    t_image,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
                (
                    t_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
            ]
        );

        let blits = log.blits();
        assert_eq!(blits.len(), 1);
        assert_eq!(blits[0].src_image, p_image);
        assert_eq!(blits[0].dst_extent.width, 256);
        assert_eq!(blits[0].filter, vk::Filter::LINEAR);
        //transfer passes never open a rendering scope
        assert_eq!(log.rendering_scopes().len(), 1);
    }

    #[test]
    fn rewrite_waits_for_earlier_reader() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let color = |name: &str| {
            AttachmentInfo::color(name, vk::Format::R8G8B8A8_UNORM, AttachmentSize::Swapchain)
        };
        let x = builder.attachment(color("x"));
        let out_a = builder.attachment(color("out a"));
        let out_b = builder.attachment(color("out b"));
        builder
            .add_pass(
                PassDescriptor::render("write x", PassKind::Offscreen)
                    .write_color(x, LoadPolicy::Clear(ClearValue::BLACK)),
            )
            .add_pass(
                PassDescriptor::render("read x", PassKind::Composite)
                    .sample(x, None)
                    .write_color(out_a, LoadPolicy::DontCare),
            )
            .add_pass(
                PassDescriptor::render("rewrite x", PassKind::Offscreen)
                    .write_color(x, LoadPolicy::Clear(ClearValue::BLACK)),
            )
            .add_pass(
                PassDescriptor::render("read x again", PassKind::Composite)
                    .sample(x, None)
                    .write_color(out_b, LoadPolicy::DontCare),
            );
        let mut graph = builder.build().unwrap();

        let mut log = CommandLog::new();
        Executor::new().execute(&mut graph, &mut log).unwrap();

        let x_image = graph.attachment(x).unwrap().image();
        let x_transitions = log
            .transitions()
            .into_iter()
            .filter(|t| t.image == x_image)
            .map(|t| (t.from, t.to))
            .collect::<Vec<_>>();
        assert_eq!(
            x_transitions,
            vec![
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                ),
                (
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
                //the rewrite waits on the sampling reads of "read x"
                (
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                ),
                (
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
            ]
        );
        let rewrite = log
            .transitions()
            .into_iter()
            .filter(|t| t.image == x_image)
            .nth(2)
            .unwrap();
        assert_eq!(rewrite.src_access, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn geometry_buffer_feeds_composite() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let size = AttachmentSize::fixed(1024, 1024);
        let position = builder.attachment(AttachmentInfo::color(
            "position",
            vk::Format::R16G16B16A16_SFLOAT,
            size,
        ));
        let normal = builder.attachment(AttachmentInfo::color(
            "normal",
            vk::Format::R16G16B16A16_SFLOAT,
            size,
        ));
        let albedo = builder.attachment(AttachmentInfo::color(
            "albedo",
            vk::Format::R8G8B8A8_UNORM,
            size,
        ));
        let depth = builder.attachment(AttachmentInfo::depth("depth", vk::Format::D32_SFLOAT, size));
        let backbuffer = builder.backbuffer(vk::Format::B8G8R8A8_UNORM);

        let clear = LoadPolicy::Clear(ClearValue::TRANSPARENT);
        builder
            .add_pass(
                PassDescriptor::render("composite", PassKind::Composite)
                    .sample(position, None)
                    .sample(normal, None)
                    .sample(albedo, None)
                    .write_color(backbuffer, LoadPolicy::DontCare)
                    .record(|ctx| {
                        ctx.recorder.draw(3, 1, 0, 0);
                        Ok(())
                    }),
            )
            .add_pass(
                PassDescriptor::render("gbuffer", PassKind::GeometryBuffer)
                    .write_color(position, clear)
                    .write_color(normal, clear)
                    .write_color(albedo, clear)
                    .write_depth(depth, LoadPolicy::Clear(ClearValue::FAR_DEPTH))
                    .record(|ctx| {
                        ctx.recorder.draw_indexed(36, 1, 0, 0, 0);
                        Ok(())
                    }),
            );
        let mut graph = builder.build().unwrap();
        assert_eq!(graph.order_names(), vec!["gbuffer", "composite"]);

        let gbuffer_fb = graph.framebuffer(1).unwrap();
        assert_eq!(gbuffer_fb.color.len(), 3);
        assert_eq!(gbuffer_fb.depth, Some(depth));

        let (image, view, memory) = swapchain_image(&device);
        graph.bind_backbuffer(image, view, extent()).unwrap();

        let mut log = CommandLog::new();
        Executor::new().execute(&mut graph, &mut log).unwrap();

        let composite_draw = log
            .commands()
            .iter()
            .position(|c| matches!(c, RecordedCommand::Draw { .. }))
            .unwrap();
        for key in [position, normal, albedo] {
            let img = graph.attachment(key).unwrap().image();
            let to_sampled = log
                .commands()
                .iter()
                .enumerate()
                .filter_map(|(idx, cmd)| match cmd {
                    RecordedCommand::Barrier(transitions) => Some((idx, transitions)),
                    _ => None,
                })
                .flat_map(|(idx, transitions)| transitions.iter().map(move |t| (idx, *t)))
                .filter(|(_, t)| {
                    t.image == img
                        && t.from == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                        && t.to == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                })
                .collect::<Vec<_>>();
            assert_eq!(to_sampled.len(), 1);
            assert!(to_sampled[0].0 < composite_draw);
        }

        let depth_image = graph.attachment(depth).unwrap().image();
        let depth_transitions = log
            .transitions()
            .into_iter()
            .filter(|t| t.image == depth_image)
            .collect::<Vec<_>>();
        assert_eq!(depth_transitions.len(), 1);
        assert_eq!(
            depth_transitions[0].aspect,
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(graph.layout(depth), Some(Layout::DepthStencilAttachment));

        assert_eq!(graph.layout(backbuffer), Some(Layout::Present));
        let last = log.transitions().last().copied().unwrap();
        assert_eq!(last.image, image);
        assert_eq!(last.to, vk::ImageLayout::PRESENT_SRC_KHR);

        drop(graph);
        device.destroy_image_view(view);
        device.destroy_image(image);
        device.free_memory(memory);
    }

    #[test]
    fn unbound_backbuffer_is_an_error() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let backbuffer = builder.backbuffer(vk::Format::B8G8R8A8_UNORM);
        builder.add_pass(
            PassDescriptor::render("clear", PassKind::Skybox)
                .write_color(backbuffer, LoadPolicy::Clear(ClearValue::BLACK)),
        );
        let mut graph = builder.build().unwrap();
        let mut log = CommandLog::new();
        assert!(matches!(
            Executor::new().execute(&mut graph, &mut log),
            Err(GraphError::BackbufferUnbound)
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn record_errors_are_wrapped_and_close_rendering() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let target = builder.attachment(AttachmentInfo::color(
            "target",
            vk::Format::R8G8B8A8_UNORM,
            AttachmentSize::Swapchain,
        ));
        builder.add_pass(
            PassDescriptor::render("vertical blur", PassKind::Blur)
                .write_color(target, LoadPolicy::DontCare)
                .with_payload(2.0f32)
                .record(|ctx| {
                    let scale = ctx.payload::<f32>().copied().unwrap_or_default();
                    anyhow::ensure!(scale < 1.0, "blur scale {scale} out of range");
                    Ok(())
                }),
        );
        let mut graph = builder.build().unwrap();
        let mut log = CommandLog::new();

        match Executor::new().execute(&mut graph, &mut log) {
            Err(GraphError::Record { pass, source }) => {
                assert_eq!(pass, "vertical blur");
                assert!(source.to_string().contains("out of range"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            log.commands().last(),
            Some(RecordedCommand::EndRendering)
        ));
    }
}
