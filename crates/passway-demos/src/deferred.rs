//! # Deferred shading
//!
//! The scene is rendered once into a G-buffer of world position, normal and albedo (plus depth). A single
//! full-screen pass samples all three targets and lights the scene into the backbuffer.
//!
//! With the debug display enabled, the three G-buffer targets are shown in the first three quadrants of the
//! screen. The lit result is drawn with a full-size viewport moved to the center, so its upper left quarter ends
//! up in the lower right quadrant.

use std::sync::Arc;

use passway::{
    ash::vk,
    device::{GpuDevice, SamplerInfo},
    util,
};
use passway_commands::ClearValue;
use passway_graph::{
    AttachmentInfo, AttachmentSize, DescriptorBinding, FrameBackend, FrameOrchestrator, GraphBuilder,
    LoadPolicy, PassDescriptor, PassGraph, PassKind,
};

use crate::{MeshBinding, PipelineBinding};

pub const GBUFFER_PASS: &str = "gbuffer";
pub const COMPOSITE_PASS: &str = "deferred composite";

///Bindings of position, normal and albedo in the composite pipeline's descriptor set.
pub const GBUFFER_BINDINGS: [u32; 3] = [1, 2, 3];

#[derive(Clone, Debug, PartialEq)]
pub struct DeferredSettings {
    ///Width and height of all G-buffer targets.
    pub gbuffer_dim: u32,
    pub position_format: vk::Format,
    pub normal_format: vk::Format,
    pub albedo_format: vk::Format,
    pub depth_format: vk::Format,
    pub debug_display: bool,
    pub background: [f32; 4],
}

impl Default for DeferredSettings {
    fn default() -> Self {
        DeferredSettings {
            gbuffer_dim: 1024,
            position_format: vk::Format::R16G16B16A16_SFLOAT,
            normal_format: vk::Format::R16G16B16A16_SFLOAT,
            albedo_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: vk::Format::D32_SFLOAT,
            debug_display: true,
            background: [0.0, 0.0, 0.2, 0.0],
        }
    }
}

impl DeferredSettings {
    pub fn with(mut self, mut f: impl FnMut(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

///Push constants of the composite and debug pipelines.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeParams {
    ///Index of the G-buffer target shown by the debug pipeline.
    pub target: u32,
    pub debug_display: u32,
}

///Payload of the composite pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeferredDisplay {
    pub debug: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct DeferredPipelines {
    ///Writes all G-buffer targets.
    pub gbuffer: PipelineBinding,
    ///Lights the scene. Its descriptor set samples the G-buffer.
    pub composite: PipelineBinding,
    ///Shows a single G-buffer target. Shares layout and descriptor set with `composite`.
    pub debug: vk::Pipeline,
}

pub fn build_deferred_graph<D: GpuDevice>(
    device: &Arc<D>,
    extent: vk::Extent2D,
    swapchain_format: vk::Format,
    settings: &DeferredSettings,
    pipelines: DeferredPipelines,
    scene: MeshBinding,
    quad: MeshBinding,
) -> anyhow::Result<PassGraph<D>> {
    let size = AttachmentSize::fixed(settings.gbuffer_dim, settings.gbuffer_dim);
    let mut builder = GraphBuilder::new(device, extent);

    let targets = [
        ("position", settings.position_format),
        ("normal", settings.normal_format),
        ("albedo", settings.albedo_format),
    ]
    .map(|(name, format)| {
        builder.attachment(
            AttachmentInfo::color(name, format, size).with_sampler(SamplerInfo::default()),
        )
    });
    let depth = builder.attachment(AttachmentInfo::depth(
        "gbuffer depth",
        settings.depth_format,
        size,
    ));
    let backbuffer = builder.backbuffer(swapchain_format);

    let mut gbuffer = PassDescriptor::render(GBUFFER_PASS, PassKind::GeometryBuffer);
    for target in targets {
        gbuffer = gbuffer.write_color(target, LoadPolicy::Clear(ClearValue::TRANSPARENT));
    }
    gbuffer = gbuffer
        .write_depth(depth, LoadPolicy::Clear(ClearValue::FAR_DEPTH))
        .record(move |ctx| {
            pipelines.gbuffer.bind(ctx.recorder);
            scene.draw(ctx.recorder);
            Ok(())
        });

    let mut composite = PassDescriptor::render(COMPOSITE_PASS, PassKind::Composite).with_payload(
        DeferredDisplay {
            debug: settings.debug_display,
        },
    );
    for (target, binding) in targets.into_iter().zip(GBUFFER_BINDINGS) {
        composite = composite.sample(
            target,
            Some(DescriptorBinding {
                set: pipelines.composite.descriptor_set,
                binding,
            }),
        );
    }
    composite = composite
        .write_color(
            backbuffer,
            LoadPolicy::Clear(ClearValue::Color(settings.background)),
        )
        .record(move |ctx| {
            let debug = ctx
                .payload::<DeferredDisplay>()
                .map(|d| d.debug)
                .unwrap_or(false);
            let extent = ctx.extent();
            quad.bind(ctx.recorder);

            if debug {
                let debug_pipeline = PipelineBinding {
                    pipeline: pipelines.debug,
                    ..pipelines.composite
                };
                debug_pipeline.bind(ctx.recorder);
                for target in 0..3 {
                    ctx.recorder
                        .set_viewport(util::quadrant_viewport(extent, target));
                    debug_pipeline.push(
                        ctx.recorder,
                        &CompositeParams {
                            target,
                            debug_display: 1,
                        },
                    );
                    ctx.recorder.draw_indexed(6, 1, 0, 0, 0);
                }
                let mut viewport = util::full_viewport(extent);
                viewport.x = extent.width as f32 / 2.0;
                viewport.y = extent.height as f32 / 2.0;
                ctx.recorder.set_viewport(viewport);
            }

            pipelines.composite.bind(ctx.recorder);
            pipelines.composite.push(
                ctx.recorder,
                &CompositeParams {
                    target: 0,
                    debug_display: debug as u32,
                },
            );
            ctx.recorder.draw_indexed(6, 1, 0, 0, 0);
            Ok(())
        });

    builder.add_pass(gbuffer).add_pass(composite);
    Ok(builder.build()?)
}

///Switches between the lit result and the G-buffer overview. Returns the new state.
pub fn toggle_debug_display<B: FrameBackend>(frames: &mut FrameOrchestrator<B>) -> Option<bool> {
    let display = frames.payload_mut::<DeferredDisplay>(COMPOSITE_PASS)?;
    display.debug = !display.debug;

    #[cfg(feature = "logging")]
    log::info!("Deferred debug display: {}", display.debug);

    Some(display.debug)
}
