//! # Bloom
//!
//! The glowing parts of the scene are rendered into a small offscreen target. That target is blitted into a
//! texture, blurred vertically into a second target, blitted again and finally blurred horizontally while being
//! added on top of the regularly rendered scene.
//!
//! ```text
//! glow ─blit→ texture A ─vertical blur→ blur target ─blit→ texture B ─composite→ backbuffer
//!                                          skybox → scene ───────────────────────↗
//! ```

use std::sync::Arc;

use passway::{ash::vk, device::GpuDevice};
use passway_commands::ClearValue;
use passway_graph::{
    AttachmentInfo, AttachmentSize, DescriptorBinding, FrameBackend, FrameOrchestrator, GraphBuilder,
    GraphError, LoadPolicy, PassDescriptor, PassGraph, PassKind,
};

use crate::{MeshBinding, PipelineBinding};

pub const GLOW_PASS: &str = "glow";
pub const GLOW_BLIT_PASS: &str = "blit glow";
pub const VERTICAL_BLUR_PASS: &str = "vertical blur";
pub const BLUR_BLIT_PASS: &str = "blit blur";
pub const SKYBOX_PASS: &str = "skybox";
pub const SCENE_PASS: &str = "scene";
pub const COMPOSITE_PASS: &str = "bloom composite";

///Passes that only exist for the bloom effect. Disabling them leaves skybox and scene.
pub const BLOOM_PASSES: [&str; 5] = [
    GLOW_PASS,
    GLOW_BLIT_PASS,
    VERTICAL_BLUR_PASS,
    BLUR_BLIT_PASS,
    COMPOSITE_PASS,
];

pub const GLOW_TARGET: &str = "glow target";
pub const TEXTURE_A: &str = "bloom texture a";
pub const BLUR_TARGET: &str = "blur target";
pub const TEXTURE_B: &str = "bloom texture b";

///Binding of the blurred texture within the blur pipelines' descriptor set.
pub const BLUR_TEXTURE_BINDING: u32 = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct BloomSettings {
    ///Width and height of the glow and blur targets.
    pub texture_dim: u32,
    pub target_format: vk::Format,
    pub texture_format: vk::Format,
    pub depth_format: vk::Format,
    pub blur_scale: f32,
    pub blur_strength: f32,
    ///Clear color of the backbuffer.
    pub background: [f32; 4],
}

impl Default for BloomSettings {
    fn default() -> Self {
        BloomSettings {
            texture_dim: 256,
            target_format: vk::Format::R8G8B8A8_UNORM,
            texture_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: vk::Format::D32_SFLOAT,
            blur_scale: 1.0,
            blur_strength: 1.5,
            background: [0.025, 0.025, 0.025, 1.0],
        }
    }
}

impl BloomSettings {
    pub fn with(mut self, mut f: impl FnMut(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

///Push constants of the blur shader. Also the payload of both blur passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurParams {
    pub scale: f32,
    pub strength: f32,
    ///`0` blurs vertically, `1` horizontally.
    pub horizontal: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct BloomPipelines {
    ///Lit rendering, used for the glow pass and the scene.
    pub phong: PipelineBinding,
    pub skybox: PipelineBinding,
    ///Blur into the blur target. Its descriptor set samples texture A.
    pub vertical_blur: PipelineBinding,
    ///Additively blended blur. Its descriptor set samples texture B.
    pub composite: PipelineBinding,
}

#[derive(Clone, Copy, Debug)]
pub struct BloomMeshes {
    pub scene: MeshBinding,
    ///Only the glowing parts of the scene.
    pub glow: MeshBinding,
    pub skybox: MeshBinding,
    ///Screen-filling quad.
    pub quad: MeshBinding,
}

fn check_blit_support<D: GpuDevice>(device: &D, settings: &BloomSettings) -> anyhow::Result<()> {
    if !device.supports_format(settings.target_format, vk::FormatFeatureFlags::BLIT_SRC) {
        anyhow::bail!(
            "Device does not support blitting from {:?}",
            settings.target_format
        );
    }
    if !device.supports_format(settings.texture_format, vk::FormatFeatureFlags::BLIT_DST) {
        anyhow::bail!(
            "Device does not support blitting to {:?}",
            settings.texture_format
        );
    }
    Ok(())
}

fn blur_pass(
    name: &str,
    kind: PassKind,
    pipeline: PipelineBinding,
    quad: MeshBinding,
    params: BlurParams,
) -> PassDescriptor {
    PassDescriptor::render(name, kind)
        .with_payload(params)
        .record(move |ctx| {
            let params = ctx
                .payload::<BlurParams>()
                .copied()
                .ok_or_else(|| anyhow::anyhow!("blur parameters missing"))?;
            pipeline.bind(ctx.recorder);
            pipeline.push(ctx.recorder, &params);
            quad.draw(ctx.recorder);
            Ok(())
        })
}

///Builds the bloom graph for a swapchain of `extent` and `swapchain_format`.
pub fn build_bloom_graph<D: GpuDevice>(
    device: &Arc<D>,
    extent: vk::Extent2D,
    swapchain_format: vk::Format,
    settings: &BloomSettings,
    pipelines: BloomPipelines,
    meshes: BloomMeshes,
) -> anyhow::Result<PassGraph<D>> {
    check_blit_support(device.as_ref(), settings)?;

    let tex_size = AttachmentSize::fixed(settings.texture_dim, settings.texture_dim);
    let mut builder = GraphBuilder::new(device, extent);

    let glow_target = builder.attachment(
        AttachmentInfo::color(GLOW_TARGET, settings.target_format, tex_size)
            .add_usage(vk::ImageUsageFlags::TRANSFER_SRC),
    );
    let glow_depth = builder.attachment(AttachmentInfo::depth(
        "glow depth",
        settings.depth_format,
        tex_size,
    ));
    let texture_a = builder.attachment(AttachmentInfo::texture(
        TEXTURE_A,
        settings.texture_format,
        tex_size,
    ));
    let blur_target = builder.attachment(
        AttachmentInfo::color(BLUR_TARGET, settings.target_format, tex_size)
            .add_usage(vk::ImageUsageFlags::TRANSFER_SRC),
    );
    let texture_b = builder.attachment(AttachmentInfo::texture(
        TEXTURE_B,
        settings.texture_format,
        tex_size,
    ));
    let depth = builder.attachment(AttachmentInfo::depth(
        "scene depth",
        settings.depth_format,
        AttachmentSize::Swapchain,
    ));
    let backbuffer = builder.backbuffer(swapchain_format);

    let params = BlurParams {
        scale: settings.blur_scale,
        strength: settings.blur_strength,
        horizontal: 0,
    };

    builder
        .add_pass(
            PassDescriptor::render(GLOW_PASS, PassKind::Offscreen)
                .write_color(glow_target, LoadPolicy::Clear(ClearValue::BLACK))
                .write_depth(glow_depth, LoadPolicy::Clear(ClearValue::FAR_DEPTH))
                .record(move |ctx| {
                    pipelines.phong.bind(ctx.recorder);
                    meshes.glow.draw(ctx.recorder);
                    Ok(())
                }),
        )
        .add_pass(PassDescriptor::blit(
            GLOW_BLIT_PASS,
            glow_target,
            texture_a,
            vk::Filter::LINEAR,
        ))
        .add_pass(
            blur_pass(
                VERTICAL_BLUR_PASS,
                PassKind::Blur,
                pipelines.vertical_blur,
                meshes.quad,
                params,
            )
            .sample(
                texture_a,
                Some(DescriptorBinding {
                    set: pipelines.vertical_blur.descriptor_set,
                    binding: BLUR_TEXTURE_BINDING,
                }),
            )
            .write_color(blur_target, LoadPolicy::Clear(ClearValue::BLACK)),
        )
        .add_pass(PassDescriptor::blit(
            BLUR_BLIT_PASS,
            blur_target,
            texture_b,
            vk::Filter::LINEAR,
        ))
        .add_pass(
            PassDescriptor::render(SKYBOX_PASS, PassKind::Skybox)
                .write_color(
                    backbuffer,
                    LoadPolicy::Clear(ClearValue::Color(settings.background)),
                )
                .write_depth(depth, LoadPolicy::Clear(ClearValue::FAR_DEPTH))
                .record(move |ctx| {
                    pipelines.skybox.bind(ctx.recorder);
                    meshes.skybox.draw(ctx.recorder);
                    Ok(())
                }),
        )
        .add_pass(
            PassDescriptor::render(SCENE_PASS, PassKind::Scene)
                .write_color(backbuffer, LoadPolicy::Load)
                .write_depth(depth, LoadPolicy::Load)
                .record(move |ctx| {
                    pipelines.phong.bind(ctx.recorder);
                    meshes.scene.draw(ctx.recorder);
                    Ok(())
                }),
        )
        .add_pass(
            blur_pass(
                COMPOSITE_PASS,
                PassKind::Composite,
                pipelines.composite,
                meshes.quad,
                BlurParams {
                    horizontal: 1,
                    ..params
                },
            )
            .sample(
                texture_b,
                Some(DescriptorBinding {
                    set: pipelines.composite.descriptor_set,
                    binding: BLUR_TEXTURE_BINDING,
                }),
            )
            .write_color(backbuffer, LoadPolicy::Load),
        );

    Ok(builder.build()?)
}

///Enables or disables all bloom passes.
pub fn set_bloom_enabled<B: FrameBackend>(
    frames: &mut FrameOrchestrator<B>,
    enabled: bool,
) -> Result<(), GraphError> {
    for pass in BLOOM_PASSES {
        frames.set_pass_enabled(pass, enabled)?;
    }

    #[cfg(feature = "logging")]
    log::info!("Bloom {}", if enabled { "enabled" } else { "disabled" });

    Ok(())
}

pub fn toggle_bloom<B: FrameBackend>(frames: &mut FrameOrchestrator<B>) -> Result<bool, GraphError> {
    let enabled = !frames
        .graph()
        .is_pass_enabled(GLOW_PASS)
        .ok_or_else(|| GraphError::UnknownPass(GLOW_PASS.to_owned()))?;
    set_bloom_enabled(frames, enabled)?;
    Ok(enabled)
}

///Changes the blur scale of both blur passes by `delta`. Returns the new scale.
pub fn change_blur_scale<B: FrameBackend>(
    frames: &mut FrameOrchestrator<B>,
    delta: f32,
) -> Option<f32> {
    const BLUR_PASSES: [&str; 2] = [VERTICAL_BLUR_PASS, COMPOSITE_PASS];
    if BLUR_PASSES.iter().any(|pass| {
        frames
            .graph()
            .pass(pass)
            .and_then(|p| p.payload::<BlurParams>())
            .is_none()
    }) {
        return None;
    }

    let mut scale = None;
    for pass in BLUR_PASSES {
        let params = frames.payload_mut::<BlurParams>(pass)?;
        params.scale += delta;
        scale = Some(params.scale);
    }
    scale
}

#[cfg(test)]
mod tests {
    use passway::{layout::Layout, null_device::NullDevice};
    use passway_commands::{CommandLog, RecordedCommand};
    use passway_graph::{FrameConfig, null_backend::NullBackend};

    use super::*;
    use crate::test_util::{mesh, pipeline};

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 1280,
            height: 720,
        }
    }

    fn graph(device: &Arc<NullDevice>) -> anyhow::Result<PassGraph<NullDevice>> {
        build_bloom_graph(
            device,
            extent(),
            FORMAT,
            &BloomSettings::default(),
            BloomPipelines {
                phong: pipeline(100),
                skybox: pipeline(200),
                vertical_blur: pipeline(300),
                composite: pipeline(400),
            },
            BloomMeshes {
                scene: mesh(10, 900),
                glow: mesh(20, 300),
                skybox: mesh(30, 36),
                quad: mesh(40, 6),
            },
        )
    }

    fn frames(device: &Arc<NullDevice>, image_count: usize) -> FrameOrchestrator<NullBackend> {
        let backend = NullBackend::new(device, FORMAT, extent(), image_count).unwrap();
        FrameOrchestrator::new(backend, graph(device).unwrap(), FrameConfig::default()).unwrap()
    }

    fn pushed_blur_params(log: &CommandLog) -> Vec<BlurParams> {
        log.commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PushConstants { data, .. } => {
                    Some(bytemuck::pod_read_unaligned::<BlurParams>(data))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn passes_run_in_declared_order() {
        let device = Arc::new(NullDevice::new());
        let graph = graph(&device).unwrap();
        assert_eq!(
            graph.order_names(),
            vec![
                GLOW_PASS,
                GLOW_BLIT_PASS,
                VERTICAL_BLUR_PASS,
                BLUR_BLIT_PASS,
                SKYBOX_PASS,
                SCENE_PASS,
                COMPOSITE_PASS
            ]
        );
        //both blur passes sample through their descriptor sets
        assert_eq!(device.descriptor_writes().len(), 2);
    }

    #[test]
    fn unsupported_blit_format_is_rejected() {
        let device = Arc::new(NullDevice::new());
        device.reject_format(vk::Format::R8G8B8A8_UNORM);
        assert!(graph(&device).is_err());
        assert_eq!(device.live_images(), 0);
    }

    #[test]
    fn ping_pong_textures_return_to_sampling_every_frame() {
        let device = Arc::new(NullDevice::new());
        let mut frames = frames(&device, 2);
        let (a, _) = frames.graph().attachment_by_name(TEXTURE_A).unwrap();
        let (b, _) = frames.graph().attachment_by_name(TEXTURE_B).unwrap();

        let swapchain_images = frames
            .backend()
            .images()
            .into_iter()
            .map(|(image, _)| image)
            .collect::<Vec<_>>();

        for _ in 0..5 {
            let report = frames.render_frame().unwrap();
            assert_eq!(frames.graph().layout(a), Some(Layout::ShaderReadOnly));
            assert_eq!(frames.graph().layout(b), Some(Layout::ShaderReadOnly));

            //only the freshly acquired swapchain image may be discarded by a replay
            if !report.recorded {
                let log = frames.backend().last_submitted.as_ref().unwrap();
                assert!(log.transitions().iter().all(|t| {
                    t.from != vk::ImageLayout::UNDEFINED || swapchain_images.contains(&t.image)
                }));
            }
        }
        //slot 0 records again once the textures left their initial layouts
        assert_eq!(frames.backend().records, 3);

        let log = frames.backend().last_submitted.clone().unwrap();
        assert_eq!(log.blits().len(), 2);
        //glow, vertical blur, skybox, scene and composite
        assert_eq!(log.draw_count(), 5);
    }

    #[test]
    fn toggling_bloom_keeps_scene() {
        let device = Arc::new(NullDevice::new());
        let mut frames = frames(&device, 1);
        frames.render_frame().unwrap();

        assert!(!toggle_bloom(&mut frames).unwrap());
        assert_eq!(frames.graph().order_names(), vec![SKYBOX_PASS, SCENE_PASS]);
        let report = frames.render_frame().unwrap();
        assert!(report.recorded);
        let log = frames.backend().last_submitted.clone().unwrap();
        assert_eq!(log.draw_count(), 2);
        assert!(log.blits().is_empty());

        assert!(toggle_bloom(&mut frames).unwrap());
        frames.render_frame().unwrap();
        assert_eq!(
            frames
                .backend()
                .last_submitted
                .as_ref()
                .unwrap()
                .draw_count(),
            5
        );
    }

    #[test]
    fn blur_scale_reaches_push_constants() {
        let device = Arc::new(NullDevice::new());
        let mut frames = frames(&device, 1);
        frames.render_frame().unwrap();

        assert_eq!(change_blur_scale(&mut frames, 0.25), Some(1.25));
        assert!(frames.render_frame().unwrap().recorded);

        let params = pushed_blur_params(frames.backend().last_submitted.as_ref().unwrap());
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|p| p.scale == 1.25 && p.strength == 1.5));
        assert_eq!(params[0].horizontal, 0);
        assert_eq!(params[1].horizontal, 1);
    }

    #[test]
    fn blur_scale_changes_both_passes_or_none() {
        let device = Arc::new(NullDevice::new());
        let mut builder = GraphBuilder::new(&device, extent());
        let target = builder.attachment(AttachmentInfo::color(
            BLUR_TARGET,
            FORMAT,
            AttachmentSize::Swapchain,
        ));
        builder.add_pass(
            PassDescriptor::render(VERTICAL_BLUR_PASS, PassKind::Blur)
                .with_payload(BlurParams {
                    scale: 1.0,
                    strength: 1.5,
                    horizontal: 0,
                })
                .write_color(target, LoadPolicy::DontCare),
        );
        let backend = NullBackend::new(&device, FORMAT, extent(), 1).unwrap();
        let mut frames =
            FrameOrchestrator::new(backend, builder.build().unwrap(), FrameConfig::default())
                .unwrap();

        assert_eq!(change_blur_scale(&mut frames, 0.25), None);
        let params = frames
            .graph()
            .pass(VERTICAL_BLUR_PASS)
            .and_then(|p| p.payload::<BlurParams>())
            .copied()
            .unwrap();
        assert_eq!(params.scale, 1.0);
    }
}
