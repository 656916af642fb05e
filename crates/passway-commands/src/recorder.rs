use passway::ash::vk;
use smallvec::SmallVec;

use crate::BarrierBuilder;

///Clear value of a render target. Unlike [vk::ClearValue] this can be compared and printed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub const BLACK: ClearValue = ClearValue::Color([0.0, 0.0, 0.0, 1.0]);
    pub const TRANSPARENT: ClearValue = ClearValue::Color([0.0; 4]);
    ///Depth cleared to the far plane.
    pub const FAR_DEPTH: ClearValue = ClearValue::DepthStencil {
        depth: 1.0,
        stencil: 0,
    };

    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

///One color or depth target of a dynamic rendering scope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetDesc {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: ClearValue,
}

impl RenderTargetDesc {
    pub fn as_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear.to_vk())
    }
}

///Parameters of a `vkCmdBeginRendering`.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingDesc {
    pub extent: vk::Extent2D,
    pub color: SmallVec<[RenderTargetDesc; 4]>,
    pub depth: Option<RenderTargetDesc>,
}

impl RenderingDesc {
    pub fn render_area(&self) -> vk::Rect2D {
        passway::util::full_rect(self.extent)
    }
}

///Whole-image blit from `src` (in `TRANSFER_SRC_OPTIMAL`) to `dst` (in `TRANSFER_DST_OPTIMAL`).
#[derive(Clone, Copy, Debug)]
pub struct BlitDesc {
    pub src_image: vk::Image,
    pub src_extent: vk::Extent2D,
    pub src_subresource: vk::ImageSubresourceLayers,
    pub dst_image: vk::Image,
    pub dst_extent: vk::Extent2D,
    pub dst_subresource: vk::ImageSubresourceLayers,
    pub filter: vk::Filter,
}

impl BlitDesc {
    pub fn as_region(&self) -> vk::ImageBlit {
        vk::ImageBlit {
            src_subresource: self.src_subresource,
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                passway::util::extent_to_offset(self.src_extent, true),
            ],
            dst_subresource: self.dst_subresource,
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                passway::util::extent_to_offset(self.dst_extent, true),
            ],
        }
    }
}

///Everything a pass can record. Implemented on the Vulkan [Recorder](crate::Recorder) and the inspectable
/// [CommandLog](crate::CommandLog).
pub trait CommandRecorder {
    fn pipeline_barrier(&mut self, barriers: &BarrierBuilder);

    fn begin_rendering(&mut self, desc: &RenderingDesc);
    fn end_rendering(&mut self);

    fn blit_image(&mut self, desc: &BlitDesc);

    fn set_viewport(&mut self, viewport: vk::Viewport);
    fn set_scissor(&mut self, scissor: vk::Rect2D);

    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}
