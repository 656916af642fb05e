//! # Passway-Demos
//!
//! Rendering techniques built as pass graphs. Each technique is a function that declares attachments and passes
//! on a [GraphBuilder](passway_graph::GraphBuilder) and returns the built graph:
//!
//! - [bloom]: glow pass, blit based ping-pong between two textures with a separable blur, additive composite.
//! - [deferred]: G-buffer with three color targets and depth, composited in a single full-screen pass.
//!
//! Meshes and pipelines are created by the caller and passed in as [MeshBinding]s and [PipelineBinding]s.

use passway::ash::vk;
use passway_commands::CommandRecorder;

pub mod bloom;
pub mod deferred;

///Vertex and index buffer of an indexed mesh with `u32` indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshBinding {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

impl MeshBinding {
    pub fn bind(&self, recorder: &mut dyn CommandRecorder) {
        recorder.bind_vertex_buffers(0, &[self.vertex_buffer], &[0]);
        recorder.bind_index_buffer(self.index_buffer, 0, vk::IndexType::UINT32);
    }

    ///Binds and draws the whole mesh once.
    pub fn draw(&self, recorder: &mut dyn CommandRecorder) {
        self.bind(recorder);
        recorder.draw_indexed(self.index_count, 1, 0, 0, 0);
    }
}

///A graphics pipeline with its layout and the descriptor set bound at set 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
}

impl PipelineBinding {
    pub fn bind(&self, recorder: &mut dyn CommandRecorder) {
        recorder.bind_graphics_pipeline(self.pipeline);
        recorder.bind_descriptor_sets(self.layout, 0, &[self.descriptor_set]);
    }

    ///Pushes `data` to all graphics stages.
    pub fn push<T: bytemuck::Pod>(&self, recorder: &mut dyn CommandRecorder, data: &T) {
        recorder.push_constants(
            self.layout,
            vk::ShaderStageFlags::ALL_GRAPHICS,
            0,
            bytemuck::bytes_of(data),
        );
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use passway::ash::vk::{self, Handle};

    use crate::{MeshBinding, PipelineBinding};

    pub fn mesh(id: u64, index_count: u32) -> MeshBinding {
        MeshBinding {
            vertex_buffer: vk::Buffer::from_raw(id),
            index_buffer: vk::Buffer::from_raw(id + 1),
            index_count,
        }
    }

    pub fn pipeline(id: u64) -> PipelineBinding {
        PipelineBinding {
            pipeline: vk::Pipeline::from_raw(id),
            layout: vk::PipelineLayout::from_raw(id + 1),
            descriptor_set: vk::DescriptorSet::from_raw(id + 2),
        }
    }
}
