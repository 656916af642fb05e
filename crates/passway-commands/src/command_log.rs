use passway::ash::vk;

use crate::{BarrierBuilder, BlitDesc, CommandRecorder, RenderingDesc};

///One image transition of a recorded barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub from: vk::ImageLayout,
    pub to: vk::ImageLayout,
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

#[derive(Clone, Debug)]
pub enum RecordedCommand {
    Barrier(Vec<ImageTransition>),
    BeginRendering(RenderingDesc),
    EndRendering,
    Blit(BlitDesc),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<u64>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
}

///A [CommandRecorder] that stores every command instead of recording it into a command buffer. Used for dry runs
/// and to inspect which barriers a graph produces.
#[derive(Clone, Debug, Default)]
pub struct CommandLog {
    commands: Vec<RecordedCommand>,
}

impl CommandLog {
    pub fn new() -> Self {
        CommandLog {
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    ///All image transitions in recording order, flattened over all barrier commands.
    pub fn transitions(&self) -> Vec<ImageTransition> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barrier(t) => Some(t.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    ///Number of barrier commands.
    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Barrier(_)))
            .count()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }

    pub fn rendering_scopes(&self) -> Vec<&RenderingDesc> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRendering(desc) => Some(desc),
                _ => None,
            })
            .collect()
    }

    pub fn blits(&self) -> Vec<&BlitDesc> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Blit(desc) => Some(desc),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandRecorder for CommandLog {
    fn pipeline_barrier(&mut self, barriers: &BarrierBuilder) {
        let transitions = barriers
            .images
            .iter()
            .map(|b| ImageTransition {
                image: b.image,
                aspect: b.subresource_range.aspect_mask,
                from: b.old_layout,
                to: b.new_layout,
                src_stages: b.src_stage_mask,
                src_access: b.src_access_mask,
                dst_stages: b.dst_stage_mask,
                dst_access: b.dst_access_mask,
            })
            .collect();
        self.commands.push(RecordedCommand::Barrier(transitions));
    }

    fn begin_rendering(&mut self, desc: &RenderingDesc) {
        self.commands
            .push(RecordedCommand::BeginRendering(desc.clone()));
    }

    fn end_rendering(&mut self) {
        self.commands.push(RecordedCommand::EndRendering);
    }

    fn blit_image(&mut self, desc: &BlitDesc) {
        self.commands.push(RecordedCommand::Blit(*desc));
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.commands.push(RecordedCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.commands.push(RecordedCommand::SetScissor(scissor));
    }

    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.commands.push(RecordedCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]) {
        self.commands.push(RecordedCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }
}
