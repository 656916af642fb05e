//! # Passway-Commands
//!
//! Command recording for passway. Passes never talk to a `vk::CommandBuffer` directly, they record through the
//! [CommandRecorder] trait. The trait is implemented by
//!
//! - [Recorder]: records into a [ManagedCommands] buffer, which pairs a command buffer with the fence of its last
//!   submission.
//! - [CommandLog]: stores every command for later inspection. Useful for dry runs of a pass graph.
//!
//! Layout transitions are collected in a [BarrierBuilder] and flushed as a single synchronization2 barrier.

use std::time::Duration;

use passway::{
    ash::{self, vk},
    command_buffer::{CommandBuffer, CommandPool},
    context::{Device, Queue},
    sync::{Fence, Semaphore},
};
use smallvec::SmallVec;

mod barrier_builder;
pub use barrier_builder::BarrierBuilder;

mod recorder;
pub use recorder::{BlitDesc, ClearValue, CommandRecorder, RenderTargetDesc, RenderingDesc};

mod command_log;
pub use command_log::{CommandLog, ImageTransition, RecordedCommand};

///A command buffer together with the fence that signals the end of its last submission.
pub struct ManagedCommands {
    pub inner: CommandBuffer,
    pub fence: Fence,
    has_recording: bool,
}

impl ManagedCommands {
    ///Allocates a new buffer from `pool`. The pool must allow resetting single buffers. The fence starts signaled,
    /// so the first [wait](Self::wait) returns immediately.
    pub fn new(pool: &std::sync::Arc<CommandPool>) -> Result<Self, vk::Result> {
        let inner = pool.allocate_buffer()?;
        let fence = Fence::new(&pool.device, true)?;
        Ok(ManagedCommands {
            inner,
            fence,
            has_recording: false,
        })
    }

    fn device(&self) -> &ash::Device {
        &self.inner.device().inner
    }

    ///Waits for the execution fence to get signaled, for at most `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<(), vk::Result> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        self.fence.wait(nanos)
    }

    ///True if the buffer holds a finished recording that can be submitted again.
    pub fn has_recording(&self) -> bool {
        self.has_recording
    }

    ///Starts recording a new command buffer. The caller must have waited for the last submission via
    /// [wait](Self::wait) before.
    pub fn start_recording(&mut self) -> Result<Recorder<'_>, vk::Result> {
        self.has_recording = false;
        self.inner.reset(false)?;

        unsafe {
            self.device().begin_command_buffer(
                self.inner.inner,
                &vk::CommandBufferBeginInfo::default(),
            )?
        };

        Ok(Recorder {
            buffer: self,
            has_finished_recording: false,
        })
    }

    ///Submits the recorded commands to `queue`. Execution waits on `wait` at the given stage and signals `signal`
    /// as well as the buffer's fence when done.
    pub fn submit(
        &mut self,
        device: &Device,
        queue: &Queue,
        wait: Option<(&Semaphore, vk::PipelineStageFlags2)>,
        signal: Option<&Semaphore>,
    ) -> Result<(), vk::Result> {
        let wait_infos: SmallVec<[vk::SemaphoreSubmitInfo<'_>; 1]> = wait
            .into_iter()
            .map(|(sem, stage)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(sem.inner)
                    .stage_mask(stage)
            })
            .collect();
        let signal_infos: SmallVec<[vk::SemaphoreSubmitInfo<'_>; 1]> = signal
            .into_iter()
            .map(|sem| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(sem.inner)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let cb_info = vk::CommandBufferSubmitInfo::default().command_buffer(self.inner.inner);

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(core::slice::from_ref(&cb_info))
            .signal_semaphore_infos(&signal_infos);

        //reset fence for resubmission
        self.fence.reset()?;

        if let Err(e) = unsafe {
            device.inner.queue_submit2(
                queue.inner,
                core::slice::from_ref(&submit),
                self.fence.inner,
            )
        } {
            #[cfg(feature = "logging")]
            log::error!(
                "Failed to submit command buffer to queue {}: {}",
                queue.family_index,
                e
            );
            return Err(e);
        }

        Ok(())
    }
}

///Records into a [ManagedCommands] buffer.
pub struct Recorder<'a> {
    buffer: &'a mut ManagedCommands,
    has_finished_recording: bool,
}

impl Recorder<'_> {
    fn device(&self) -> &ash::Device {
        self.buffer.device()
    }

    fn cmd(&self) -> vk::CommandBuffer {
        self.buffer.inner.inner
    }

    ///Finishes recording of this buffer.
    pub fn finish_recording(mut self) -> Result<(), vk::Result> {
        self.has_finished_recording = true;
        unsafe { self.device().end_command_buffer(self.cmd())? };
        self.buffer.has_recording = true;
        Ok(())
    }
}

impl CommandRecorder for Recorder<'_> {
    fn pipeline_barrier(&mut self, barriers: &BarrierBuilder) {
        unsafe {
            self.device()
                .cmd_pipeline_barrier2(self.cmd(), &barriers.as_dependency_info())
        }
    }

    fn begin_rendering(&mut self, desc: &RenderingDesc) {
        let colors = desc
            .color
            .iter()
            .map(|c| c.as_attachment_info())
            .collect::<SmallVec<[_; 4]>>();
        let depth = desc.depth.map(|d| d.as_attachment_info());

        let mut info = vk::RenderingInfo::default()
            .render_area(desc.render_area())
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
        }

        unsafe { self.device().cmd_begin_rendering(self.cmd(), &info) }
    }

    fn end_rendering(&mut self) {
        unsafe { self.device().cmd_end_rendering(self.cmd()) }
    }

    fn blit_image(&mut self, desc: &BlitDesc) {
        unsafe {
            self.device().cmd_blit_image(
                self.cmd(),
                desc.src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                desc.dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[desc.as_region()],
                desc.filter,
            )
        }
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe {
            self.device()
                .cmd_set_viewport(self.cmd(), 0, core::slice::from_ref(&viewport))
        }
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe {
            self.device()
                .cmd_set_scissor(self.cmd(), 0, core::slice::from_ref(&scissor))
        }
    }

    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(self.cmd(), vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.cmd(),
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            )
        }
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device()
                .cmd_push_constants(self.cmd(), layout, stages, offset, data)
        }
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[u64]) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.cmd(), first_binding, buffers, offsets)
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.cmd(), buffer, offset, index_type)
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device().cmd_draw(
                self.cmd(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                self.cmd(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }
}

///Prevents leaving the command buffer in a recording state. This most likely means an error occurred while recording,
/// therefore the buffer is not marked as reusable.
impl Drop for Recorder<'_> {
    fn drop(&mut self) {
        if !self.has_finished_recording {
            #[cfg(feature = "logging")]
            log::error!("Finish recording on drop, the recording is discarded!");
            if let Err(e) = unsafe { self.device().end_command_buffer(self.cmd()) } {
                #[cfg(feature = "logging")]
                log::error!(
                    "Failed to end recording of command buffer in Recorder's drop implementation: {}",
                    e
                );
                #[cfg(not(feature = "logging"))]
                let _ = e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(ManagedCommands: Send, Sync);
        assert_impl_all!(BarrierBuilder: Send, Sync);
        assert_impl_all!(CommandLog: Send, Sync, CommandRecorder);
    }
}
