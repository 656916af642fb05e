use passway::{
    ash::vk,
    layout::{AccessScope, Layout},
};
use tinyvec::TinyVec;

use crate::CommandRecorder;

///Collects image barriers until they are flushed as one `vkCmdPipelineBarrier2`.
///
/// Uses tinyvec internally, the first [STACK_ALLOCATION](Self::STACK_ALLOCATION) barriers don't allocate.
#[derive(Debug, Default)]
pub struct BarrierBuilder {
    pub images: TinyVec<[vk::ImageMemoryBarrier2<'static>; Self::STACK_ALLOCATION]>,
}

impl BarrierBuilder {
    ///Amount of barriers that can be stack allocated.
    pub const STACK_ALLOCATION: usize = 6;

    pub fn new() -> Self {
        BarrierBuilder {
            images: TinyVec::default(),
        }
    }

    ///Adds a layout transition of `image` from `from` to `to`.
    ///
    /// # Safety
    ///
    /// Make sure that the `image` handle is alive until the barrier is executed on the GPU.
    pub fn image_barrier(
        &mut self,
        image: vk::Image,
        subresource_range: vk::ImageSubresourceRange,
        src: AccessScope,
        from: Layout,
        dst: AccessScope,
        to: Layout,
    ) -> &mut Self {
        let item = vk::ImageMemoryBarrier2::default()
            .image(image)
            .subresource_range(subresource_range)
            .src_access_mask(src.access)
            .src_stage_mask(src.stages)
            .old_layout(from.to_vk())
            .dst_access_mask(dst.access)
            .dst_stage_mask(dst.stages)
            .new_layout(to.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);

        #[cfg(feature = "logging")]
        log::trace!("layout[{:?}] {:?} -> {:?}", image, from, to);

        self.images.push(item);
        self
    }

    ///Returns a dependency info over the currently pushed barriers.
    pub fn as_dependency_info(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default().image_memory_barriers(self.images.as_slice())
    }

    ///Returns true if at least one barrier has been added.
    pub fn has_barrier(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    ///Records all pending barriers into `recorder` as one barrier command and clears the builder. Returns
    /// the number of image barriers that were recorded. Nothing is recorded if no barrier is pending.
    pub fn flush(&mut self, recorder: &mut dyn CommandRecorder) -> usize {
        if !self.has_barrier() {
            return 0;
        }
        let count = self.len();
        recorder.pipeline_barrier(self);
        self.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandLog;
    use passway::layout::transition_scopes;

    fn range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    #[test]
    fn flush_records_once_and_clears() {
        let mut builder = BarrierBuilder::new();
        let mut log = CommandLog::new();

        assert_eq!(builder.flush(&mut log), 0);
        assert!(log.commands().is_empty());

        for _ in 0..(BarrierBuilder::STACK_ALLOCATION + 2) {
            let (src, dst) = transition_scopes(
                Layout::Undefined,
                Layout::ColorAttachment,
                vk::ImageAspectFlags::COLOR,
            )
            .unwrap();
            builder.image_barrier(
                vk::Image::null(),
                range(),
                src,
                Layout::Undefined,
                dst,
                Layout::ColorAttachment,
            );
        }

        assert_eq!(builder.flush(&mut log), 8);
        assert!(!builder.has_barrier());
        assert_eq!(log.barrier_count(), 1);
        assert_eq!(log.transitions().len(), 8);
        assert_eq!(
            log.transitions()[0].to,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }
}
