//! Batched pipeline barriers derived from resource-state changes.

use ash::vk;
use smallvec::SmallVec;

use arclight_hal::types::ResourceState;

use crate::conv;

/// A single state change with its shader-stage dependencies (only
/// meaningful for CBV/SRV/UAV states; resolved through
/// [`conv::pipeline_stage_dependency`]).
#[derive(Copy, Clone, Debug)]
pub struct StateChange {
    pub before: ResourceState,
    pub after: ResourceState,
    pub shader_dep_before: vk::PipelineStageFlags,
    pub shader_dep_after: vk::PipelineStageFlags,
}

impl StateChange {
    pub fn new(
        before: ResourceState,
        after: ResourceState,
        shader_dep_before: vk::PipelineStageFlags,
        shader_dep_after: vk::PipelineStageFlags,
    ) -> Self {
        StateChange {
            before,
            after,
            shader_dep_before,
            shader_dep_after,
        }
    }
}

/// Collects image/buffer/memory barriers and the merged stage masks of all
/// contained changes, then records them as one `vkCmdPipelineBarrier`.
#[derive(Default)]
pub struct BarrierBundle {
    stages_before: vk::PipelineStageFlags,
    stages_after: vk::PipelineStageFlags,
    image_barriers: SmallVec<[vk::ImageMemoryBarrier<'static>; 4]>,
    buffer_barriers: SmallVec<[vk::BufferMemoryBarrier<'static>; 4]>,
    memory_barriers: SmallVec<[vk::MemoryBarrier<'static>; 1]>,
}

impl BarrierBundle {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_change(&mut self, change: &StateChange) {
        self.stages_before |=
            conv::pipeline_stage_dependency(change.before, change.shader_dep_before);
        self.stages_after |= conv::pipeline_stage_dependency(change.after, change.shader_dep_after);
    }

    /// Barrier over all subresources of `image`.
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        change: StateChange,
        aspect: vk::ImageAspectFlags,
    ) {
        self.add_image_barrier_for_range(
            image,
            change,
            aspect,
            0,
            vk::REMAINING_MIP_LEVELS,
            0,
            vk::REMAINING_ARRAY_LAYERS,
        );
    }

    /// Barrier over a single mip/slice of `image`.
    pub fn add_image_barrier_slice(
        &mut self,
        image: vk::Image,
        change: StateChange,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        array_slice: u32,
    ) {
        self.add_image_barrier_for_range(image, change, aspect, mip_level, 1, array_slice, 1);
    }

    fn add_image_barrier_for_range(
        &mut self,
        image: vk::Image,
        change: StateChange,
        aspect: vk::ImageAspectFlags,
        mip_start: u32,
        mip_count: u32,
        layer_start: u32,
        layer_count: u32,
    ) {
        self.add_change(&change);
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(conv::access_flags(change.before))
                .dst_access_mask(conv::access_flags(change.after))
                .old_layout(conv::image_layout(change.before))
                .new_layout(conv::image_layout(change.after))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(aspect)
                        .base_mip_level(mip_start)
                        .level_count(mip_count)
                        .base_array_layer(layer_start)
                        .layer_count(layer_count),
                ),
        );
    }

    pub fn add_buffer_barrier(&mut self, buffer: vk::Buffer, change: StateChange, size: u64) {
        self.add_change(&change);
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(conv::access_flags(change.before))
                .dst_access_mask(conv::access_flags(change.after))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(size),
        );
    }

    /// A full memory barrier between the given stages (UAV barriers).
    pub fn add_memory_barrier(
        &mut self,
        access: vk::AccessFlags,
        stages_before: vk::PipelineStageFlags,
        stages_after: vk::PipelineStageFlags,
    ) {
        self.stages_before |= stages_before;
        self.stages_after |= stages_after;
        self.memory_barriers.push(
            vk::MemoryBarrier::default()
                .src_access_mask(access)
                .dst_access_mask(access),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty()
            && self.buffer_barriers.is_empty()
            && self.memory_barriers.is_empty()
    }

    /// Records all contained barriers into `cmd_buf` and clears the bundle.
    pub fn record(&mut self, device: &ash::Device, cmd_buf: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let src = if self.stages_before.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            self.stages_before
        };
        let dst = if self.stages_after.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            self.stages_after
        };
        unsafe {
            device.cmd_pipeline_barrier(
                cmd_buf,
                src,
                dst,
                vk::DependencyFlags::empty(),
                &self.memory_barriers,
                &self.buffer_barriers,
                &self.image_barriers,
            );
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.stages_before = vk::PipelineStageFlags::empty();
        self.stages_after = vk::PipelineStageFlags::empty();
        self.image_barriers.clear();
        self.buffer_barriers.clear();
        self.memory_barriers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_masks_merge_across_changes() {
        let mut bundle = BarrierBundle::new();
        bundle.add_buffer_barrier(
            vk::Buffer::null(),
            StateChange::new(
                ResourceState::CopyDest,
                ResourceState::ShaderResource,
                vk::PipelineStageFlags::empty(),
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            64,
        );
        bundle.add_image_barrier(
            vk::Image::null(),
            StateChange::new(
                ResourceState::Undefined,
                ResourceState::RenderTarget,
                vk::PipelineStageFlags::empty(),
                vk::PipelineStageFlags::empty(),
            ),
            vk::ImageAspectFlags::COLOR,
        );

        assert!(!bundle.is_empty());
        assert_eq!(
            bundle.stages_before,
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            bundle.stages_after,
            vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }
}
