//! Pipeline layout construction from merged reflection data.
//!
//! Set indices follow the argument-slot convention: set `i` holds the
//! SRV/UAV/sampler descriptors of shader argument `i`, set
//! `i + MAX_SHADER_ARGUMENTS` its single dynamic CBV. Unused sets in
//! between get empty layouts so the indices stay addressable.

use arrayvec::ArrayVec;
use ash::vk;

use arclight_hal::limits::{MAX_ROOT_CONSTANT_BYTES, MAX_SHADER_ARGUMENTS};

use crate::spirv_patch::ReflectedDescriptor;

const MAX_SETS: usize = MAX_SHADER_ARGUMENTS * 2;

/// Bindings of the descriptor sets a layout will be built from, grouped
/// by set index.
pub struct SetGrouping {
    pub sets: ArrayVec<Vec<vk::DescriptorSetLayoutBinding<'static>>, MAX_SETS>,
    /// Merged pipeline-stage visibility per set (parallel array).
    pub visibilities: ArrayVec<vk::PipelineStageFlags, MAX_SETS>,
}

/// Groups merged descriptors by set, producing one binding list per set
/// up to the highest used index.
pub fn group_descriptor_sets(descriptors: &[ReflectedDescriptor]) -> SetGrouping {
    let num_sets = descriptors
        .iter()
        .map(|d| d.set as usize + 1)
        .max()
        .unwrap_or(0)
        .min(MAX_SETS);

    let mut grouping = SetGrouping {
        sets: ArrayVec::new(),
        visibilities: ArrayVec::new(),
    };
    for _ in 0..num_sets {
        grouping.sets.push(Vec::new());
        grouping.visibilities.push(vk::PipelineStageFlags::empty());
    }

    for desc in descriptors {
        let set = desc.set as usize;
        if set >= num_sets {
            warn!(
                "descriptor (set {}, binding {}) beyond addressable sets, dropped",
                desc.set, desc.binding
            );
            continue;
        }
        grouping.sets[set].push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(desc.binding)
                .descriptor_type(desc.ty)
                .descriptor_count(desc.array_size)
                .stage_flags(desc.visible_stages),
        );
        grouping.visibilities[set] |= desc.visible_pipeline_stages;
    }

    grouping
}

/// Expands a union of shader stages to the stage class the push-constant
/// range is made visible to.
pub fn push_constant_stages(stages: vk::ShaderStageFlags) -> vk::ShaderStageFlags {
    if stages.contains(vk::ShaderStageFlags::COMPUTE) {
        vk::ShaderStageFlags::COMPUTE
    } else if stages.intersects(
        vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::MISS_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            | vk::ShaderStageFlags::ANY_HIT_KHR
            | vk::ShaderStageFlags::INTERSECTION_KHR
            | vk::ShaderStageFlags::CALLABLE_KHR,
    ) {
        vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::MISS_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            | vk::ShaderStageFlags::ANY_HIT_KHR
            | vk::ShaderStageFlags::INTERSECTION_KHR
            | vk::ShaderStageFlags::CALLABLE_KHR
    } else {
        vk::ShaderStageFlags::ALL_GRAPHICS
    }
}

/// A pipeline layout plus the per-set layouts it owns.
///
/// The set layouts outlive every descriptor set allocated against them;
/// shader views hold their own single-use layouts for the same reason.
pub struct PipelineLayout {
    pub raw: vk::PipelineLayout,
    pub set_layouts: ArrayVec<vk::DescriptorSetLayout, MAX_SETS>,
    pub set_visibilities: ArrayVec<vk::PipelineStageFlags, MAX_SETS>,
    /// Stages of the push-constant range; empty when the pipeline has no
    /// push constants.
    pub push_constant_stages: vk::ShaderStageFlags,
}

impl PipelineLayout {
    pub fn new(
        device: &ash::Device,
        descriptors: &[ReflectedDescriptor],
        pipeline_stages: vk::ShaderStageFlags,
        has_push_constants: bool,
    ) -> Self {
        let grouping = group_descriptor_sets(descriptors);

        let mut set_layouts = ArrayVec::new();
        for bindings in grouping.sets.iter() {
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
            let layout = unsafe {
                device
                    .create_descriptor_set_layout(&info, None)
                    .expect("descriptor set layout creation failed")
            };
            set_layouts.push(layout);
        }

        let push_stages = if has_push_constants {
            push_constant_stages(pipeline_stages)
        } else {
            vk::ShaderStageFlags::empty()
        };

        let push_range = vk::PushConstantRange::default()
            .stage_flags(push_stages)
            .offset(0)
            .size(MAX_ROOT_CONSTANT_BYTES as u32);

        let mut info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if has_push_constants {
            info = info.push_constant_ranges(std::slice::from_ref(&push_range));
        }

        let raw = unsafe {
            device
                .create_pipeline_layout(&info, None)
                .expect("pipeline layout creation failed")
        };

        PipelineLayout {
            raw,
            set_layouts,
            set_visibilities: grouping.visibilities,
            push_constant_stages: push_stages,
        }
    }

    pub fn has_push_constants(&self) -> bool {
        !self.push_constant_stages.is_empty()
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.raw, None);
            for &layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spirv_patch::{SRV_BINDING_START, SAMPLER_BINDING_START};

    fn descriptor(set: u32, binding: u32, ty: vk::DescriptorType) -> ReflectedDescriptor {
        ReflectedDescriptor {
            set,
            binding,
            array_size: 1,
            ty,
            visible_stages: vk::ShaderStageFlags::FRAGMENT,
            visible_pipeline_stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    }

    #[test]
    fn groups_by_set_with_gap_sets_empty() {
        // arg 0: SRV + sampler; arg 0 CBV lives at set 4
        let descriptors = vec![
            descriptor(0, SRV_BINDING_START, vk::DescriptorType::SAMPLED_IMAGE),
            descriptor(0, SAMPLER_BINDING_START, vk::DescriptorType::SAMPLER),
            descriptor(4, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
        ];
        let grouping = group_descriptor_sets(&descriptors);

        assert_eq!(grouping.sets.len(), 5);
        assert_eq!(grouping.sets[0].len(), 2);
        assert!(grouping.sets[1].is_empty());
        assert!(grouping.sets[2].is_empty());
        assert!(grouping.sets[3].is_empty());
        assert_eq!(grouping.sets[4].len(), 1);
        assert_eq!(
            grouping.visibilities[0],
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
    }

    #[test]
    fn push_constant_stage_classes() {
        assert_eq!(
            push_constant_stages(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
            vk::ShaderStageFlags::ALL_GRAPHICS
        );
        assert_eq!(
            push_constant_stages(vk::ShaderStageFlags::COMPUTE),
            vk::ShaderStageFlags::COMPUTE
        );
        assert!(push_constant_stages(vk::ShaderStageFlags::RAYGEN_KHR)
            .contains(vk::ShaderStageFlags::MISS_KHR));
    }
}
