//! Post-compile SPIR-V patching and descriptor reflection.
//!
//! SPIR-V entering this backend uses HLSL-style register ranges per space:
//! CBVs at binding 0, SRVs at 1000, UAVs at 2000, samplers at 3000 (the
//! offsets are applied at shader compile time). Because Vulkan has no
//! root-descriptor CBVs, each shader-argument slot additionally owns two
//! descriptor sets: slot `i` uses set `i` for SRV/UAV/samplers and set
//! `i + MAX_SHADER_ARGUMENTS` for its single dynamic CBV. That set shift
//! cannot come from the compiler and is applied here by patching the
//! bytecode.

use ash::vk;
use fxhash::FxHashMap;

use arclight_hal::arg::ShaderArgShape;
use arclight_hal::limits::MAX_SHADER_ARGUMENTS;
use arclight_hal::types::{ShaderStage, ShaderStageFlags};
use arclight_spirv as spirv;

use crate::conv;

/// Binding-range bases of the shader ABI.
pub const CBV_BINDING_START: u32 = 0;
pub const SRV_BINDING_START: u32 = 1000;
pub const UAV_BINDING_START: u32 = 2000;
pub const SAMPLER_BINDING_START: u32 = 3000;

/// Where, what, and visibility of one reflected descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReflectedDescriptor {
    pub set: u32,
    pub binding: u32,
    pub array_size: u32,
    pub ty: vk::DescriptorType,
    /// Shader stages the descriptor is visible to.
    pub visible_stages: vk::ShaderStageFlags,
    /// Pipeline stages the descriptor is visible to (derived from
    /// `visible_stages`).
    pub visible_pipeline_stages: vk::PipelineStageFlags,
}

/// One shader stage after patching, with its reflection data.
pub struct PatchedShaderStage {
    pub spirv: Vec<u8>,
    pub stage: ShaderStage,
    pub has_push_constants: bool,
    pub descriptors: Vec<ReflectedDescriptor>,
}

fn reflected_stage(stage: spirv::ShaderStage) -> ShaderStage {
    match stage {
        spirv::ShaderStage::Vertex => ShaderStage::Vertex,
        spirv::ShaderStage::Hull => ShaderStage::Hull,
        spirv::ShaderStage::Domain => ShaderStage::Domain,
        spirv::ShaderStage::Geometry => ShaderStage::Geometry,
        spirv::ShaderStage::Pixel => ShaderStage::Pixel,
        spirv::ShaderStage::Compute => ShaderStage::Compute,
        spirv::ShaderStage::RayGen => ShaderStage::RayGen,
        spirv::ShaderStage::RayMiss => ShaderStage::RayMiss,
        spirv::ShaderStage::RayClosestHit => ShaderStage::RayClosestHit,
        spirv::ShaderStage::RayIntersect => ShaderStage::RayIntersect,
        spirv::ShaderStage::RayAnyHit => ShaderStage::RayAnyHit,
        spirv::ShaderStage::RayCallable => ShaderStage::RayCallable,
    }
}

fn descriptor_type(kind: spirv::DescriptorKind) -> vk::DescriptorType {
    match kind {
        // every CBV in this ABI becomes a dynamic uniform buffer; the
        // offset is supplied per draw
        spirv::DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        spirv::DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        spirv::DescriptorKind::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        spirv::DescriptorKind::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        spirv::DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        spirv::DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        spirv::DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        spirv::DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        spirv::DescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

/// Parses, reflects and patches a single stage's bytecode.
pub fn create_patched_shader(bytecode: &[u8]) -> Result<PatchedShaderStage, spirv::ParseError> {
    let mut module = spirv::Module::from_bytes(bytecode)?;
    let reflected = spirv::reflect(&module)?;
    let mut bindings = reflected.bindings;

    spirv::patch_uniform_buffer_sets(&mut module, &mut bindings, MAX_SHADER_ARGUMENTS as u32);

    let stage = reflected_stage(reflected.stage);
    let stage_flags: ShaderStageFlags = stage.into();
    let visible_stages = conv::shader_stage_flags(stage_flags);
    let visible_pipeline_stages = conv::shader_stages_to_pipeline_stages(stage_flags);

    let descriptors = bindings
        .iter()
        .map(|b| ReflectedDescriptor {
            set: b.set,
            binding: b.binding,
            array_size: b.array_size.max(1),
            ty: descriptor_type(b.kind),
            visible_stages,
            visible_pipeline_stages,
        })
        .collect();

    Ok(PatchedShaderStage {
        spirv: module.to_bytes(),
        stage,
        has_push_constants: reflected.has_push_constants,
        descriptors,
    })
}

/// Merges per-stage descriptor lists into one sorted, deduplicated list.
/// Descriptors identical up to visibility get their stage masks OR'd.
pub fn merge_reflected_descriptors(stages: &[PatchedShaderStage]) -> Vec<ReflectedDescriptor> {
    let mut merged: FxHashMap<(u32, u32), ReflectedDescriptor> = FxHashMap::default();

    for stage in stages {
        for desc in &stage.descriptors {
            match merged.get_mut(&(desc.set, desc.binding)) {
                Some(existing) => {
                    if existing.ty != desc.ty || existing.array_size != desc.array_size {
                        warn!(
                            "descriptor (set {}, binding {}) reflected with conflicting \
                             shapes across stages: {:?}[{}] vs {:?}[{}]",
                            desc.set,
                            desc.binding,
                            existing.ty,
                            existing.array_size,
                            desc.ty,
                            desc.array_size
                        );
                    }
                    existing.visible_stages |= desc.visible_stages;
                    existing.visible_pipeline_stages |= desc.visible_pipeline_stages;
                }
                None => {
                    merged.insert((desc.set, desc.binding), *desc);
                }
            }
        }
    }

    let mut result: Vec<ReflectedDescriptor> = merged.into_iter().map(|(_, d)| d).collect();
    result.sort_by_key(|d| (d.set, d.binding));
    result
}

/// The shader-argument slot a descriptor belongs to, and whether it sits
/// in the shifted CBV set range.
fn slot_of(desc: &ReflectedDescriptor) -> (usize, bool) {
    let max_args = MAX_SHADER_ARGUMENTS as u32;
    if desc.set >= max_args {
        ((desc.set - max_args) as usize, true)
    } else {
        (desc.set as usize, false)
    }
}

/// Compares the declared argument shapes against the reflected
/// descriptors, logging a warning per mismatch. Creation proceeds either
/// way; reflection is the source of truth. Returns true when consistent.
pub fn warn_if_inconsistent(
    merged: &[ReflectedDescriptor],
    shapes: &[ShaderArgShape],
) -> bool {
    let mut reflected_shapes = [ShaderArgShape::default(); MAX_SHADER_ARGUMENTS];

    for desc in merged {
        let (slot, is_cbv_set) = slot_of(desc);
        if slot >= MAX_SHADER_ARGUMENTS {
            warn!(
                "reflected descriptor (set {}, binding {}) is outside the shader-argument range",
                desc.set, desc.binding
            );
            continue;
        }
        let shape = &mut reflected_shapes[slot];
        if is_cbv_set {
            shape.has_cbv = true;
        } else if desc.binding >= SAMPLER_BINDING_START {
            shape.num_samplers += desc.array_size;
        } else if desc.binding >= UAV_BINDING_START {
            shape.num_uavs += desc.array_size;
        } else if desc.binding >= SRV_BINDING_START {
            shape.num_srvs += desc.array_size;
        } else {
            // CBV-range binding in an unshifted set: the module was not
            // compiled against this ABI
            warn!(
                "reflected CBV at unshifted set {} binding {}",
                desc.set, desc.binding
            );
            shape.has_cbv = true;
        }
    }

    let mut consistent = true;
    for (i, declared) in shapes.iter().enumerate() {
        let reflected = &reflected_shapes[i];
        if declared != reflected {
            warn!(
                "shader argument {} declared as {:?} but reflects as {:?}",
                i, declared, reflected
            );
            consistent = false;
        }
    }
    for (i, reflected) in reflected_shapes.iter().enumerate().skip(shapes.len()) {
        if *reflected != ShaderArgShape::default() {
            warn!(
                "shader argument {} reflects as {:?} but was not declared",
                i, reflected
            );
            consistent = false;
        }
    }
    consistent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(
        set: u32,
        binding: u32,
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> ReflectedDescriptor {
        ReflectedDescriptor {
            set,
            binding,
            array_size: 1,
            ty,
            visible_stages: stages,
            visible_pipeline_stages: vk::PipelineStageFlags::empty(),
        }
    }

    fn stage_with(stage: ShaderStage, descriptors: Vec<ReflectedDescriptor>) -> PatchedShaderStage {
        PatchedShaderStage {
            spirv: Vec::new(),
            stage,
            has_push_constants: false,
            descriptors,
        }
    }

    #[test]
    fn merge_ors_visibility_of_shared_descriptors() {
        // VS and PS both reference the same SRV at (set 0, binding 1000)
        let vs = stage_with(
            ShaderStage::Vertex,
            vec![descriptor(
                0,
                SRV_BINDING_START,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        let ps = stage_with(
            ShaderStage::Pixel,
            vec![descriptor(
                0,
                SRV_BINDING_START,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        );

        let merged = merge_reflected_descriptors(&[vs, ps]);
        assert_eq!(merged.len(), 1, "shared descriptors must merge to one");
        assert_eq!(merged[0].binding, SRV_BINDING_START);
        assert_eq!(
            merged[0].visible_stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn merge_keeps_distinct_bindings_sorted() {
        let ps = stage_with(
            ShaderStage::Pixel,
            vec![
                descriptor(
                    4,
                    0,
                    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                descriptor(
                    0,
                    SRV_BINDING_START + 1,
                    vk::DescriptorType::SAMPLED_IMAGE,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
                descriptor(
                    0,
                    SRV_BINDING_START,
                    vk::DescriptorType::SAMPLED_IMAGE,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        );

        let merged = merge_reflected_descriptors(&[ps]);
        let keys: Vec<(u32, u32)> = merged.iter().map(|d| (d.set, d.binding)).collect();
        assert_eq!(
            keys,
            vec![(0, SRV_BINDING_START), (0, SRV_BINDING_START + 1), (4, 0)]
        );
    }

    #[test]
    fn consistency_check_accepts_matching_shapes() {
        let merged = vec![
            descriptor(
                0,
                SRV_BINDING_START,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            descriptor(
                0,
                SAMPLER_BINDING_START,
                vk::DescriptorType::SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            descriptor(
                4,
                0,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];
        let shapes = [ShaderArgShape::new(1, 0, 1, true)];
        assert!(warn_if_inconsistent(&merged, &shapes));
    }

    #[test]
    fn consistency_check_flags_mismatches() {
        let merged = vec![descriptor(
            0,
            SRV_BINDING_START,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ShaderStageFlags::FRAGMENT,
        )];
        // declared two SRVs, module uses one
        let shapes = [ShaderArgShape::new(2, 0, 0, false)];
        assert!(!warn_if_inconsistent(&merged, &shapes));
    }

    #[test]
    fn patched_module_reflects_shifted_cbv() {
        // build a tiny PS with a CBV at set 0 and check the patched module
        use arclight_spirv::Module;
        let module = test_pixel_shader_with_cbv();
        let patched = create_patched_shader(&module.to_bytes()).unwrap();

        assert_eq!(patched.stage, ShaderStage::Pixel);
        let cbv = patched
            .descriptors
            .iter()
            .find(|d| d.ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .expect("patched stage must expose the CBV");
        assert_eq!(cbv.set, MAX_SHADER_ARGUMENTS as u32);

        // re-parsing the emitted bytes shows the shift landed in the words
        let reparsed = Module::from_bytes(&patched.spirv).unwrap();
        let reflected = arclight_spirv::reflect(&reparsed).unwrap();
        let ubo = reflected
            .bindings
            .iter()
            .find(|b| b.kind == arclight_spirv::DescriptorKind::UniformBuffer)
            .unwrap();
        assert_eq!(ubo.set, MAX_SHADER_ARGUMENTS as u32);
    }

    /// Minimal pixel-shader module: one Block-decorated UBO at
    /// (set 0, binding 0) plus one sampled image at (set 0, binding 1000).
    fn test_pixel_shader_with_cbv() -> arclight_spirv::Module {
        // assembled by hand; see arclight-spirv's test assembler for the
        // word layout
        let mut words = vec![0x0723_0203u32, 0x0001_0000, 0, 100, 0];
        let mut inst = |opcode: u16, operands: &[u32]| {
            words.push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
            words.extend_from_slice(operands);
        };

        // OpEntryPoint Fragment %1 "main"
        inst(15, &[4, 1, 0x6e69_616d, 0]);
        // OpTypeFloat %2 32
        inst(22, &[2, 32]);
        // OpTypeStruct %3 { %2 }
        inst(30, &[3, 2]);
        // OpDecorate %3 Block
        inst(71, &[3, 2]);
        // OpTypePointer %4 Uniform %3
        inst(32, &[4, 2, 3]);
        // OpVariable %4 %5 Uniform
        inst(59, &[4, 5, 2]);
        // OpDecorate %5 DescriptorSet 0 / Binding 0
        inst(71, &[5, 34, 0]);
        inst(71, &[5, 33, 0]);
        // OpTypeImage %6 %2 2D 0 0 0 1 Unknown
        inst(25, &[6, 2, 1, 0, 0, 0, 1, 0]);
        // OpTypePointer %7 UniformConstant %6
        inst(32, &[7, 0, 6]);
        // OpVariable %7 %8 UniformConstant
        inst(59, &[7, 8, 0]);
        // OpDecorate %8 DescriptorSet 0 / Binding 1000
        inst(71, &[8, 34, 0]);
        inst(71, &[8, 33, 1000]);

        arclight_spirv::Module::from_words(words).unwrap()
    }
}
