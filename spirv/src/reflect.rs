//! Descriptor reflection over a SPIR-V module.
//!
//! Extracts, for one entry point, the execution stage, every descriptor
//! binding with its (set, binding, array size, kind), and whether the
//! module declares a push-constant block.

use fxhash::FxHashMap;
use spirv_headers::{Decoration, Op, StorageClass};

use crate::module::{Module, RawInstruction};
use crate::ParseError;

// OpTypeAccelerationStructureKHR (shared value with the NV alias)
const OP_TYPE_ACCELERATION_STRUCTURE: u16 = 5341;

/// Execution stage of an entry point, in HLSL nomenclature.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
    RayGen,
    RayMiss,
    RayClosestHit,
    RayIntersect,
    RayAnyHit,
    RayCallable,
}

/// What a descriptor binding refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
    SampledImage,
    StorageImage,
    Sampler,
    CombinedImageSampler,
    AccelerationStructure,
}

/// One reflected descriptor binding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DescriptorBinding {
    pub set: u32,
    pub binding: u32,
    /// Flattened array element count; 0 for unbounded runtime arrays.
    pub array_size: u32,
    pub kind: DescriptorKind,
    /// Word offset of the DescriptorSet decoration literal inside the
    /// module, so the set number can be rewritten in place.
    pub set_word_offset: usize,
}

/// Reflection result for one module.
#[derive(Clone, Debug)]
pub struct ReflectedStage {
    pub stage: ShaderStage,
    pub bindings: Vec<DescriptorBinding>,
    pub has_push_constants: bool,
}

#[derive(Copy, Clone, Debug)]
enum TypeInfo {
    Pointer { pointee: u32 },
    Struct,
    Image { sampled: u32, dim_is_buffer: bool },
    Sampler,
    SampledImage,
    Array { element: u32, length_id: u32 },
    RuntimeArray { element: u32 },
    AccelerationStructure,
}

#[derive(Default, Clone)]
struct Decorations {
    set: Option<(u32, usize)>,
    binding: Option<u32>,
    block: bool,
    buffer_block: bool,
}

fn execution_model_to_stage(model: u32) -> Result<ShaderStage, ParseError> {
    Ok(match model {
        0 => ShaderStage::Vertex,
        1 => ShaderStage::Hull,
        2 => ShaderStage::Domain,
        3 => ShaderStage::Geometry,
        4 => ShaderStage::Pixel,
        5 => ShaderStage::Compute,
        5313 => ShaderStage::RayGen,
        5314 => ShaderStage::RayIntersect,
        5315 => ShaderStage::RayAnyHit,
        5316 => ShaderStage::RayClosestHit,
        5317 => ShaderStage::RayMiss,
        5318 => ShaderStage::RayCallable,
        other => return Err(ParseError::UnsupportedExecutionModel(other)),
    })
}

/// Reflects the module's (single) entry point.
pub fn reflect(module: &Module) -> Result<ReflectedStage, ParseError> {
    let mut stage = None;
    let mut types: FxHashMap<u32, TypeInfo> = FxHashMap::default();
    let mut constants: FxHashMap<u32, u32> = FxHashMap::default();
    let mut decorations: FxHashMap<u32, Decorations> = FxHashMap::default();
    // (result id, type id, storage class)
    let mut variables: Vec<(u32, u32, u32)> = Vec::new();

    for inst in module.instructions() {
        let inst = inst?;
        collect(
            &inst,
            &mut stage,
            &mut types,
            &mut constants,
            &mut decorations,
            &mut variables,
        )?;
    }

    let stage = stage.ok_or(ParseError::MissingEntryPoint)?;

    let mut bindings = Vec::new();
    let mut has_push_constants = false;

    for &(var_id, type_id, storage_class) in &variables {
        if storage_class == StorageClass::PushConstant as u32 {
            has_push_constants = true;
            continue;
        }
        let is_resource_class = storage_class == StorageClass::UniformConstant as u32
            || storage_class == StorageClass::Uniform as u32
            || storage_class == StorageClass::StorageBuffer as u32;
        if !is_resource_class {
            continue;
        }

        let pointee = match types.get(&type_id) {
            Some(&TypeInfo::Pointer { pointee }) => pointee,
            _ => return Err(ParseError::UnknownId(type_id)),
        };

        // unwrap arrays, accumulating the flattened element count
        let mut array_size = 1u32;
        let mut inner = pointee;
        loop {
            match types.get(&inner) {
                Some(&TypeInfo::Array { element, length_id }) => {
                    let len = constants.get(&length_id).copied().unwrap_or(1);
                    array_size = array_size.saturating_mul(len);
                    inner = element;
                }
                Some(&TypeInfo::RuntimeArray { element }) => {
                    array_size = 0;
                    inner = element;
                }
                _ => break,
            }
        }

        let deco = decorations.get(&var_id).cloned().unwrap_or_default();
        let kind = match types.get(&inner) {
            Some(&TypeInfo::Struct) => {
                let struct_deco: Decorations = decorations.get(&inner).cloned().unwrap_or_default();
                if struct_deco.buffer_block || storage_class == StorageClass::StorageBuffer as u32 {
                    DescriptorKind::StorageBuffer
                } else if struct_deco.block {
                    DescriptorKind::UniformBuffer
                } else {
                    continue;
                }
            }
            Some(&TypeInfo::Image { sampled, dim_is_buffer }) => match (sampled, dim_is_buffer) {
                (2, true) => DescriptorKind::StorageTexelBuffer,
                (_, true) => DescriptorKind::UniformTexelBuffer,
                (2, false) => DescriptorKind::StorageImage,
                _ => DescriptorKind::SampledImage,
            },
            Some(&TypeInfo::Sampler) => DescriptorKind::Sampler,
            Some(&TypeInfo::SampledImage) => DescriptorKind::CombinedImageSampler,
            Some(&TypeInfo::AccelerationStructure) => DescriptorKind::AccelerationStructure,
            _ => continue,
        };

        let (set, set_word_offset) = match deco.set {
            Some(pair) => pair,
            None => {
                warn!("descriptor %{} has no DescriptorSet decoration, skipped", var_id);
                continue;
            }
        };
        let binding = match deco.binding {
            Some(b) => b,
            None => {
                warn!("descriptor %{} has no Binding decoration, skipped", var_id);
                continue;
            }
        };

        bindings.push(DescriptorBinding {
            set,
            binding,
            array_size,
            kind,
            set_word_offset,
        });
    }

    bindings.sort_by_key(|b| (b.set, b.binding));

    Ok(ReflectedStage {
        stage,
        bindings,
        has_push_constants,
    })
}

fn collect(
    inst: &RawInstruction<'_>,
    stage: &mut Option<ShaderStage>,
    types: &mut FxHashMap<u32, TypeInfo>,
    constants: &mut FxHashMap<u32, u32>,
    decorations: &mut FxHashMap<u32, Decorations>,
    variables: &mut Vec<(u32, u32, u32)>,
) -> Result<(), ParseError> {
    let op = inst.opcode;
    let ops = inst.operands;

    if op == Op::EntryPoint as u16 {
        if ops.is_empty() {
            return Err(ParseError::IncompleteInstruction);
        }
        // only the first entry point determines the stage
        if stage.is_none() {
            *stage = Some(execution_model_to_stage(ops[0])?);
        }
    } else if op == Op::Decorate as u16 {
        if ops.len() < 2 {
            return Err(ParseError::IncompleteInstruction);
        }
        let entry = decorations.entry(ops[0]).or_default();
        let decoration = ops[1];
        if decoration == Decoration::DescriptorSet as u32 {
            if ops.len() < 3 {
                return Err(ParseError::IncompleteInstruction);
            }
            // operand word 2 is the literal set; record its module offset
            entry.set = Some((ops[2], inst.offset + 3));
        } else if decoration == Decoration::Binding as u32 {
            if ops.len() < 3 {
                return Err(ParseError::IncompleteInstruction);
            }
            entry.binding = Some(ops[2]);
        } else if decoration == Decoration::Block as u32 {
            entry.block = true;
        } else if decoration == Decoration::BufferBlock as u32 {
            entry.buffer_block = true;
        }
    } else if op == Op::TypePointer as u16 {
        if ops.len() < 3 {
            return Err(ParseError::IncompleteInstruction);
        }
        types.insert(ops[0], TypeInfo::Pointer { pointee: ops[2] });
    } else if op == Op::TypeStruct as u16 {
        if ops.is_empty() {
            return Err(ParseError::IncompleteInstruction);
        }
        types.insert(ops[0], TypeInfo::Struct);
    } else if op == Op::TypeImage as u16 {
        // %result %sampled_type dim depth arrayed ms sampled format
        if ops.len() < 8 {
            return Err(ParseError::IncompleteInstruction);
        }
        types.insert(
            ops[0],
            TypeInfo::Image {
                sampled: ops[6],
                dim_is_buffer: ops[2] == 5, // Dim::Buffer
            },
        );
    } else if op == Op::TypeSampler as u16 && !ops.is_empty() {
        types.insert(ops[0], TypeInfo::Sampler);
    } else if op == Op::TypeSampledImage as u16 && !ops.is_empty() {
        types.insert(ops[0], TypeInfo::SampledImage);
    } else if op == Op::TypeArray as u16 {
        if ops.len() < 3 {
            return Err(ParseError::IncompleteInstruction);
        }
        types.insert(
            ops[0],
            TypeInfo::Array {
                element: ops[1],
                length_id: ops[2],
            },
        );
    } else if op == Op::TypeRuntimeArray as u16 {
        if ops.len() < 2 {
            return Err(ParseError::IncompleteInstruction);
        }
        types.insert(ops[0], TypeInfo::RuntimeArray { element: ops[1] });
    } else if op == OP_TYPE_ACCELERATION_STRUCTURE && !ops.is_empty() {
        types.insert(ops[0], TypeInfo::AccelerationStructure);
    } else if op == Op::Constant as u16 {
        // %type %result value...; only scalar 32-bit values matter here
        // (array lengths)
        if ops.len() >= 3 {
            constants.insert(ops[1], ops[2]);
        }
    } else if op == Op::Variable as u16 {
        // %type %result storage_class [initializer]
        if ops.len() < 3 {
            return Err(ParseError::IncompleteInstruction);
        }
        variables.push((ops[1], ops[0], ops[2]));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_modules {
    //! Hand-assembled modules shared by the reflection and patch tests.

    use crate::module::test_support::Assembler;
    use crate::module::Module;
    use spirv_headers::{Decoration, Op, StorageClass};

    /// Builds a module for `stage` with one uniform buffer at
    /// (set `cbv_set`, binding 0) and one sampled image at
    /// (set `srv_set`, binding 1000).
    pub fn ubo_and_texture(execution_model: u32, cbv_set: u32, srv_set: u32) -> Module {
        let mut asm = Assembler::new();

        let func = asm.id();
        let mut entry = vec![execution_model, func];
        entry.extend(Assembler::string_operand("main"));
        asm.inst(Op::EntryPoint as u16, &entry);

        // %float, %ubo_struct { float }, %ptr, %var
        let float_ty = asm.id();
        asm.inst(Op::TypeFloat as u16, &[float_ty, 32]);
        let ubo_struct = asm.id();
        asm.inst(Op::TypeStruct as u16, &[ubo_struct, float_ty]);
        asm.inst(
            Op::Decorate as u16,
            &[ubo_struct, Decoration::Block as u32],
        );
        let ubo_ptr = asm.id();
        asm.inst(
            Op::TypePointer as u16,
            &[ubo_ptr, StorageClass::Uniform as u32, ubo_struct],
        );
        let ubo_var = asm.id();
        asm.inst(
            Op::Variable as u16,
            &[ubo_ptr, ubo_var, StorageClass::Uniform as u32],
        );
        asm.inst(
            Op::Decorate as u16,
            &[ubo_var, Decoration::DescriptorSet as u32, cbv_set],
        );
        asm.inst(
            Op::Decorate as u16,
            &[ubo_var, Decoration::Binding as u32, 0],
        );

        // sampled image at (srv_set, binding 1000)
        let image_ty = asm.id();
        asm.inst(
            Op::TypeImage as u16,
            &[image_ty, float_ty, 1 /* Dim2D */, 0, 0, 0, 1, 0],
        );
        let image_ptr = asm.id();
        asm.inst(
            Op::TypePointer as u16,
            &[image_ptr, StorageClass::UniformConstant as u32, image_ty],
        );
        let image_var = asm.id();
        asm.inst(
            Op::Variable as u16,
            &[image_ptr, image_var, StorageClass::UniformConstant as u32],
        );
        asm.inst(
            Op::Decorate as u16,
            &[image_var, Decoration::DescriptorSet as u32, srv_set],
        );
        asm.inst(
            Op::Decorate as u16,
            &[image_var, Decoration::Binding as u32, 1000],
        );

        asm.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflects_bindings_and_stage() {
        let module = test_modules::ubo_and_texture(4, 0, 0);
        let reflected = reflect(&module).unwrap();

        assert_eq!(reflected.stage, ShaderStage::Pixel);
        assert!(!reflected.has_push_constants);
        assert_eq!(reflected.bindings.len(), 2);

        let ubo = &reflected.bindings[0];
        assert_eq!(ubo.kind, DescriptorKind::UniformBuffer);
        assert_eq!((ubo.set, ubo.binding, ubo.array_size), (0, 0, 1));

        let tex = &reflected.bindings[1];
        assert_eq!(tex.kind, DescriptorKind::SampledImage);
        assert_eq!((tex.set, tex.binding, tex.array_size), (0, 1000, 1));
    }

    #[test]
    fn vertex_and_pixel_stages_differ() {
        let vs = reflect(&test_modules::ubo_and_texture(0, 0, 0)).unwrap();
        let ps = reflect(&test_modules::ubo_and_texture(4, 0, 0)).unwrap();
        assert_eq!(vs.stage, ShaderStage::Vertex);
        assert_eq!(ps.stage, ShaderStage::Pixel);
        // same module contents reflect to identical binding lists
        assert_eq!(vs.bindings, ps.bindings);
    }

    #[test]
    fn detects_push_constant_blocks() {
        use crate::module::test_support::Assembler;
        let mut asm = Assembler::new();
        let func = asm.id();
        let mut entry = vec![5 /* GLCompute */, func];
        entry.extend(Assembler::string_operand("main"));
        asm.inst(Op::EntryPoint as u16, &entry);

        let float_ty = asm.id();
        asm.inst(Op::TypeFloat as u16, &[float_ty, 32]);
        let block = asm.id();
        asm.inst(Op::TypeStruct as u16, &[block, float_ty]);
        asm.inst(Op::Decorate as u16, &[block, Decoration::Block as u32]);
        let ptr = asm.id();
        asm.inst(
            Op::TypePointer as u16,
            &[ptr, StorageClass::PushConstant as u32, block],
        );
        let var = asm.id();
        asm.inst(
            Op::Variable as u16,
            &[ptr, var, StorageClass::PushConstant as u32],
        );

        let reflected = reflect(&asm.finish()).unwrap();
        assert_eq!(reflected.stage, ShaderStage::Compute);
        assert!(reflected.has_push_constants);
        // the push-constant block is not a descriptor binding
        assert!(reflected.bindings.is_empty());
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let module = crate::Module::from_words(vec![0x0723_0203, 0x0001_0000, 0, 1, 0]).unwrap();
        assert_eq!(reflect(&module).unwrap_err(), ParseError::MissingEntryPoint);
    }
}
