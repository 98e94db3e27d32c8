//! Root-signature derivation from declared shader-argument shapes.
//!
//! Unlike the Vulkan side, no reflection is needed: the argument shapes
//! map directly onto root parameters. Layout, in parameter order:
//! optional root constants at (b1, space0) first, then per argument `i`
//! (register space `i`): a root-descriptor CBV at b0, a descriptor table
//! of its SRV then UAV ranges, and a sampler table.

use smallvec::SmallVec;
use windows::Win32::Graphics::{Direct3D11, Direct3D12};

use arclight_hal::arg::ShaderArgShape;
use arclight_hal::limits::{MAX_ROOT_CONSTANT_BYTES, MAX_SHADER_ARGUMENTS};

use crate::HResult as _;

/// Pure description of one root parameter; turned into the native
/// structures at creation time.
#[derive(Clone, Debug, PartialEq)]
pub enum RootParam {
    Constants {
        shader_register: u32,
        register_space: u32,
        num_32bit_values: u32,
    },
    Cbv {
        shader_register: u32,
        register_space: u32,
    },
    /// (is_sampler_table, ranges)
    Table {
        ranges: SmallVec<[TableRange; 2]>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TableRange {
    pub kind: RangeKind,
    pub base_register: u32,
    pub register_space: u32,
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeKind {
    Srv,
    Uav,
    Sampler,
}

/// Per-argument root parameter indices, for binding at translation time.
#[derive(Copy, Clone, Debug, Default)]
pub struct ArgumentMap {
    pub cbv_param: Option<u32>,
    pub table_param: Option<u32>,
    pub sampler_table_param: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct RootSignatureLayout {
    pub params: Vec<RootParam>,
    pub root_constants_param: Option<u32>,
    pub arguments: [ArgumentMap; MAX_SHADER_ARGUMENTS],
}

/// Derives the parameter list for the given shapes.
pub fn derive_layout(shapes: &[ShaderArgShape], has_root_constants: bool) -> RootSignatureLayout {
    assert!(shapes.len() <= MAX_SHADER_ARGUMENTS, "too many shader arguments");
    let mut layout = RootSignatureLayout::default();

    if has_root_constants {
        layout.root_constants_param = Some(layout.params.len() as u32);
        layout.params.push(RootParam::Constants {
            shader_register: 1,
            register_space: 0,
            num_32bit_values: (MAX_ROOT_CONSTANT_BYTES / 4) as u32,
        });
    }

    for (i, shape) in shapes.iter().enumerate() {
        let space = i as u32;
        let arg = &mut layout.arguments[i];

        if shape.has_cbv {
            arg.cbv_param = Some(layout.params.len() as u32);
            layout.params.push(RootParam::Cbv {
                shader_register: 0,
                register_space: space,
            });
        }

        if shape.num_srvs + shape.num_uavs > 0 {
            let mut ranges = SmallVec::new();
            if shape.num_srvs > 0 {
                ranges.push(TableRange {
                    kind: RangeKind::Srv,
                    base_register: 0,
                    register_space: space,
                    count: shape.num_srvs,
                });
            }
            if shape.num_uavs > 0 {
                ranges.push(TableRange {
                    kind: RangeKind::Uav,
                    base_register: 0,
                    register_space: space,
                    count: shape.num_uavs,
                });
            }
            arg.table_param = Some(layout.params.len() as u32);
            layout.params.push(RootParam::Table { ranges });
        }

        if shape.num_samplers > 0 {
            let mut ranges = SmallVec::new();
            ranges.push(TableRange {
                kind: RangeKind::Sampler,
                base_register: 0,
                register_space: space,
                count: shape.num_samplers,
            });
            arg.sampler_table_param = Some(layout.params.len() as u32);
            layout.params.push(RootParam::Table { ranges });
        }
    }

    layout
}

fn range_type(kind: RangeKind) -> Direct3D12::D3D12_DESCRIPTOR_RANGE_TYPE {
    match kind {
        RangeKind::Srv => Direct3D12::D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        RangeKind::Uav => Direct3D12::D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        RangeKind::Sampler => Direct3D12::D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
    }
}

/// Serializes the derived layout and creates the native root signature.
pub fn create_root_signature(
    device: &Direct3D12::ID3D12Device,
    layout: &RootSignatureLayout,
) -> Direct3D12::ID3D12RootSignature {
    // range storage must outlive the serialize call
    let mut range_storage: Vec<Vec<Direct3D12::D3D12_DESCRIPTOR_RANGE>> = Vec::new();
    let mut params: Vec<Direct3D12::D3D12_ROOT_PARAMETER> = Vec::new();

    for param in &layout.params {
        match param {
            RootParam::Constants {
                shader_register,
                register_space,
                num_32bit_values,
            } => {
                let mut native: Direct3D12::D3D12_ROOT_PARAMETER = unsafe { std::mem::zeroed() };
                native.ParameterType = Direct3D12::D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS;
                native.ShaderVisibility = Direct3D12::D3D12_SHADER_VISIBILITY_ALL;
                native.Anonymous.Constants = Direct3D12::D3D12_ROOT_CONSTANTS {
                    ShaderRegister: *shader_register,
                    RegisterSpace: *register_space,
                    Num32BitValues: *num_32bit_values,
                };
                params.push(native);
            }
            RootParam::Cbv {
                shader_register,
                register_space,
            } => {
                let mut native: Direct3D12::D3D12_ROOT_PARAMETER = unsafe { std::mem::zeroed() };
                native.ParameterType = Direct3D12::D3D12_ROOT_PARAMETER_TYPE_CBV;
                native.ShaderVisibility = Direct3D12::D3D12_SHADER_VISIBILITY_ALL;
                native.Anonymous.Descriptor = Direct3D12::D3D12_ROOT_DESCRIPTOR {
                    ShaderRegister: *shader_register,
                    RegisterSpace: *register_space,
                };
                params.push(native);
            }
            RootParam::Table { ranges } => {
                let native_ranges: Vec<Direct3D12::D3D12_DESCRIPTOR_RANGE> = ranges
                    .iter()
                    .map(|range| Direct3D12::D3D12_DESCRIPTOR_RANGE {
                        RangeType: range_type(range.kind),
                        NumDescriptors: range.count,
                        BaseShaderRegister: range.base_register,
                        RegisterSpace: range.register_space,
                        OffsetInDescriptorsFromTableStart:
                            Direct3D12::D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                    })
                    .collect();
                range_storage.push(native_ranges);
                let stored = range_storage.last().unwrap();

                let mut native: Direct3D12::D3D12_ROOT_PARAMETER = unsafe { std::mem::zeroed() };
                native.ParameterType = Direct3D12::D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE;
                native.ShaderVisibility = Direct3D12::D3D12_SHADER_VISIBILITY_ALL;
                native.Anonymous.DescriptorTable = Direct3D12::D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: stored.len() as u32,
                    pDescriptorRanges: stored.as_ptr(),
                };
                params.push(native);
            }
        }
    }

    let desc = Direct3D12::D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: params.len() as u32,
        pParameters: params.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: Direct3D12::D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut blob = None;
    let mut error = None;
    unsafe {
        Direct3D12::D3D12SerializeRootSignature(
            &desc,
            Direct3D12::D3D_ROOT_SIGNATURE_VERSION_1_0,
            &mut blob,
            &mut error,
        )
    }
    .expect_hr("root signature serialization");
    let blob: Direct3D11::ID3DBlob = blob.expect("root signature serialization returned no blob");

    unsafe {
        device.CreateRootSignature(
            0,
            blob.GetBufferPointer(),
            blob.GetBufferSize(),
        )
    }
    .expect_hr("root signature creation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_map_directly_to_root_parameters() {
        let shapes = [
            ShaderArgShape::new(2, 1, 1, true),
            ShaderArgShape::new(0, 0, 0, true),
        ];
        let layout = derive_layout(&shapes, true);

        // constants + (cbv, srv/uav table, sampler table) + cbv
        assert_eq!(layout.params.len(), 5);
        assert_eq!(layout.root_constants_param, Some(0));

        let arg0 = layout.arguments[0];
        assert_eq!(arg0.cbv_param, Some(1));
        assert_eq!(arg0.table_param, Some(2));
        assert_eq!(arg0.sampler_table_param, Some(3));

        match &layout.params[2] {
            RootParam::Table { ranges } => {
                assert_eq!(ranges.len(), 2);
                assert_eq!(ranges[0].kind, RangeKind::Srv);
                assert_eq!(ranges[0].count, 2);
                assert_eq!(ranges[0].register_space, 0);
                assert_eq!(ranges[1].kind, RangeKind::Uav);
            }
            other => panic!("unexpected param {:?}", other),
        }

        let arg1 = layout.arguments[1];
        assert_eq!(arg1.cbv_param, Some(4));
        assert_eq!(arg1.table_param, None);
        match &layout.params[4] {
            RootParam::Cbv { register_space, .. } => assert_eq!(*register_space, 1),
            other => panic!("unexpected param {:?}", other),
        }
    }

    #[test]
    fn empty_shapes_yield_no_parameters() {
        let layout = derive_layout(&[], false);
        assert!(layout.params.is_empty());
        assert!(layout.root_constants_param.is_none());
    }
}
