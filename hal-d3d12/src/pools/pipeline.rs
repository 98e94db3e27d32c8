//! The pipeline-state pool: graphics/compute PSOs and raytracing state
//! objects, each with the root signature derived from its argument
//! shapes.

use std::ffi::CString;

use arrayvec::ArrayVec;
use windows::runtime::Interface;
use windows::Win32::Foundation::{PSTR, PWSTR};
use windows::Win32::Graphics::{Direct3D11, Direct3D12, Dxgi};

use arclight_hal::arg::{
    FramebufferConfig, GraphicsShader, RaytracingArgumentAssociation, RaytracingHitGroup,
    RaytracingShaderLibrary, ShaderArgShape, VertexFormat,
};
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::limits::{MAX_RENDER_TARGETS, MAX_ROOT_CONSTANT_BYTES};
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{PipelineConfig, ShaderStage};

use crate::conv;
use crate::root_signature::{self, RootSignatureLayout};
use crate::HResult as _;

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

pub enum PsoKind {
    Graphics {
        pso: Direct3D12::ID3D12PipelineState,
        topology: Direct3D11::D3D_PRIMITIVE_TOPOLOGY,
    },
    Compute {
        pso: Direct3D12::ID3D12PipelineState,
    },
    Raytracing {
        state_object: Direct3D12::ID3D12StateObject,
        properties: Direct3D12::ID3D12StateObjectProperties,
        /// Export names of identifiable shaders, in contiguous index
        /// order across libraries.
        identifiable_exports: Vec<Vec<u16>>,
        hit_group_names: Vec<Vec<u16>>,
    },
}

pub struct PsoNode {
    pub kind: PsoKind,
    pub root_signature: Direct3D12::ID3D12RootSignature,
    pub layout: RootSignatureLayout,
    pub rt_formats: ArrayVec<Format, MAX_RENDER_TARGETS>,
    pub dsv_format: Format,
    pub samples: u32,
    /// Command signature for draw-id indirect draws; present when the
    /// pipeline has root constants.
    pub draw_id_signature: Option<Direct3D12::ID3D12CommandSignature>,
}

unsafe impl Send for PsoNode {}
unsafe impl Sync for PsoNode {}

pub struct PipelinePool {
    device: Direct3D12::ID3D12Device,
    pool: LinkedPool<PsoNode>,
    /// Layout-independent signatures for plain indirect draws.
    pub signature_draw: Direct3D12::ID3D12CommandSignature,
    pub signature_draw_indexed: Direct3D12::ID3D12CommandSignature,
}

unsafe impl Send for PipelinePool {}
unsafe impl Sync for PipelinePool {}

fn make_plain_signature(
    device: &Direct3D12::ID3D12Device,
    indexed: bool,
) -> Direct3D12::ID3D12CommandSignature {
    let mut arg: Direct3D12::D3D12_INDIRECT_ARGUMENT_DESC = unsafe { std::mem::zeroed() };
    arg.Type = if indexed {
        Direct3D12::D3D12_INDIRECT_ARGUMENT_TYPE_DRAW_INDEXED
    } else {
        Direct3D12::D3D12_INDIRECT_ARGUMENT_TYPE_DRAW
    };
    let stride = if indexed {
        std::mem::size_of::<arclight_hal::types::IndirectDrawIndexedArgs>()
    } else {
        std::mem::size_of::<arclight_hal::types::IndirectDrawArgs>()
    };
    let desc = Direct3D12::D3D12_COMMAND_SIGNATURE_DESC {
        ByteStride: stride as u32,
        NumArgumentDescs: 1,
        pArgumentDescs: &arg,
        NodeMask: 0,
    };
    unsafe { device.CreateCommandSignature(&desc, None) }.expect_hr("command signature creation")
}

impl PipelinePool {
    pub fn new(device: &Direct3D12::ID3D12Device, max_num_psos: u32, max_num_rt_psos: u32) -> Self {
        PipelinePool {
            pool: LinkedPool::new((max_num_psos + max_num_rt_psos) as usize),
            signature_draw: make_plain_signature(device, false),
            signature_draw_indexed: make_plain_signature(device, true),
            device: device.clone(),
        }
    }

    pub fn get(&self, pso: handle::PipelineState) -> &PsoNode {
        self.pool.get(pso.0)
    }

    fn make_draw_id_signature(
        &self,
        root_signature: &Direct3D12::ID3D12RootSignature,
        layout: &RootSignatureLayout,
    ) -> Option<Direct3D12::ID3D12CommandSignature> {
        let constants_param = layout.root_constants_param?;

        let mut args: [Direct3D12::D3D12_INDIRECT_ARGUMENT_DESC; 2] =
            unsafe { std::mem::zeroed() };
        args[0].Type = Direct3D12::D3D12_INDIRECT_ARGUMENT_TYPE_CONSTANT;
        args[0].Anonymous.Constant = Direct3D12::D3D12_INDIRECT_ARGUMENT_DESC_0_1 {
            RootParameterIndex: constants_param,
            DestOffsetIn32BitValues: 0,
            Num32BitValuesToSet: 1,
        };
        args[1].Type = Direct3D12::D3D12_INDIRECT_ARGUMENT_TYPE_DRAW_INDEXED;

        let desc = Direct3D12::D3D12_COMMAND_SIGNATURE_DESC {
            ByteStride: std::mem::size_of::<arclight_hal::types::IndirectDrawIndexedWithIdArgs>()
                as u32,
            NumArgumentDescs: 2,
            pArgumentDescs: args.as_ptr(),
            NodeMask: 0,
        };
        Some(
            unsafe { self.device.CreateCommandSignature(&desc, root_signature) }
                .expect_hr("draw-id command signature creation"),
        )
    }

    pub fn create_graphics(
        &self,
        vertex_format: VertexFormat<'_>,
        framebuffer: &FramebufferConfig,
        shader_arg_shapes: &[ShaderArgShape],
        has_root_constants: bool,
        shaders: &[GraphicsShader<'_>],
        config: &PipelineConfig,
    ) -> handle::PipelineState {
        let layout = root_signature::derive_layout(shader_arg_shapes, has_root_constants);
        let root_sig = root_signature::create_root_signature(&self.device, &layout);

        // input layout storage must outlive the create call
        let semantic_names: Vec<CString> = vertex_format
            .attributes
            .iter()
            .map(|attr| CString::new(attr.semantic_name).unwrap())
            .collect();
        let input_elements: Vec<Direct3D12::D3D12_INPUT_ELEMENT_DESC> = vertex_format
            .attributes
            .iter()
            .zip(semantic_names.iter())
            .map(|(attr, name)| Direct3D12::D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PSTR(name.as_ptr() as *mut u8),
                SemanticIndex: 0,
                Format: conv::format(attr.format),
                InputSlot: u32::from(attr.vertex_buffer_index),
                AlignedByteOffset: attr.offset,
                InputSlotClass: Direct3D12::D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut desc: Direct3D12::D3D12_GRAPHICS_PIPELINE_STATE_DESC =
            unsafe { std::mem::zeroed() };
        desc.pRootSignature = Some(root_sig.clone());

        for shader in shaders {
            let bytecode = Direct3D12::D3D12_SHADER_BYTECODE {
                pShaderBytecode: shader.binary.data.as_ptr() as *const _,
                BytecodeLength: shader.binary.data.len(),
            };
            match shader.stage {
                ShaderStage::Vertex => desc.VS = bytecode,
                ShaderStage::Hull => desc.HS = bytecode,
                ShaderStage::Domain => desc.DS = bytecode,
                ShaderStage::Geometry => desc.GS = bytecode,
                ShaderStage::Pixel => desc.PS = bytecode,
                other => panic!("{:?} is not a graphics stage", other),
            }
        }

        desc.BlendState.AlphaToCoverageEnable = false.into();
        desc.BlendState.IndependentBlendEnable = true.into();
        for (i, rt) in framebuffer.render_targets.iter().enumerate() {
            desc.BlendState.RenderTarget[i] = Direct3D12::D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: rt.blend_enable.into(),
                LogicOpEnable: framebuffer.logic_op_enable.into(),
                SrcBlend: conv::blend_factor(rt.blend_color_src),
                DestBlend: conv::blend_factor(rt.blend_color_dest),
                BlendOp: conv::blend_op(rt.blend_op_color),
                SrcBlendAlpha: conv::blend_factor(rt.blend_alpha_src),
                DestBlendAlpha: conv::blend_factor(rt.blend_alpha_dest),
                BlendOpAlpha: conv::blend_op(rt.blend_op_alpha),
                LogicOp: Direct3D12::D3D12_LOGIC_OP_NOOP,
                RenderTargetWriteMask: 0x0f,
            };
        }
        desc.SampleMask = u32::MAX;

        desc.RasterizerState = Direct3D12::D3D12_RASTERIZER_DESC {
            FillMode: if config.wireframe {
                Direct3D12::D3D12_FILL_MODE_WIREFRAME
            } else {
                Direct3D12::D3D12_FILL_MODE_SOLID
            },
            CullMode: conv::cull_mode(config.cull),
            FrontCounterClockwise: config.frontface_counterclockwise.into(),
            DepthBias: 0,
            DepthBiasClamp: 0.0,
            SlopeScaledDepthBias: 0.0,
            DepthClipEnable: true.into(),
            MultisampleEnable: (config.samples > 1).into(),
            AntialiasedLineEnable: false.into(),
            ForcedSampleCount: 0,
            ConservativeRaster: if config.conservative_raster {
                Direct3D12::D3D12_CONSERVATIVE_RASTERIZATION_MODE_ON
            } else {
                Direct3D12::D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF
            },
        };

        let depth_enabled = config.depth != arclight_hal::types::DepthFunction::None
            && framebuffer.depth_target != Format::None;
        desc.DepthStencilState.DepthEnable = depth_enabled.into();
        desc.DepthStencilState.DepthWriteMask = if depth_enabled && !config.depth_readonly {
            Direct3D12::D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            Direct3D12::D3D12_DEPTH_WRITE_MASK_ZERO
        };
        desc.DepthStencilState.DepthFunc = conv::comparison_func(config.depth);

        if !input_elements.is_empty() {
            desc.InputLayout = Direct3D12::D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            };
        }

        desc.PrimitiveTopologyType = conv::primitive_topology_type(config.topology);
        desc.NumRenderTargets = framebuffer.render_targets.len() as u32;
        for (i, rt) in framebuffer.render_targets.iter().enumerate() {
            desc.RTVFormats[i] = conv::format(rt.format);
        }
        desc.DSVFormat = conv::format(framebuffer.depth_target);
        desc.SampleDesc = Dxgi::DXGI_SAMPLE_DESC {
            Count: config.samples.max(1),
            Quality: 0,
        };

        let pso: Direct3D12::ID3D12PipelineState =
            unsafe { self.device.CreateGraphicsPipelineState(&desc) }
                .expect_hr("graphics pipeline creation");

        let draw_id_signature = self.make_draw_id_signature(&root_sig, &layout);
        let mut rt_formats = ArrayVec::new();
        for rt in &framebuffer.render_targets {
            rt_formats.push(rt.format);
        }

        let node = PsoNode {
            kind: PsoKind::Graphics {
                pso,
                topology: conv::primitive_topology(config.topology),
            },
            root_signature: root_sig,
            layout,
            rt_formats,
            dsv_format: framebuffer.depth_target,
            samples: config.samples.max(1),
            draw_id_signature,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    pub fn create_compute(
        &self,
        shader_arg_shapes: &[ShaderArgShape],
        shader: &[u8],
        has_root_constants: bool,
    ) -> handle::PipelineState {
        let layout = root_signature::derive_layout(shader_arg_shapes, has_root_constants);
        let root_sig = root_signature::create_root_signature(&self.device, &layout);

        let mut desc: Direct3D12::D3D12_COMPUTE_PIPELINE_STATE_DESC =
            unsafe { std::mem::zeroed() };
        desc.pRootSignature = Some(root_sig.clone());
        desc.CS = Direct3D12::D3D12_SHADER_BYTECODE {
            pShaderBytecode: shader.as_ptr() as *const _,
            BytecodeLength: shader.len(),
        };

        let pso: Direct3D12::ID3D12PipelineState =
            unsafe { self.device.CreateComputePipelineState(&desc) }
                .expect_hr("compute pipeline creation");

        let draw_id_signature = self.make_draw_id_signature(&root_sig, &layout);
        let node = PsoNode {
            kind: PsoKind::Compute { pso },
            root_signature: root_sig,
            layout,
            rt_formats: ArrayVec::new(),
            dsv_format: Format::None,
            samples: 1,
            draw_id_signature,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    pub fn create_raytracing(
        &self,
        libraries: &[RaytracingShaderLibrary<'_>],
        argument_associations: &[RaytracingArgumentAssociation],
        hit_groups: &[RaytracingHitGroup<'_>],
        max_recursion: u32,
        max_payload_size_bytes: u32,
        max_attribute_size_bytes: u32,
    ) -> handle::PipelineState {
        let device5: Direct3D12::ID3D12Device5 = self
            .device
            .cast()
            .expect("raytracing requires ID3D12Device5");

        // the global root signature comes from the first association's
        // shapes; per-export local signatures are not differentiated
        let (shapes, has_root_constants) = argument_associations
            .first()
            .map(|assoc| (&assoc.argument_shapes[..], assoc.has_root_constants))
            .unwrap_or((&[], false));
        let layout = root_signature::derive_layout(shapes, has_root_constants);
        let root_sig = root_signature::create_root_signature(&self.device, &layout);

        // persistent storage for everything the subobjects point into
        let mut export_names: Vec<Vec<u16>> = Vec::new();
        let mut identifiable_exports: Vec<Vec<u16>> = Vec::new();
        for library in libraries {
            for export in &library.exports {
                export_names.push(wide(export.entrypoint));
                if matches!(
                    export.stage,
                    ShaderStage::RayGen | ShaderStage::RayMiss | ShaderStage::RayCallable
                ) {
                    identifiable_exports.push(wide(export.entrypoint));
                }
            }
        }
        let hit_group_names: Vec<Vec<u16>> = hit_groups.iter().map(|hg| wide(hg.name)).collect();
        let hit_member_names: Vec<(Vec<u16>, Vec<u16>, Vec<u16>)> = hit_groups
            .iter()
            .map(|hg| (wide(hg.closest_hit), wide(hg.any_hit), wide(hg.intersection)))
            .collect();

        // preallocated so the per-library slices stay stable
        let total_exports: usize = libraries.iter().map(|l| l.exports.len()).sum();
        let mut export_descs: Vec<Direct3D12::D3D12_EXPORT_DESC> = Vec::with_capacity(total_exports);
        let mut name_cursor = 0;
        let mut library_descs: Vec<Direct3D12::D3D12_DXIL_LIBRARY_DESC> = Vec::new();
        for library in libraries {
            let first_export = export_descs.len();
            for _ in &library.exports {
                export_descs.push(Direct3D12::D3D12_EXPORT_DESC {
                    Name: PWSTR(export_names[name_cursor].as_ptr() as *mut u16),
                    ExportToRename: PWSTR::default(),
                    Flags: Direct3D12::D3D12_EXPORT_FLAG_NONE,
                });
                name_cursor += 1;
            }
            library_descs.push(Direct3D12::D3D12_DXIL_LIBRARY_DESC {
                DXILLibrary: Direct3D12::D3D12_SHADER_BYTECODE {
                    pShaderBytecode: library.binary.data.as_ptr() as *const _,
                    BytecodeLength: library.binary.data.len(),
                },
                NumExports: library.exports.len() as u32,
                pExports: export_descs[first_export..].as_ptr() as *mut _,
            });
        }

        let hit_group_descs: Vec<Direct3D12::D3D12_HIT_GROUP_DESC> = hit_groups
            .iter()
            .zip(hit_member_names.iter())
            .zip(hit_group_names.iter())
            .map(|((hg, (closest, any, intersect)), name)| Direct3D12::D3D12_HIT_GROUP_DESC {
                HitGroupExport: PWSTR(name.as_ptr() as *mut u16),
                Type: Direct3D12::D3D12_HIT_GROUP_TYPE_TRIANGLES,
                AnyHitShaderImport: if hg.any_hit.is_empty() {
                    PWSTR::default()
                } else {
                    PWSTR(any.as_ptr() as *mut u16)
                },
                ClosestHitShaderImport: if hg.closest_hit.is_empty() {
                    PWSTR::default()
                } else {
                    PWSTR(closest.as_ptr() as *mut u16)
                },
                IntersectionShaderImport: if hg.intersection.is_empty() {
                    PWSTR::default()
                } else {
                    PWSTR(intersect.as_ptr() as *mut u16)
                },
            })
            .collect();

        let shader_config = Direct3D12::D3D12_RAYTRACING_SHADER_CONFIG {
            MaxPayloadSizeInBytes: max_payload_size_bytes.max(4),
            MaxAttributeSizeInBytes: max_attribute_size_bytes
                .max(Direct3D12::D3D12_RAYTRACING_MAX_ATTRIBUTE_SIZE_IN_BYTES),
        };
        let pipeline_config = Direct3D12::D3D12_RAYTRACING_PIPELINE_CONFIG {
            MaxTraceRecursionDepth: max_recursion.max(1),
        };
        let global_sig = Direct3D12::D3D12_GLOBAL_ROOT_SIGNATURE {
            pGlobalRootSignature: Some(root_sig.clone()),
        };

        let mut subobjects: Vec<Direct3D12::D3D12_STATE_SUBOBJECT> = Vec::new();
        for library_desc in &library_descs {
            subobjects.push(Direct3D12::D3D12_STATE_SUBOBJECT {
                Type: Direct3D12::D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY,
                pDesc: library_desc as *const _ as *const _,
            });
        }
        for hit_group_desc in &hit_group_descs {
            subobjects.push(Direct3D12::D3D12_STATE_SUBOBJECT {
                Type: Direct3D12::D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP,
                pDesc: hit_group_desc as *const _ as *const _,
            });
        }
        subobjects.push(Direct3D12::D3D12_STATE_SUBOBJECT {
            Type: Direct3D12::D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
            pDesc: &shader_config as *const _ as *const _,
        });
        subobjects.push(Direct3D12::D3D12_STATE_SUBOBJECT {
            Type: Direct3D12::D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
            pDesc: &pipeline_config as *const _ as *const _,
        });
        subobjects.push(Direct3D12::D3D12_STATE_SUBOBJECT {
            Type: Direct3D12::D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
            pDesc: &global_sig as *const _ as *const _,
        });

        let desc = Direct3D12::D3D12_STATE_OBJECT_DESC {
            Type: Direct3D12::D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
            NumSubobjects: subobjects.len() as u32,
            pSubobjects: subobjects.as_ptr(),
        };

        let state_object: Direct3D12::ID3D12StateObject =
            unsafe { device5.CreateStateObject(&desc) }.expect_hr("state object creation");
        let properties: Direct3D12::ID3D12StateObjectProperties = state_object
            .cast()
            .expect("state object properties query failed");

        let draw_id_signature = self.make_draw_id_signature(&root_sig, &layout);
        let node = PsoNode {
            kind: PsoKind::Raytracing {
                state_object,
                properties,
                identifiable_exports,
                hit_group_names,
            },
            root_signature: root_sig,
            layout,
            rt_formats: ArrayVec::new(),
            dsv_format: Format::None,
            samples: 1,
            draw_id_signature,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    /// Shader identifier for a table record target.
    pub fn shader_identifier(
        &self,
        pso: handle::PipelineState,
        target: arclight_hal::arg::ShaderTableTarget,
    ) -> [u8; Direct3D12::D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES as usize] {
        use arclight_hal::arg::ShaderTableTarget;
        let node = self.get(pso);
        let (properties, name) = match &node.kind {
            PsoKind::Raytracing {
                properties,
                identifiable_exports,
                hit_group_names,
                ..
            } => match target {
                ShaderTableTarget::IdentifiableShader(index) => (
                    properties,
                    identifiable_exports
                        .get(index as usize)
                        .expect("shader table target out of range"),
                ),
                ShaderTableTarget::HitGroup(index) => (
                    properties,
                    hit_group_names
                        .get(index as usize)
                        .expect("hit group target out of range"),
                ),
            },
            _ => panic!("shader identifiers require a raytracing pipeline"),
        };

        let identifier =
            unsafe { properties.GetShaderIdentifier(PWSTR(name.as_ptr() as *mut u16)) };
        assert!(!identifier.is_null(), "unknown shader table export");
        let mut result = [0u8; Direct3D12::D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(
                identifier as *const u8,
                result.as_mut_ptr(),
                result.len(),
            );
        }
        result
    }

    pub fn free(&self, pso: handle::PipelineState) {
        if !pso.is_valid() {
            return;
        }
        drop(self.pool.release(pso.0));
    }

    pub fn destroy(&mut self) {
        let leaks = self.pool.drain_allocated(drop);
        if leaks > 0 {
            info!("leaked {} pipeline state handle(s)", leaks);
        }
    }
}

/// Root-constant block size in 32-bit values, for SetGraphicsRoot32Bit*.
pub const ROOT_CONSTANT_DWORDS: u32 = (MAX_ROOT_CONSTANT_BYTES / 4) as u32;
