//! The pipeline-state pool, plus the pipeline-layout and render-pass
//! caches that pipeline creation and translation share.

use std::ffi::CStr;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrayvec::ArrayVec;
use ash::vk;
use fxhash::{FxHashMap, FxHasher};
use parking_lot::Mutex;

use arclight_hal::arg::{
    FramebufferConfig, GraphicsShader, RaytracingArgumentAssociation, RaytracingHitGroup,
    RaytracingShaderLibrary, ShaderArgShape, VertexFormat,
};
use arclight_hal::commands::BeginRenderPass;
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::limits::MAX_RENDER_TARGETS;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{PipelineConfig, ShaderStage, ShaderStageFlags};

use crate::conv;
use crate::pipeline_layout::PipelineLayout;
use crate::render_pass;
use crate::spirv_patch::{
    self, create_patched_shader, merge_reflected_descriptors, PatchedShaderStage,
    ReflectedDescriptor,
};

const SHADER_ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Caches pipeline layouts by their merged reflection data, so pipelines
/// with identical binding interfaces share one layout.
pub struct PipelineLayoutCache {
    layouts: Mutex<FxHashMap<u64, Arc<PipelineLayout>>>,
}

impl PipelineLayoutCache {
    pub fn new() -> Self {
        PipelineLayoutCache {
            layouts: Mutex::new(FxHashMap::default()),
        }
    }

    fn key(
        descriptors: &[ReflectedDescriptor],
        stages: vk::ShaderStageFlags,
        has_push_constants: bool,
    ) -> u64 {
        let mut hasher = FxHasher::default();
        has_push_constants.hash(&mut hasher);
        stages.as_raw().hash(&mut hasher);
        for desc in descriptors {
            desc.set.hash(&mut hasher);
            desc.binding.hash(&mut hasher);
            desc.array_size.hash(&mut hasher);
            desc.ty.as_raw().hash(&mut hasher);
            desc.visible_stages.as_raw().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn get_or_create(
        &self,
        device: &ash::Device,
        descriptors: &[ReflectedDescriptor],
        stages: vk::ShaderStageFlags,
        has_push_constants: bool,
    ) -> Arc<PipelineLayout> {
        let key = Self::key(descriptors, stages, has_push_constants);
        let mut layouts = self.layouts.lock();
        layouts
            .entry(key)
            .or_insert_with(|| {
                Arc::new(PipelineLayout::new(
                    device,
                    descriptors,
                    stages,
                    has_push_constants,
                ))
            })
            .clone()
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, layout) in self.layouts.get_mut().drain() {
            layout.destroy(device);
        }
    }
}

/// Caches draw-time render passes by (clear ops, formats, samples).
pub struct RenderPassCache {
    passes: Mutex<FxHashMap<u64, vk::RenderPass>>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        RenderPassCache {
            passes: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn get_or_create(
        &self,
        device: &ash::Device,
        begin: &BeginRenderPass,
        num_samples: u32,
        override_rt_formats: &[Format],
    ) -> vk::RenderPass {
        let key = render_pass::render_pass_cache_key(begin, override_rt_formats, num_samples);
        let mut passes = self.passes.lock();
        *passes.entry(key).or_insert_with(|| {
            render_pass::create_render_pass_from_begin(
                device,
                begin,
                num_samples,
                override_rt_formats,
            )
        })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, pass) in self.passes.get_mut().drain() {
            unsafe { device.destroy_render_pass(pass, None) };
        }
    }
}

pub struct PsoNode {
    pub raw_pipeline: vk::Pipeline,
    pub layout: Arc<PipelineLayout>,
    pub bind_point: vk::PipelineBindPoint,
    /// Render-target formats recorded for render-pass compatibility.
    pub rt_formats: ArrayVec<Format, MAX_RENDER_TARGETS>,
    pub samples: u32,
    /// The compatibility prototype used at creation; owned by this node.
    pub prototype_render_pass: Option<vk::RenderPass>,
    /// Shader-group count of a raytracing pipeline, 0 otherwise.
    pub num_shader_groups: u32,
    /// Leading general groups (ray-gen/miss/callable) of a raytracing
    /// pipeline; hit groups follow after them.
    pub num_identifiable_groups: u32,
}

pub struct PipelinePool {
    device: ash::Device,
    pool: LinkedPool<PsoNode>,
    pub layout_cache: PipelineLayoutCache,
    pub render_pass_cache: RenderPassCache,
}

impl PipelinePool {
    pub fn new(device: &ash::Device, max_num_psos: u32, max_num_rt_psos: u32) -> Self {
        PipelinePool {
            device: device.clone(),
            pool: LinkedPool::new((max_num_psos + max_num_rt_psos) as usize),
            layout_cache: PipelineLayoutCache::new(),
            render_pass_cache: RenderPassCache::new(),
        }
    }

    pub fn get(&self, pso: handle::PipelineState) -> &PsoNode {
        self.pool.get(pso.0)
    }

    /// Looks up (or lazily creates) the draw-time render pass compatible
    /// with `pso` for the recorded begin-render-pass parameters.
    pub fn get_or_create_render_pass(
        &self,
        pso_node: &PsoNode,
        begin: &BeginRenderPass,
    ) -> vk::RenderPass {
        self.render_pass_cache.get_or_create(
            &self.device,
            begin,
            pso_node.samples,
            &pso_node.rt_formats,
        )
    }

    fn make_shader_module(&self, spirv: &[u8]) -> vk::ShaderModule {
        assert!(spirv.len() % 4 == 0, "SPIR-V byte length not word aligned");
        let words = unsafe {
            std::slice::from_raw_parts(spirv.as_ptr() as *const u32, spirv.len() / 4)
        };
        let info = vk::ShaderModuleCreateInfo::default().code(words);
        unsafe {
            self.device
                .create_shader_module(&info, None)
                .expect("shader module creation failed")
        }
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
        // patch + reflect every stage, then merge for the layout
        let patched: Vec<PatchedShaderStage> = shaders
            .iter()
            .map(|s| {
                create_patched_shader(s.binary.data)
                    .expect("invalid SPIR-V passed to pipeline creation")
            })
            .collect();
        let merged = merge_reflected_descriptors(&patched);
        spirv_patch::warn_if_inconsistent(&merged, shader_arg_shapes);

        let mut stage_union = ShaderStageFlags::empty();
        for s in shaders {
            stage_union |= s.stage.into();
        }
        let vk_stages = conv::shader_stage_flags(stage_union);
        let has_push = has_root_constants || patched.iter().any(|p| p.has_push_constants);
        let layout =
            self.layout_cache
                .get_or_create(&self.device, &merged, vk_stages, has_push);

        // the compatibility prototype pass from the declared framebuffer
        let prototype = render_pass::create_render_pass_from_framebuffer(
            &self.device,
            framebuffer,
            config,
        );

        let modules: Vec<(vk::ShaderModule, ShaderStage)> = patched
            .iter()
            .map(|p| (self.make_shader_module(&p.spirv), p.stage))
            .collect();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .map(|(module, stage)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(conv::shader_stage(*stage))
                    .module(*module)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = vertex_format
            .attributes
            .iter()
            .enumerate()
            .map(|(i, attr)| {
                vk::VertexInputAttributeDescription::default()
                    .location(i as u32)
                    .binding(u32::from(attr.vertex_buffer_index))
                    .format(conv::format(attr.format))
                    .offset(attr.offset)
            })
            .collect();
        let vertex_binding = vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(vertex_format.vertex_size_bytes)
            .input_rate(vk::VertexInputRate::VERTEX);

        let mut vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        if vertex_format.vertex_size_bytes > 0 {
            vertex_input = vertex_input
                .vertex_binding_descriptions(std::slice::from_ref(&vertex_binding))
                .vertex_attribute_descriptions(&vertex_attributes);
        }

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(conv::primitive_topology(config.topology));

        // one viewport/scissor, set dynamically at render-pass begin
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(if config.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            })
            .cull_mode(conv::cull_mode(config.cull))
            .front_face(if config.frontface_counterclockwise {
                vk::FrontFace::COUNTER_CLOCKWISE
            } else {
                vk::FrontFace::CLOCKWISE
            })
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::from_raw(config.samples.max(1)));

        let depth_enabled = config.depth != arclight_hal::types::DepthFunction::None
            && framebuffer.depth_target != Format::None;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_enabled)
            .depth_write_enable(depth_enabled && !config.depth_readonly)
            .depth_compare_op(conv::compare_op(config.depth));

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = framebuffer
            .render_targets
            .iter()
            .map(|rt| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(rt.blend_enable)
                    .src_color_blend_factor(conv::blend_factor(rt.blend_color_src))
                    .dst_color_blend_factor(conv::blend_factor(rt.blend_color_dest))
                    .color_blend_op(conv::blend_op(rt.blend_op_color))
                    .src_alpha_blend_factor(conv::blend_factor(rt.blend_alpha_src))
                    .dst_alpha_blend_factor(conv::blend_factor(rt.blend_alpha_dest))
                    .alpha_blend_op(conv::blend_op(rt.blend_op_alpha))
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(framebuffer.logic_op_enable)
            .logic_op(conv::logic_op(framebuffer.logic_op))
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.raw)
            .render_pass(prototype)
            .subpass(0);

        let pipeline = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .expect("graphics pipeline creation failed")[0]
        };

        for (module, _) in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }

        let mut rt_formats = ArrayVec::new();
        for rt in &framebuffer.render_targets {
            rt_formats.push(rt.format);
        }

        let node = PsoNode {
            raw_pipeline: pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            rt_formats,
            samples: config.samples.max(1),
            prototype_render_pass: Some(prototype),
            num_shader_groups: 0,
            num_identifiable_groups: 0,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    pub fn create_compute(
        &self,
        shader_arg_shapes: &[ShaderArgShape],
        shader: &[u8],
        has_root_constants: bool,
    ) -> handle::PipelineState {
        let patched =
            create_patched_shader(shader).expect("invalid SPIR-V passed to pipeline creation");
        let merged = merge_reflected_descriptors(std::slice::from_ref(&patched));
        spirv_patch::warn_if_inconsistent(&merged, shader_arg_shapes);

        let has_push = has_root_constants || patched.has_push_constants;
        let layout = self.layout_cache.get_or_create(
            &self.device,
            &merged,
            vk::ShaderStageFlags::COMPUTE,
            has_push,
        );

        let module = self.make_shader_module(&patched.spirv);
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(SHADER_ENTRY);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout.raw);

        let pipeline = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .expect("compute pipeline creation failed")[0]
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        let node = PsoNode {
            raw_pipeline: pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            rt_formats: ArrayVec::new(),
            samples: 1,
            prototype_render_pass: None,
            num_shader_groups: 0,
            num_identifiable_groups: 0,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    pub fn create_raytracing(
        &self,
        rt_pipeline_ext: &ash::khr::ray_tracing_pipeline::Device,
        libraries: &[RaytracingShaderLibrary<'_>],
        argument_associations: &[RaytracingArgumentAssociation],
        hit_groups: &[RaytracingHitGroup<'_>],
        max_recursion: u32,
    ) -> handle::PipelineState {
        // every library export becomes one stage; identifiable shaders get
        // their own general group, in export order across libraries
        let mut patched_stages: Vec<PatchedShaderStage> = Vec::new();
        let mut stage_kinds: Vec<ShaderStage> = Vec::new();
        for library in libraries {
            for export in &library.exports {
                let stage = create_patched_shader(library.binary.data)
                    .expect("invalid SPIR-V passed to raytracing pipeline creation");
                stage_kinds.push(export.stage);
                patched_stages.push(stage);
            }
        }

        let merged = merge_reflected_descriptors(&patched_stages);
        for assoc in argument_associations {
            spirv_patch::warn_if_inconsistent(&merged, &assoc.argument_shapes);
        }

        let has_push = argument_associations.iter().any(|a| a.has_root_constants)
            || patched_stages.iter().any(|p| p.has_push_constants);
        let vk_stages = conv::shader_stage_flags(ShaderStageFlags::ALL_RAY);
        let layout =
            self.layout_cache
                .get_or_create(&self.device, &merged, vk_stages, has_push);

        let modules: Vec<vk::ShaderModule> = patched_stages
            .iter()
            .map(|p| self.make_shader_module(&p.spirv))
            .collect();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .zip(stage_kinds.iter())
            .map(|(module, stage)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(conv::shader_stage(*stage))
                    .module(*module)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let mut groups: Vec<vk::RayTracingShaderGroupCreateInfoKHR> = Vec::new();
        for (i, stage) in stage_kinds.iter().enumerate() {
            let identifiable = matches!(
                stage,
                ShaderStage::RayGen | ShaderStage::RayMiss | ShaderStage::RayCallable
            );
            if identifiable {
                groups.push(
                    vk::RayTracingShaderGroupCreateInfoKHR::default()
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(i as u32)
                        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                        .any_hit_shader(vk::SHADER_UNUSED_KHR)
                        .intersection_shader(vk::SHADER_UNUSED_KHR),
                );
            }
        }
        let num_identifiable_groups = groups.len() as u32;
        for hit_group in hit_groups {
            let find_stage = |name: &str| -> u32 {
                if name.is_empty() {
                    return vk::SHADER_UNUSED_KHR;
                }
                let mut stage_index = 0u32;
                for library in libraries {
                    for export in &library.exports {
                        if export.entrypoint == name {
                            return stage_index;
                        }
                        stage_index += 1;
                    }
                }
                error!("hit group references unknown export '{}'", name);
                vk::SHADER_UNUSED_KHR
            };
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(find_stage(hit_group.closest_hit))
                    .any_hit_shader(find_stage(hit_group.any_hit))
                    .intersection_shader(find_stage(hit_group.intersection)),
            );
        }

        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_recursion)
            .layout(layout.raw);

        let pipeline = unsafe {
            rt_pipeline_ext
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[create_info],
                    None,
                )
                .expect("raytracing pipeline creation failed")[0]
        };

        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }

        let node = PsoNode {
            raw_pipeline: pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            rt_formats: ArrayVec::new(),
            samples: 1,
            prototype_render_pass: None,
            num_shader_groups: groups.len() as u32,
            num_identifiable_groups,
        };
        handle::PipelineState(self.pool.acquire(node))
    }

    pub fn free(&self, pso: handle::PipelineState) {
        if !pso.is_valid() {
            return;
        }
        let node = self.pool.release(pso.0);
        unsafe {
            self.device.destroy_pipeline(node.raw_pipeline, None);
            if let Some(pass) = node.prototype_render_pass {
                self.device.destroy_render_pass(pass, None);
            }
        }
        // the layout Arc drops here; the cache keeps layouts alive until
        // pool destruction
    }

    pub fn destroy(&mut self) {
        let device = self.device.clone();
        let leaks = self.pool.drain_allocated(|node| unsafe {
            device.destroy_pipeline(node.raw_pipeline, None);
            if let Some(pass) = node.prototype_render_pass {
                device.destroy_render_pass(pass, None);
            }
        });
        if leaks > 0 {
            info!("leaked {} pipeline state handle(s)", leaks);
        }
        self.layout_cache.destroy(&self.device);
        self.render_pass_cache.destroy(&self.device);
    }
}
