//! The Vulkan backend proper: owns the device, every object pool, and
//! the per-thread translation state; implements the backend trait.

use std::cell::UnsafeCell;

use ash::vk;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use arclight_hal::arg;
use arclight_hal::config::{Config, PresentMode};
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::types::{
    AccelStructBuildFlags, AccelStructInstance, FenceOperation, PipelineConfig, QueryType,
    QueueType, ResourceState, ResourceView, SamplerConfig, ShaderTableStrides,
};
use arclight_hal::window::WindowHandle;
use arclight_hal::{Backend, BackendType, InitError};

use crate::barrier::{BarrierBundle, StateChange};
use crate::device::DeviceContext;
use crate::diagnostic::DiagnosticBridge;
use crate::pools::accel_struct::AccelStructPool;
use crate::pools::cmd_list::{CommandAllocatorBundle, CommandListPool, ThreadAllocators};
use crate::pools::fence::FencePool;
use crate::pools::pipeline::PipelinePool;
use crate::pools::query::QueryPool;
use crate::pools::resource::ResourcePool;
use crate::pools::shader_view::ShaderViewPool;
use crate::pools::swapchain::SwapchainPool;
use crate::shader_table::{self, ShaderTableProperties};
use crate::translator::{CommandTranslator, PoolContext};

struct ThreadSlot {
    allocators: ThreadAllocators,
    translator: CommandTranslator,
}

/// Maps calling threads to their slot on first touch. The configured
/// thread count is a hard ceiling.
struct ThreadRegistry {
    indices: Mutex<FxHashMap<std::thread::ThreadId, usize>>,
    slots: Vec<UnsafeCell<ThreadSlot>>,
}

unsafe impl Sync for ThreadRegistry {}

impl ThreadRegistry {
    /// Exclusive access is sound: a slot is only ever handed to the one
    /// thread whose id mapped to it.
    #[allow(clippy::mut_from_ref)]
    fn slot(&self) -> &mut ThreadSlot {
        let id = std::thread::current().id();
        let mut indices = self.indices.lock();
        let next = indices.len();
        let index = *indices.entry(id).or_insert_with(|| {
            assert!(
                next < self.slots.len(),
                "backend called from more threads than configured"
            );
            next
        });
        drop(indices);
        unsafe { &mut *self.slots[index].get() }
    }
}

pub struct VulkanBackend {
    ctx: DeviceContext,
    resources: ResourcePool,
    shader_views: ShaderViewPool,
    pipelines: PipelinePool,
    cmd_lists: CommandListPool,
    fences: FencePool,
    queries: QueryPool,
    accel_structs: Option<AccelStructPool>,
    accel_ext: Option<ash::khr::acceleration_structure::Device>,
    rt_ext: Option<ash::khr::ray_tracing_pipeline::Device>,
    swapchains: SwapchainPool,
    threads: ThreadRegistry,
    /// Serializes master-state writeback and submission ordering.
    submit_mutex: Mutex<()>,
    /// The swapchain and injected resource of the last acquire.
    current_backbuffer: Mutex<Option<(handle::Swapchain, handle::Resource)>>,
    diagnostic: DiagnosticBridge,
    num_backbuffers: u32,
}

// the only non-Sync member is the cached raytracing-properties struct,
// whose p_next chain is never populated after the init-time query
unsafe impl Send for VulkanBackend {}
unsafe impl Sync for VulkanBackend {}

impl VulkanBackend {
    pub fn new(config: &Config) -> Result<VulkanBackend, InitError> {
        let ctx = DeviceContext::new(config)?;
        let device = &ctx.device;
        let raytracing = ctx.raytracing_enabled;

        let resources = ResourcePool::new(
            device,
            &ctx.instance,
            ctx.physical_device,
            config.max_num_resources,
            config.max_num_cbvs,
            raytracing,
        );
        let shader_views = ShaderViewPool::new(
            device,
            config.max_num_srvs,
            config.max_num_uavs,
            config.max_num_samplers,
            raytracing,
        );
        let pipelines = PipelinePool::new(
            device,
            config.max_num_pipeline_states,
            config.max_num_raytrace_pipeline_states,
        );
        let fences = FencePool::new(device, config.max_num_fences);
        let queries = QueryPool::new(
            device,
            config.num_timestamp_queries,
            config.num_occlusion_queries,
            config.num_pipeline_stat_queries,
        );

        let (accel_structs, accel_ext, rt_ext) = if raytracing {
            let accel_ext = ash::khr::acceleration_structure::Device::new(&ctx.instance, device);
            let rt_ext = ash::khr::ray_tracing_pipeline::Device::new(&ctx.instance, device);
            (
                Some(AccelStructPool::new(
                    device,
                    accel_ext.clone(),
                    config.max_num_accel_structs,
                )),
                Some(accel_ext),
                Some(rt_ext),
            )
        } else {
            (None, None, None)
        };

        let threads = config.num_threads.max(1);
        let lists_per_thread = config.num_direct_cmdlist_allocators_per_thread
            * config.num_direct_cmdlists_per_allocator
            + config.num_compute_cmdlist_allocators_per_thread
                * config.num_compute_cmdlists_per_allocator
            + config.num_copy_cmdlist_allocators_per_thread
                * config.num_copy_cmdlists_per_allocator;
        let allocators_per_thread = config.num_direct_cmdlist_allocators_per_thread
            + config.num_compute_cmdlist_allocators_per_thread
            + config.num_copy_cmdlist_allocators_per_thread;
        // a few spare fences over the strict maximum, which is one in
        // flight per allocator
        let num_ring_fences = threads * allocators_per_thread + 5;

        let cmd_lists = CommandListPool::new(device, threads * lists_per_thread, num_ring_fences);

        let compute_family = if ctx.families.has_discrete_compute {
            ctx.families.compute
        } else {
            ctx.families.direct
        };
        let copy_family = if ctx.families.has_discrete_copy {
            ctx.families.copy
        } else {
            ctx.families.direct
        };
        let slots = (0..threads)
            .map(|_| {
                UnsafeCell::new(ThreadSlot {
                    allocators: ThreadAllocators {
                        direct: CommandAllocatorBundle::new(
                            device,
                            config.num_direct_cmdlist_allocators_per_thread,
                            config.num_direct_cmdlists_per_allocator,
                            ctx.families.direct,
                        ),
                        compute: CommandAllocatorBundle::new(
                            device,
                            config.num_compute_cmdlist_allocators_per_thread,
                            config.num_compute_cmdlists_per_allocator,
                            compute_family,
                        ),
                        copy: CommandAllocatorBundle::new(
                            device,
                            config.num_copy_cmdlist_allocators_per_thread,
                            config.num_copy_cmdlists_per_allocator,
                            copy_family,
                        ),
                    },
                    translator: CommandTranslator::new(),
                })
            })
            .collect();

        let present_queue = if config.present_from_compute_queue {
            ctx.queue_compute
        } else {
            ctx.queue_direct
        };
        let present_family = if config.present_from_compute_queue {
            compute_family
        } else {
            ctx.families.direct
        };
        let swapchains = SwapchainPool::new(
            &ctx.entry,
            &ctx.instance,
            device,
            ctx.physical_device,
            present_queue,
            present_family,
            8,
        );

        Ok(VulkanBackend {
            resources,
            shader_views,
            pipelines,
            cmd_lists,
            fences,
            queries,
            accel_structs,
            accel_ext,
            rt_ext,
            swapchains,
            threads: ThreadRegistry {
                indices: Mutex::new(FxHashMap::default()),
                slots,
            },
            submit_mutex: Mutex::new(()),
            current_backbuffer: Mutex::new(None),
            diagnostic: DiagnosticBridge::detect(),
            num_backbuffers: config.num_backbuffers,
            ctx,
        })
    }

    fn pool_context(&self) -> PoolContext<'_> {
        PoolContext {
            device: &self.ctx.device,
            resources: &self.resources,
            shader_views: &self.shader_views,
            pipelines: &self.pipelines,
            cmd_lists: &self.cmd_lists,
            queries: &self.queries,
            accel_structs: self.accel_structs.as_ref(),
            accel_ext: self.accel_ext.as_ref(),
            rt_ext: self.rt_ext.as_ref(),
            debug_utils: self.ctx.debug_utils_device.as_ref(),
        }
    }

    fn shader_table_properties(&self) -> ShaderTableProperties {
        match &self.ctx.rt_pipeline_properties {
            Some(props) => ShaderTableProperties {
                handle_size: props.shader_group_handle_size,
                handle_alignment: props.shader_group_handle_alignment,
                base_alignment: props.shader_group_base_alignment,
            },
            None => ShaderTableProperties::default(),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.flush_gpu();

        let device = self.ctx.device.clone();
        self.swapchains.destroy();
        if let Some(accel_structs) = &mut self.accel_structs {
            accel_structs.destroy(&self.resources);
        }

        // command lists reference their allocators; consume them first,
        // then tear the per-thread allocators down against the fence ring
        let leaked_lists = self.cmd_lists.discard_and_free_all();
        if leaked_lists > 0 {
            info!("leaked {} command list handle(s)", leaked_lists);
        }
        for slot in &self.threads.slots {
            let slot = unsafe { &mut *slot.get() };
            slot.allocators.destroy(&device, &self.cmd_lists.fence_ring);
        }
        self.cmd_lists.destroy(&device);

        self.shader_views.destroy();
        self.pipelines.destroy();
        self.queries.destroy();
        self.fences.destroy();
        self.resources.destroy();
        self.ctx.destroy();
    }
}

impl Backend for VulkanBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn flush_gpu(&self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }
    }

    //
    // Swapchain interface
    //

    fn create_swapchain(
        &self,
        window: &WindowHandle,
        width: u32,
        height: u32,
        mode: PresentMode,
        num_backbuffers: u32,
    ) -> handle::Swapchain {
        let backbuffers = if num_backbuffers == 0 {
            self.num_backbuffers
        } else {
            num_backbuffers
        };
        self.swapchains
            .create_swapchain(window, width, height, mode, backbuffers)
    }

    fn free_swapchain(&self, swapchain: handle::Swapchain) {
        self.swapchains.free(swapchain);
    }

    fn acquire_backbuffer(&self, swapchain: handle::Swapchain) -> handle::Resource {
        match self.swapchains.acquire_backbuffer(swapchain) {
            None => handle::Resource::NULL,
            Some((image, view, width, height, format)) => {
                let resource = self.resources.inject_backbuffer(
                    image,
                    ResourceState::Undefined,
                    view,
                    format,
                    width,
                    height,
                );
                *self.current_backbuffer.lock() = Some((swapchain, resource));
                resource
            }
        }
    }

    fn present(&self, swapchain: handle::Swapchain) {
        let state = match *self.current_backbuffer.lock() {
            Some((sc, resource)) if sc == swapchain => self.resources.resource_state(resource),
            _ => ResourceState::Present,
        };
        self.swapchains.present(swapchain, state);
    }

    fn on_resize(&self, swapchain: handle::Swapchain, width: u32, height: u32) {
        self.swapchains.on_resize(swapchain, width, height);
    }

    fn backbuffer_size(&self, swapchain: handle::Swapchain) -> (u32, u32) {
        self.swapchains.backbuffer_size(swapchain)
    }

    fn backbuffer_format(&self, swapchain: handle::Swapchain) -> Format {
        self.swapchains.backbuffer_format(swapchain)
    }

    fn num_backbuffers(&self, swapchain: handle::Swapchain) -> u32 {
        self.swapchains.num_backbuffers(swapchain)
    }

    fn clear_pending_resize(&self, swapchain: handle::Swapchain) -> bool {
        self.swapchains.clear_resize_flag(swapchain)
    }

    //
    // Resource interface
    //

    fn create_texture(&self, info: &arg::TextureInfo, debug_name: Option<&str>) -> handle::Resource {
        self.resources.create_texture(info, debug_name)
    }

    fn create_render_target(
        &self,
        info: &arg::RenderTargetInfo,
        debug_name: Option<&str>,
    ) -> handle::Resource {
        self.resources.create_render_target(info, debug_name)
    }

    fn create_buffer(&self, info: &arg::BufferInfo, debug_name: Option<&str>) -> handle::Resource {
        self.resources.create_buffer(info, debug_name)
    }

    fn create_upload_buffer(&self, size_bytes: u64, stride_bytes: u32) -> handle::Resource {
        self.resources.create_buffer(
            &arg::BufferInfo {
                size_bytes,
                stride_bytes,
                heap: arclight_hal::types::ResourceHeap::Upload,
                allow_uav: false,
            },
            None,
        )
    }

    fn map_buffer(&self, resource: handle::Resource) -> *mut u8 {
        self.resources.mapped_memory(resource)
    }

    fn unmap_buffer(&self, _resource: handle::Resource) {
        // buffers stay persistently mapped from creation to free
    }

    fn flush_mapped_memory(&self, resource: handle::Resource) {
        self.resources.flush_mapped_memory(resource);
    }

    fn free_resource(&self, resource: handle::Resource) {
        self.resources.free(resource);
    }

    fn free_resource_range(&self, resources: &[handle::Resource]) {
        self.resources.free_range(resources);
    }

    //
    // Shader view interface
    //

    fn create_shader_view(
        &self,
        srvs: &[ResourceView],
        uavs: &[ResourceView],
        samplers: &[SamplerConfig],
        usage_compute: bool,
    ) -> handle::ShaderView {
        self.shader_views.create(
            &self.resources,
            self.accel_structs.as_ref(),
            srvs,
            uavs,
            samplers,
            usage_compute,
        )
    }

    fn free_shader_view(&self, shader_view: handle::ShaderView) {
        self.shader_views.free(shader_view);
    }

    fn free_shader_view_range(&self, shader_views: &[handle::ShaderView]) {
        self.shader_views.free_range(shader_views);
    }

    //
    // Pipeline state interface
    //

    fn create_pipeline_state(
        &self,
        vertex_format: arg::VertexFormat<'_>,
        framebuffer: &arg::FramebufferConfig,
        shader_arg_shapes: &[arg::ShaderArgShape],
        has_root_constants: bool,
        shaders: &[arg::GraphicsShader<'_>],
        config: &PipelineConfig,
    ) -> handle::PipelineState {
        self.pipelines.create_graphics(
            vertex_format,
            framebuffer,
            shader_arg_shapes,
            has_root_constants,
            shaders,
            config,
        )
    }

    fn create_compute_pipeline_state(
        &self,
        shader_arg_shapes: &[arg::ShaderArgShape],
        shader: arg::ShaderBinary<'_>,
        has_root_constants: bool,
    ) -> handle::PipelineState {
        self.pipelines
            .create_compute(shader_arg_shapes, shader.data, has_root_constants)
    }

    fn free_pipeline_state(&self, pipeline_state: handle::PipelineState) {
        self.pipelines.free(pipeline_state);
    }

    //
    // Command list interface
    //

    fn record_command_list(&self, stream: &[u8], queue: QueueType) -> handle::CommandList {
        let slot = self.threads.slot();
        let (cl, raw_buffer) =
            self.cmd_lists
                .create(&self.ctx.device, &mut slot.allocators, queue);

        let ctx = self.pool_context();
        let node = self.cmd_lists.node(cl);
        let mut cache = node.state_cache.lock();
        slot.translator
            .translate(&ctx, cl, raw_buffer, &mut cache, stream);
        cl
    }

    fn discard(&self, command_lists: &[handle::CommandList]) {
        self.cmd_lists.free_and_discard(command_lists);
    }

    fn submit(
        &self,
        command_lists: &[handle::CommandList],
        queue: QueueType,
        waits: &[FenceOperation],
        signals: &[FenceOperation],
    ) {
        let _guard = self.submit_mutex.lock();
        let device = &self.ctx.device;
        let slot = self.threads.slot();

        #[cfg(debug_assertions)]
        let mut touched: fxhash::FxHashSet<handle::Resource> = fxhash::FxHashSet::default();

        let mut consumed: SmallVec<[handle::CommandList; 16]> = SmallVec::new();
        let mut raw_buffers: SmallVec<[vk::CommandBuffer; 16]> = SmallVec::new();

        for &cl in command_lists {
            if !cl.is_valid() {
                continue;
            }
            let node = self.cmd_lists.node(cl);
            let cache = node.state_cache.lock();

            // synthesize the implicit initial transitions of this list
            let mut barriers = BarrierBundle::new();
            for entry in cache.entries() {
                #[cfg(debug_assertions)]
                debug_assert!(
                    touched.insert(entry.resource),
                    "resource touched by more than one command list in a single submit"
                );

                let master = self.resources.resource_state(entry.resource);
                let master_dep = self.resources.resource_state_dependency(entry.resource);
                if master != entry.required_initial {
                    let change = StateChange::new(
                        master,
                        entry.required_initial,
                        master_dep,
                        entry.initial_dependency,
                    );
                    if self.resources.is_image(entry.resource) {
                        let info = self.resources.image_info(entry.resource);
                        barriers.add_image_barrier(
                            info.raw,
                            change,
                            crate::conv::image_aspect(info.pixel_format),
                        );
                    } else {
                        let info = self.resources.buffer_info(entry.resource);
                        barriers.add_buffer_barrier(info.raw, change, info.width);
                    }
                }
                // the list's postcondition becomes the new master state
                self.resources.set_resource_state(
                    entry.resource,
                    entry.current,
                    entry.current_dependency,
                );
            }
            drop(cache);

            if !barriers.is_empty() {
                let (barrier_cl, barrier_buf) =
                    self.cmd_lists
                        .create(device, &mut slot.allocators, queue);
                barriers.record(device, barrier_buf);
                unsafe {
                    device
                        .end_command_buffer(barrier_buf)
                        .expect("barrier list close failed");
                }
                consumed.push(barrier_cl);
                raw_buffers.push(barrier_buf);
            }
            consumed.push(cl);
            raw_buffers.push(node.raw_buffer);
        }

        let (fence_index, fence) = self.cmd_lists.fence_ring.acquire_fence(device);

        let wait_semaphores: Vec<vk::Semaphore> =
            waits.iter().map(|op| self.fences.raw(op.fence)).collect();
        let wait_values: Vec<u64> = waits.iter().map(|op| op.value).collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
        let signal_semaphores: Vec<vk::Semaphore> =
            signals.iter().map(|op| self.fences.raw(op.fence)).collect();
        let signal_values: Vec<u64> = signals.iter().map(|op| op.value).collect();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&raw_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            let result = device.queue_submit(self.ctx.queue(queue), &[submit_info], fence);
            if let Err(err) = result {
                error!("queue submission failed: {:?}", err);
            }
        }

        self.cmd_lists.free_on_submit(&consumed, fence_index);
    }

    //
    // Fence interface
    //

    fn create_fence(&self) -> handle::Fence {
        self.fences.create_fence()
    }

    fn fence_value(&self, fence: handle::Fence) -> u64 {
        self.fences.value(fence)
    }

    fn signal_fence_cpu(&self, fence: handle::Fence, value: u64) {
        self.fences.signal_cpu(fence, value);
    }

    fn wait_fence_cpu(&self, fence: handle::Fence, value: u64) {
        self.fences.wait_cpu(fence, value);
    }

    fn signal_fence_gpu(&self, fence: handle::Fence, value: u64, queue: QueueType) {
        self.fences
            .signal_wait_gpu(&[FenceOperation { fence, value }], &[], self.ctx.queue(queue));
    }

    fn wait_fence_gpu(&self, fence: handle::Fence, value: u64, queue: QueueType) {
        self.fences
            .signal_wait_gpu(&[], &[FenceOperation { fence, value }], self.ctx.queue(queue));
    }

    fn free_fence_range(&self, fences: &[handle::Fence]) {
        self.fences.free_range(fences);
    }

    //
    // Query interface
    //

    fn create_query_range(&self, query_type: QueryType, count: u32) -> handle::QueryRange {
        self.queries.create(query_type, count)
    }

    fn free_query_range(&self, query_range: handle::QueryRange) {
        self.queries.free(query_range);
    }

    //
    // Raytracing interface
    //

    fn create_raytracing_pipeline_state(
        &self,
        libraries: &[arg::RaytracingShaderLibrary<'_>],
        argument_associations: &[arg::RaytracingArgumentAssociation],
        hit_groups: &[arg::RaytracingHitGroup<'_>],
        max_recursion: u32,
        _max_payload_size_bytes: u32,
        _max_attribute_size_bytes: u32,
    ) -> handle::PipelineState {
        let rt_ext = match &self.rt_ext {
            Some(ext) => ext,
            None => {
                error!("raytracing pipeline requested but raytracing is disabled");
                return handle::PipelineState::NULL;
            }
        };
        self.pipelines.create_raytracing(
            rt_ext,
            libraries,
            argument_associations,
            hit_groups,
            max_recursion,
        )
    }

    fn create_top_level_accel_struct(
        &self,
        num_instances: u32,
        flags: AccelStructBuildFlags,
    ) -> handle::AccelStruct {
        match &self.accel_structs {
            Some(pool) => pool.create_top_level(&self.resources, num_instances, flags),
            None => {
                error!("accel struct requested but raytracing is disabled");
                handle::AccelStruct::NULL
            }
        }
    }

    fn create_bottom_level_accel_struct(
        &self,
        elements: &[arg::BlasElement],
        flags: AccelStructBuildFlags,
    ) -> (handle::AccelStruct, u64) {
        match &self.accel_structs {
            Some(pool) => pool.create_bottom_level(&self.resources, elements, flags),
            None => {
                error!("accel struct requested but raytracing is disabled");
                (handle::AccelStruct::NULL, 0)
            }
        }
    }

    fn upload_top_level_instances(
        &self,
        accel_struct: handle::AccelStruct,
        instances: &[AccelStructInstance],
    ) {
        if let Some(pool) = &self.accel_structs {
            pool.upload_instances(&self.resources, accel_struct, instances);
        }
    }

    fn accel_struct_buffer(&self, accel_struct: handle::AccelStruct) -> handle::Resource {
        match &self.accel_structs {
            Some(pool) => pool.buffer(accel_struct),
            None => handle::Resource::NULL,
        }
    }

    fn calculate_shader_table_strides(
        &self,
        ray_gen: &arg::ShaderTableRecord<'_>,
        miss_records: &[arg::ShaderTableRecord<'_>],
        hit_group_records: &[arg::ShaderTableRecord<'_>],
        callable_records: &[arg::ShaderTableRecord<'_>],
    ) -> ShaderTableStrides {
        shader_table::calculate_strides(
            &self.shader_table_properties(),
            ray_gen,
            miss_records,
            hit_group_records,
            callable_records,
        )
    }

    fn write_shader_table(
        &self,
        dest: &mut [u8],
        pipeline_state: handle::PipelineState,
        stride_bytes: u32,
        records: &[arg::ShaderTableRecord<'_>],
    ) {
        let rt_ext = match &self.rt_ext {
            Some(ext) => ext,
            None => {
                error!("shader table write requested but raytracing is disabled");
                return;
            }
        };
        let node = self.pipelines.get(pipeline_state);
        let props = self.shader_table_properties();
        let handle_bytes = (node.num_shader_groups * props.handle_size) as usize;
        let group_handles = unsafe {
            rt_ext
                .get_ray_tracing_shader_group_handles(
                    node.raw_pipeline,
                    0,
                    node.num_shader_groups,
                    handle_bytes,
                )
                .expect("shader group handle query failed")
        };
        shader_table::write_records(
            dest,
            &self.resources,
            &group_handles,
            node.num_identifiable_groups,
            props.handle_size,
            stride_bytes,
            records,
        );
    }

    fn free_accel_struct(&self, accel_struct: handle::AccelStruct) {
        if let Some(pool) = &self.accel_structs {
            pool.free(&self.resources, accel_struct);
        }
    }

    fn free_accel_struct_range(&self, accel_structs: &[handle::AccelStruct]) {
        if let Some(pool) = &self.accel_structs {
            pool.free_range(&self.resources, accel_structs);
        }
    }

    //
    // Debug interface
    //

    fn print_information(&self, resource: handle::Resource) {
        self.resources.print_information(resource);
    }

    fn start_forced_capture(&self) -> bool {
        self.diagnostic.start_capture()
    }

    fn end_forced_capture(&self) -> bool {
        self.diagnostic.end_capture()
    }

    //
    // GPU info interface
    //

    fn gpu_timestamp_frequency(&self) -> u64 {
        self.ctx.timestamp_frequency()
    }

    fn is_raytracing_enabled(&self) -> bool {
        self.ctx.raytracing_enabled
    }
}
