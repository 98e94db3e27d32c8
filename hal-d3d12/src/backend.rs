//! The D3D12 backend proper.

use std::cell::UnsafeCell;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use windows::Win32::Graphics::Direct3D12;

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

use crate::conv;
use crate::descriptors::CpuDescriptorHeap;
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
use crate::shader_table;
use crate::translator::{CommandTranslator, PoolContext};
use crate::HResult as _;

struct ThreadSlot {
    allocators: ThreadAllocators,
    translator: CommandTranslator,
}

struct ThreadRegistry {
    indices: Mutex<FxHashMap<std::thread::ThreadId, usize>>,
    slots: Vec<UnsafeCell<ThreadSlot>>,
}

unsafe impl Sync for ThreadRegistry {}
unsafe impl Send for ThreadRegistry {}

impl ThreadRegistry {
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

pub struct D3d12Backend {
    ctx: DeviceContext,
    resources: ResourcePool,
    shader_views: ShaderViewPool,
    pipelines: PipelinePool,
    cmd_lists: CommandListPool,
    fences: FencePool,
    queries: QueryPool,
    accel_structs: Option<AccelStructPool>,
    swapchains: SwapchainPool,
    rtv_heap: CpuDescriptorHeap,
    dsv_heap: CpuDescriptorHeap,
    threads: ThreadRegistry,
    submit_mutex: Mutex<()>,
    current_backbuffer: Mutex<Option<(handle::Swapchain, handle::Resource)>>,
    diagnostic: DiagnosticBridge,
    num_backbuffers: u32,
}

unsafe impl Send for D3d12Backend {}
unsafe impl Sync for D3d12Backend {}

impl D3d12Backend {
    pub fn new(config: &Config) -> Result<D3d12Backend, InitError> {
        let ctx = DeviceContext::new(config)?;
        let device = &ctx.device;

        let resources = ResourcePool::new(device, config.max_num_resources);
        let shader_views = ShaderViewPool::new(
            device,
            config.max_num_srvs,
            config.max_num_uavs,
            config.max_num_samplers,
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
        let accel_structs = if ctx.raytracing_enabled {
            Some(AccelStructPool::new(device, config.max_num_accel_structs))
        } else {
            None
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
        let num_ring_fences = threads * allocators_per_thread + 5;

        let cmd_lists = CommandListPool::new(device, threads * lists_per_thread, num_ring_fences);

        let slots = (0..threads)
            .map(|_| {
                UnsafeCell::new(ThreadSlot {
                    allocators: ThreadAllocators {
                        direct: CommandAllocatorBundle::new(
                            &ctx,
                            config.num_direct_cmdlist_allocators_per_thread,
                            config.num_direct_cmdlists_per_allocator,
                            QueueType::Direct,
                        ),
                        compute: CommandAllocatorBundle::new(
                            &ctx,
                            config.num_compute_cmdlist_allocators_per_thread,
                            config.num_compute_cmdlists_per_allocator,
                            QueueType::Compute,
                        ),
                        copy: CommandAllocatorBundle::new(
                            &ctx,
                            config.num_copy_cmdlist_allocators_per_thread,
                            config.num_copy_cmdlists_per_allocator,
                            QueueType::Copy,
                        ),
                    },
                    translator: CommandTranslator::new(),
                })
            })
            .collect();

        let present_queue = if config.present_from_compute_queue {
            &ctx.queue_compute
        } else {
            &ctx.queue_direct
        };
        let swapchains = SwapchainPool::new(device, &ctx.factory, present_queue, ctx.allow_tearing, 8);

        // transient view heaps sized for the worst-case live command lists
        let rtv_heap = CpuDescriptorHeap::new(
            device,
            Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            (threads * lists_per_thread * 8).max(64),
        );
        let dsv_heap = CpuDescriptorHeap::new(
            device,
            Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            (threads * lists_per_thread * 2).max(16),
        );

        Ok(D3d12Backend {
            resources,
            shader_views,
            pipelines,
            cmd_lists,
            fences,
            queries,
            accel_structs,
            swapchains,
            rtv_heap,
            dsv_heap,
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
            resources: &self.resources,
            shader_views: &self.shader_views,
            pipelines: &self.pipelines,
            cmd_lists: &self.cmd_lists,
            queries: &self.queries,
            swapchains: &self.swapchains,
            accel_structs: self.accel_structs.as_ref(),
            rtv_heap: &self.rtv_heap,
            dsv_heap: &self.dsv_heap,
        }
    }

    fn view_recycler(&self) -> impl Fn(&[u32], &[u32]) + '_ {
        move |rtvs: &[u32], dsvs: &[u32]| {
            for &slot in rtvs {
                self.rtv_heap.free(slot);
            }
            for &slot in dsvs {
                self.dsv_heap.free(slot);
            }
        }
    }
}

impl Drop for D3d12Backend {
    fn drop(&mut self) {
        self.flush_gpu();

        self.swapchains.destroy();
        if let Some(accel_structs) = &mut self.accel_structs {
            accel_structs.destroy(&self.resources);
        }

        let leaked_lists = self.cmd_lists.discard_and_free_all();
        if leaked_lists > 0 {
            info!("leaked {} command list handle(s)", leaked_lists);
        }
        let rtv_heap = &self.rtv_heap;
        let dsv_heap = &self.dsv_heap;
        let recycler = move |rtvs: &[u32], dsvs: &[u32]| {
            for &slot in rtvs {
                rtv_heap.free(slot);
            }
            for &slot in dsvs {
                dsv_heap.free(slot);
            }
        };
        for slot in &self.threads.slots {
            let slot = unsafe { &mut *slot.get() };
            slot.allocators.destroy(&self.cmd_lists.fence_ring, &recycler);
        }
        self.cmd_lists.destroy();

        self.shader_views.destroy();
        self.pipelines.destroy();
        self.queries.destroy();
        self.fences.destroy();
        self.resources.destroy();
    }
}

impl Backend for D3d12Backend {
    fn backend_type(&self) -> BackendType {
        BackendType::D3d12
    }

    fn flush_gpu(&self) {
        // signal and wait a throwaway fence on every queue
        let fence: Direct3D12::ID3D12Fence = unsafe {
            self.ctx
                .device
                .CreateFence(0, Direct3D12::D3D12_FENCE_FLAG_NONE)
        }
        .expect_hr("flush fence creation");
        let event = unsafe {
            windows::Win32::System::Threading::CreateEventW(std::ptr::null(), false, false, None)
        };
        let mut value = 0u64;
        for queue in [&self.ctx.queue_direct, &self.ctx.queue_compute, &self.ctx.queue_copy] {
            value += 1;
            unsafe {
                queue.Signal(&fence, value).expect_hr("flush signal");
            }
        }
        if unsafe { fence.GetCompletedValue() } < value {
            unsafe {
                fence
                    .SetEventOnCompletion(value, event)
                    .expect_hr("flush event");
                windows::Win32::System::Threading::WaitForSingleObject(
                    event,
                    windows::Win32::System::WindowsProgramming::INFINITE,
                );
            }
        }
        unsafe {
            windows::Win32::Foundation::CloseHandle(event);
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
        let (resource, rtv_slot, width, height, format) =
            self.swapchains.acquire_backbuffer(swapchain);
        let injected = self.resources.inject_backbuffer(
            resource,
            ResourceState::Present,
            rtv_slot,
            format,
            width,
            height,
        );
        *self.current_backbuffer.lock() = Some((swapchain, injected));
        injected
    }

    fn present(&self, swapchain: handle::Swapchain) {
        // the client transitions the backbuffer to the present state
        // before submission; nothing to patch here
        self.swapchains.present(swapchain);
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

    fn flush_mapped_memory(&self, _resource: handle::Resource) {
        // upload heaps are write-combined and need no explicit flush
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
        _usage_compute: bool,
    ) -> handle::ShaderView {
        self.shader_views.create(
            &self.resources,
            self.accel_structs.as_ref(),
            srvs,
            uavs,
            samplers,
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
        let recycler = self.view_recycler();
        let (cl, list) = self
            .cmd_lists
            .create(&mut slot.allocators, queue, &recycler);

        let ctx = self.pool_context();
        let node = self.cmd_lists.node(cl);
        let mut cache = node.state_cache.lock();
        slot.translator.translate(
            &ctx,
            cl,
            &list,
            &mut cache,
            stream,
            queue == QueueType::Copy,
        );
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
        let slot = self.threads.slot();
        let recycler = self.view_recycler();

        #[cfg(debug_assertions)]
        let mut touched: fxhash::FxHashSet<handle::Resource> = fxhash::FxHashSet::default();

        let mut consumed: SmallVec<[handle::CommandList; 16]> = SmallVec::new();
        let mut native_lists: SmallVec<[Option<Direct3D12::ID3D12CommandList>; 16]> =
            SmallVec::new();

        for &cl in command_lists {
            if !cl.is_valid() {
                continue;
            }
            let node = self.cmd_lists.node(cl);
            let cache = node.state_cache.lock();

            let mut barriers: SmallVec<[Direct3D12::D3D12_RESOURCE_BARRIER; 8]> = SmallVec::new();
            for entry in cache.entries() {
                #[cfg(debug_assertions)]
                debug_assert!(
                    touched.insert(entry.resource),
                    "resource touched by more than one command list in a single submit"
                );

                let master = self.resources.resource_state(entry.resource);
                if master != entry.required_initial {
                    let mut barrier: Direct3D12::D3D12_RESOURCE_BARRIER =
                        unsafe { std::mem::zeroed() };
                    barrier.Type = Direct3D12::D3D12_RESOURCE_BARRIER_TYPE_TRANSITION;
                    barrier.Anonymous.Transition = std::mem::ManuallyDrop::new(
                        Direct3D12::D3D12_RESOURCE_TRANSITION_BARRIER {
                            pResource: Some(self.resources.raw(entry.resource).clone()),
                            Subresource: Direct3D12::D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                            StateBefore: conv::resource_states(master),
                            StateAfter: conv::resource_states(entry.required_initial),
                        },
                    );
                    barriers.push(barrier);
                }
                self.resources
                    .set_resource_state(entry.resource, entry.current);
            }
            drop(cache);

            if !barriers.is_empty() {
                let (barrier_cl, barrier_list) =
                    self.cmd_lists
                        .create(&mut slot.allocators, queue, &recycler);
                unsafe {
                    barrier_list.ResourceBarrier(barriers.len() as u32, barriers.as_ptr());
                    barrier_list.Close().expect_hr("barrier list close");
                }
                consumed.push(barrier_cl);
                native_lists.push(Some(barrier_list.into()));
            }
            consumed.push(cl);
            native_lists.push(Some(node.list.clone().into()));
        }

        let native_queue = self.ctx.queue(queue);
        for wait in waits {
            self.fences.wait_gpu(wait.fence, wait.value, native_queue);
        }
        unsafe {
            native_queue.ExecuteCommandLists(native_lists.len() as u32, native_lists.as_mut_ptr());
        }
        for signal in signals {
            self.fences
                .signal_gpu(signal.fence, signal.value, native_queue);
        }

        let (fence_index, fence_target) = self.cmd_lists.fence_ring.acquire_fence();
        unsafe {
            native_queue
                .Signal(self.cmd_lists.fence_ring.raw(fence_index), fence_target)
                .expect_hr("submit fence signal");
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
        self.fences.signal_gpu(fence, value, self.ctx.queue(queue));
    }

    fn wait_fence_gpu(&self, fence: handle::Fence, value: u64, queue: QueueType) {
        self.fences.wait_gpu(fence, value, self.ctx.queue(queue));
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
        max_payload_size_bytes: u32,
        max_attribute_size_bytes: u32,
    ) -> handle::PipelineState {
        if !self.ctx.raytracing_enabled {
            error!("raytracing pipeline requested but raytracing is disabled");
            return handle::PipelineState::NULL;
        }
        self.pipelines.create_raytracing(
            libraries,
            argument_associations,
            hit_groups,
            max_recursion,
            max_payload_size_bytes,
            max_attribute_size_bytes,
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
        shader_table::calculate_strides(ray_gen, miss_records, hit_group_records, callable_records)
    }

    fn write_shader_table(
        &self,
        dest: &mut [u8],
        pipeline_state: handle::PipelineState,
        stride_bytes: u32,
        records: &[arg::ShaderTableRecord<'_>],
    ) {
        if !self.ctx.raytracing_enabled {
            error!("shader table write requested but raytracing is disabled");
            return;
        }
        shader_table::write_records(
            dest,
            &self.resources,
            &self.shader_views,
            &self.pipelines,
            pipeline_state,
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
        unsafe { self.ctx.queue_direct.GetTimestampFrequency() }.unwrap_or(0)
    }

    fn is_raytracing_enabled(&self) -> bool {
        self.ctx.raytracing_enabled
    }
}
