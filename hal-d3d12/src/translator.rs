//! The command-list translator for D3D12.
//!
//! Simpler than the Vulkan side in places (no render-pass objects, no
//! framebuffers: render targets bind eagerly at begin-render-pass) and
//! busier in others (descriptor heaps bound up front, root parameters
//! per argument slot). Transient RTV/DSV heap slots created while
//! translating are pinned to the responsible command allocator.

use arrayvec::ArrayVec;
use smallvec::SmallVec;
use windows::runtime::Interface;
use windows::Win32::Graphics::{Direct3D12, Dxgi};

use arclight_hal::commands::*;
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::limits::{MAX_RENDER_TARGETS, MAX_SHADER_ARGUMENTS};
use arclight_hal::stream::CommandParser;
use arclight_hal::types::{ResourceState, ResourceViewInfo, ShaderArgument};

use crate::conv;
use crate::descriptors::CpuDescriptorHeap;
use crate::pools::accel_struct::AccelStructPool;
use crate::pools::cmd_list::CommandListPool;
use crate::pools::pipeline::{PipelinePool, PsoKind, ROOT_CONSTANT_DWORDS};
use crate::pools::query::{native_query_type, QueryPool};
use crate::pools::resource::ResourcePool;
use crate::pools::shader_view::ShaderViewPool;
use crate::pools::swapchain::SwapchainPool;
use crate::state_cache::IncompleteStateCache;

pub struct PoolContext<'a> {
    pub resources: &'a ResourcePool,
    pub shader_views: &'a ShaderViewPool,
    pub pipelines: &'a PipelinePool,
    pub cmd_lists: &'a CommandListPool,
    pub queries: &'a QueryPool,
    pub swapchains: &'a SwapchainPool,
    pub accel_structs: Option<&'a AccelStructPool>,
    /// Transient render-target/depth-stencil view heaps.
    pub rtv_heap: &'a CpuDescriptorHeap,
    pub dsv_heap: &'a CpuDescriptorHeap,
}

#[derive(Copy, Clone, Default)]
struct BoundShaderArg {
    shader_view: handle::ShaderView,
    cbv: handle::Resource,
    cbv_offset: u32,
}

impl BoundShaderArg {
    fn reset(&mut self) {
        *self = BoundShaderArg {
            shader_view: handle::ShaderView::NULL,
            cbv: handle::Resource::NULL,
            cbv_offset: 0,
        };
    }
}

struct BoundState {
    pipeline_state: handle::PipelineState,
    root_signature_set: bool,
    index_buffer: handle::Resource,
    vertex_buffer: handle::Resource,
    shader_args: [BoundShaderArg; MAX_SHADER_ARGUMENTS],
    render_pass_open: bool,
}

impl BoundState {
    fn new() -> Self {
        BoundState {
            pipeline_state: handle::PipelineState::NULL,
            root_signature_set: false,
            index_buffer: handle::Resource::NULL,
            vertex_buffer: handle::Resource::NULL,
            shader_args: Default::default(),
            render_pass_open: false,
        }
    }
}

pub struct CommandTranslator {
    _private: (),
}

impl CommandTranslator {
    pub fn new() -> Self {
        CommandTranslator { _private: () }
    }

    pub fn translate(
        &mut self,
        ctx: &PoolContext<'_>,
        list_handle: handle::CommandList,
        list: &Direct3D12::ID3D12GraphicsCommandList,
        state_cache: &mut IncompleteStateCache,
        stream: &[u8],
        is_copy_queue: bool,
    ) {
        state_cache.reset();

        // the shader-visible heaps are fixed for the backend's lifetime
        if !is_copy_queue {
            let heaps = [
                Some(ctx.shader_views.srv_uav_heap.raw().clone()),
                Some(ctx.shader_views.sampler_heap.raw().clone()),
            ];
            unsafe { list.SetDescriptorHeaps(heaps.len() as u32, heaps.as_ptr()) };
        }

        let mut session = Session {
            ctx,
            list_handle,
            list,
            state_cache,
            bound: BoundState::new(),
            transient_rtvs: SmallVec::new(),
            transient_dsvs: SmallVec::new(),
        };

        for command in CommandParser::new(stream) {
            session.execute(&command);
        }

        let transient_rtvs = std::mem::take(&mut session.transient_rtvs);
        let transient_dsvs = std::mem::take(&mut session.transient_dsvs);
        ctx.cmd_lists
            .add_associated_views(list_handle, &transient_rtvs, &transient_dsvs);

        unsafe { list.Close() }.expect("command list close failed");
    }
}

struct Session<'a, 'c> {
    ctx: &'a PoolContext<'c>,
    list_handle: handle::CommandList,
    list: &'a Direct3D12::ID3D12GraphicsCommandList,
    state_cache: &'a mut IncompleteStateCache,
    bound: BoundState,
    transient_rtvs: SmallVec<[u32; 8]>,
    transient_dsvs: SmallVec<[u32; 2]>,
}

impl<'a, 'c> Session<'a, 'c> {
    fn execute(&mut self, command: &Command) {
        match command {
            Command::BeginRenderPass(cmd) => self.begin_render_pass(cmd),
            Command::EndRenderPass(_) => self.bound.render_pass_open = false,
            Command::TransitionResources(cmd) => self.transition_resources(cmd),
            Command::TransitionImageSlices(cmd) => self.transition_image_slices(cmd),
            Command::BarrierUav(cmd) => self.barrier_uav(cmd),
            Command::Draw(cmd) => self.draw(cmd),
            Command::DrawIndirect(cmd) => self.draw_indirect(cmd),
            Command::Dispatch(cmd) => self.dispatch(cmd),
            Command::CopyBuffer(cmd) => self.copy_buffer(cmd),
            Command::CopyTexture(cmd) => self.copy_texture(cmd),
            Command::CopyBufferToTexture(cmd) => self.copy_buffer_to_texture(cmd),
            Command::CopyTextureToBuffer(cmd) => self.copy_texture_to_buffer(cmd),
            Command::ResolveTexture(cmd) => self.resolve_texture(cmd),
            Command::WriteTimestamp(cmd) => self.write_timestamp(cmd),
            Command::ResolveQueries(cmd) => self.resolve_queries(cmd),
            Command::BeginDebugLabel(cmd) => self.begin_debug_label(cmd),
            Command::EndDebugLabel(_) => unsafe { self.list.EndEvent() },
            Command::UpdateBottomLevel(cmd) => self.update_bottom_level(cmd),
            Command::UpdateTopLevel(cmd) => self.update_top_level(cmd),
            Command::DispatchRays(cmd) => self.dispatch_rays(cmd),
            Command::ClearTextures(cmd) => self.clear_textures(cmd),
        }
    }

    fn rtv_for(&mut self, rv: &arclight_hal::types::ResourceView) -> Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
        if self.ctx.resources.is_backbuffer(rv.resource) {
            return self
                .ctx
                .swapchains
                .rtv_heap
                .cpu_handle(self.ctx.resources.backbuffer_rtv_slot());
        }
        let (slot, dest) = self.ctx.rtv_heap.allocate();
        self.transient_rtvs.push(slot);
        unsafe {
            // default view over the whole resource
            self.device().CreateRenderTargetView(
                self.ctx.resources.raw(rv.resource),
                std::ptr::null(),
                dest,
            );
        }
        dest
    }

    fn device(&self) -> Direct3D12::ID3D12Device {
        unsafe { self.list.GetDevice() }.expect("device query failed")
    }

    fn begin_render_pass(&mut self, cmd: &BeginRenderPass) {
        let mut rtvs: ArrayVec<Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE, MAX_RENDER_TARGETS> =
            ArrayVec::new();
        for rt in &cmd.render_targets {
            let handle = self.rtv_for(&rt.rv);
            if conv::clears_on_begin(rt.clear_type) {
                unsafe {
                    self.list
                        .ClearRenderTargetView(handle, rt.clear_value.as_ptr(), 0, std::ptr::null())
                };
            }
            rtvs.push(handle);
        }

        let mut dsv = None;
        if cmd.depth_target.rv.resource.is_valid() {
            let (slot, dest) = self.ctx.dsv_heap.allocate();
            self.transient_dsvs.push(slot);
            unsafe {
                self.device().CreateDepthStencilView(
                    self.ctx.resources.raw(cmd.depth_target.rv.resource),
                    std::ptr::null(),
                    dest,
                );
            }
            if conv::clears_on_begin(cmd.depth_target.clear_type) {
                unsafe {
                    self.list.ClearDepthStencilView(
                        dest,
                        Direct3D12::D3D12_CLEAR_FLAGS(
                            Direct3D12::D3D12_CLEAR_FLAG_DEPTH.0
                                | Direct3D12::D3D12_CLEAR_FLAG_STENCIL.0,
                        ),
                        cmd.depth_target.clear_value_depth,
                        cmd.depth_target.clear_value_stencil,
                        0,
                        std::ptr::null(),
                    )
                };
            }
            dsv = Some(dest);
        }

        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                rtvs.as_ptr(),
                false,
                dsv.as_ref()
                    .map_or(std::ptr::null(), |handle| handle as *const _),
            );
        }

        let viewport = Direct3D12::D3D12_VIEWPORT {
            TopLeftX: cmd.viewport_offset_x as f32,
            TopLeftY: cmd.viewport_offset_y as f32,
            Width: cmd.viewport_width as f32,
            Height: cmd.viewport_height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let scissor = windows::Win32::Foundation::RECT {
            left: cmd.viewport_offset_x,
            top: cmd.viewport_offset_y,
            right: cmd.viewport_offset_x + cmd.viewport_width as i32,
            bottom: cmd.viewport_offset_y + cmd.viewport_height as i32,
        };
        unsafe {
            self.list.RSSetViewports(1, &viewport);
            self.list.RSSetScissorRects(1, &scissor);
        }
        self.bound.render_pass_open = true;
    }

    fn bind_graphics_pso(&mut self, pso: handle::PipelineState) {
        if self.bound.pipeline_state == pso && self.bound.root_signature_set {
            return;
        }
        let node = self.ctx.pipelines.get(pso);
        let (raw_pso, topology) = match &node.kind {
            PsoKind::Graphics { pso, topology } => (pso, *topology),
            _ => panic!("draw with a non-graphics pipeline"),
        };

        // a changed root signature invalidates all root bindings
        unsafe {
            self.list.SetGraphicsRootSignature(&node.root_signature);
            self.list.SetPipelineState(raw_pso);
            self.list.IASetPrimitiveTopology(topology);
        }
        for arg in &mut self.bound.shader_args {
            arg.reset();
        }
        self.bound.pipeline_state = pso;
        self.bound.root_signature_set = true;
    }

    fn bind_vertex_index_buffers(
        &mut self,
        vertex_buffer: handle::Resource,
        index_buffer: handle::Resource,
    ) {
        if index_buffer != self.bound.index_buffer {
            self.bound.index_buffer = index_buffer;
            if index_buffer.is_valid() {
                let info = self.ctx.resources.buffer_info(index_buffer);
                let view = Direct3D12::D3D12_INDEX_BUFFER_VIEW {
                    BufferLocation: self.ctx.resources.gpu_address(index_buffer),
                    SizeInBytes: info.width as u32,
                    Format: if info.stride == 4 {
                        Dxgi::DXGI_FORMAT_R32_UINT
                    } else {
                        Dxgi::DXGI_FORMAT_R16_UINT
                    },
                };
                unsafe { self.list.IASetIndexBuffer(&view) };
            }
        }
        if vertex_buffer != self.bound.vertex_buffer {
            self.bound.vertex_buffer = vertex_buffer;
            if vertex_buffer.is_valid() {
                let info = self.ctx.resources.buffer_info(vertex_buffer);
                let view = Direct3D12::D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: self.ctx.resources.gpu_address(vertex_buffer),
                    SizeInBytes: info.width as u32,
                    StrideInBytes: info.stride,
                };
                unsafe { self.list.IASetVertexBuffers(0, 1, &view) };
            }
        }
    }

    fn bind_shader_arguments(
        &mut self,
        pso: handle::PipelineState,
        root_constants: &[u8],
        args: &[ShaderArgument],
        compute: bool,
    ) {
        let node = self.ctx.pipelines.get(pso);
        let layout = &node.layout;

        if let Some(param) = layout.root_constants_param {
            unsafe {
                if compute {
                    self.list.SetComputeRoot32BitConstants(
                        param,
                        ROOT_CONSTANT_DWORDS,
                        root_constants.as_ptr() as *const _,
                        0,
                    );
                } else {
                    self.list.SetGraphicsRoot32BitConstants(
                        param,
                        ROOT_CONSTANT_DWORDS,
                        root_constants.as_ptr() as *const _,
                        0,
                    );
                }
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let map = layout.arguments[i];
            let bound_arg = &mut self.bound.shader_args[i];

            if arg.constant_buffer.is_valid() {
                let changed =
                    bound_arg.cbv != arg.constant_buffer || bound_arg.cbv_offset != arg.constant_buffer_offset;
                if changed {
                    bound_arg.cbv = arg.constant_buffer;
                    bound_arg.cbv_offset = arg.constant_buffer_offset;
                    let param = map.cbv_param.expect("CBV bound but not declared in shape");
                    let address = self.ctx.resources.gpu_address(arg.constant_buffer)
                        + u64::from(arg.constant_buffer_offset);
                    unsafe {
                        if compute {
                            self.list.SetComputeRootConstantBufferView(param, address);
                        } else {
                            self.list.SetGraphicsRootConstantBufferView(param, address);
                        }
                    }
                }
            }

            if bound_arg.shader_view != arg.shader_view {
                bound_arg.shader_view = arg.shader_view;
                if arg.shader_view.is_valid() {
                    if let Some(param) = map.table_param {
                        let table = self.ctx.shader_views.srv_uav_table(arg.shader_view);
                        unsafe {
                            if compute {
                                self.list.SetComputeRootDescriptorTable(param, table);
                            } else {
                                self.list.SetGraphicsRootDescriptorTable(param, table);
                            }
                        }
                    }
                    if let Some(param) = map.sampler_table_param {
                        let table = self.ctx.shader_views.sampler_table(arg.shader_view);
                        unsafe {
                            if compute {
                                self.list.SetComputeRootDescriptorTable(param, table);
                            } else {
                                self.list.SetGraphicsRootDescriptorTable(param, table);
                            }
                        }
                    }
                }
            }
        }
    }

    fn draw(&mut self, cmd: &Draw) {
        self.bind_graphics_pso(cmd.pipeline_state);
        self.bind_vertex_index_buffers(cmd.vertex_buffer, cmd.index_buffer);
        self.bind_shader_arguments(cmd.pipeline_state, &cmd.root_constants, &cmd.shader_arguments, false);

        if cmd.scissor.is_set() {
            let rect = windows::Win32::Foundation::RECT {
                left: cmd.scissor.left,
                top: cmd.scissor.top,
                right: cmd.scissor.right,
                bottom: cmd.scissor.bottom,
            };
            unsafe { self.list.RSSetScissorRects(1, &rect) };
        }

        unsafe {
            if cmd.index_buffer.is_valid() {
                self.list.DrawIndexedInstanced(
                    cmd.num_indices,
                    1,
                    cmd.index_offset,
                    cmd.vertex_offset as i32,
                    0,
                );
            } else {
                self.list.DrawInstanced(cmd.num_indices, 1, cmd.vertex_offset, 0);
            }
        }
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) {
        self.bind_graphics_pso(cmd.pipeline_state);
        self.bind_vertex_index_buffers(cmd.vertex_buffer, cmd.index_buffer);
        self.bind_shader_arguments(cmd.pipeline_state, &cmd.root_constants, &cmd.shader_arguments, false);

        let node = self.ctx.pipelines.get(cmd.pipeline_state);
        let buffer = self.ctx.resources.raw(cmd.argument_buffer);
        let offset = u64::from(cmd.argument_buffer_offset_bytes);
        let signature = match cmd.command_type {
            IndirectCommandType::Draw => &self.ctx.pipelines.signature_draw,
            IndirectCommandType::DrawIndexed => &self.ctx.pipelines.signature_draw_indexed,
            IndirectCommandType::DrawIndexedWithId => node
                .draw_id_signature
                .as_ref()
                .expect("draw-id indirect requires root constants in the pipeline"),
        };
        unsafe {
            self.list.ExecuteIndirect(
                signature,
                cmd.num_arguments,
                buffer,
                offset,
                None,
                0,
            );
        }
    }

    fn dispatch(&mut self, cmd: &Dispatch) {
        let node = self.ctx.pipelines.get(cmd.pipeline_state);
        if self.bound.pipeline_state != cmd.pipeline_state {
            let raw_pso = match &node.kind {
                PsoKind::Compute { pso } => pso,
                _ => panic!("dispatch with a non-compute pipeline"),
            };
            unsafe {
                self.list.SetComputeRootSignature(&node.root_signature);
                self.list.SetPipelineState(raw_pso);
            }
            for arg in &mut self.bound.shader_args {
                arg.reset();
            }
            self.bound.pipeline_state = cmd.pipeline_state;
        }
        self.bind_shader_arguments(cmd.pipeline_state, &cmd.root_constants, &cmd.shader_arguments, true);
        unsafe {
            self.list.Dispatch(cmd.dispatch_x, cmd.dispatch_y, cmd.dispatch_z);
        }
    }

    fn transition_barrier(
        &self,
        resource: &Direct3D12::ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
        subresource: u32,
    ) -> Direct3D12::D3D12_RESOURCE_BARRIER {
        let mut barrier: Direct3D12::D3D12_RESOURCE_BARRIER = unsafe { std::mem::zeroed() };
        barrier.Type = Direct3D12::D3D12_RESOURCE_BARRIER_TYPE_TRANSITION;
        barrier.Anonymous.Transition = std::mem::ManuallyDrop::new(
            Direct3D12::D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: Some(resource.clone()),
                Subresource: subresource,
                StateBefore: conv::resource_states(before),
                StateAfter: conv::resource_states(after),
            },
        );
        barrier
    }

    fn transition_resources(&mut self, cmd: &TransitionResources) {
        let mut barriers: SmallVec<[Direct3D12::D3D12_RESOURCE_BARRIER; 4]> = SmallVec::new();
        for transition in &cmd.transitions {
            let before = self
                .state_cache
                .transition_resource(transition.resource, transition.target_state);
            if let Some(before) = before {
                if before != transition.target_state {
                    barriers.push(self.transition_barrier(
                        self.ctx.resources.raw(transition.resource),
                        before,
                        transition.target_state,
                        Direct3D12::D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    ));
                }
            }
        }
        if !barriers.is_empty() {
            unsafe {
                self.list
                    .ResourceBarrier(barriers.len() as u32, barriers.as_ptr())
            };
        }
    }

    fn transition_image_slices(&mut self, cmd: &TransitionImageSlices) {
        let mut barriers: SmallVec<[Direct3D12::D3D12_RESOURCE_BARRIER; 4]> = SmallVec::new();
        for transition in &cmd.transitions {
            let info = self.ctx.resources.image_info(transition.resource);
            // subresource index = mip + slice * numMips
            let subresource = transition.mip_level + transition.array_slice * info.num_mips;
            barriers.push(self.transition_barrier(
                self.ctx.resources.raw(transition.resource),
                transition.source_state,
                transition.target_state,
                subresource,
            ));
        }
        if !barriers.is_empty() {
            unsafe {
                self.list
                    .ResourceBarrier(barriers.len() as u32, barriers.as_ptr())
            };
        }
    }

    fn barrier_uav(&mut self, cmd: &BarrierUav) {
        let mut barriers: SmallVec<[Direct3D12::D3D12_RESOURCE_BARRIER; 8]> = SmallVec::new();
        for &resource in &cmd.resources {
            let mut barrier: Direct3D12::D3D12_RESOURCE_BARRIER = unsafe { std::mem::zeroed() };
            barrier.Type = Direct3D12::D3D12_RESOURCE_BARRIER_TYPE_UAV;
            barrier.Anonymous.UAV =
                std::mem::ManuallyDrop::new(Direct3D12::D3D12_RESOURCE_UAV_BARRIER {
                    pResource: Some(self.ctx.resources.raw(resource).clone()),
                });
            barriers.push(barrier);
        }
        if !barriers.is_empty() {
            unsafe {
                self.list
                    .ResourceBarrier(barriers.len() as u32, barriers.as_ptr())
            };
        }
    }

    /// Serializes all UAV access, used between accel-struct builds.
    fn global_uav_barrier(&mut self) {
        let mut barrier: Direct3D12::D3D12_RESOURCE_BARRIER = unsafe { std::mem::zeroed() };
        barrier.Type = Direct3D12::D3D12_RESOURCE_BARRIER_TYPE_UAV;
        barrier.Anonymous.UAV =
            std::mem::ManuallyDrop::new(Direct3D12::D3D12_RESOURCE_UAV_BARRIER {
                pResource: None,
            });
        unsafe { self.list.ResourceBarrier(1, &barrier) };
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) {
        unsafe {
            self.list.CopyBufferRegion(
                self.ctx.resources.raw(cmd.destination),
                cmd.dest_offset_bytes,
                self.ctx.resources.raw(cmd.source),
                cmd.source_offset_bytes,
                cmd.size_bytes,
            );
        }
    }

    fn texture_location(
        &self,
        resource: handle::Resource,
        subresource: u32,
    ) -> Direct3D12::D3D12_TEXTURE_COPY_LOCATION {
        Direct3D12::D3D12_TEXTURE_COPY_LOCATION {
            pResource: Some(self.ctx.resources.raw(resource).clone()),
            Type: Direct3D12::D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: Direct3D12::D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        }
    }

    fn footprint_location(
        &self,
        resource: handle::Resource,
        offset: u64,
        format: Format,
        width: u32,
        height: u32,
    ) -> Direct3D12::D3D12_TEXTURE_COPY_LOCATION {
        let row_pitch = arclight_hal::align_up(
            u64::from(width) * u64::from(format.bytes_per_unit()),
            u64::from(Direct3D12::D3D12_TEXTURE_DATA_PITCH_ALIGNMENT),
        ) as u32;
        Direct3D12::D3D12_TEXTURE_COPY_LOCATION {
            pResource: Some(self.ctx.resources.raw(resource).clone()),
            Type: Direct3D12::D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: Direct3D12::D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: Direct3D12::D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: offset,
                    Footprint: Direct3D12::D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: conv::format(format),
                        Width: width,
                        Height: height,
                        Depth: 1,
                        RowPitch: row_pitch,
                    },
                },
            },
        }
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) {
        let src_info = self.ctx.resources.image_info(cmd.source);
        let dest_info = self.ctx.resources.image_info(cmd.destination);
        for slice in 0..cmd.num_array_slices {
            let src = self.texture_location(
                cmd.source,
                cmd.src_mip_index + (cmd.src_array_index + slice) * src_info.num_mips,
            );
            let dest = self.texture_location(
                cmd.destination,
                cmd.dest_mip_index + (cmd.dest_array_index + slice) * dest_info.num_mips,
            );
            let src_box = Direct3D12::D3D12_BOX {
                left: 0,
                top: 0,
                front: 0,
                right: cmd.width,
                bottom: cmd.height,
                back: 1,
            };
            unsafe { self.list.CopyTextureRegion(&dest, 0, 0, 0, &src, &src_box) };
        }
    }

    fn copy_buffer_to_texture(&mut self, cmd: &CopyBufferToTexture) {
        let dest_info = self.ctx.resources.image_info(cmd.destination);
        let src = self.footprint_location(
            cmd.source,
            cmd.source_offset_bytes,
            dest_info.pixel_format,
            cmd.dest_width,
            cmd.dest_height,
        );
        let dest = self.texture_location(
            cmd.destination,
            cmd.dest_mip_index + cmd.dest_array_index * dest_info.num_mips,
        );
        unsafe {
            self.list
                .CopyTextureRegion(&dest, 0, 0, 0, &src, std::ptr::null())
        };
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) {
        let src_info = self.ctx.resources.image_info(cmd.source);
        let src = self.texture_location(
            cmd.source,
            cmd.src_mip_index + cmd.src_array_index * src_info.num_mips,
        );
        let dest = self.footprint_location(
            cmd.destination,
            cmd.dest_offset_bytes,
            src_info.pixel_format,
            cmd.src_width,
            cmd.src_height,
        );
        unsafe {
            self.list
                .CopyTextureRegion(&dest, 0, 0, 0, &src, std::ptr::null())
        };
    }

    fn resolve_texture(&mut self, cmd: &ResolveTexture) {
        let src_info = self.ctx.resources.image_info(cmd.source);
        let dest_info = self.ctx.resources.image_info(cmd.destination);
        unsafe {
            self.list.ResolveSubresource(
                self.ctx.resources.raw(cmd.destination),
                cmd.dest_mip_index + cmd.dest_array_index * dest_info.num_mips,
                self.ctx.resources.raw(cmd.source),
                cmd.src_mip_index + cmd.src_array_index * src_info.num_mips,
                conv::format(dest_info.pixel_format),
            );
        }
    }

    fn write_timestamp(&mut self, cmd: &WriteTimestamp) {
        let (heap, index, ty) = self.ctx.queries.query(cmd.query_range, cmd.index);
        unsafe {
            self.list.EndQuery(&heap, native_query_type(ty), index);
        }
    }

    fn resolve_queries(&mut self, cmd: &ResolveQueries) {
        let (heap, first, ty) = self.ctx.queries.query(cmd.src_query_range, cmd.query_start);
        unsafe {
            self.list.ResolveQueryData(
                &heap,
                native_query_type(ty),
                first,
                cmd.num_queries,
                self.ctx.resources.raw(cmd.dest_buffer),
                u64::from(cmd.dest_offset_bytes),
            );
        }
    }

    fn begin_debug_label(&mut self, cmd: &BeginDebugLabel) {
        // legacy PIX marker encoding: metadata 1 = ANSI string
        unsafe {
            self.list.BeginEvent(
                1,
                cmd.text.as_ptr() as *const _,
                u32::from(cmd.text_len),
            );
        }
    }

    fn list4(&self) -> Option<Direct3D12::ID3D12GraphicsCommandList4> {
        self.list.cast().ok()
    }

    fn update_bottom_level(&mut self, cmd: &UpdateBottomLevel) {
        let (accel_structs, list4) = match (self.ctx.accel_structs, self.list4()) {
            (Some(pool), Some(list)) => (pool, list),
            _ => {
                error!("update_bottom_level recorded but raytracing is disabled");
                return;
            }
        };
        let dest = accel_structs.node(cmd.dest);
        let is_update = cmd.source.is_valid();

        let mut desc: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC =
            unsafe { std::mem::zeroed() };
        desc.DestAccelerationStructureData =
            self.ctx.resources.gpu_address(dest.buffer);
        desc.ScratchAccelerationStructureData =
            self.ctx.resources.gpu_address(dest.buffer_scratch);
        desc.Inputs = Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Type: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL,
            Flags: if is_update {
                Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS(
                    dest.flags.0
                        | Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PERFORM_UPDATE.0,
                )
            } else {
                dest.flags
            },
            NumDescs: dest.geometries.len() as u32,
            DescsLayout: Direct3D12::D3D12_ELEMENTS_LAYOUT_ARRAY,
            Anonymous: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                pGeometryDescs: dest.geometries.as_ptr(),
            },
        };
        if is_update {
            desc.SourceAccelerationStructureData = self
                .ctx
                .resources
                .gpu_address(accel_structs.node(cmd.source).buffer);
        }

        unsafe {
            list4.BuildRaytracingAccelerationStructure(&desc, 0, std::ptr::null());
        }
        self.global_uav_barrier();
    }

    fn update_top_level(&mut self, cmd: &UpdateTopLevel) {
        let (accel_structs, list4) = match (self.ctx.accel_structs, self.list4()) {
            (Some(pool), Some(list)) => (pool, list),
            _ => {
                error!("update_top_level recorded but raytracing is disabled");
                return;
            }
        };
        let dest = accel_structs.node(cmd.dest_accel_struct);

        let instance_buffer = if cmd.source_buffer_instances.is_valid() {
            cmd.source_buffer_instances
        } else {
            dest.buffer_instances
        };

        let mut desc: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC =
            unsafe { std::mem::zeroed() };
        desc.DestAccelerationStructureData = self.ctx.resources.gpu_address(dest.buffer);
        desc.ScratchAccelerationStructureData =
            self.ctx.resources.gpu_address(dest.buffer_scratch);
        desc.Inputs = Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Type: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL,
            Flags: dest.flags,
            NumDescs: cmd.num_instances,
            DescsLayout: Direct3D12::D3D12_ELEMENTS_LAYOUT_ARRAY,
            Anonymous: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                InstanceDescs: self.ctx.resources.gpu_address(instance_buffer)
                    + u64::from(cmd.source_buffer_offset_bytes),
            },
        };

        unsafe {
            list4.BuildRaytracingAccelerationStructure(&desc, 0, std::ptr::null());
        }
        self.global_uav_barrier();
    }

    fn dispatch_rays(&mut self, cmd: &DispatchRays) {
        let list4 = match self.list4() {
            Some(list) => list,
            None => {
                error!("dispatch_rays recorded but raytracing is disabled");
                return;
            }
        };
        let node = self.ctx.pipelines.get(cmd.pipeline_state);
        let state_object = match &node.kind {
            PsoKind::Raytracing { state_object, .. } => state_object,
            _ => panic!("dispatch_rays with a non-raytracing pipeline"),
        };

        unsafe {
            self.list.SetComputeRootSignature(&node.root_signature);
            list4.SetPipelineState1(state_object);
        }
        self.bound.pipeline_state = cmd.pipeline_state;
        for arg in &mut self.bound.shader_args {
            arg.reset();
        }

        let address = |buffer: handle::Resource, offset: u32| {
            if buffer.is_valid() {
                self.ctx.resources.gpu_address(buffer) + u64::from(offset)
            } else {
                0
            }
        };

        let desc = Direct3D12::D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: Direct3D12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                StartAddress: address(
                    cmd.table_ray_generation.buffer,
                    cmd.table_ray_generation.offset_bytes,
                ),
                SizeInBytes: u64::from(cmd.table_ray_generation.size_bytes),
            },
            MissShaderTable: Direct3D12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: address(cmd.table_miss.buffer, cmd.table_miss.offset_bytes),
                SizeInBytes: u64::from(cmd.table_miss.size_bytes),
                StrideInBytes: u64::from(cmd.table_miss.stride_bytes),
            },
            HitGroupTable: Direct3D12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: address(cmd.table_hit_groups.buffer, cmd.table_hit_groups.offset_bytes),
                SizeInBytes: u64::from(cmd.table_hit_groups.size_bytes),
                StrideInBytes: u64::from(cmd.table_hit_groups.stride_bytes),
            },
            CallableShaderTable: Direct3D12::D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: address(cmd.table_callable.buffer, cmd.table_callable.offset_bytes),
                SizeInBytes: u64::from(cmd.table_callable.size_bytes),
                StrideInBytes: u64::from(cmd.table_callable.stride_bytes),
            },
            Width: cmd.width,
            Height: cmd.height,
            Depth: cmd.depth,
        };

        unsafe { list4.DispatchRays(&desc) };
    }

    fn clear_textures(&mut self, cmd: &ClearTextures) {
        for op in &cmd.clear_ops {
            let info = match &op.rv.info {
                ResourceViewInfo::Texture(info) => info,
                _ => panic!("clear_textures requires texture views"),
            };
            if info.pixel_format.has_depth() {
                let (slot, dest) = self.ctx.dsv_heap.allocate();
                self.transient_dsvs.push(slot);
                unsafe {
                    self.device().CreateDepthStencilView(
                        self.ctx.resources.raw(op.rv.resource),
                        std::ptr::null(),
                        dest,
                    );
                    self.list.ClearDepthStencilView(
                        dest,
                        Direct3D12::D3D12_CLEAR_FLAG_DEPTH,
                        f32::from(op.value.red_or_depth) / 255.0,
                        op.value.green_or_stencil,
                        0,
                        std::ptr::null(),
                    );
                }
            } else {
                let (slot, dest) = self.ctx.rtv_heap.allocate();
                self.transient_rtvs.push(slot);
                let color = [
                    f32::from(op.value.red_or_depth) / 255.0,
                    f32::from(op.value.green_or_stencil) / 255.0,
                    f32::from(op.value.blue) / 255.0,
                    f32::from(op.value.alpha) / 255.0,
                ];
                unsafe {
                    self.device().CreateRenderTargetView(
                        self.ctx.resources.raw(op.rv.resource),
                        std::ptr::null(),
                        dest,
                    );
                    self.list
                        .ClearRenderTargetView(dest, color.as_ptr(), 0, std::ptr::null());
                }
            }
        }
    }
}
