//! The command-list translator: walks one recorded command stream and
//! emits the corresponding native commands.
//!
//! One translator per configured thread. Render passes are opened lazily:
//! `begin_render_pass` only records its parameters, and the actual
//! VkRenderPass/VkFramebuffer pair is resolved on the first draw, when
//! the bound pipeline determines pass compatibility. Framebuffers and the
//! transient image views backing them are pinned to the command list's
//! responsible allocator and die on its next reset.

use arrayvec::ArrayVec;
use ash::vk;

use arclight_hal::commands::*;
use arclight_hal::handle;
use arclight_hal::limits::{MAX_RENDER_TARGETS, MAX_SHADER_ARGUMENTS};
use arclight_hal::stream::CommandParser;
use arclight_hal::types::{
    IndirectDrawArgs, IndirectDrawIndexedArgs, IndirectDrawIndexedWithIdArgs, ResourceState,
    ResourceViewInfo, ShaderArgument,
};

use crate::barrier::{BarrierBundle, StateChange};
use crate::conv;
use crate::pools::accel_struct::AccelStructPool;
use crate::pools::cmd_list::CommandListPool;
use crate::pools::pipeline::PipelinePool;
use crate::pools::query::QueryPool;
use crate::pools::resource::ResourcePool;
use crate::pools::shader_view::ShaderViewPool;
use crate::state_cache::IncompleteStateCache;

/// Pool access a translation run needs; all non-owning.
pub struct PoolContext<'a> {
    pub device: &'a ash::Device,
    pub resources: &'a ResourcePool,
    pub shader_views: &'a ShaderViewPool,
    pub pipelines: &'a PipelinePool,
    pub cmd_lists: &'a CommandListPool,
    pub queries: &'a QueryPool,
    pub accel_structs: Option<&'a AccelStructPool>,
    pub accel_ext: Option<&'a ash::khr::acceleration_structure::Device>,
    pub rt_ext: Option<&'a ash::khr::ray_tracing_pipeline::Device>,
    pub debug_utils: Option<&'a ash::ext::debug_utils::Device>,
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

    fn update_shader_view(&mut self, new: handle::ShaderView) -> bool {
        if self.shader_view != new {
            self.shader_view = new;
            true
        } else {
            false
        }
    }

    fn update_cbv(&mut self, new: handle::Resource, offset: u32) -> bool {
        if self.cbv != new || self.cbv_offset != offset {
            self.cbv = new;
            self.cbv_offset = offset;
            true
        } else {
            false
        }
    }
}

struct BoundState {
    pipeline_state: handle::PipelineState,
    index_buffer: handle::Resource,
    vertex_buffer: handle::Resource,
    shader_args: [BoundShaderArg; MAX_SHADER_ARGUMENTS],
    raw_render_pass: vk::RenderPass,
    raw_framebuffer: vk::Framebuffer,
    raw_pipeline_layout: vk::PipelineLayout,
    current_render_pass: BeginRenderPass,
}

impl BoundState {
    fn new() -> Self {
        BoundState {
            pipeline_state: handle::PipelineState::NULL,
            index_buffer: handle::Resource::NULL,
            vertex_buffer: handle::Resource::NULL,
            shader_args: Default::default(),
            raw_render_pass: vk::RenderPass::null(),
            raw_framebuffer: vk::Framebuffer::null(),
            raw_pipeline_layout: vk::PipelineLayout::null(),
            current_render_pass: BeginRenderPass::default(),
        }
    }

    fn update_pso(&mut self, new: handle::PipelineState) -> bool {
        if self.pipeline_state != new {
            self.pipeline_state = new;
            true
        } else {
            false
        }
    }

    /// A new pipeline layout invalidates every bound shader argument.
    fn update_pipeline_layout(&mut self, raw: vk::PipelineLayout) -> bool {
        if self.raw_pipeline_layout != raw {
            self.raw_pipeline_layout = raw;
            for arg in &mut self.shader_args {
                arg.reset();
            }
            true
        } else {
            false
        }
    }
}

/// Translates recorded command streams into native command buffers;
/// owned by exactly one thread.
pub struct CommandTranslator {
    _private: (),
}

impl CommandTranslator {
    pub fn new() -> Self {
        CommandTranslator { _private: () }
    }

    /// Translates `stream` into `raw_buffer` and closes it. Side effects
    /// land in the list's state cache.
    pub fn translate(
        &mut self,
        ctx: &PoolContext<'_>,
        list_handle: handle::CommandList,
        raw_buffer: vk::CommandBuffer,
        state_cache: &mut IncompleteStateCache,
        stream: &[u8],
    ) {
        state_cache.reset();
        let mut session = Session {
            ctx,
            list_handle,
            cmd_buf: raw_buffer,
            state_cache,
            bound: BoundState::new(),
        };

        for command in CommandParser::new(stream) {
            session.execute(&command);
        }

        if session.bound.raw_render_pass != vk::RenderPass::null() {
            unsafe { ctx.device.cmd_end_render_pass(raw_buffer) };
        }
        unsafe {
            ctx.device
                .end_command_buffer(raw_buffer)
                .expect("command buffer close failed");
        }
    }
}

struct Session<'a, 'c> {
    ctx: &'a PoolContext<'c>,
    list_handle: handle::CommandList,
    cmd_buf: vk::CommandBuffer,
    state_cache: &'a mut IncompleteStateCache,
    bound: BoundState,
}

impl<'a, 'c> Session<'a, 'c> {
    fn execute(&mut self, command: &Command) {
        match command {
            Command::BeginRenderPass(cmd) => self.begin_render_pass(cmd),
            Command::EndRenderPass(_) => self.end_render_pass(),
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
            Command::EndDebugLabel(_) => self.end_debug_label(),
            Command::UpdateBottomLevel(cmd) => self.update_bottom_level(cmd),
            Command::UpdateTopLevel(cmd) => self.update_top_level(cmd),
            Command::DispatchRays(cmd) => self.dispatch_rays(cmd),
            Command::ClearTextures(cmd) => self.clear_textures(cmd),
        }
    }

    fn begin_render_pass(&mut self, cmd: &BeginRenderPass) {
        // nothing is recorded yet; the pass opens on the first draw once
        // the pipeline determines compatibility
        self.bound.current_render_pass = cmd.clone();
    }

    fn end_render_pass(&mut self) {
        if self.bound.raw_render_pass != vk::RenderPass::null() {
            unsafe { self.ctx.device.cmd_end_render_pass(self.cmd_buf) };
            self.bound.raw_render_pass = vk::RenderPass::null();
        }
    }

    /// Resolves pass + framebuffer for the bound pipeline and opens it.
    fn bind_graphics_pso(&mut self, pso: handle::PipelineState) {
        let pso_changed = self.bound.update_pso(pso);
        // the pass must also resolve when the same pipeline draws into a
        // freshly begun render pass
        if !pso_changed && self.bound.raw_render_pass != vk::RenderPass::null() {
            return;
        }
        // a new pipeline handle invalidates (without always changing)
        // the bound layout, the bound render pass, and the pipeline
        let node = self.ctx.pipelines.get(pso);
        self.bound.update_pipeline_layout(node.layout.raw);

        let render_pass = self
            .ctx
            .pipelines
            .get_or_create_render_pass(node, &self.bound.current_render_pass);

        if render_pass != self.bound.raw_render_pass {
            if self.bound.raw_render_pass != vk::RenderPass::null() {
                unsafe { self.ctx.device.cmd_end_render_pass(self.cmd_buf) };
            }
            self.bound.raw_render_pass = render_pass;

            // fresh framebuffer over the command's render targets
            let begin = self.bound.current_render_pass.clone();
            let begin = &begin;
            let mut attachments: ArrayVec<vk::ImageView, { MAX_RENDER_TARGETS + 1 }> =
                ArrayVec::new();
            let mut transient_views: ArrayVec<vk::ImageView, { MAX_RENDER_TARGETS + 1 }> =
                ArrayVec::new();

            for rt in &begin.render_targets {
                if self.ctx.resources.is_backbuffer(rt.rv.resource) {
                    attachments.push(self.ctx.resources.backbuffer_view());
                } else {
                    let view = self
                        .ctx
                        .shader_views
                        .make_image_view(self.ctx.resources, &rt.rv, false);
                    attachments.push(view);
                    transient_views.push(view);
                }
            }
            if begin.depth_target.rv.resource.is_valid() {
                let view = self.ctx.shader_views.make_image_view(
                    self.ctx.resources,
                    &begin.depth_target.rv,
                    false,
                );
                attachments.push(view);
                transient_views.push(view);
            }

            let fb_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(begin.viewport_width.max(1))
                .height(begin.viewport_height.max(1))
                .layers(1);
            let framebuffer = unsafe {
                self.ctx
                    .device
                    .create_framebuffer(&fb_info, None)
                    .expect("framebuffer creation failed")
            };
            self.bound.raw_framebuffer = framebuffer;
            self.ctx
                .cmd_lists
                .add_associated_framebuffer(self.list_handle, framebuffer, &transient_views);

            // clear values in attachment order
            let mut clear_values: ArrayVec<vk::ClearValue, { MAX_RENDER_TARGETS + 1 }> =
                ArrayVec::new();
            for rt in &begin.render_targets {
                clear_values.push(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: rt.clear_value,
                    },
                });
            }
            if begin.depth_target.rv.resource.is_valid() {
                clear_values.push(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: begin.depth_target.clear_value_depth,
                        stencil: u32::from(begin.depth_target.clear_value_stencil),
                    },
                });
            }

            // flipped viewport so client-space matches the D3D12 backend
            let viewport = vk::Viewport {
                x: begin.viewport_offset_x as f32,
                y: (begin.viewport_offset_y + begin.viewport_height as i32) as f32,
                width: begin.viewport_width as f32,
                height: -(begin.viewport_height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D {
                    x: begin.viewport_offset_x,
                    y: begin.viewport_offset_y,
                },
                extent: vk::Extent2D {
                    width: begin.viewport_width,
                    height: begin.viewport_height,
                },
            };

            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(scissor)
                .clear_values(&clear_values);

            unsafe {
                self.ctx.device.cmd_set_viewport(self.cmd_buf, 0, &[viewport]);
                self.ctx.device.cmd_set_scissor(self.cmd_buf, 0, &[scissor]);
                self.ctx.device.cmd_begin_render_pass(
                    self.cmd_buf,
                    &begin_info,
                    vk::SubpassContents::INLINE,
                );
            }
        }

        let node = self.ctx.pipelines.get(pso);
        unsafe {
            self.ctx.device.cmd_bind_pipeline(
                self.cmd_buf,
                vk::PipelineBindPoint::GRAPHICS,
                node.raw_pipeline,
            );
        }
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
                unsafe {
                    self.ctx.device.cmd_bind_index_buffer(
                        self.cmd_buf,
                        info.raw,
                        0,
                        conv::index_type(info.stride),
                    );
                }
            }
        }
        if vertex_buffer != self.bound.vertex_buffer {
            self.bound.vertex_buffer = vertex_buffer;
            if vertex_buffer.is_valid() {
                let raw = self.ctx.resources.raw_buffer(vertex_buffer);
                unsafe {
                    self.ctx
                        .device
                        .cmd_bind_vertex_buffers(self.cmd_buf, 0, &[raw], &[0]);
                }
            }
        }
    }

    fn bind_shader_arguments(
        &mut self,
        pso: handle::PipelineState,
        root_constants: &[u8],
        args: &[ShaderArgument],
        bind_point: vk::PipelineBindPoint,
    ) {
        let node = self.ctx.pipelines.get(pso);
        let layout = &node.layout;

        if layout.has_push_constants() {
            unsafe {
                self.ctx.device.cmd_push_constants(
                    self.cmd_buf,
                    layout.raw,
                    layout.push_constant_stages,
                    0,
                    root_constants,
                );
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let bound_arg = &mut self.bound.shader_args[i];

            if arg.constant_buffer.is_valid()
                && bound_arg.update_cbv(arg.constant_buffer, arg.constant_buffer_offset)
            {
                let buffer_info = self.ctx.resources.buffer_info(arg.constant_buffer);
                let set = if bind_point == vk::PipelineBindPoint::COMPUTE {
                    buffer_info.cbv_set_compute
                } else {
                    buffer_info.cbv_set
                };
                assert!(
                    set != vk::DescriptorSet::null(),
                    "buffer bound as CBV but too large to qualify"
                );
                unsafe {
                    self.ctx.device.cmd_bind_descriptor_sets(
                        self.cmd_buf,
                        bind_point,
                        layout.raw,
                        (i + MAX_SHADER_ARGUMENTS) as u32,
                        &[set],
                        &[arg.constant_buffer_offset],
                    );
                }
            }

            if bound_arg.update_shader_view(arg.shader_view) && arg.shader_view.is_valid() {
                let set = self.ctx.shader_views.descriptor_set(arg.shader_view);
                unsafe {
                    self.ctx.device.cmd_bind_descriptor_sets(
                        self.cmd_buf,
                        bind_point,
                        layout.raw,
                        i as u32,
                        &[set],
                        &[],
                    );
                }
            }
        }
    }

    fn draw(&mut self, cmd: &Draw) {
        self.bind_graphics_pso(cmd.pipeline_state);
        self.bind_vertex_index_buffers(cmd.vertex_buffer, cmd.index_buffer);
        self.bind_shader_arguments(
            cmd.pipeline_state,
            &cmd.root_constants,
            &cmd.shader_arguments,
            vk::PipelineBindPoint::GRAPHICS,
        );

        if cmd.scissor.is_set() {
            let rect = vk::Rect2D {
                offset: vk::Offset2D {
                    x: cmd.scissor.left,
                    y: cmd.scissor.top,
                },
                extent: vk::Extent2D {
                    width: (cmd.scissor.right - cmd.scissor.left) as u32,
                    height: (cmd.scissor.bottom - cmd.scissor.top) as u32,
                },
            };
            unsafe { self.ctx.device.cmd_set_scissor(self.cmd_buf, 0, &[rect]) };
        }

        unsafe {
            if cmd.index_buffer.is_valid() {
                self.ctx.device.cmd_draw_indexed(
                    self.cmd_buf,
                    cmd.num_indices,
                    1,
                    cmd.index_offset,
                    cmd.vertex_offset as i32,
                    0,
                );
            } else {
                self.ctx
                    .device
                    .cmd_draw(self.cmd_buf, cmd.num_indices, 1, cmd.vertex_offset, 0);
            }
        }
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) {
        self.bind_graphics_pso(cmd.pipeline_state);
        self.bind_vertex_index_buffers(cmd.vertex_buffer, cmd.index_buffer);
        self.bind_shader_arguments(
            cmd.pipeline_state,
            &cmd.root_constants,
            &cmd.shader_arguments,
            vk::PipelineBindPoint::GRAPHICS,
        );

        let buffer = self.ctx.resources.raw_buffer(cmd.argument_buffer);
        let offset = u64::from(cmd.argument_buffer_offset_bytes);
        unsafe {
            match cmd.command_type {
                IndirectCommandType::Draw => self.ctx.device.cmd_draw_indirect(
                    self.cmd_buf,
                    buffer,
                    offset,
                    cmd.num_arguments,
                    std::mem::size_of::<IndirectDrawArgs>() as u32,
                ),
                IndirectCommandType::DrawIndexed => self.ctx.device.cmd_draw_indexed_indirect(
                    self.cmd_buf,
                    buffer,
                    offset,
                    cmd.num_arguments,
                    std::mem::size_of::<IndirectDrawIndexedArgs>() as u32,
                ),
                // the leading draw id is skipped per record; Vulkan
                // retrieves it from first_instance instead
                IndirectCommandType::DrawIndexedWithId => {
                    self.ctx.device.cmd_draw_indexed_indirect(
                        self.cmd_buf,
                        buffer,
                        offset + 4,
                        cmd.num_arguments,
                        std::mem::size_of::<IndirectDrawIndexedWithIdArgs>() as u32,
                    )
                }
            }
        }
    }

    fn dispatch(&mut self, cmd: &Dispatch) {
        let node = self.ctx.pipelines.get(cmd.pipeline_state);
        if self.bound.update_pso(cmd.pipeline_state) {
            self.bound.update_pipeline_layout(node.layout.raw);
            unsafe {
                self.ctx.device.cmd_bind_pipeline(
                    self.cmd_buf,
                    vk::PipelineBindPoint::COMPUTE,
                    node.raw_pipeline,
                );
            }
        }
        self.bind_shader_arguments(
            cmd.pipeline_state,
            &cmd.root_constants,
            &cmd.shader_arguments,
            vk::PipelineBindPoint::COMPUTE,
        );
        unsafe {
            self.ctx
                .device
                .cmd_dispatch(self.cmd_buf, cmd.dispatch_x, cmd.dispatch_y, cmd.dispatch_z);
        }
    }

    fn transition_resources(&mut self, cmd: &TransitionResources) {
        // barriers must not happen inside an active render pass; render
        // passes themselves expect targets pre-transitioned
        assert!(
            self.bound.raw_render_pass == vk::RenderPass::null(),
            "resource transitions are not allowed during render passes"
        );

        let mut barriers = BarrierBundle::new();
        for transition in &cmd.transitions {
            let after_dep = conv::pipeline_stage_dependency(
                transition.target_state,
                conv::shader_stages_to_pipeline_stages(transition.dependent_shaders),
            );
            assert!(
                !after_dep.is_empty(),
                "transition to a CBV/SRV/UAV state must name its dependent shaders"
            );

            let before = self.state_cache.transition_resource(
                transition.resource,
                transition.target_state,
                after_dep,
            );

            if let Some((before_state, before_dep)) = before {
                if before_state != transition.target_state {
                    // neither the implicit initial transition nor redundant
                    let change = StateChange::new(
                        before_state,
                        transition.target_state,
                        before_dep,
                        after_dep,
                    );
                    if self.ctx.resources.is_image(transition.resource) {
                        let info = self.ctx.resources.image_info(transition.resource);
                        barriers.add_image_barrier(
                            info.raw,
                            change,
                            conv::image_aspect(info.pixel_format),
                        );
                    } else {
                        let info = self.ctx.resources.buffer_info(transition.resource);
                        barriers.add_buffer_barrier(info.raw, change, info.width);
                    }
                }
            }
        }
        barriers.record(self.ctx.device, self.cmd_buf);
    }

    fn transition_image_slices(&mut self, cmd: &TransitionImageSlices) {
        // fully explicit; master state is untouched since it cannot
        // describe per-subresource states
        let mut barriers = BarrierBundle::new();
        for transition in &cmd.transitions {
            let change = StateChange::new(
                transition.source_state,
                transition.target_state,
                conv::shader_stages_to_pipeline_stages(transition.source_dependencies),
                conv::shader_stages_to_pipeline_stages(transition.target_dependencies),
            );
            assert!(self.ctx.resources.is_image(transition.resource));
            let info = self.ctx.resources.image_info(transition.resource);
            barriers.add_image_barrier_slice(
                info.raw,
                change,
                conv::image_aspect(info.pixel_format),
                transition.mip_level,
                transition.array_slice,
            );
        }
        barriers.record(self.ctx.device, self.cmd_buf);
    }

    fn barrier_uav(&mut self, cmd: &BarrierUav) {
        if cmd.resources.is_empty() {
            return;
        }
        let mut barriers = BarrierBundle::new();
        let stages = vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER;
        barriers.add_memory_barrier(
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            stages,
            stages,
        );
        barriers.record(self.ctx.device, self.cmd_buf);
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) {
        let region = vk::BufferCopy {
            src_offset: cmd.source_offset_bytes,
            dst_offset: cmd.dest_offset_bytes,
            size: cmd.size_bytes,
        };
        unsafe {
            self.ctx.device.cmd_copy_buffer(
                self.cmd_buf,
                self.ctx.resources.raw_buffer(cmd.source),
                self.ctx.resources.raw_buffer(cmd.destination),
                &[region],
            );
        }
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) {
        let src = self.ctx.resources.image_info(cmd.source);
        let dest = self.ctx.resources.image_info(cmd.destination);
        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: conv::image_aspect(src.pixel_format),
                mip_level: cmd.src_mip_index,
                base_array_layer: cmd.src_array_index,
                layer_count: cmd.num_array_slices,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: conv::image_aspect(dest.pixel_format),
                mip_level: cmd.dest_mip_index,
                base_array_layer: cmd.dest_array_index,
                layer_count: cmd.num_array_slices,
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: cmd.width,
                height: cmd.height,
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device.cmd_copy_image(
                self.cmd_buf,
                src.raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dest.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn copy_buffer_to_texture(&mut self, cmd: &CopyBufferToTexture) {
        let dest = self.ctx.resources.image_info(cmd.destination);
        let region = vk::BufferImageCopy {
            buffer_offset: cmd.source_offset_bytes,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: conv::image_aspect(dest.pixel_format),
                mip_level: cmd.dest_mip_index,
                base_array_layer: cmd.dest_array_index,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: cmd.dest_width,
                height: cmd.dest_height,
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device.cmd_copy_buffer_to_image(
                self.cmd_buf,
                self.ctx.resources.raw_buffer(cmd.source),
                dest.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) {
        let src = self.ctx.resources.image_info(cmd.source);
        let region = vk::BufferImageCopy {
            buffer_offset: cmd.dest_offset_bytes,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: conv::image_aspect(src.pixel_format),
                mip_level: cmd.src_mip_index,
                base_array_layer: cmd.src_array_index,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: cmd.src_width,
                height: cmd.src_height,
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device.cmd_copy_image_to_buffer(
                self.cmd_buf,
                src.raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.ctx.resources.raw_buffer(cmd.destination),
                &[region],
            );
        }
    }

    fn resolve_texture(&mut self, cmd: &ResolveTexture) {
        let src = self.ctx.resources.image_info(cmd.source);
        let dest = self.ctx.resources.image_info(cmd.destination);
        let aspect = if dest.pixel_format.has_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let region = vk::ImageResolve {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: cmd.src_mip_index,
                base_array_layer: cmd.src_array_index,
                layer_count: 1,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: cmd.dest_mip_index,
                base_array_layer: cmd.dest_array_index,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: cmd.width,
                height: cmd.height,
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device.cmd_resolve_image(
                self.cmd_buf,
                src.raw,
                conv::image_layout(ResourceState::ResolveSrc),
                dest.raw,
                conv::image_layout(ResourceState::ResolveDest),
                &[region],
            );
        }
    }

    fn write_timestamp(&mut self, cmd: &WriteTimestamp) {
        let (heap, index, _) = self.ctx.queries.query(cmd.query_range, cmd.index);
        unsafe {
            self.ctx.device.cmd_write_timestamp(
                self.cmd_buf,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                heap,
                index,
            );
        }
    }

    fn resolve_queries(&mut self, cmd: &ResolveQueries) {
        let (heap, first, _) = self.ctx.queries.query(cmd.src_query_range, cmd.query_start);
        let buffer = self.ctx.resources.raw_buffer(cmd.dest_buffer);
        unsafe {
            self.ctx.device.cmd_copy_query_pool_results(
                self.cmd_buf,
                heap,
                first,
                cmd.num_queries,
                buffer,
                u64::from(cmd.dest_offset_bytes),
                std::mem::size_of::<u64>() as u64,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }
    }

    fn begin_debug_label(&mut self, cmd: &BeginDebugLabel) {
        if let Some(debug_utils) = self.ctx.debug_utils {
            let mut bytes = cmd.text[..usize::from(cmd.text_len)].to_vec();
            bytes.push(0);
            if let Ok(name) = std::ffi::CStr::from_bytes_with_nul(&bytes) {
                let label = vk::DebugUtilsLabelEXT::default().label_name(name);
                unsafe { debug_utils.cmd_begin_debug_utils_label(self.cmd_buf, &label) };
            }
        }
    }

    fn end_debug_label(&mut self) {
        if let Some(debug_utils) = self.ctx.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.cmd_buf) };
        }
    }

    fn accel_build_barrier(&self) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(
                vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            )
            .dst_access_mask(
                vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            );
        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                self.cmd_buf,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn update_bottom_level(&mut self, cmd: &UpdateBottomLevel) {
        let (accel_structs, accel_ext) = match (self.ctx.accel_structs, self.ctx.accel_ext) {
            (Some(pool), Some(ext)) => (pool, ext),
            _ => {
                error!("update_bottom_level recorded but raytracing is disabled");
                return;
            }
        };
        let dest = accel_structs.node(cmd.dest);
        let is_update = cmd.source.is_valid();

        let scratch_address = self.ctx.resources.buffer_device_address(dest.buffer_scratch);
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(dest.flags)
            .mode(if is_update {
                vk::BuildAccelerationStructureModeKHR::UPDATE
            } else {
                vk::BuildAccelerationStructureModeKHR::BUILD
            })
            .dst_acceleration_structure(dest.raw)
            .geometries(&dest.geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });
        if is_update {
            build_info =
                build_info.src_acceleration_structure(accel_structs.raw_accel_struct(cmd.source));
        }

        let ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR> = dest
            .primitive_counts
            .iter()
            .map(|&count| {
                vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(count)
            })
            .collect();

        unsafe {
            accel_ext.cmd_build_acceleration_structures(self.cmd_buf, &[build_info], &[&ranges]);
        }
        self.accel_build_barrier();
    }

    fn update_top_level(&mut self, cmd: &UpdateTopLevel) {
        let (accel_structs, accel_ext) = match (self.ctx.accel_structs, self.ctx.accel_ext) {
            (Some(pool), Some(ext)) => (pool, ext),
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
        let instance_address = self.ctx.resources.buffer_device_address(instance_buffer)
            + u64::from(cmd.source_buffer_offset_bytes);

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_address,
            });
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            });

        let scratch_address = self.ctx.resources.buffer_device_address(dest.buffer_scratch);
        let geometries = [geometry];
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(dest.flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(dest.raw)
            .geometries(&geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });

        let ranges = [vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(cmd.num_instances)];

        unsafe {
            accel_ext.cmd_build_acceleration_structures(self.cmd_buf, &[build_info], &[&ranges]);
        }
        self.accel_build_barrier();
    }

    fn dispatch_rays(&mut self, cmd: &DispatchRays) {
        let rt_ext = match self.ctx.rt_ext {
            Some(ext) => ext,
            None => {
                error!("dispatch_rays recorded but raytracing is disabled");
                return;
            }
        };

        let node = self.ctx.pipelines.get(cmd.pipeline_state);
        if self.bound.update_pso(cmd.pipeline_state) {
            self.bound.update_pipeline_layout(node.layout.raw);
            unsafe {
                self.ctx.device.cmd_bind_pipeline(
                    self.cmd_buf,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    node.raw_pipeline,
                );
            }
        }

        let region = |buffer: handle::Resource, offset: u32, size: u32, stride: u32| {
            if buffer.is_valid() {
                vk::StridedDeviceAddressRegionKHR {
                    device_address: self.ctx.resources.buffer_device_address(buffer)
                        + u64::from(offset),
                    stride: u64::from(stride),
                    size: u64::from(size),
                }
            } else {
                vk::StridedDeviceAddressRegionKHR::default()
            }
        };

        let ray_gen = region(
            cmd.table_ray_generation.buffer,
            cmd.table_ray_generation.offset_bytes,
            cmd.table_ray_generation.size_bytes,
            cmd.table_ray_generation.size_bytes,
        );
        let miss = region(
            cmd.table_miss.buffer,
            cmd.table_miss.offset_bytes,
            cmd.table_miss.size_bytes,
            cmd.table_miss.stride_bytes,
        );
        let hit = region(
            cmd.table_hit_groups.buffer,
            cmd.table_hit_groups.offset_bytes,
            cmd.table_hit_groups.size_bytes,
            cmd.table_hit_groups.stride_bytes,
        );
        let callable = region(
            cmd.table_callable.buffer,
            cmd.table_callable.offset_bytes,
            cmd.table_callable.size_bytes,
            cmd.table_callable.stride_bytes,
        );

        unsafe {
            rt_ext.cmd_trace_rays(
                self.cmd_buf,
                &ray_gen,
                &miss,
                &hit,
                &callable,
                cmd.width,
                cmd.height,
                cmd.depth,
            );
        }
    }

    fn clear_textures(&mut self, cmd: &ClearTextures) {
        assert!(
            self.bound.raw_render_pass == vk::RenderPass::null(),
            "standalone clears are not allowed during render passes"
        );
        for op in &cmd.clear_ops {
            let info = self.ctx.resources.image_info(op.rv.resource);
            let texture_info = match &op.rv.info {
                ResourceViewInfo::Texture(t) => t,
                _ => panic!("clear_textures requires texture views"),
            };
            let range = vk::ImageSubresourceRange::default()
                .aspect_mask(conv::image_aspect(texture_info.pixel_format))
                .base_mip_level(texture_info.mip_start)
                .level_count(1)
                .base_array_layer(texture_info.array_start)
                .layer_count(texture_info.array_size.max(1));

            unsafe {
                if texture_info.pixel_format.has_depth() {
                    let value = vk::ClearDepthStencilValue {
                        depth: f32::from(op.value.red_or_depth) / 255.0,
                        stencil: u32::from(op.value.green_or_stencil),
                    };
                    self.ctx.device.cmd_clear_depth_stencil_image(
                        self.cmd_buf,
                        info.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        &[range],
                    );
                } else {
                    let value = vk::ClearColorValue {
                        float32: [
                            f32::from(op.value.red_or_depth) / 255.0,
                            f32::from(op.value.green_or_stencil) / 255.0,
                            f32::from(op.value.blue) / 255.0,
                            f32::from(op.value.alpha) / 255.0,
                        ],
                    };
                    self.ctx.device.cmd_clear_color_image(
                        self.cmd_buf,
                        info.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        &[range],
                    );
                }
            }
        }
    }
}
