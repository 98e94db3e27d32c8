//! The closed set of commands a command stream can carry.
//!
//! Every command is a plain-data record: trivially copyable, self-contained
//! (all embedded collections have fixed capacities) and free of heap
//! references, so a record can live in a raw byte stream. On the wire each
//! record is preceded by its one-byte [`CommandTag`]; see [`crate::stream`].

use arrayvec::ArrayVec;

use crate::handle;
use crate::limits;
use crate::types::{
    BufferRange, BufferRangeAndStride, ResourceView, RtClearType, RtClearValue, ShaderArgument,
    ShaderStageFlags, SliceTransitionInfo, TransitionInfo,
};

/// Maximum bytes of an inline debug-label string.
pub const MAX_DEBUG_LABEL_BYTES: usize = 64;

/// Maximum standalone texture clears per [`ClearTextures`] command.
pub const MAX_CLEAR_TEXTURES: usize = 4;

/// A scissor rectangle in absolute pixels; `left == -1` means "unset".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub const UNSET: ScissorRect = ScissorRect {
        left: -1,
        top: -1,
        right: -1,
        bottom: -1,
    };

    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        ScissorRect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_set(&self) -> bool {
        self.left != -1
    }
}

impl Default for ScissorRect {
    fn default() -> Self {
        ScissorRect::UNSET
    }
}

/// A color target bound by [`BeginRenderPass`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderTargetBegin {
    pub rv: ResourceView,
    pub clear_value: [f32; 4],
    pub clear_type: RtClearType,
}

/// The depth-stencil target bound by [`BeginRenderPass`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthStencilBegin {
    pub rv: ResourceView,
    pub clear_value_depth: f32,
    pub clear_value_stencil: u8,
    pub clear_type: RtClearType,
}

impl Default for DepthStencilBegin {
    fn default() -> Self {
        DepthStencilBegin {
            rv: ResourceView::null(),
            clear_value_depth: 1.0,
            clear_value_stencil: 0,
            clear_type: RtClearType::Clear,
        }
    }
}

/// Opens a render pass over up to 8 color targets and an optional depth
/// target. Render targets must already be in the render-target state and
/// depth targets in the depth-write state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeginRenderPass {
    pub render_targets: ArrayVec<RenderTargetBegin, { limits::MAX_RENDER_TARGETS }>,
    pub depth_target: DepthStencilBegin,
    /// Viewport dimensions being rendered to, in pixels.
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Offset of the viewport from the top-left corner, in pixels.
    pub viewport_offset_x: i32,
    pub viewport_offset_y: i32,
}

impl BeginRenderPass {
    /// Binds the acquired backbuffer as the single render target.
    pub fn add_backbuffer(&mut self, resource: handle::Resource, clear: bool) {
        self.render_targets.push(RenderTargetBegin {
            rv: ResourceView::backbuffer(resource),
            clear_value: [0.0, 0.0, 0.0, 1.0],
            clear_type: if clear { RtClearType::Clear } else { RtClearType::Load },
        });
    }

    pub fn add_2d_rt(
        &mut self,
        resource: handle::Resource,
        format: crate::format::Format,
        clear_type: RtClearType,
    ) {
        self.render_targets.push(RenderTargetBegin {
            rv: ResourceView::tex2d(resource, format),
            clear_value: [0.0, 0.0, 0.0, 1.0],
            clear_type,
        });
    }

    pub fn set_2d_depth_stencil(
        &mut self,
        resource: handle::Resource,
        format: crate::format::Format,
        clear_type: RtClearType,
    ) {
        self.depth_target = DepthStencilBegin {
            rv: ResourceView::tex2d(resource, format),
            clear_value_depth: 1.0,
            clear_value_stencil: 0,
            clear_type,
        };
    }
}

/// Closes the currently open render pass.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EndRenderPass;

/// Transitions resources into new states, naming only the target state.
///
/// The before-state is tracked internally and is submit-order safe: the
/// first transition of each resource in a command list is implicit and
/// synthesized last-minute at submission, so the resource is in that state
/// from the very start of the list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransitionResources {
    pub transitions: ArrayVec<TransitionInfo, { limits::MAX_RESOURCE_TRANSITIONS }>,
}

impl TransitionResources {
    /// Adds a barrier moving `resource` into `target`. When the target
    /// state is a CBV/SRV/UAV state, `dependent_shaders` must name the
    /// union of shaders consuming the resource next (may be empty on
    /// D3D12).
    pub fn add(
        &mut self,
        resource: handle::Resource,
        target_state: crate::types::ResourceState,
        dependent_shaders: ShaderStageFlags,
    ) {
        self.transitions.push(TransitionInfo {
            resource,
            target_state,
            dependent_shaders,
        });
    }
}

/// Fully explicit transitions of single image subresources. The caller
/// supplies both source and target states; master state is not touched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransitionImageSlices {
    pub transitions: ArrayVec<SliceTransitionInfo, { limits::MAX_RESOURCE_TRANSITIONS }>,
}

/// Explicit UAV barriers on the listed resources.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BarrierUav {
    pub resources: ArrayVec<handle::Resource, { limits::MAX_UAV_BARRIERS }>,
}

/// A direct draw, indexed when `index_buffer` is valid.
#[derive(Clone, Debug, PartialEq)]
pub struct Draw {
    pub root_constants: [u8; limits::MAX_ROOT_CONSTANT_BYTES],
    pub shader_arguments: ArrayVec<ShaderArgument, { limits::MAX_SHADER_ARGUMENTS }>,
    pub pipeline_state: handle::PipelineState,
    /// Optional.
    pub vertex_buffer: handle::Resource,
    /// Optional; switches the draw to indexed.
    pub index_buffer: handle::Resource,
    /// Index count for indexed draws, vertex count otherwise.
    pub num_indices: u32,
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub scissor: ScissorRect,
}

impl Default for Draw {
    fn default() -> Self {
        Draw {
            root_constants: [0; limits::MAX_ROOT_CONSTANT_BYTES],
            shader_arguments: ArrayVec::new(),
            pipeline_state: handle::PipelineState::NULL,
            vertex_buffer: handle::Resource::NULL,
            index_buffer: handle::Resource::NULL,
            num_indices: 0,
            index_offset: 0,
            vertex_offset: 0,
            scissor: ScissorRect::UNSET,
        }
    }
}

impl Draw {
    pub fn new(pipeline_state: handle::PipelineState, num_indices: u32) -> Self {
        Draw {
            pipeline_state,
            num_indices,
            ..Default::default()
        }
    }

    pub fn add_shader_arg(
        &mut self,
        constant_buffer: handle::Resource,
        constant_buffer_offset: u32,
        shader_view: handle::ShaderView,
    ) {
        self.shader_arguments.push(ShaderArgument {
            constant_buffer,
            constant_buffer_offset,
            shader_view,
        });
    }

    pub fn write_root_constants<T: Copy>(&mut self, data: &T) {
        write_root_constants(&mut self.root_constants, data);
    }
}

/// The record layout of the indirect argument buffer.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndirectCommandType {
    /// [`crate::types::IndirectDrawArgs`] records.
    Draw,
    /// [`crate::types::IndirectDrawIndexedArgs`] records.
    DrawIndexed,
    /// [`crate::types::IndirectDrawIndexedWithIdArgs`] records.
    DrawIndexedWithId,
}

/// Draws `num_arguments` records read from an indirect argument buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawIndirect {
    pub root_constants: [u8; limits::MAX_ROOT_CONSTANT_BYTES],
    pub shader_arguments: ArrayVec<ShaderArgument, { limits::MAX_SHADER_ARGUMENTS }>,
    pub pipeline_state: handle::PipelineState,
    pub argument_buffer: handle::Resource,
    pub argument_buffer_offset_bytes: u32,
    pub num_arguments: u32,
    pub command_type: IndirectCommandType,
    /// Optional.
    pub vertex_buffer: handle::Resource,
    /// Optional; required for the indexed command types.
    pub index_buffer: handle::Resource,
}

impl Default for DrawIndirect {
    fn default() -> Self {
        DrawIndirect {
            root_constants: [0; limits::MAX_ROOT_CONSTANT_BYTES],
            shader_arguments: ArrayVec::new(),
            pipeline_state: handle::PipelineState::NULL,
            argument_buffer: handle::Resource::NULL,
            argument_buffer_offset_bytes: 0,
            num_arguments: 0,
            command_type: IndirectCommandType::Draw,
            vertex_buffer: handle::Resource::NULL,
            index_buffer: handle::Resource::NULL,
        }
    }
}

/// A compute dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub root_constants: [u8; limits::MAX_ROOT_CONSTANT_BYTES],
    pub shader_arguments: ArrayVec<ShaderArgument, { limits::MAX_SHADER_ARGUMENTS }>,
    pub pipeline_state: handle::PipelineState,
    pub dispatch_x: u32,
    pub dispatch_y: u32,
    pub dispatch_z: u32,
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch {
            root_constants: [0; limits::MAX_ROOT_CONSTANT_BYTES],
            shader_arguments: ArrayVec::new(),
            pipeline_state: handle::PipelineState::NULL,
            dispatch_x: 0,
            dispatch_y: 0,
            dispatch_z: 0,
        }
    }
}

impl Dispatch {
    pub fn new(pipeline_state: handle::PipelineState, x: u32, y: u32, z: u32) -> Self {
        Dispatch {
            pipeline_state,
            dispatch_x: x,
            dispatch_y: y,
            dispatch_z: z,
            ..Default::default()
        }
    }

    pub fn add_shader_arg(
        &mut self,
        constant_buffer: handle::Resource,
        constant_buffer_offset: u32,
        shader_view: handle::ShaderView,
    ) {
        self.shader_arguments.push(ShaderArgument {
            constant_buffer,
            constant_buffer_offset,
            shader_view,
        });
    }

    pub fn write_root_constants<T: Copy>(&mut self, data: &T) {
        write_root_constants(&mut self.root_constants, data);
    }
}

/// Copies a byte range between two buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyBuffer {
    pub source: handle::Resource,
    pub destination: handle::Resource,
    pub source_offset_bytes: u64,
    pub dest_offset_bytes: u64,
    pub size_bytes: u64,
}

/// Copies between equally-sized texture subresources.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyTexture {
    pub source: handle::Resource,
    pub destination: handle::Resource,
    pub src_mip_index: u32,
    /// First source array element.
    pub src_array_index: u32,
    pub dest_mip_index: u32,
    pub dest_array_index: u32,
    /// Extents of the destination subresource.
    pub width: u32,
    pub height: u32,
    pub num_array_slices: u32,
}

/// Copies buffer contents into one texture subresource.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyBufferToTexture {
    pub source: handle::Resource,
    pub destination: handle::Resource,
    pub source_offset_bytes: u64,
    pub dest_width: u32,
    pub dest_height: u32,
    pub dest_mip_index: u32,
    pub dest_array_index: u32,
}

/// Copies one texture subresource into a buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CopyTextureToBuffer {
    pub source: handle::Resource,
    pub destination: handle::Resource,
    pub dest_offset_bytes: u64,
    pub src_width: u32,
    pub src_height: u32,
    pub src_mip_index: u32,
    pub src_array_index: u32,
}

/// Resolves a multisampled texture into a non-multisampled one.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ResolveTexture {
    pub source: handle::Resource,
    pub destination: handle::Resource,
    pub src_mip_index: u32,
    pub src_array_index: u32,
    pub dest_mip_index: u32,
    pub dest_array_index: u32,
    /// Destination extents; ignored on D3D12.
    pub width: u32,
    pub height: u32,
}

/// Writes a timestamp into one element of a timestamp query range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WriteTimestamp {
    pub query_range: handle::QueryRange,
    /// Element within the query range.
    pub index: u32,
}

impl Default for WriteTimestamp {
    fn default() -> Self {
        WriteTimestamp {
            query_range: handle::QueryRange::NULL,
            index: 0,
        }
    }
}

/// Reads back `num_queries` contiguous queries into a buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResolveQueries {
    pub dest_buffer: handle::Resource,
    pub src_query_range: handle::QueryRange,
    /// First element within the query range.
    pub query_start: u32,
    pub num_queries: u32,
    pub dest_offset_bytes: u32,
}

impl Default for ResolveQueries {
    fn default() -> Self {
        ResolveQueries {
            dest_buffer: handle::Resource::NULL,
            src_query_range: handle::QueryRange::NULL,
            query_start: 0,
            num_queries: 1,
            dest_offset_bytes: 0,
        }
    }
}

/// Opens a debug label region for diagnostic tools (RenderDoc, NSight,
/// PIX). Close with [`EndDebugLabel`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BeginDebugLabel {
    pub text: [u8; MAX_DEBUG_LABEL_BYTES],
    pub text_len: u8,
}

impl Default for BeginDebugLabel {
    fn default() -> Self {
        BeginDebugLabel {
            text: [0; MAX_DEBUG_LABEL_BYTES],
            text_len: 0,
        }
    }
}

impl BeginDebugLabel {
    /// Stores up to [`MAX_DEBUG_LABEL_BYTES`] of `label` inline.
    pub fn new(label: &str) -> Self {
        let mut cmd = Self::default();
        let len = label.len().min(MAX_DEBUG_LABEL_BYTES);
        cmd.text[..len].copy_from_slice(&label.as_bytes()[..len]);
        cmd.text_len = len as u8;
        cmd
    }

    pub fn label(&self) -> &str {
        std::str::from_utf8(&self.text[..usize::from(self.text_len)]).unwrap_or("")
    }
}

/// Closes the innermost debug label region.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EndDebugLabel;

/// Builds or updates a bottom-level acceleration structure.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UpdateBottomLevel {
    pub dest: handle::AccelStruct,
    /// Optional update source; requires `ALLOW_UPDATE` on `dest` and may
    /// equal `dest` for an in-place update.
    pub source: handle::AccelStruct,
}

impl Default for UpdateBottomLevel {
    fn default() -> Self {
        UpdateBottomLevel {
            dest: handle::AccelStruct::NULL,
            source: handle::AccelStruct::NULL,
        }
    }
}

/// Builds or updates a top-level acceleration structure from an array of
/// [`crate::types::AccelStructInstance`] records in a GPU buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UpdateTopLevel {
    pub num_instances: u32,
    pub source_buffer_instances: handle::Resource,
    pub source_buffer_offset_bytes: u32,
    pub dest_accel_struct: handle::AccelStruct,
}

impl Default for UpdateTopLevel {
    fn default() -> Self {
        UpdateTopLevel {
            num_instances: 0,
            source_buffer_instances: handle::Resource::NULL,
            source_buffer_offset_bytes: 0,
            dest_accel_struct: handle::AccelStruct::NULL,
        }
    }
}

/// Dispatches rays through a raytracing pipeline and its shader tables.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DispatchRays {
    pub pipeline_state: handle::PipelineState,
    pub table_ray_generation: BufferRange,
    pub table_miss: BufferRangeAndStride,
    pub table_hit_groups: BufferRangeAndStride,
    /// Optional.
    pub table_callable: BufferRangeAndStride,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for DispatchRays {
    fn default() -> Self {
        DispatchRays {
            pipeline_state: handle::PipelineState::NULL,
            table_ray_generation: BufferRange::default(),
            table_miss: BufferRangeAndStride::default(),
            table_hit_groups: BufferRangeAndStride::default(),
            table_callable: BufferRangeAndStride::default(),
            width: 1,
            height: 1,
            depth: 1,
        }
    }
}

impl DispatchRays {
    /// Copies the strides returned by shader-table size calculation.
    pub fn set_strides(&mut self, strides: &crate::types::ShaderTableStrides) {
        self.table_ray_generation.size_bytes = strides.size_ray_gen;
        self.table_miss.stride_bytes = strides.stride_miss;
        self.table_miss.size_bytes = strides.size_miss;
        self.table_hit_groups.stride_bytes = strides.stride_hit_group;
        self.table_hit_groups.size_bytes = strides.size_hit_group;
        self.table_callable.stride_bytes = strides.stride_callable;
        self.table_callable.size_bytes = strides.size_callable;
    }

    /// Points every table section at the same backing buffer.
    pub fn set_single_buffer(&mut self, shader_table: handle::Resource, include_callable: bool) {
        self.table_ray_generation.buffer = shader_table;
        self.table_miss.buffer = shader_table;
        self.table_hit_groups.buffer = shader_table;
        if include_callable {
            self.table_callable.buffer = shader_table;
        }
    }

    pub fn set_offsets(&mut self, ray_gen: u32, miss: u32, hit_group: u32, callable: u32) {
        self.table_ray_generation.offset_bytes = ray_gen;
        self.table_miss.offset_bytes = miss;
        self.table_hit_groups.offset_bytes = hit_group;
        self.table_callable.offset_bytes = callable;
    }
}

/// A standalone clear of one texture subresource range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClearTextureInfo {
    pub rv: ResourceView,
    pub value: RtClearValue,
}

/// Clears up to four textures outside of a render pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClearTextures {
    pub clear_ops: ArrayVec<ClearTextureInfo, MAX_CLEAR_TEXTURES>,
}

fn write_root_constants<T: Copy>(dest: &mut [u8; limits::MAX_ROOT_CONSTANT_BYTES], data: &T) {
    let size = std::mem::size_of::<T>();
    assert!(size <= limits::MAX_ROOT_CONSTANT_BYTES, "root constant data too large");
    unsafe {
        std::ptr::copy_nonoverlapping(data as *const T as *const u8, dest.as_mut_ptr(), size);
    }
}

/// Marker for types that are valid command records.
pub trait CommandRecord: Clone + PartialEq + std::fmt::Debug + 'static {
    const TAG: CommandTag;
}

macro_rules! declare_commands {
    ($($value:literal $variant:ident,)*) => {
        /// The one-byte type tag preceding every record in a stream.
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum CommandTag {
            $($variant = $value,)*
        }

        impl CommandTag {
            pub fn from_u8(value: u8) -> Option<CommandTag> {
                match value {
                    $($value => Some(CommandTag::$variant),)*
                    _ => None,
                }
            }

            /// Size in bytes of the record following this tag.
            pub fn record_size(self) -> usize {
                match self {
                    $(CommandTag::$variant => std::mem::size_of::<$variant>(),)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(CommandTag::$variant => stringify!($variant),)*
                }
            }
        }

        $(
            impl CommandRecord for $variant {
                const TAG: CommandTag = CommandTag::$variant;
            }
        )*

        /// A decoded command, as yielded by [`crate::stream::CommandParser`].
        #[derive(Clone, Debug, PartialEq)]
        pub enum Command {
            $($variant($variant),)*
        }

        impl Command {
            pub fn tag(&self) -> CommandTag {
                match self {
                    $(Command::$variant(_) => CommandTag::$variant,)*
                }
            }
        }

        /// Reads the record for `tag` from `bytes` (unaligned, unchecked
        /// length is the caller's responsibility).
        pub(crate) unsafe fn read_command(tag: CommandTag, bytes: *const u8) -> Command {
            match tag {
                $(
                    CommandTag::$variant => {
                        Command::$variant(std::ptr::read_unaligned(bytes as *const $variant))
                    }
                )*
            }
        }

        /// Writes `command` (tagless record bytes) through the enum; used
        /// by the writer's dynamic path.
        pub(crate) unsafe fn write_command(command: &Command, bytes: *mut u8) {
            match command {
                $(
                    Command::$variant(record) => {
                        std::ptr::write_unaligned(bytes as *mut $variant, record.clone())
                    }
                )*
            }
        }
    };
}

declare_commands! {
    0 BeginRenderPass,
    1 EndRenderPass,
    2 TransitionResources,
    3 TransitionImageSlices,
    4 BarrierUav,
    5 Draw,
    6 DrawIndirect,
    7 Dispatch,
    8 CopyBuffer,
    9 CopyTexture,
    10 CopyBufferToTexture,
    11 CopyTextureToBuffer,
    12 ResolveTexture,
    13 WriteTimestamp,
    14 ResolveQueries,
    15 BeginDebugLabel,
    16 EndDebugLabel,
    17 UpdateBottomLevel,
    18 UpdateTopLevel,
    19 DispatchRays,
    20 ClearTextures,
}

/// The largest record size in the command set; callers can use this to
/// size scratch buffers conservatively.
pub fn max_command_size() -> usize {
    let mut size = 0;
    let mut tag = 0u8;
    while let Some(t) = CommandTag::from_u8(tag) {
        size = size.max(t.record_size());
        tag += 1;
    }
    1 + size
}
