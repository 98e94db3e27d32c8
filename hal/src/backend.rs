//! The backend interface both native implementations fulfill.

use thiserror::Error;

use crate::arg;
use crate::config::PresentMode;
use crate::format::Format;
use crate::handle;
use crate::types::{
    AccelStructBuildFlags, AccelStructInstance, FenceOperation, PipelineConfig, QueryType,
    QueueType, ResourceView, SamplerConfig, ShaderTableStrides,
};
use crate::window::WindowHandle;

/// The native API behind a backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendType {
    D3d12,
    Vulkan,
}

/// Initialization failure. Construction is the only fallible entry point;
/// past it, native errors indicate device loss or driver bugs and are
/// logged rather than surfaced.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no suitable GPU adapter found")]
    NoAdapterFound,
    #[error("the backend is not supported on this system: {0}")]
    BackendUnsupported(String),
    #[error("API validation was requested but is unavailable: {0}")]
    ValidationUnavailable(String),
    #[error("native API error during initialization: {0}")]
    Native(String),
}

/// A uniform interface over the native graphics API.
///
/// All operations are free-threaded up to the configured thread count
/// unless noted otherwise. Construction happens on the concrete types
/// (`VulkanBackend::new`, `D3d12Backend::new`); teardown happens on drop
/// and flushes the GPU.
///
/// Passing an invalid or stale handle, overflowing a pool, or consuming a
/// command list twice are contract violations: the implementation is free
/// to panic.
pub trait Backend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Blocks until all submitted GPU work has completed.
    /// Externally synchronized: no concurrent backend calls allowed.
    fn flush_gpu(&self);

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
    ) -> handle::Swapchain;

    fn free_swapchain(&self, swapchain: handle::Swapchain);

    /// Acquires the next backbuffer, blocking until one is available.
    /// Returns [`handle::Resource::NULL`] when the swapchain resized out
    /// from under the frame; the frame must then be discarded.
    fn acquire_backbuffer(&self, swapchain: handle::Swapchain) -> handle::Resource;

    /// Presents the acquired backbuffer. Can fail internally and flag a
    /// pending resize instead of returning an error.
    fn present(&self, swapchain: handle::Swapchain);

    /// Queues an internal resize to the given dimensions.
    fn on_resize(&self, swapchain: handle::Swapchain, width: u32, height: u32);

    fn backbuffer_size(&self, swapchain: handle::Swapchain) -> (u32, u32);

    fn backbuffer_format(&self, swapchain: handle::Swapchain) -> Format;

    fn num_backbuffers(&self, swapchain: handle::Swapchain) -> u32;

    /// Clears pending resize events; true if the backbuffer resized since
    /// the last call.
    fn clear_pending_resize(&self, swapchain: handle::Swapchain) -> bool;

    //
    // Resource interface
    //

    /// Creates a 1D, 2D or 3D texture, or a 1D/2D array. `num_mips == 0`
    /// requests the full chain.
    fn create_texture(&self, info: &arg::TextureInfo, debug_name: Option<&str>)
        -> handle::Resource;

    /// Creates a (possibly multisampled) render or depth-stencil target.
    fn create_render_target(
        &self,
        info: &arg::RenderTargetInfo,
        debug_name: Option<&str>,
    ) -> handle::Resource;

    fn create_buffer(&self, info: &arg::BufferInfo, debug_name: Option<&str>) -> handle::Resource;

    /// Shorthand for a buffer on the upload heap.
    fn create_upload_buffer(&self, size_bytes: u64, stride_bytes: u32) -> handle::Resource;

    /// Returns the persistent CPU pointer of an upload/readback buffer.
    /// The mapping stays valid until the resource is freed.
    fn map_buffer(&self, resource: handle::Resource) -> *mut u8;

    /// Counterpart to [`Backend::map_buffer`]; never required before free.
    fn unmap_buffer(&self, resource: handle::Resource);

    /// Makes CPU writes to a mapped buffer visible to the GPU.
    fn flush_mapped_memory(&self, resource: handle::Resource);

    fn free_resource(&self, resource: handle::Resource);

    fn free_resource_range(&self, resources: &[handle::Resource]);

    //
    // Shader view interface
    //

    fn create_shader_view(
        &self,
        srvs: &[ResourceView],
        uavs: &[ResourceView],
        samplers: &[SamplerConfig],
        usage_compute: bool,
    ) -> handle::ShaderView;

    fn free_shader_view(&self, shader_view: handle::ShaderView);

    fn free_shader_view_range(&self, shader_views: &[handle::ShaderView]);

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
    ) -> handle::PipelineState;

    fn create_compute_pipeline_state(
        &self,
        shader_arg_shapes: &[arg::ShaderArgShape],
        shader: arg::ShaderBinary<'_>,
        has_root_constants: bool,
    ) -> handle::PipelineState;

    fn free_pipeline_state(&self, pipeline_state: handle::PipelineState);

    //
    // Command list interface
    //

    /// Parses and translates an encoded command stream into a native
    /// command list on the calling thread.
    fn record_command_list(&self, stream: &[u8], queue: QueueType) -> handle::CommandList;

    /// Consumes command lists that will never be submitted.
    fn discard(&self, command_lists: &[handle::CommandList]);

    /// Submits command lists in order, preceded by any synthesized
    /// barrier-only lists. Waits execute before the batch, signals after.
    /// Consumes the command-list handles.
    fn submit(
        &self,
        command_lists: &[handle::CommandList],
        queue: QueueType,
        waits: &[FenceOperation],
        signals: &[FenceOperation],
    );

    //
    // Fence interface
    //

    /// Creates a fence with value 0.
    fn create_fence(&self) -> handle::Fence;

    fn fence_value(&self, fence: handle::Fence) -> u64;

    fn signal_fence_cpu(&self, fence: handle::Fence, value: u64);

    /// Blocks until `fence` reaches `value`.
    fn wait_fence_cpu(&self, fence: handle::Fence, value: u64);

    fn signal_fence_gpu(&self, fence: handle::Fence, value: u64, queue: QueueType);

    fn wait_fence_gpu(&self, fence: handle::Fence, value: u64, queue: QueueType);

    fn free_fence_range(&self, fences: &[handle::Fence]);

    //
    // Query interface
    //

    fn create_query_range(&self, query_type: QueryType, count: u32) -> handle::QueryRange;

    fn free_query_range(&self, query_range: handle::QueryRange);

    //
    // Raytracing interface
    //
    // When raytracing is disabled or unsupported, these return null
    // handles / zeroed values and log an error.
    //

    fn create_raytracing_pipeline_state(
        &self,
        libraries: &[arg::RaytracingShaderLibrary<'_>],
        argument_associations: &[arg::RaytracingArgumentAssociation],
        hit_groups: &[arg::RaytracingHitGroup<'_>],
        max_recursion: u32,
        max_payload_size_bytes: u32,
        max_attribute_size_bytes: u32,
    ) -> handle::PipelineState;

    fn create_top_level_accel_struct(
        &self,
        num_instances: u32,
        flags: AccelStructBuildFlags,
    ) -> handle::AccelStruct;

    /// Returns the handle plus the opaque native BLAS address used in
    /// [`AccelStructInstance::native_bottom_level_handle`].
    fn create_bottom_level_accel_struct(
        &self,
        elements: &[arg::BlasElement],
        flags: AccelStructBuildFlags,
    ) -> (handle::AccelStruct, u64);

    /// Copies instance records into the TLAS instance buffer.
    fn upload_top_level_instances(
        &self,
        accel_struct: handle::AccelStruct,
        instances: &[AccelStructInstance],
    );

    /// The buffer backing an acceleration structure.
    fn accel_struct_buffer(&self, accel_struct: handle::AccelStruct) -> handle::Resource;

    fn calculate_shader_table_strides(
        &self,
        ray_gen: &arg::ShaderTableRecord<'_>,
        miss_records: &[arg::ShaderTableRecord<'_>],
        hit_group_records: &[arg::ShaderTableRecord<'_>],
        callable_records: &[arg::ShaderTableRecord<'_>],
    ) -> ShaderTableStrides;

    /// Writes shader identifiers plus per-record root arguments into
    /// `dest` with the given record stride.
    fn write_shader_table(
        &self,
        dest: &mut [u8],
        pipeline_state: handle::PipelineState,
        stride_bytes: u32,
        records: &[arg::ShaderTableRecord<'_>],
    );

    fn free_accel_struct(&self, accel_struct: handle::AccelStruct);

    fn free_accel_struct_range(&self, accel_structs: &[handle::AccelStruct]);

    //
    // Debug interface
    //

    /// Logs diagnostic information about a resource.
    fn print_information(&self, resource: handle::Resource);

    /// Detects an attached diagnostic tool (RenderDoc, PIX) and starts a
    /// capture; true on success.
    fn start_forced_capture(&self) -> bool;

    /// Ends a capture started by [`Backend::start_forced_capture`].
    fn end_forced_capture(&self) -> bool;

    //
    // GPU info interface
    //

    /// GPU timestamp frequency in Hz
    /// (`seconds = delta / gpu_timestamp_frequency()`).
    fn gpu_timestamp_frequency(&self) -> u64;

    fn is_raytracing_enabled(&self) -> bool;
}
