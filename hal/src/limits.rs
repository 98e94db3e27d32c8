//! Fixed capacities baked into command records and binding layouts.

/// Maximum render targets per render pass, excluding the depth-stencil
/// target. D3D12 supports no more than 8.
pub const MAX_RENDER_TARGETS: usize = 8;

/// Maximum resource transitions per transition command.
pub const MAX_RESOURCE_TRANSITIONS: usize = 4;

/// Maximum UAV barriers per barrier command.
pub const MAX_UAV_BARRIERS: usize = 8;

/// Maximum shader arguments per draw or dispatch.
/// The Vulkan backend consumes two descriptor sets per argument, and many
/// non-desktop GPUs cap bound sets at 8.
pub const MAX_SHADER_ARGUMENTS: usize = 4;

/// Maximum samplers per shader view.
pub const MAX_SHADER_SAMPLERS: usize = 16;

/// Size of the inline root constant block, in bytes.
pub const MAX_ROOT_CONSTANT_BYTES: usize = 8;

/// Maximum argument associations in a raytracing pipeline.
pub const MAX_RAYTRACING_ARGUMENT_ASSOCS: usize = 8;

/// Maximum hit groups in a raytracing pipeline.
pub const MAX_RAYTRACING_HIT_GROUPS: usize = 16;

/// Maximum shader exports per raytracing library.
pub const MAX_RAYTRACING_LIBRARY_EXPORTS: usize = 16;
