//! Backend configuration.

/// How much API-level validation to enable at initialization.
/// Levels are cumulative; ordering reflects strictness.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValidationLevel {
    Off,

    /// D3D12: debug layer. Vulkan: Khronos validation layer.
    On,

    /// D3D12: additionally GPU-based validation (slow).
    /// Vulkan: additionally GPU-assisted validation; reserves a descriptor
    /// set, which can exhaust devices limited to 8 bound sets.
    ///
    /// Extended validation can keep diagnostic tools like RenderDoc and
    /// NSight from attaching (PIX still works).
    OnExtended,

    /// D3D12: additionally DRED auto-breadcrumbs and pagefault recovery
    /// (very slow). Vulkan: no additional effect.
    OnExtendedDred,
}

/// Swapchain presentation mode.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PresentMode {
    /// Unsynchronized presentation with tearing allowed; required for
    /// variable-refresh-rate displays.
    AllowTearing,
    /// Present synchronized to vblank.
    Synced,
}

/// Strategy for choosing the physical GPU.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AdapterPreference {
    HighestVram,
    First,
    Integrated,
    HighestFeatureLevel,
    /// Use [`Config::explicit_adapter_index`].
    ExplicitIndex,
}

/// Configuration a backend is initialized with. Pool capacities and
/// command-allocator geometry are fixed for the backend's lifetime.
#[derive(Clone, Debug)]
pub struct Config {
    pub validation: ValidationLevel,
    /// Note: `Synced` does not imply a refresh-rate limit, although some
    /// configurations (windowed + Optimus on D3D12) may impose one.
    pub present_mode: PresentMode,
    pub adapter_preference: AdapterPreference,
    pub explicit_adapter_index: u32,

    /// Enable DXR / Vulkan raytracing when the adapter supports it.
    pub enable_raytracing: bool,
    /// Present from the discrete compute queue instead of the direct queue.
    pub present_from_compute_queue: bool,

    /// Backbuffers per swapchain, in [2, 6].
    pub num_backbuffers: u32,

    /// Strict upper bound on the number of distinct OS threads calling
    /// into the backend.
    pub num_threads: u32,

    // pool capacity ceilings
    pub max_num_resources: u32,
    pub max_num_pipeline_states: u32,
    pub max_num_cbvs: u32,
    pub max_num_srvs: u32,
    pub max_num_uavs: u32,
    pub max_num_samplers: u32,
    pub max_num_fences: u32,
    pub max_num_accel_structs: u32,
    pub max_num_raytrace_pipeline_states: u32,

    // command allocator geometry, per thread
    // (total native lists = threads * allocators/thread * lists/allocator)
    pub num_direct_cmdlist_allocators_per_thread: u32,
    pub num_direct_cmdlists_per_allocator: u32,
    pub num_compute_cmdlist_allocators_per_thread: u32,
    pub num_compute_cmdlists_per_allocator: u32,
    pub num_copy_cmdlist_allocators_per_thread: u32,
    pub num_copy_cmdlists_per_allocator: u32,

    // query heap sizes
    pub num_timestamp_queries: u32,
    pub num_occlusion_queries: u32,
    pub num_pipeline_stat_queries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            validation: ValidationLevel::Off,
            present_mode: PresentMode::Synced,
            adapter_preference: AdapterPreference::HighestVram,
            explicit_adapter_index: u32::MAX,

            enable_raytracing: true,
            present_from_compute_queue: false,

            num_backbuffers: 3,
            num_threads: 1,

            max_num_resources: 2048,
            max_num_pipeline_states: 1024,
            max_num_cbvs: 2048,
            max_num_srvs: 2048,
            max_num_uavs: 2048,
            max_num_samplers: 1024,
            max_num_fences: 4096,
            max_num_accel_structs: 2048,
            max_num_raytrace_pipeline_states: 256,

            num_direct_cmdlist_allocators_per_thread: 5,
            num_direct_cmdlists_per_allocator: 5,
            num_compute_cmdlist_allocators_per_thread: 5,
            num_compute_cmdlists_per_allocator: 5,
            num_copy_cmdlist_allocators_per_thread: 3,
            num_copy_cmdlists_per_allocator: 3,

            num_timestamp_queries: 128,
            num_occlusion_queries: 128,
            num_pipeline_stat_queries: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.num_backbuffers >= 2 && cfg.num_backbuffers <= 6);
        assert_eq!(cfg.num_threads, 1);
        assert!(cfg.max_num_resources > 0);
    }
}
