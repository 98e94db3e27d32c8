//! The resource pool: committed buffers and textures behind
//! `handle::Resource`, carrying the master resource state.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use windows::Win32::Graphics::{Direct3D12, Dxgi};

use arclight_hal::arg::{BufferInfo as BufferDesc, RenderTargetInfo, TextureInfo};
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{ResourceHeap, ResourceState, TextureDimension};

use crate::conv;
use crate::HResult as _;

pub struct BufferInfo {
    pub stride: u32,
    pub width: u64,
    pub map: *mut u8,
    pub heap: ResourceHeap,
}

pub struct ImageInfo {
    pub pixel_format: Format,
    pub num_mips: u32,
    pub num_array_layers: u32,
    pub width: u32,
    pub height: u32,
}

pub enum ResourceKind {
    Buffer(BufferInfo),
    Image(ImageInfo),
}

pub struct ResourceNode {
    pub raw: Direct3D12::ID3D12Resource,
    pub kind: ResourceKind,
    master_state: AtomicU32,
}

unsafe impl Send for ResourceNode {}
unsafe impl Sync for ResourceNode {}

impl ResourceNode {
    fn new(raw: Direct3D12::ID3D12Resource, kind: ResourceKind, state: ResourceState) -> Self {
        ResourceNode {
            raw,
            kind,
            master_state: AtomicU32::new(state as u32),
        }
    }

    pub fn master_state(&self) -> ResourceState {
        unsafe { std::mem::transmute(self.master_state.load(Ordering::Acquire)) }
    }

    pub fn set_master_state(&self, state: ResourceState) {
        self.master_state.store(state as u32, Ordering::Release);
    }
}

pub struct ResourcePool {
    device: Direct3D12::ID3D12Device,
    pool: LinkedPool<ResourceNode>,
    /// The currently injected backbuffer plus its RTV heap slot.
    injected_backbuffer: Mutex<Option<(handle::Resource, u32)>>,
}

unsafe impl Send for ResourcePool {}
unsafe impl Sync for ResourcePool {}

fn heap_properties(heap: ResourceHeap) -> Direct3D12::D3D12_HEAP_PROPERTIES {
    let heap_type = match heap {
        ResourceHeap::Gpu => Direct3D12::D3D12_HEAP_TYPE_DEFAULT,
        ResourceHeap::Upload => Direct3D12::D3D12_HEAP_TYPE_UPLOAD,
        ResourceHeap::Readback => Direct3D12::D3D12_HEAP_TYPE_READBACK,
    };
    Direct3D12::D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        CPUPageProperty: Direct3D12::D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: Direct3D12::D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 0,
        VisibleNodeMask: 0,
    }
}

fn initial_states(heap: ResourceHeap) -> (ResourceState, Direct3D12::D3D12_RESOURCE_STATES) {
    match heap {
        // upload heaps demand GENERIC_READ, readback heaps COPY_DEST
        ResourceHeap::Upload => (
            ResourceState::Undefined,
            Direct3D12::D3D12_RESOURCE_STATE_GENERIC_READ,
        ),
        ResourceHeap::Readback => (
            ResourceState::CopyDest,
            Direct3D12::D3D12_RESOURCE_STATE_COPY_DEST,
        ),
        ResourceHeap::Gpu => (
            ResourceState::Undefined,
            Direct3D12::D3D12_RESOURCE_STATE_COMMON,
        ),
    }
}

impl ResourcePool {
    pub fn new(device: &Direct3D12::ID3D12Device, max_num_resources: u32) -> Self {
        ResourcePool {
            device: device.clone(),
            pool: LinkedPool::with_generation_checks(max_num_resources as usize),
            injected_backbuffer: Mutex::new(None),
        }
    }

    pub fn create_texture(&self, info: &TextureInfo, debug_name: Option<&str>) -> handle::Resource {
        let mip_count = if info.num_mips == 0 {
            32 - info.width.max(info.height).max(1).leading_zeros() as u32
        } else {
            info.num_mips
        };
        let dimension = match info.dim {
            TextureDimension::D1 => Direct3D12::D3D12_RESOURCE_DIMENSION_TEXTURE1D,
            TextureDimension::D2 => Direct3D12::D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            TextureDimension::D3 => Direct3D12::D3D12_RESOURCE_DIMENSION_TEXTURE3D,
        };
        let flags = if info.allow_uav {
            Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
        } else {
            Direct3D12::D3D12_RESOURCE_FLAG_NONE
        };

        let desc = Direct3D12::D3D12_RESOURCE_DESC {
            Dimension: dimension,
            Alignment: 0,
            Width: u64::from(info.width),
            Height: info.height,
            DepthOrArraySize: info.depth_or_array_size as u16,
            MipLevels: mip_count as u16,
            Format: conv::format(info.format),
            SampleDesc: Dxgi::DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };

        let raw = self.create_committed(&desc, ResourceHeap::Gpu, None);
        if let Some(name) = debug_name {
            debug!("created texture '{}' ({}x{})", name, info.width, info.height);
        }

        let node = ResourceNode::new(
            raw,
            ResourceKind::Image(ImageInfo {
                pixel_format: info.format,
                num_mips: mip_count,
                num_array_layers: if info.dim == TextureDimension::D3 {
                    1
                } else {
                    info.depth_or_array_size
                },
                width: info.width,
                height: info.height,
            }),
            ResourceState::Undefined,
        );
        handle::Resource(self.pool.acquire(node))
    }

    pub fn create_render_target(
        &self,
        info: &RenderTargetInfo,
        debug_name: Option<&str>,
    ) -> handle::Resource {
        let is_depth = info.format.has_depth();
        let flags = if is_depth {
            Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
        } else {
            Direct3D12::D3D12_RESOURCE_FLAGS(
                Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET.0
                    | Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS.0,
            )
        };

        let desc = Direct3D12::D3D12_RESOURCE_DESC {
            Dimension: Direct3D12::D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: u64::from(info.width),
            Height: info.height,
            DepthOrArraySize: info.array_size as u16,
            MipLevels: 1,
            Format: conv::format(info.format),
            SampleDesc: Dxgi::DXGI_SAMPLE_DESC {
                Count: info.num_samples.max(1),
                Quality: 0,
            },
            Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };

        let clear_value = Direct3D12::D3D12_CLEAR_VALUE {
            Format: conv::format(info.format),
            Anonymous: if is_depth {
                Direct3D12::D3D12_CLEAR_VALUE_0 {
                    DepthStencil: Direct3D12::D3D12_DEPTH_STENCIL_VALUE {
                        Depth: f32::from(info.clear_value.red_or_depth) / 255.0,
                        Stencil: info.clear_value.green_or_stencil,
                    },
                }
            } else {
                Direct3D12::D3D12_CLEAR_VALUE_0 {
                    Color: [
                        f32::from(info.clear_value.red_or_depth) / 255.0,
                        f32::from(info.clear_value.green_or_stencil) / 255.0,
                        f32::from(info.clear_value.blue) / 255.0,
                        f32::from(info.clear_value.alpha) / 255.0,
                    ],
                }
            },
        };

        let raw = self.create_committed(&desc, ResourceHeap::Gpu, Some(&clear_value));
        if let Some(name) = debug_name {
            debug!(
                "created render target '{}' ({}x{}, {} samples)",
                name, info.width, info.height, info.num_samples
            );
        }

        let node = ResourceNode::new(
            raw,
            ResourceKind::Image(ImageInfo {
                pixel_format: info.format,
                num_mips: 1,
                num_array_layers: info.array_size,
                width: info.width,
                height: info.height,
            }),
            ResourceState::Undefined,
        );
        handle::Resource(self.pool.acquire(node))
    }

    pub fn create_buffer(&self, info: &BufferDesc, debug_name: Option<&str>) -> handle::Resource {
        let flags = if info.allow_uav {
            Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
        } else {
            Direct3D12::D3D12_RESOURCE_FLAG_NONE
        };
        let desc = Direct3D12::D3D12_RESOURCE_DESC {
            Dimension: Direct3D12::D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: info.size_bytes.max(1),
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: Dxgi::DXGI_FORMAT_UNKNOWN,
            SampleDesc: Dxgi::DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
        };

        let raw = self.create_committed(&desc, info.heap, None);

        // upload and readback buffers stay persistently mapped
        let map = if info.heap != ResourceHeap::Gpu {
            let mut pointer = std::ptr::null_mut();
            unsafe { raw.Map(0, std::ptr::null(), &mut pointer) }.expect_hr("buffer mapping");
            pointer as *mut u8
        } else {
            std::ptr::null_mut()
        };

        if let Some(name) = debug_name {
            debug!("created buffer '{}' ({} bytes)", name, info.size_bytes);
        }

        let (initial, _) = initial_states(info.heap);
        let node = ResourceNode::new(
            raw,
            ResourceKind::Buffer(BufferInfo {
                stride: info.stride_bytes,
                width: info.size_bytes,
                map,
                heap: info.heap,
            }),
            initial,
        );
        handle::Resource(self.pool.acquire(node))
    }

    /// Buffer in the acceleration-structure state, for DXR result data.
    pub fn create_accel_struct_buffer(&self, size_bytes: u64) -> handle::Resource {
        let desc = Direct3D12::D3D12_RESOURCE_DESC {
            Dimension: Direct3D12::D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size_bytes.max(1),
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: Dxgi::DXGI_FORMAT_UNKNOWN,
            SampleDesc: Dxgi::DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
        };
        let properties = heap_properties(ResourceHeap::Gpu);
        let mut resource: Option<Direct3D12::ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &properties,
                Direct3D12::D3D12_HEAP_FLAG_NONE,
                &desc,
                Direct3D12::D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
                std::ptr::null(),
                &mut resource,
            )
        }
        .expect_hr("acceleration structure buffer creation");

        let node = ResourceNode::new(
            resource.expect("committed resource creation returned nothing"),
            ResourceKind::Buffer(BufferInfo {
                stride: 0,
                width: size_bytes,
                map: std::ptr::null_mut(),
                heap: ResourceHeap::Gpu,
            }),
            ResourceState::RaytraceAccelStruct,
        );
        handle::Resource(self.pool.acquire(node))
    }

    fn create_committed(
        &self,
        desc: &Direct3D12::D3D12_RESOURCE_DESC,
        heap: ResourceHeap,
        clear_value: Option<&Direct3D12::D3D12_CLEAR_VALUE>,
    ) -> Direct3D12::ID3D12Resource {
        let properties = heap_properties(heap);
        let (_, native_state) = initial_states(heap);
        let mut resource: Option<Direct3D12::ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &properties,
                Direct3D12::D3D12_HEAP_FLAG_NONE,
                desc,
                native_state,
                clear_value.map_or(std::ptr::null(), |v| v as *const _),
                &mut resource,
            )
        }
        .expect_hr("committed resource creation");
        resource.expect("committed resource creation returned nothing")
    }

    //
    // access
    //

    fn node(&self, resource: handle::Resource) -> &ResourceNode {
        self.pool.get(resource.0)
    }

    pub fn raw(&self, resource: handle::Resource) -> &Direct3D12::ID3D12Resource {
        &self.node(resource).raw
    }

    pub fn is_image(&self, resource: handle::Resource) -> bool {
        matches!(self.node(resource).kind, ResourceKind::Image(_))
    }

    pub fn image_info(&self, resource: handle::Resource) -> &ImageInfo {
        match &self.node(resource).kind {
            ResourceKind::Image(info) => info,
            ResourceKind::Buffer(_) => panic!("resource is not an image"),
        }
    }

    pub fn buffer_info(&self, resource: handle::Resource) -> &BufferInfo {
        match &self.node(resource).kind {
            ResourceKind::Buffer(info) => info,
            ResourceKind::Image(_) => panic!("resource is not a buffer"),
        }
    }

    pub fn gpu_address(&self, resource: handle::Resource) -> u64 {
        unsafe { self.node(resource).raw.GetGPUVirtualAddress() }
    }

    pub fn mapped_memory(&self, resource: handle::Resource) -> *mut u8 {
        let map = self.buffer_info(resource).map;
        assert!(!map.is_null(), "buffer was not created on a mapped heap");
        map
    }

    pub fn resource_state(&self, resource: handle::Resource) -> ResourceState {
        self.node(resource).master_state()
    }

    /// Writes the master state; requires exclusive access to the resource
    /// (the submit path's contract).
    pub fn set_resource_state(&self, resource: handle::Resource, state: ResourceState) {
        self.node(resource).set_master_state(state);
    }

    pub fn print_information(&self, resource: handle::Resource) {
        match &self.node(resource).kind {
            ResourceKind::Buffer(info) => info!(
                "resource {:?}: buffer, {} bytes, stride {}, heap {:?}, state {:?}",
                resource,
                info.width,
                info.stride,
                info.heap,
                self.resource_state(resource)
            ),
            ResourceKind::Image(info) => info!(
                "resource {:?}: image, {}x{}, {:?}, {} mips, state {:?}",
                resource,
                info.width,
                info.height,
                info.pixel_format,
                info.num_mips,
                self.resource_state(resource)
            ),
        }
    }

    //
    // backbuffer injection (one active backbuffer, same contract as the
    // other backend)
    //

    pub fn inject_backbuffer(
        &self,
        raw: Direct3D12::ID3D12Resource,
        state: ResourceState,
        rtv_slot: u32,
        format: Format,
        width: u32,
        height: u32,
    ) -> handle::Resource {
        let node = ResourceNode::new(
            raw,
            ResourceKind::Image(ImageInfo {
                pixel_format: format,
                num_mips: 1,
                num_array_layers: 1,
                width,
                height,
            }),
            state,
        );
        let new_handle = handle::Resource(self.pool.acquire(node));

        let mut injected = self.injected_backbuffer.lock();
        if let Some((old, _)) = injected.take() {
            drop(self.pool.release(old.0));
        }
        *injected = Some((new_handle, rtv_slot));
        new_handle
    }

    pub fn is_backbuffer(&self, resource: handle::Resource) -> bool {
        self.injected_backbuffer
            .lock()
            .map_or(false, |(h, _)| h == resource)
    }

    pub fn backbuffer_rtv_slot(&self) -> u32 {
        self.injected_backbuffer
            .lock()
            .expect("no backbuffer injected")
            .1
    }

    //
    // destruction
    //

    pub fn free(&self, resource: handle::Resource) {
        if !resource.is_valid() {
            return;
        }
        // COM release happens on node drop
        drop(self.pool.release(resource.0));
    }

    pub fn free_range(&self, resources: &[handle::Resource]) {
        for &resource in resources {
            self.free(resource);
        }
    }

    pub fn destroy(&mut self) {
        let num_injected = usize::from(self.injected_backbuffer.get_mut().is_some());
        let leaks = self.pool.drain_allocated(drop);
        if leaks > num_injected {
            info!("leaked {} resource handle(s)", leaks - num_injected);
        }
    }
}
