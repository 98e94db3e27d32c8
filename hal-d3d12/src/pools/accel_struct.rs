//! The acceleration-structure pool (DXR).

use parking_lot::Mutex;
use windows::runtime::Interface;
use windows::Win32::Graphics::{Direct3D12, Dxgi};

use arclight_hal::arg::BlasElement;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{AccelStructBuildFlags, AccelStructInstance, ResourceHeap};

use crate::conv;
use crate::pools::resource::ResourcePool;

pub struct AccelStructNode {
    pub buffer: handle::Resource,
    pub buffer_scratch: handle::Resource,
    /// Only valid for top-level structures.
    pub buffer_instances: handle::Resource,
    pub flags: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS,
    pub is_top_level: bool,
    /// Geometry descriptions replayed by build commands (device
    /// addresses only).
    pub geometries: Vec<Direct3D12::D3D12_RAYTRACING_GEOMETRY_DESC>,
    pub num_instances: u32,
}

unsafe impl Send for AccelStructNode {}
unsafe impl Sync for AccelStructNode {}

pub struct AccelStructPool {
    device5: Direct3D12::ID3D12Device5,
    pool: LinkedPool<AccelStructNode>,
    _guard: Mutex<()>,
}

unsafe impl Send for AccelStructPool {}
unsafe impl Sync for AccelStructPool {}

fn build_flags(
    flags: AccelStructBuildFlags,
) -> Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS {
    use Direct3D12::*;
    let mut res = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_NONE;
    let mut add = |flag: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS| {
        res = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS(res.0 | flag.0);
    };
    if flags.contains(AccelStructBuildFlags::ALLOW_UPDATE) {
        add(D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE);
    }
    if flags.contains(AccelStructBuildFlags::ALLOW_COMPACTION) {
        add(D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_COMPACTION);
    }
    if flags.contains(AccelStructBuildFlags::PREFER_FAST_TRACE) {
        add(D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE);
    }
    if flags.contains(AccelStructBuildFlags::PREFER_FAST_BUILD) {
        add(D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_BUILD);
    }
    if flags.contains(AccelStructBuildFlags::MINIMIZE_MEMORY) {
        add(D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_MINIMIZE_MEMORY);
    }
    res
}

impl AccelStructPool {
    pub fn new(device: &Direct3D12::ID3D12Device, max_num_accel_structs: u32) -> Self {
        AccelStructPool {
            device5: device.cast().expect("raytracing requires ID3D12Device5"),
            pool: LinkedPool::new(max_num_accel_structs as usize),
            _guard: Mutex::new(()),
        }
    }

    fn prebuild_info(
        &self,
        inputs: &Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS,
    ) -> Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO {
        let mut info: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO =
            unsafe { std::mem::zeroed() };
        unsafe {
            self.device5
                .GetRaytracingAccelerationStructurePrebuildInfo(inputs, &mut info)
        };
        info
    }

    fn allocate_buffers(
        &self,
        resources: &ResourcePool,
        info: &Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO,
    ) -> (handle::Resource, handle::Resource) {
        let buffer = resources.create_accel_struct_buffer(info.ResultDataMaxSizeInBytes);
        let scratch = resources.create_buffer(
            &arclight_hal::arg::BufferInfo {
                size_bytes: info
                    .ScratchDataSizeInBytes
                    .max(info.UpdateScratchDataSizeInBytes),
                stride_bytes: 0,
                heap: ResourceHeap::Gpu,
                allow_uav: true,
            },
            None,
        );
        (buffer, scratch)
    }

    pub fn create_bottom_level(
        &self,
        resources: &ResourcePool,
        elements: &[BlasElement],
        flags: AccelStructBuildFlags,
    ) -> (handle::AccelStruct, u64) {
        let native_flags = build_flags(flags);

        let geometries: Vec<Direct3D12::D3D12_RAYTRACING_GEOMETRY_DESC> = elements
            .iter()
            .map(|element| {
                let vertex_stride =
                    u64::from(resources.buffer_info(element.vertex_buffer).stride.max(12));
                let mut triangles: Direct3D12::D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC =
                    unsafe { std::mem::zeroed() };
                triangles.VertexBuffer = Direct3D12::D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                    StartAddress: resources.gpu_address(element.vertex_buffer),
                    StrideInBytes: vertex_stride,
                };
                triangles.VertexFormat = conv::format(element.vertex_pos_format);
                triangles.VertexCount = element.num_vertices;
                if element.index_buffer.is_valid() {
                    let index_stride = resources.buffer_info(element.index_buffer).stride;
                    triangles.IndexBuffer = resources.gpu_address(element.index_buffer);
                    triangles.IndexCount = element.num_indices;
                    triangles.IndexFormat = if index_stride == 4 {
                        Dxgi::DXGI_FORMAT_R32_UINT
                    } else {
                        Dxgi::DXGI_FORMAT_R16_UINT
                    };
                }
                if element.transform_buffer.is_valid() {
                    triangles.Transform3x4 = resources.gpu_address(element.transform_buffer)
                        + u64::from(element.transform_buffer_offset_bytes);
                }

                Direct3D12::D3D12_RAYTRACING_GEOMETRY_DESC {
                    Type: Direct3D12::D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                    Flags: if element.is_opaque {
                        Direct3D12::D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE
                    } else {
                        Direct3D12::D3D12_RAYTRACING_GEOMETRY_FLAG_NONE
                    },
                    Anonymous: Direct3D12::D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                        Triangles: triangles,
                    },
                }
            })
            .collect();

        let inputs = Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Type: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL,
            Flags: native_flags,
            NumDescs: geometries.len() as u32,
            DescsLayout: Direct3D12::D3D12_ELEMENTS_LAYOUT_ARRAY,
            Anonymous: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                pGeometryDescs: geometries.as_ptr(),
            },
        };

        let info = self.prebuild_info(&inputs);
        let (buffer, scratch) = self.allocate_buffers(resources, &info);
        let native_handle = resources.gpu_address(buffer);

        let node = AccelStructNode {
            buffer,
            buffer_scratch: scratch,
            buffer_instances: handle::Resource::NULL,
            flags: native_flags,
            is_top_level: false,
            geometries,
            num_instances: 0,
        };
        (handle::AccelStruct(self.pool.acquire(node)), native_handle)
    }

    pub fn create_top_level(
        &self,
        resources: &ResourcePool,
        num_instances: u32,
        flags: AccelStructBuildFlags,
    ) -> handle::AccelStruct {
        let native_flags = build_flags(flags);

        let instance_buffer = resources.create_buffer(
            &arclight_hal::arg::BufferInfo {
                size_bytes: u64::from(num_instances)
                    * std::mem::size_of::<AccelStructInstance>() as u64,
                stride_bytes: std::mem::size_of::<AccelStructInstance>() as u32,
                heap: ResourceHeap::Upload,
                allow_uav: false,
            },
            None,
        );

        let inputs = Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Type: Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL,
            Flags: native_flags,
            NumDescs: num_instances,
            DescsLayout: Direct3D12::D3D12_ELEMENTS_LAYOUT_ARRAY,
            Anonymous: Direct3D12::D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                InstanceDescs: resources.gpu_address(instance_buffer),
            },
        };

        let info = self.prebuild_info(&inputs);
        let (buffer, scratch) = self.allocate_buffers(resources, &info);

        let node = AccelStructNode {
            buffer,
            buffer_scratch: scratch,
            buffer_instances: instance_buffer,
            flags: native_flags,
            is_top_level: true,
            geometries: Vec::new(),
            num_instances,
        };
        handle::AccelStruct(self.pool.acquire(node))
    }

    pub fn upload_instances(
        &self,
        resources: &ResourcePool,
        accel_struct: handle::AccelStruct,
        instances: &[AccelStructInstance],
    ) {
        let node = self.node(accel_struct);
        assert!(
            node.buffer_instances.is_valid(),
            "instance upload on a bottom-level accel struct"
        );
        let dest = resources.mapped_memory(node.buffer_instances);
        unsafe {
            std::ptr::copy_nonoverlapping(
                instances.as_ptr() as *const u8,
                dest,
                std::mem::size_of_val(instances),
            );
        }
    }

    pub fn node(&self, accel_struct: handle::AccelStruct) -> &AccelStructNode {
        self.pool.get(accel_struct.0)
    }

    pub fn buffer(&self, accel_struct: handle::AccelStruct) -> handle::Resource {
        self.node(accel_struct).buffer
    }

    pub fn gpu_address(&self, resources: &ResourcePool, accel_struct: handle::AccelStruct) -> u64 {
        resources.gpu_address(self.node(accel_struct).buffer)
    }

    pub fn free(&self, resources: &ResourcePool, accel_struct: handle::AccelStruct) {
        if !accel_struct.is_valid() {
            return;
        }
        let node = self.pool.release(accel_struct.0);
        resources.free(node.buffer);
        resources.free(node.buffer_scratch);
        if node.buffer_instances.is_valid() {
            resources.free(node.buffer_instances);
        }
    }

    pub fn free_range(&self, resources: &ResourcePool, accel_structs: &[handle::AccelStruct]) {
        for &accel_struct in accel_structs {
            self.free(resources, accel_struct);
        }
    }

    pub fn destroy(&mut self, resources: &ResourcePool) {
        let leaks = self.pool.drain_allocated(|node| {
            resources.free(node.buffer);
            resources.free(node.buffer_scratch);
            if node.buffer_instances.is_valid() {
                resources.free(node.buffer_instances);
            }
        });
        if leaks > 0 {
            info!("leaked {} acceleration structure handle(s)", leaks);
        }
    }
}
