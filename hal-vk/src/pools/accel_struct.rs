//! The acceleration-structure pool (KHR raytracing).
//!
//! Each node owns its result buffer, a build/update scratch buffer, for
//! top-level structures a persistently mapped instance buffer, and the
//! geometry descriptions replayed by the build commands.

use ash::vk;

use arclight_hal::arg::BlasElement;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{AccelStructBuildFlags, AccelStructInstance, ResourceHeap};

use crate::conv;
use crate::pools::resource::ResourcePool;

pub struct AccelStructNode {
    pub raw: vk::AccelerationStructureKHR,
    /// Opaque GPU-side handle, as written into instance records.
    pub native_handle: u64,
    pub buffer: handle::Resource,
    pub buffer_scratch: handle::Resource,
    /// Only valid for top-level structures.
    pub buffer_instances: handle::Resource,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub ty: vk::AccelerationStructureTypeKHR,
    pub geometries: Vec<vk::AccelerationStructureGeometryKHR<'static>>,
    pub primitive_counts: Vec<u32>,
}

unsafe impl Send for AccelStructNode {}
unsafe impl Sync for AccelStructNode {}

pub struct AccelStructPool {
    device: ash::Device,
    ext: ash::khr::acceleration_structure::Device,
    pool: LinkedPool<AccelStructNode>,
}

fn build_flags(flags: AccelStructBuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut res = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(AccelStructBuildFlags::ALLOW_UPDATE) {
        res |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    if flags.contains(AccelStructBuildFlags::ALLOW_COMPACTION) {
        res |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION;
    }
    if flags.contains(AccelStructBuildFlags::PREFER_FAST_TRACE) {
        res |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(AccelStructBuildFlags::PREFER_FAST_BUILD) {
        res |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(AccelStructBuildFlags::MINIMIZE_MEMORY) {
        res |= vk::BuildAccelerationStructureFlagsKHR::LOW_MEMORY;
    }
    res
}

impl AccelStructPool {
    pub fn new(
        device: &ash::Device,
        ext: ash::khr::acceleration_structure::Device,
        max_num_accel_structs: u32,
    ) -> Self {
        AccelStructPool {
            device: device.clone(),
            ext,
            pool: LinkedPool::new(max_num_accel_structs as usize),
        }
    }

    pub fn create_bottom_level(
        &self,
        resources: &ResourcePool,
        elements: &[BlasElement],
        flags: AccelStructBuildFlags,
    ) -> (handle::AccelStruct, u64) {
        let vk_flags = build_flags(flags);

        let mut geometries = Vec::with_capacity(elements.len());
        let mut primitive_counts = Vec::with_capacity(elements.len());
        for element in elements {
            let vertex_address = resources.buffer_device_address(element.vertex_buffer);
            let vertex_stride =
                u64::from(resources.buffer_info(element.vertex_buffer).stride.max(12));

            let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(conv::format(element.vertex_pos_format))
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: vertex_address,
                })
                .vertex_stride(vertex_stride)
                .max_vertex(element.num_vertices.saturating_sub(1));

            let primitive_count;
            if element.index_buffer.is_valid() {
                let index_stride = resources.buffer_info(element.index_buffer).stride;
                triangles = triangles
                    .index_type(conv::index_type(index_stride))
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: resources.buffer_device_address(element.index_buffer),
                    });
                primitive_count = element.num_indices / 3;
            } else {
                triangles = triangles.index_type(vk::IndexType::NONE_KHR);
                primitive_count = element.num_vertices / 3;
            }

            if element.transform_buffer.is_valid() {
                triangles = triangles.transform_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: resources.buffer_device_address(element.transform_buffer)
                        + u64::from(element.transform_buffer_offset_bytes),
                });
            }

            geometries.push(
                vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                    .flags(if element.is_opaque {
                        vk::GeometryFlagsKHR::OPAQUE
                    } else {
                        vk::GeometryFlagsKHR::empty()
                    }),
            );
            primitive_counts.push(primitive_count);
        }

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk_flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let sizes = self.query_sizes(&build_info, &primitive_counts);
        let (raw, buffer, scratch) = self.create_buffers_and_structure(
            resources,
            sizes,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        );

        let native_handle = self.device_address(raw);
        let node = AccelStructNode {
            raw,
            native_handle,
            buffer,
            buffer_scratch: scratch,
            buffer_instances: handle::Resource::NULL,
            flags: vk_flags,
            ty: vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometries,
            primitive_counts,
        };
        (handle::AccelStruct(self.pool.acquire(node)), native_handle)
    }

    pub fn create_top_level(
        &self,
        resources: &ResourcePool,
        num_instances: u32,
        flags: AccelStructBuildFlags,
    ) -> handle::AccelStruct {
        let vk_flags = build_flags(flags);

        let instance_buffer = resources.create_buffer_internal(
            u64::from(num_instances) * std::mem::size_of::<AccelStructInstance>() as u64,
            ResourceHeap::Upload,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::TRANSFER_DST,
        );

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: resources.buffer_device_address(instance_buffer),
            });
        let geometries = vec![vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })];
        let primitive_counts = vec![num_instances];

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(vk_flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let sizes = self.query_sizes(&build_info, &primitive_counts);
        let (raw, buffer, scratch) = self.create_buffers_and_structure(
            resources,
            sizes,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        );

        let native_handle = self.device_address(raw);
        let node = AccelStructNode {
            raw,
            native_handle,
            buffer,
            buffer_scratch: scratch,
            buffer_instances: instance_buffer,
            flags: vk_flags,
            ty: vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometries,
            primitive_counts,
        };
        handle::AccelStruct(self.pool.acquire(node))
    }

    fn query_sizes(
        &self,
        build_info: &vk::AccelerationStructureBuildGeometryInfoKHR<'_>,
        primitive_counts: &[u32],
    ) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.ext.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                build_info,
                primitive_counts,
                &mut sizes,
            );
        }
        sizes
    }

    fn create_buffers_and_structure(
        &self,
        resources: &ResourcePool,
        sizes: vk::AccelerationStructureBuildSizesInfoKHR<'_>,
        ty: vk::AccelerationStructureTypeKHR,
    ) -> (vk::AccelerationStructureKHR, handle::Resource, handle::Resource) {
        let buffer = resources.create_buffer_internal(
            sizes.acceleration_structure_size,
            ResourceHeap::Gpu,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        );
        let scratch = resources.create_buffer_internal(
            sizes.build_scratch_size.max(sizes.update_scratch_size),
            ResourceHeap::Gpu,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        );

        let info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(resources.raw_buffer(buffer))
            .offset(0)
            .size(sizes.acceleration_structure_size)
            .ty(ty);
        let raw = unsafe {
            self.ext
                .create_acceleration_structure(&info, None)
                .expect("acceleration structure creation failed")
        };
        (raw, buffer, scratch)
    }

    fn device_address(&self, raw: vk::AccelerationStructureKHR) -> u64 {
        let info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(raw);
        unsafe { self.ext.get_acceleration_structure_device_address(&info) }
    }

    /// Copies instance records into the TLAS's mapped instance buffer.
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
        resources.flush_mapped_memory(node.buffer_instances);
    }

    pub fn node(&self, accel_struct: handle::AccelStruct) -> &AccelStructNode {
        self.pool.get(accel_struct.0)
    }

    pub fn raw_accel_struct(&self, accel_struct: handle::AccelStruct) -> vk::AccelerationStructureKHR {
        self.node(accel_struct).raw
    }

    pub fn buffer(&self, accel_struct: handle::AccelStruct) -> handle::Resource {
        self.node(accel_struct).buffer
    }

    pub fn free(&self, resources: &ResourcePool, accel_struct: handle::AccelStruct) {
        if !accel_struct.is_valid() {
            return;
        }
        let node = self.pool.release(accel_struct.0);
        unsafe { self.ext.destroy_acceleration_structure(node.raw, None) };
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
        let ext = self.ext.clone();
        let leaks = self.pool.drain_allocated(|node| {
            unsafe { ext.destroy_acceleration_structure(node.raw, None) };
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
