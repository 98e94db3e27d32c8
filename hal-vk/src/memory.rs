//! Device-memory provider.
//!
//! Resources get dedicated allocations bound straight to their buffer or
//! image; the interface is narrow (allocate/bind/map/free) so a pooling
//! suballocator can stand behind it without touching the resource pool.

use ash::vk;

use arclight_hal::types::ResourceHeap;

/// One device-memory block backing a single resource.
pub struct Allocation {
    pub memory: vk::DeviceMemory,
    pub size: u64,
    /// Persistent CPU pointer for host-visible heaps, else null.
    pub mapped: *mut u8,
    coherent: bool,
}

unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub fn is_host_visible(&self) -> bool {
        !self.mapped.is_null()
    }
}

pub struct MemoryAllocator {
    memory_props: vk::PhysicalDeviceMemoryProperties,
}

impl MemoryAllocator {
    pub fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let memory_props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        MemoryAllocator { memory_props }
    }

    fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..self.memory_props.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0
                && self.memory_props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
    }

    fn heap_properties(heap: ResourceHeap) -> (vk::MemoryPropertyFlags, vk::MemoryPropertyFlags) {
        match heap {
            ResourceHeap::Gpu => (
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ),
            ResourceHeap::Upload => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            ),
            ResourceHeap::Readback => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            ),
        }
    }

    fn allocate(
        &self,
        device: &ash::Device,
        requirements: vk::MemoryRequirements,
        heap: ResourceHeap,
    ) -> Allocation {
        let (preferred, fallback) = Self::heap_properties(heap);
        let type_index = self
            .find_memory_type(requirements.memory_type_bits, preferred)
            .or_else(|| self.find_memory_type(requirements.memory_type_bits, fallback))
            .expect("no suitable memory type for resource");

        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory = unsafe {
            device
                .allocate_memory(&info, None)
                .expect("device memory allocation failed")
        };

        let host_visible = heap != ResourceHeap::Gpu;
        let mapped = if host_visible {
            unsafe {
                device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .expect("mapping host-visible memory failed") as *mut u8
            }
        } else {
            std::ptr::null_mut()
        };

        let coherent = self.memory_props.memory_types[type_index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);

        Allocation {
            memory,
            size: requirements.size,
            mapped,
            coherent,
        }
    }

    /// Allocates and binds memory for `buffer`; host-visible heaps come
    /// back persistently mapped.
    pub fn allocate_buffer(
        &self,
        device: &ash::Device,
        buffer: vk::Buffer,
        heap: ResourceHeap,
    ) -> Allocation {
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = self.allocate(device, requirements, heap);
        unsafe {
            device
                .bind_buffer_memory(buffer, allocation.memory, 0)
                .expect("binding buffer memory failed");
        }
        allocation
    }

    /// Allocates and binds device-local memory for `image`.
    pub fn allocate_image(&self, device: &ash::Device, image: vk::Image) -> Allocation {
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = self.allocate(device, requirements, ResourceHeap::Gpu);
        unsafe {
            device
                .bind_image_memory(image, allocation.memory, 0)
                .expect("binding image memory failed");
        }
        allocation
    }

    /// Makes CPU writes visible on non-coherent mappings; a no-op on
    /// coherent memory.
    pub fn flush(&self, device: &ash::Device, allocation: &Allocation) {
        if allocation.coherent || allocation.mapped.is_null() {
            return;
        }
        let range = vk::MappedMemoryRange::default()
            .memory(allocation.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            device
                .flush_mapped_memory_ranges(&[range])
                .expect("flushing mapped memory failed");
        }
    }

    pub fn free(&self, device: &ash::Device, allocation: &Allocation) {
        unsafe {
            // mapped ranges are implicitly unmapped by the free
            device.free_memory(allocation.memory, None);
        }
    }
}
