//! The resource pool: buffers and images behind `handle::Resource`.
//!
//! Every node carries the resource's *master state*: the authoritative
//! state at submission boundaries. The master is only written at submit
//! time (under the submit path's lock) and by backbuffer injection, which
//! is why it lives in atomics rather than behind the pool mutex.

use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;
use parking_lot::Mutex;

use arclight_hal::arg::{BufferInfo as BufferDesc, RenderTargetInfo, TextureInfo};
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{ResourceHeap, ResourceState, TextureDimension};

use crate::conv;
use crate::descriptors::DescriptorAllocator;
use crate::memory::{Allocation, MemoryAllocator};

/// The maximum buffer size still qualifying for a dynamic-CBV descriptor.
const MAX_CBV_BYTES: u64 = 65536;

pub struct BufferInfo {
    pub raw: vk::Buffer,
    /// Dynamic-UBO descriptor sets, unconditionally created for every
    /// qualifying buffer: one for graphics, one for compute binding.
    pub cbv_set: vk::DescriptorSet,
    pub cbv_set_compute: vk::DescriptorSet,
    /// Vertex or index stride in bytes.
    pub stride: u32,
    pub width: u64,
    pub map: *mut u8,
}

pub struct ImageInfo {
    pub raw: vk::Image,
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
    pub kind: ResourceKind,
    /// `None` for injected backbuffers, whose image the swapchain owns.
    pub allocation: Option<Allocation>,
    master_state: AtomicU32,
    master_dependency: AtomicU32,
}

unsafe impl Send for ResourceNode {}
unsafe impl Sync for ResourceNode {}

impl ResourceNode {
    fn new(kind: ResourceKind, allocation: Option<Allocation>, state: ResourceState) -> Self {
        ResourceNode {
            kind,
            allocation,
            master_state: AtomicU32::new(state as u32),
            master_dependency: AtomicU32::new(0),
        }
    }

    pub fn master_state(&self) -> ResourceState {
        // the discriminant round-trip is private to this module
        unsafe { std::mem::transmute(self.master_state.load(Ordering::Acquire)) }
    }

    pub fn master_dependency(&self) -> vk::PipelineStageFlags {
        vk::PipelineStageFlags::from_raw(self.master_dependency.load(Ordering::Acquire))
    }

    pub fn set_master_state(&self, state: ResourceState, dependency: vk::PipelineStageFlags) {
        self.master_state.store(state as u32, Ordering::Release);
        self.master_dependency
            .store(dependency.as_raw(), Ordering::Release);
    }
}

pub struct ResourcePool {
    device: ash::Device,
    pool: LinkedPool<ResourceNode>,
    allocator: MemoryAllocator,
    descriptors: DescriptorAllocator,
    /// Layouts for the per-buffer dynamic-CBV sets. Kept alive for the
    /// whole backend lifetime; some drivers crash when a bound set's
    /// layout has been destroyed, without any validation warning.
    cbv_layout: vk::DescriptorSetLayout,
    cbv_layout_compute: vk::DescriptorSetLayout,
    raytracing: bool,
    /// The currently injected backbuffer (handle, its swapchain view).
    injected_backbuffer: Mutex<Option<(handle::Resource, vk::ImageView)>>,
}

impl ResourcePool {
    pub fn new(
        device: &ash::Device,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        max_num_resources: u32,
        max_num_cbvs: u32,
        raytracing: bool,
    ) -> Self {
        let descriptors = DescriptorAllocator::new(device, max_num_cbvs * 2, 0, 0, 0, false);

        let make_layout = |stages: vk::ShaderStageFlags| {
            let binding = vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(stages);
            let info = vk::DescriptorSetLayoutCreateInfo::default()
                .bindings(std::slice::from_ref(&binding));
            unsafe {
                device
                    .create_descriptor_set_layout(&info, None)
                    .expect("CBV set layout creation failed")
            }
        };

        ResourcePool {
            device: device.clone(),
            pool: LinkedPool::with_generation_checks(max_num_resources as usize),
            allocator: MemoryAllocator::new(instance, physical_device),
            descriptors,
            cbv_layout: make_layout(vk::ShaderStageFlags::ALL_GRAPHICS),
            cbv_layout_compute: make_layout(vk::ShaderStageFlags::COMPUTE),
            raytracing,
            injected_backbuffer: Mutex::new(None),
        }
    }

    //
    // creation
    //

    pub fn create_texture(&self, info: &TextureInfo, debug_name: Option<&str>) -> handle::Resource {
        let mip_count = if info.num_mips == 0 {
            full_mip_count(info.width, info.height)
        } else {
            info.num_mips
        };

        let mut usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if info.allow_uav {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let (image_type, array_layers, depth) = match info.dim {
            TextureDimension::D1 => (vk::ImageType::TYPE_1D, info.depth_or_array_size, 1),
            TextureDimension::D2 => (vk::ImageType::TYPE_2D, info.depth_or_array_size, 1),
            TextureDimension::D3 => (vk::ImageType::TYPE_3D, 1, info.depth_or_array_size),
        };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(conv::format(info.format))
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth,
            })
            .mip_levels(mip_count)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(if array_layers == 6 {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            });

        let image = unsafe {
            self.device
                .create_image(&create_info, None)
                .expect("image creation failed")
        };
        let allocation = self.allocator.allocate_image(&self.device, image);

        if let Some(name) = debug_name {
            debug!("created texture '{}' ({}x{})", name, info.width, info.height);
        }

        let node = ResourceNode::new(
            ResourceKind::Image(ImageInfo {
                raw: image,
                pixel_format: info.format,
                num_mips: mip_count,
                num_array_layers: array_layers,
                width: info.width,
                height: info.height,
            }),
            Some(allocation),
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
        let mut usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        usage |= if is_depth {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::STORAGE
        };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(conv::format(info.format))
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(info.array_size)
            .samples(vk::SampleCountFlags::from_raw(info.num_samples.max(1)))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            self.device
                .create_image(&create_info, None)
                .expect("render target creation failed")
        };
        let allocation = self.allocator.allocate_image(&self.device, image);

        if let Some(name) = debug_name {
            debug!(
                "created render target '{}' ({}x{}, {} samples)",
                name, info.width, info.height, info.num_samples
            );
        }

        let node = ResourceNode::new(
            ResourceKind::Image(ImageInfo {
                raw: image,
                pixel_format: info.format,
                num_mips: 1,
                num_array_layers: info.array_size,
                width: info.width,
                height: info.height,
            }),
            Some(allocation),
            ResourceState::Undefined,
        );
        handle::Resource(self.pool.acquire(node))
    }

    pub fn create_buffer(&self, info: &BufferDesc, debug_name: Option<&str>) -> handle::Resource {
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::INDIRECT_BUFFER;
        if self.raytracing {
            usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(info.size_bytes.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&create_info, None)
                .expect("buffer creation failed")
        };
        let allocation = self
            .allocator
            .allocate_buffer(&self.device, buffer, info.heap);

        // every buffer small enough to be bound as a CBV gets its two
        // dynamic-UBO descriptor sets up front
        let (cbv_set, cbv_set_compute) = if info.size_bytes <= MAX_CBV_BYTES {
            let set = self.descriptors.allocate(self.cbv_layout);
            let set_compute = self.descriptors.allocate(self.cbv_layout_compute);
            self.write_cbv_descriptor(set, buffer, info.size_bytes);
            self.write_cbv_descriptor(set_compute, buffer, info.size_bytes);
            (set, set_compute)
        } else {
            (vk::DescriptorSet::null(), vk::DescriptorSet::null())
        };

        if let Some(name) = debug_name {
            debug!("created buffer '{}' ({} bytes)", name, info.size_bytes);
        }

        let map = allocation.mapped;
        let node = ResourceNode::new(
            ResourceKind::Buffer(BufferInfo {
                raw: buffer,
                cbv_set,
                cbv_set_compute,
                stride: info.stride_bytes,
                width: info.size_bytes,
                map,
            }),
            Some(allocation),
            ResourceState::Undefined,
        );
        handle::Resource(self.pool.acquire(node))
    }

    /// Buffer creation with explicit usage flags, for backend-internal
    /// buffers (acceleration-structure storage, scratch, instance data).
    pub fn create_buffer_internal(
        &self,
        size_bytes: u64,
        heap: ResourceHeap,
        usage: vk::BufferUsageFlags,
    ) -> handle::Resource {
        let create_info = vk::BufferCreateInfo::default()
            .size(size_bytes.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device
                .create_buffer(&create_info, None)
                .expect("internal buffer creation failed")
        };
        let allocation = self.allocator.allocate_buffer(&self.device, buffer, heap);
        let map = allocation.mapped;
        let node = ResourceNode::new(
            ResourceKind::Buffer(BufferInfo {
                raw: buffer,
                cbv_set: vk::DescriptorSet::null(),
                cbv_set_compute: vk::DescriptorSet::null(),
                stride: 0,
                width: size_bytes,
                map,
            }),
            Some(allocation),
            ResourceState::Undefined,
        );
        handle::Resource(self.pool.acquire(node))
    }

    /// Device address of a buffer; requires the raytracing usage flags.
    pub fn buffer_device_address(&self, resource: handle::Resource) -> u64 {
        let info =
            vk::BufferDeviceAddressInfo::default().buffer(self.raw_buffer(resource));
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    fn write_cbv_descriptor(&self, set: vk::DescriptorSet, buffer: vk::Buffer, size: u64) {
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(size.min(MAX_CBV_BYTES));
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }

    //
    // destruction
    //

    pub fn free(&self, resource: handle::Resource) {
        if !resource.is_valid() {
            return;
        }
        let node = self.pool.release(resource.0);
        self.destroy_node(node);
    }

    pub fn free_range(&self, resources: &[handle::Resource]) {
        for &resource in resources {
            self.free(resource);
        }
    }

    fn destroy_node(&self, node: ResourceNode) {
        match node.kind {
            ResourceKind::Buffer(info) => unsafe {
                if info.cbv_set != vk::DescriptorSet::null() {
                    self.descriptors.free(info.cbv_set);
                    self.descriptors.free(info.cbv_set_compute);
                }
                self.device.destroy_buffer(info.raw, None);
            },
            ResourceKind::Image(info) => {
                if node.allocation.is_some() {
                    unsafe { self.device.destroy_image(info.raw, None) };
                }
            }
        }
        if let Some(allocation) = node.allocation {
            self.allocator.free(&self.device, &allocation);
        }
    }

    pub fn destroy(&mut self) {
        let device = self.device.clone();
        let allocator = &self.allocator;
        let descriptors = &self.descriptors;
        let num_injected = usize::from(self.injected_backbuffer.get_mut().is_some());
        let leaks = self.pool.drain_allocated(|node| {
            match &node.kind {
                ResourceKind::Buffer(info) => unsafe {
                    if info.cbv_set != vk::DescriptorSet::null() {
                        descriptors.free(info.cbv_set);
                        descriptors.free(info.cbv_set_compute);
                    }
                    device.destroy_buffer(info.raw, None);
                },
                ResourceKind::Image(info) => {
                    if node.allocation.is_some() {
                        unsafe { device.destroy_image(info.raw, None) };
                    }
                }
            }
            if let Some(allocation) = &node.allocation {
                allocator.free(&device, allocation);
            }
        });
        if leaks > num_injected {
            // the injected backbuffer legitimately stays alive
            info!("leaked {} resource handle(s)", leaks - num_injected);
        }
        unsafe {
            self.device.destroy_descriptor_set_layout(self.cbv_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.cbv_layout_compute, None);
        }
        self.descriptors.destroy();
    }

    //
    // access
    //

    fn node(&self, resource: handle::Resource) -> &ResourceNode {
        self.pool.get(resource.0)
    }

    pub fn is_alive(&self, resource: handle::Resource) -> bool {
        self.pool.is_alive(resource.0)
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

    pub fn raw_buffer(&self, resource: handle::Resource) -> vk::Buffer {
        self.buffer_info(resource).raw
    }

    pub fn raw_image(&self, resource: handle::Resource) -> vk::Image {
        self.image_info(resource).raw
    }

    pub fn mapped_memory(&self, resource: handle::Resource) -> *mut u8 {
        let map = self.buffer_info(resource).map;
        assert!(!map.is_null(), "buffer was not created on a mapped heap");
        map
    }

    pub fn flush_mapped_memory(&self, resource: handle::Resource) {
        if let Some(allocation) = &self.node(resource).allocation {
            self.allocator.flush(&self.device, allocation);
        }
    }

    pub fn resource_state(&self, resource: handle::Resource) -> ResourceState {
        self.node(resource).master_state()
    }

    pub fn resource_state_dependency(&self, resource: handle::Resource) -> vk::PipelineStageFlags {
        self.node(resource).master_dependency()
    }

    /// Writes the master state. Requires exclusive access to the resource
    /// (the submit path's contract).
    pub fn set_resource_state(
        &self,
        resource: handle::Resource,
        state: ResourceState,
        dependency: vk::PipelineStageFlags,
    ) {
        self.node(resource).set_master_state(state, dependency);
    }

    pub fn print_information(&self, resource: handle::Resource) {
        match &self.node(resource).kind {
            ResourceKind::Buffer(info) => info!(
                "resource {:?}: buffer, {} bytes, stride {}, mapped: {}, state {:?}",
                resource,
                info.width,
                info.stride,
                !info.map.is_null(),
                self.resource_state(resource)
            ),
            ResourceKind::Image(info) => info!(
                "resource {:?}: image, {}x{}, {:?}, {} mips, {} layers, state {:?}",
                resource,
                info.width,
                info.height,
                info.pixel_format,
                info.num_mips,
                info.num_array_layers,
                self.resource_state(resource)
            ),
        }
    }

    //
    // backbuffer injection
    //
    // Swapchain backbuffers are exposed as `handle::Resource` so they can
    // be used like any other render target and follow the same transition
    // semantics. The handle is only valid from acquire until present or
    // resize.
    //

    pub fn inject_backbuffer(
        &self,
        raw_image: vk::Image,
        state: ResourceState,
        view: vk::ImageView,
        format: Format,
        width: u32,
        height: u32,
    ) -> handle::Resource {
        let node = ResourceNode::new(
            ResourceKind::Image(ImageInfo {
                raw: raw_image,
                pixel_format: format,
                num_mips: 1,
                num_array_layers: 1,
                width,
                height,
            }),
            None,
            state,
        );
        let new_handle = handle::Resource(self.pool.acquire(node));

        let mut injected = self.injected_backbuffer.lock();
        if let Some((old, _)) = injected.take() {
            drop(self.pool.release(old.0));
        }
        *injected = Some((new_handle, view));
        new_handle
    }

    pub fn is_backbuffer(&self, resource: handle::Resource) -> bool {
        self.injected_backbuffer
            .lock()
            .map_or(false, |(h, _)| h == resource)
    }

    pub fn backbuffer_view(&self) -> vk::ImageView {
        self.injected_backbuffer
            .lock()
            .expect("no backbuffer injected")
            .1
    }
}

fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(4, 4), 3);
        assert_eq!(full_mip_count(1024, 512), 11);
        assert_eq!(full_mip_count(1000, 600), 10);
    }
}
