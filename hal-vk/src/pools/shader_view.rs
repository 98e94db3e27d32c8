//! The shader-view pool: immutable SRV/UAV/sampler descriptor sets.

use ash::vk;
use smallvec::SmallVec;

use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{
    ResourceView, ResourceViewDimension, ResourceViewInfo, SamplerConfig,
};

use crate::conv;
use crate::descriptors::DescriptorAllocator;
use crate::pools::accel_struct::AccelStructPool;
use crate::pools::resource::ResourcePool;
use crate::spirv_patch::{SAMPLER_BINDING_START, SRV_BINDING_START, UAV_BINDING_START};

struct ShaderViewNode {
    set: vk::DescriptorSet,
    /// The layout this set was allocated from. It must stay alive as long
    /// as the set: binding a set whose layout has been destroyed crashes
    /// some drivers on compute bind points without validation output.
    layout: vk::DescriptorSetLayout,
    image_views: SmallVec<[vk::ImageView; 4]>,
    samplers: SmallVec<[vk::Sampler; 2]>,
}

pub struct ShaderViewPool {
    device: ash::Device,
    pool: LinkedPool<ShaderViewNode>,
    descriptors: DescriptorAllocator,
}

impl ShaderViewPool {
    pub fn new(
        device: &ash::Device,
        num_srvs: u32,
        num_uavs: u32,
        num_samplers: u32,
        raytracing: bool,
    ) -> Self {
        ShaderViewPool {
            device: device.clone(),
            pool: LinkedPool::new((num_srvs + num_uavs + num_samplers).max(1) as usize),
            descriptors: DescriptorAllocator::new(device, 0, num_srvs, num_uavs, num_samplers, raytracing),
        }
    }

    pub fn create(
        &self,
        resources: &ResourcePool,
        accel_structs: Option<&AccelStructPool>,
        srvs: &[ResourceView],
        uavs: &[ResourceView],
        samplers: &[SamplerConfig],
        usage_compute: bool,
    ) -> handle::ShaderView {
        let stages = if usage_compute {
            vk::ShaderStageFlags::COMPUTE
        } else {
            vk::ShaderStageFlags::ALL_GRAPHICS
        };

        // build the single-use layout matching this view's contents
        let mut bindings: SmallVec<[vk::DescriptorSetLayoutBinding<'static>; 8]> = SmallVec::new();
        for (i, srv) in srvs.iter().enumerate() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(SRV_BINDING_START + i as u32)
                    .descriptor_type(view_descriptor_type(srv, false))
                    .descriptor_count(1)
                    .stage_flags(stages),
            );
        }
        for (i, uav) in uavs.iter().enumerate() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(UAV_BINDING_START + i as u32)
                    .descriptor_type(view_descriptor_type(uav, true))
                    .descriptor_count(1)
                    .stage_flags(stages),
            );
        }
        for i in 0..samplers.len() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(SAMPLER_BINDING_START + i as u32)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(stages),
            );
        }

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            self.device
                .create_descriptor_set_layout(&layout_info, None)
                .expect("shader view layout creation failed")
        };
        let set = self.descriptors.allocate(layout);

        let mut node = ShaderViewNode {
            set,
            layout,
            image_views: SmallVec::new(),
            samplers: SmallVec::new(),
        };

        for (i, srv) in srvs.iter().enumerate() {
            self.write_view(
                resources,
                accel_structs,
                &mut node,
                srv,
                SRV_BINDING_START + i as u32,
                false,
            );
        }
        for (i, uav) in uavs.iter().enumerate() {
            self.write_view(
                resources,
                accel_structs,
                &mut node,
                uav,
                UAV_BINDING_START + i as u32,
                true,
            );
        }
        for (i, config) in samplers.iter().enumerate() {
            let sampler = self.make_sampler(config);
            node.samplers.push(sampler);
            let image_info = vk::DescriptorImageInfo::default().sampler(sampler);
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING_START + i as u32)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(std::slice::from_ref(&image_info));
            unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        }

        handle::ShaderView(self.pool.acquire(node))
    }

    fn write_view(
        &self,
        resources: &ResourcePool,
        accel_structs: Option<&AccelStructPool>,
        node: &mut ShaderViewNode,
        view: &ResourceView,
        binding: u32,
        is_uav: bool,
    ) {
        let ty = view_descriptor_type(view, is_uav);
        match &view.info {
            ResourceViewInfo::Buffer(info) => {
                let raw = resources.raw_buffer(view.resource);
                let stride = u64::from(info.element_stride_bytes.max(1));
                let (offset, range) = if view.dimension == ResourceViewDimension::RawBuffer {
                    (u64::from(info.element_start), u64::from(info.num_elements))
                } else {
                    (
                        u64::from(info.element_start) * stride,
                        u64::from(info.num_elements) * stride,
                    )
                };
                let buffer_info = vk::DescriptorBufferInfo::default()
                    .buffer(raw)
                    .offset(offset)
                    .range(range.max(1));
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(node.set)
                    .dst_binding(binding)
                    .descriptor_type(ty)
                    .buffer_info(std::slice::from_ref(&buffer_info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            ResourceViewInfo::Texture(_) => {
                let image_view = self.make_image_view(resources, view, is_uav);
                node.image_views.push(image_view);
                let layout = if is_uav {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                let image_info = vk::DescriptorImageInfo::default()
                    .image_view(image_view)
                    .image_layout(layout);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(node.set)
                    .dst_binding(binding)
                    .descriptor_type(ty)
                    .image_info(std::slice::from_ref(&image_info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            ResourceViewInfo::AccelStruct(accel) => {
                let pool = accel_structs.expect("raytracing is not enabled");
                let raw = pool.raw_accel_struct(*accel);
                let structures = [raw];
                let mut accel_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(&structures);
                let mut write = vk::WriteDescriptorSet::default()
                    .dst_set(node.set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .push_next(&mut accel_info);
                write.descriptor_count = 1;
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            ResourceViewInfo::None => panic!("null resource view in shader view"),
        }
    }

    /// Creates a transient image view for `view`. Also used by the
    /// translator when building framebuffers for non-backbuffer targets;
    /// those views are pinned to the responsible command allocator.
    pub fn make_image_view(
        &self,
        resources: &ResourcePool,
        view: &ResourceView,
        is_uav: bool,
    ) -> vk::ImageView {
        let image_info = resources.image_info(view.resource);
        let texture_info = match &view.info {
            ResourceViewInfo::Texture(info) => info,
            _ => panic!("image view requested for a non-texture resource view"),
        };

        let view_type = match view.dimension {
            ResourceViewDimension::Texture1d => vk::ImageViewType::TYPE_1D,
            ResourceViewDimension::Texture1dArray => vk::ImageViewType::TYPE_1D_ARRAY,
            ResourceViewDimension::Texture2d | ResourceViewDimension::Texture2dMs => {
                vk::ImageViewType::TYPE_2D
            }
            ResourceViewDimension::Texture2dArray | ResourceViewDimension::Texture2dMsArray => {
                vk::ImageViewType::TYPE_2D_ARRAY
            }
            ResourceViewDimension::Texture3d => vk::ImageViewType::TYPE_3D,
            ResourceViewDimension::TextureCube => vk::ImageViewType::CUBE,
            ResourceViewDimension::TextureCubeArray => vk::ImageViewType::CUBE_ARRAY,
            other => panic!("resource view dimension {:?} is not an image", other),
        };

        let _ = is_uav;
        let mip_count = if texture_info.mip_size == u32::MAX {
            vk::REMAINING_MIP_LEVELS
        } else {
            texture_info.mip_size
        };

        let info = vk::ImageViewCreateInfo::default()
            .image(image_info.raw)
            .view_type(view_type)
            .format(conv::format(texture_info.pixel_format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(conv::image_aspect(texture_info.pixel_format))
                    .base_mip_level(texture_info.mip_start)
                    .level_count(mip_count)
                    .base_array_layer(texture_info.array_start)
                    .layer_count(texture_info.array_size.max(1)),
            );

        unsafe {
            self.device
                .create_image_view(&info, None)
                .expect("image view creation failed")
        }
    }

    fn make_sampler(&self, config: &SamplerConfig) -> vk::Sampler {
        let (min, mag, mipmap, anisotropy) = conv::sampler_filter(config.filter);
        let compare_enabled =
            config.compare_func != arclight_hal::types::SamplerCompareFunc::Disabled;

        let info = vk::SamplerCreateInfo::default()
            .min_filter(min)
            .mag_filter(mag)
            .mipmap_mode(mipmap)
            .address_mode_u(conv::sampler_address_mode(config.address_u))
            .address_mode_v(conv::sampler_address_mode(config.address_v))
            .address_mode_w(conv::sampler_address_mode(config.address_w))
            .min_lod(config.min_lod)
            .max_lod(config.max_lod)
            .mip_lod_bias(config.lod_bias)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(config.max_anisotropy as f32)
            .compare_enable(compare_enabled)
            .compare_op(conv::sampler_compare_op(config.compare_func))
            .border_color(conv::sampler_border_color(config.border_color));

        unsafe {
            self.device
                .create_sampler(&info, None)
                .expect("sampler creation failed")
        }
    }

    pub fn descriptor_set(&self, shader_view: handle::ShaderView) -> vk::DescriptorSet {
        self.pool.get(shader_view.0).set
    }

    pub fn free(&self, shader_view: handle::ShaderView) {
        if !shader_view.is_valid() {
            return;
        }
        let node = self.pool.release(shader_view.0);
        self.destroy_node(node);
    }

    pub fn free_range(&self, shader_views: &[handle::ShaderView]) {
        for &sv in shader_views {
            self.free(sv);
        }
    }

    fn destroy_node(&self, node: ShaderViewNode) {
        unsafe {
            for view in &node.image_views {
                self.device.destroy_image_view(*view, None);
            }
            for sampler in &node.samplers {
                self.device.destroy_sampler(*sampler, None);
            }
        }
        self.descriptors.free(node.set);
        unsafe {
            self.device.destroy_descriptor_set_layout(node.layout, None);
        }
    }

    pub fn destroy(&mut self) {
        let device = self.device.clone();
        let descriptors = &self.descriptors;
        let leaks = self.pool.drain_allocated(|node| {
            unsafe {
                for view in &node.image_views {
                    device.destroy_image_view(*view, None);
                }
                for sampler in &node.samplers {
                    device.destroy_sampler(*sampler, None);
                }
            }
            descriptors.free(node.set);
            unsafe { device.destroy_descriptor_set_layout(node.layout, None) };
        });
        if leaks > 0 {
            info!("leaked {} shader view handle(s)", leaks);
        }
        self.descriptors.destroy();
    }
}

fn view_descriptor_type(view: &ResourceView, is_uav: bool) -> vk::DescriptorType {
    match view.dimension {
        ResourceViewDimension::Buffer | ResourceViewDimension::RawBuffer => {
            vk::DescriptorType::STORAGE_BUFFER
        }
        ResourceViewDimension::RaytracingAccelStruct => {
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        }
        ResourceViewDimension::None => panic!("null resource view dimension"),
        _ => {
            if is_uav {
                vk::DescriptorType::STORAGE_IMAGE
            } else {
                vk::DescriptorType::SAMPLED_IMAGE
            }
        }
    }
}
