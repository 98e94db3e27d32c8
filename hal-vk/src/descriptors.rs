//! The backing descriptor pool for shader views and dynamic CBV sets.

use ash::vk;

pub struct DescriptorAllocator {
    device: ash::Device,
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    pub fn new(
        device: &ash::Device,
        num_cbvs: u32,
        num_srvs: u32,
        num_uavs: u32,
        num_samplers: u32,
        raytracing: bool,
    ) -> Self {
        let mut sizes = vec![
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(num_cbvs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(num_srvs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_TEXEL_BUFFER)
                .descriptor_count(num_srvs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(num_srvs + num_uavs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(num_uavs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_TEXEL_BUFFER)
                .descriptor_count(num_uavs),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(num_samplers),
        ];
        if raytracing {
            sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .descriptor_count(num_srvs),
            );
        }

        let max_sets = num_cbvs + num_srvs + num_uavs + num_samplers;
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&info, None)
                .expect("descriptor pool creation failed")
        };

        DescriptorAllocator {
            device: device.clone(),
            pool,
        }
    }

    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device
                .allocate_descriptor_sets(&info)
                .expect("descriptor set allocation failed")
        };
        sets[0]
    }

    pub fn free(&self, set: vk::DescriptorSet) {
        unsafe {
            self.device
                .free_descriptor_sets(self.pool, &[set])
                .expect("descriptor set free failed");
        }
    }

    pub fn destroy(&self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
