//! The shader-view pool: descriptor-table blocks in the shader-visible
//! heaps (SRVs followed by UAVs in one contiguous block, samplers in a
//! second).

use windows::Win32::Graphics::{Direct3D12, Dxgi};

use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::{
    ResourceView, ResourceViewDimension, ResourceViewInfo, SamplerBorderColor, SamplerCompareFunc,
    SamplerConfig,
};

use crate::conv;
use crate::descriptors::ShaderVisibleHeap;
use crate::pools::accel_struct::AccelStructPool;
use crate::pools::resource::ResourcePool;

const COMPONENT_MAPPING_DEFAULT: u32 = 0x1688;

struct ShaderViewNode {
    srv_uav_page: Option<u32>,
    sampler_page: Option<u32>,
    gpu_srv_uav: Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE,
    gpu_samplers: Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE,
}

unsafe impl Send for ShaderViewNode {}
unsafe impl Sync for ShaderViewNode {}

pub struct ShaderViewPool {
    device: Direct3D12::ID3D12Device,
    pool: LinkedPool<ShaderViewNode>,
    pub srv_uav_heap: ShaderVisibleHeap,
    pub sampler_heap: ShaderVisibleHeap,
}

unsafe impl Send for ShaderViewPool {}
unsafe impl Sync for ShaderViewPool {}

impl ShaderViewPool {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        num_srvs: u32,
        num_uavs: u32,
        num_samplers: u32,
    ) -> Self {
        ShaderViewPool {
            device: device.clone(),
            pool: LinkedPool::new((num_srvs + num_uavs + num_samplers).max(1) as usize),
            srv_uav_heap: ShaderVisibleHeap::new(
                device,
                Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                num_srvs + num_uavs,
            ),
            sampler_heap: ShaderVisibleHeap::new(
                device,
                Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
                num_samplers.max(1),
            ),
        }
    }

    pub fn create(
        &self,
        resources: &ResourcePool,
        accel_structs: Option<&AccelStructPool>,
        srvs: &[ResourceView],
        uavs: &[ResourceView],
        samplers: &[SamplerConfig],
    ) -> handle::ShaderView {
        let num_srv_uav = (srvs.len() + uavs.len()) as u32;
        let (srv_uav_page, gpu_srv_uav) = if num_srv_uav > 0 {
            let page = self.srv_uav_heap.allocate_block(num_srv_uav);
            let start = self.srv_uav_heap.block_start(page);
            let mut element = start;
            for srv in srvs {
                self.write_srv(resources, accel_structs, srv, element);
                element += 1;
            }
            for uav in uavs {
                self.write_uav(resources, uav, element);
                element += 1;
            }
            (Some(page), self.srv_uav_heap.gpu_handle(start))
        } else {
            (None, Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE::default())
        };

        let (sampler_page, gpu_samplers) = if !samplers.is_empty() {
            let page = self.sampler_heap.allocate_block(samplers.len() as u32);
            let start = self.sampler_heap.block_start(page);
            for (i, config) in samplers.iter().enumerate() {
                self.write_sampler(config, start + i as u32);
            }
            (Some(page), self.sampler_heap.gpu_handle(start))
        } else {
            (None, Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE::default())
        };

        handle::ShaderView(self.pool.acquire(ShaderViewNode {
            srv_uav_page,
            sampler_page,
            gpu_srv_uav,
            gpu_samplers,
        }))
    }

    fn write_srv(
        &self,
        resources: &ResourcePool,
        accel_structs: Option<&AccelStructPool>,
        view: &ResourceView,
        element: u32,
    ) {
        let dest = self.srv_uav_heap.cpu_handle(element);
        let mut desc = Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: Dxgi::DXGI_FORMAT_UNKNOWN,
            ViewDimension: Direct3D12::D3D12_SRV_DIMENSION_UNKNOWN,
            Shader4ComponentMapping: COMPONENT_MAPPING_DEFAULT,
            Anonymous: unsafe { std::mem::zeroed() },
        };

        match (&view.info, view.dimension) {
            (ResourceViewInfo::AccelStruct(accel), _) => {
                let pool = accel_structs.expect("raytracing is not enabled");
                desc.ViewDimension =
                    Direct3D12::D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE;
                desc.Anonymous.RaytracingAccelerationStructure =
                    Direct3D12::D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                        Location: pool.gpu_address(resources, *accel),
                    };
                unsafe {
                    self.device.CreateShaderResourceView(
                        None,
                        &desc,
                        dest,
                    )
                };
                return;
            }
            (ResourceViewInfo::Buffer(info), ResourceViewDimension::RawBuffer) => {
                desc.Format = Dxgi::DXGI_FORMAT_R32_TYPELESS;
                desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = Direct3D12::D3D12_BUFFER_SRV {
                    FirstElement: u64::from(info.element_start) / 4,
                    NumElements: info.num_elements / 4,
                    StructureByteStride: 0,
                    Flags: Direct3D12::D3D12_BUFFER_SRV_FLAG_RAW,
                };
            }
            (ResourceViewInfo::Buffer(info), _) => {
                desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = Direct3D12::D3D12_BUFFER_SRV {
                    FirstElement: u64::from(info.element_start),
                    NumElements: info.num_elements,
                    StructureByteStride: info.element_stride_bytes,
                    Flags: Direct3D12::D3D12_BUFFER_SRV_FLAG_NONE,
                };
            }
            (ResourceViewInfo::Texture(info), dimension) => {
                desc.Format = conv::view_format(info.pixel_format);
                let mip_count = if info.mip_size == u32::MAX {
                    u32::MAX
                } else {
                    info.mip_size
                };
                match dimension {
                    ResourceViewDimension::Texture1d => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE1D;
                        desc.Anonymous.Texture1D = Direct3D12::D3D12_TEX1D_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                    ResourceViewDimension::Texture2dMs => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE2DMS;
                    }
                    ResourceViewDimension::Texture2dMsArray => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY;
                        desc.Anonymous.Texture2DMSArray =
                            Direct3D12::D3D12_TEX2DMS_ARRAY_SRV {
                                FirstArraySlice: info.array_start,
                                ArraySize: info.array_size,
                            };
                    }
                    ResourceViewDimension::Texture2dArray => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE2DARRAY;
                        desc.Anonymous.Texture2DArray = Direct3D12::D3D12_TEX2D_ARRAY_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            FirstArraySlice: info.array_start,
                            ArraySize: info.array_size,
                            PlaneSlice: 0,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                    ResourceViewDimension::Texture3d => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE3D;
                        desc.Anonymous.Texture3D = Direct3D12::D3D12_TEX3D_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                    ResourceViewDimension::TextureCube => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURECUBE;
                        desc.Anonymous.TextureCube = Direct3D12::D3D12_TEXCUBE_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                    ResourceViewDimension::TextureCubeArray => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURECUBEARRAY;
                        desc.Anonymous.TextureCubeArray = Direct3D12::D3D12_TEXCUBE_ARRAY_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            First2DArrayFace: info.array_start,
                            NumCubes: info.array_size / 6,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                    _ => {
                        desc.ViewDimension = Direct3D12::D3D12_SRV_DIMENSION_TEXTURE2D;
                        desc.Anonymous.Texture2D = Direct3D12::D3D12_TEX2D_SRV {
                            MostDetailedMip: info.mip_start,
                            MipLevels: mip_count,
                            PlaneSlice: 0,
                            ResourceMinLODClamp: 0.0,
                        };
                    }
                }
            }
            (ResourceViewInfo::None, _) => panic!("null resource view in shader view"),
        }

        unsafe {
            self.device
                .CreateShaderResourceView(resources.raw(view.resource), &desc, dest)
        };
    }

    fn write_uav(&self, resources: &ResourcePool, view: &ResourceView, element: u32) {
        let dest = self.srv_uav_heap.cpu_handle(element);
        let mut desc = Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: Dxgi::DXGI_FORMAT_UNKNOWN,
            ViewDimension: Direct3D12::D3D12_UAV_DIMENSION_UNKNOWN,
            Anonymous: unsafe { std::mem::zeroed() },
        };

        match (&view.info, view.dimension) {
            (ResourceViewInfo::Buffer(info), ResourceViewDimension::RawBuffer) => {
                desc.Format = Dxgi::DXGI_FORMAT_R32_TYPELESS;
                desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = Direct3D12::D3D12_BUFFER_UAV {
                    FirstElement: u64::from(info.element_start) / 4,
                    NumElements: info.num_elements / 4,
                    StructureByteStride: 0,
                    CounterOffsetInBytes: 0,
                    Flags: Direct3D12::D3D12_BUFFER_UAV_FLAG_RAW,
                };
            }
            (ResourceViewInfo::Buffer(info), _) => {
                desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = Direct3D12::D3D12_BUFFER_UAV {
                    FirstElement: u64::from(info.element_start),
                    NumElements: info.num_elements,
                    StructureByteStride: info.element_stride_bytes,
                    CounterOffsetInBytes: 0,
                    Flags: Direct3D12::D3D12_BUFFER_UAV_FLAG_NONE,
                };
            }
            (ResourceViewInfo::Texture(info), dimension) => {
                desc.Format = conv::view_format(info.pixel_format);
                match dimension {
                    ResourceViewDimension::Texture1d => {
                        desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_TEXTURE1D;
                        desc.Anonymous.Texture1D = Direct3D12::D3D12_TEX1D_UAV {
                            MipSlice: info.mip_start,
                        };
                    }
                    ResourceViewDimension::Texture2dArray => {
                        desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_TEXTURE2DARRAY;
                        desc.Anonymous.Texture2DArray = Direct3D12::D3D12_TEX2D_ARRAY_UAV {
                            MipSlice: info.mip_start,
                            FirstArraySlice: info.array_start,
                            ArraySize: info.array_size,
                            PlaneSlice: 0,
                        };
                    }
                    ResourceViewDimension::Texture3d => {
                        desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_TEXTURE3D;
                        desc.Anonymous.Texture3D = Direct3D12::D3D12_TEX3D_UAV {
                            MipSlice: info.mip_start,
                            FirstWSlice: info.array_start,
                            WSize: info.array_size,
                        };
                    }
                    _ => {
                        desc.ViewDimension = Direct3D12::D3D12_UAV_DIMENSION_TEXTURE2D;
                        desc.Anonymous.Texture2D = Direct3D12::D3D12_TEX2D_UAV {
                            MipSlice: info.mip_start,
                            PlaneSlice: 0,
                        };
                    }
                }
            }
            _ => panic!("invalid resource view for a UAV"),
        }

        unsafe {
            self.device.CreateUnorderedAccessView(
                resources.raw(view.resource),
                None,
                &desc,
                dest,
            )
        };
    }

    fn write_sampler(&self, config: &SamplerConfig, element: u32) {
        let compare = config.compare_func != SamplerCompareFunc::Disabled;
        let border = match config.border_color {
            SamplerBorderColor::BlackTransparentFloat | SamplerBorderColor::BlackTransparentInt => {
                [0.0, 0.0, 0.0, 0.0]
            }
            SamplerBorderColor::BlackFloat | SamplerBorderColor::BlackInt => [0.0, 0.0, 0.0, 1.0],
            SamplerBorderColor::WhiteFloat | SamplerBorderColor::WhiteInt => [1.0, 1.0, 1.0, 1.0],
        };
        let desc = Direct3D12::D3D12_SAMPLER_DESC {
            Filter: conv::sampler_filter(config.filter, compare),
            AddressU: conv::address_mode(config.address_u),
            AddressV: conv::address_mode(config.address_v),
            AddressW: conv::address_mode(config.address_w),
            MipLODBias: config.lod_bias,
            MaxAnisotropy: config.max_anisotropy,
            ComparisonFunc: conv::sampler_comparison_func(config.compare_func),
            BorderColor: border,
            MinLOD: config.min_lod,
            MaxLOD: config.max_lod,
        };
        unsafe {
            self.device
                .CreateSampler(&desc, self.sampler_heap.cpu_handle(element))
        };
    }

    pub fn srv_uav_table(
        &self,
        shader_view: handle::ShaderView,
    ) -> Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE {
        self.pool.get(shader_view.0).gpu_srv_uav
    }

    pub fn sampler_table(
        &self,
        shader_view: handle::ShaderView,
    ) -> Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE {
        self.pool.get(shader_view.0).gpu_samplers
    }

    pub fn free(&self, shader_view: handle::ShaderView) {
        if !shader_view.is_valid() {
            return;
        }
        let node = self.pool.release(shader_view.0);
        if let Some(page) = node.srv_uav_page {
            self.srv_uav_heap.free_block(page);
        }
        if let Some(page) = node.sampler_page {
            self.sampler_heap.free_block(page);
        }
    }

    pub fn free_range(&self, shader_views: &[handle::ShaderView]) {
        for &sv in shader_views {
            self.free(sv);
        }
    }

    pub fn destroy(&mut self) {
        let srv_uav_heap = &self.srv_uav_heap;
        let sampler_heap = &self.sampler_heap;
        let leaks = self.pool.drain_allocated(|node| {
            if let Some(page) = node.srv_uav_page {
                srv_uav_heap.free_block(page);
            }
            if let Some(page) = node.sampler_page {
                sampler_heap.free_block(page);
            }
        });
        if leaks > 0 {
            info!("leaked {} shader view handle(s)", leaks);
        }
    }
}
