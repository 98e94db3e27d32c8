//! Descriptor heap management.
//!
//! Two flavors: slot-recycling CPU heaps for RTV/DSV handles created at
//! translation time, and the two shader-visible heaps (CBV/SRV/UAV and
//! samplers) from which shader views take contiguous paged blocks.

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D12;

use arclight_hal::pool::PageAllocator;

use crate::HResult as _;

/// Elements per page in the shader-visible heaps.
pub const DESCRIPTOR_PAGE_SIZE: u32 = 8;

pub struct CpuDescriptorHeap {
    _heap: Direct3D12::ID3D12DescriptorHeap,
    start: Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE,
    increment: u32,
    free: Mutex<FreeState>,
}

struct FreeState {
    next_fresh: u32,
    capacity: u32,
    recycled: Vec<u32>,
}

impl CpuDescriptorHeap {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        ty: Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE,
        capacity: u32,
    ) -> Self {
        let desc = Direct3D12::D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: capacity,
            Flags: Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        let heap: Direct3D12::ID3D12DescriptorHeap =
            unsafe { device.CreateDescriptorHeap(&desc) }.expect_hr("descriptor heap creation");
        let start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) };

        CpuDescriptorHeap {
            _heap: heap,
            start,
            increment,
            free: Mutex::new(FreeState {
                next_fresh: 0,
                capacity,
                recycled: Vec::new(),
            }),
        }
    }

    pub fn allocate(&self) -> (u32, Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE) {
        let mut free = self.free.lock();
        let index = if let Some(index) = free.recycled.pop() {
            index
        } else {
            assert!(free.next_fresh < free.capacity, "CPU descriptor heap exhausted");
            let index = free.next_fresh;
            free.next_fresh += 1;
            index
        };
        (index, self.cpu_handle(index))
    }

    pub fn free(&self, index: u32) {
        self.free.lock().recycled.push(index);
    }

    pub fn cpu_handle(&self, index: u32) -> Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
        Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.start.ptr + (index * self.increment) as usize,
        }
    }
}

/// A shader-visible heap handing out contiguous descriptor blocks.
pub struct ShaderVisibleHeap {
    heap: Direct3D12::ID3D12DescriptorHeap,
    cpu_start: Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE,
    gpu_start: Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE,
    increment: u32,
    pages: Mutex<PageAllocator>,
}

impl ShaderVisibleHeap {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        ty: Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE,
        capacity: u32,
    ) -> Self {
        let desc = Direct3D12::D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: capacity,
            Flags: Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
            NodeMask: 0,
        };
        let heap: Direct3D12::ID3D12DescriptorHeap =
            unsafe { device.CreateDescriptorHeap(&desc) }.expect_hr("descriptor heap creation");
        let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let gpu_start = unsafe { heap.GetGPUDescriptorHandleForHeapStart() };
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) };

        ShaderVisibleHeap {
            heap,
            cpu_start,
            gpu_start,
            increment,
            pages: Mutex::new(PageAllocator::new(capacity, DESCRIPTOR_PAGE_SIZE)),
        }
    }

    pub fn raw(&self) -> &Direct3D12::ID3D12DescriptorHeap {
        &self.heap
    }

    /// Allocates a contiguous block of `count` descriptors; returns the
    /// page handle used for freeing.
    pub fn allocate_block(&self, count: u32) -> u32 {
        self.pages
            .lock()
            .allocate(count.max(1))
            .expect("shader-visible descriptor heap exhausted")
    }

    pub fn free_block(&self, page: u32) {
        self.pages.lock().free(page);
    }

    pub fn block_start(&self, page: u32) -> u32 {
        self.pages.lock().allocation_start_in_elements(page)
    }

    pub fn cpu_handle(&self, element: u32) -> Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
        Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start.ptr + (element * self.increment) as usize,
        }
    }

    pub fn gpu_handle(&self, element: u32) -> Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE {
        Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_start.ptr + u64::from(element * self.increment),
        }
    }
}
