//! The query pool: paged ranges over three native query heaps, with the
//! same type-tagged handle scheme as the Vulkan side.

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D12;

use arclight_hal::handle;
use arclight_hal::pool::PageAllocator;
use arclight_hal::types::QueryType;

use crate::HResult as _;

pub const QUERY_PAGE_SIZE: u32 = 2;
pub const INDEX_OFFSET_STEP: u32 = 1_000_000;

pub fn query_type_of_handle(range: handle::QueryRange) -> QueryType {
    if range.0 >= 2 * INDEX_OFFSET_STEP {
        QueryType::PipelineStats
    } else if range.0 >= INDEX_OFFSET_STEP {
        QueryType::Occlusion
    } else {
        QueryType::Timestamp
    }
}

pub fn native_query_type(ty: QueryType) -> Direct3D12::D3D12_QUERY_TYPE {
    match ty {
        QueryType::Timestamp => Direct3D12::D3D12_QUERY_TYPE_TIMESTAMP,
        QueryType::Occlusion => Direct3D12::D3D12_QUERY_TYPE_OCCLUSION,
        QueryType::PipelineStats => Direct3D12::D3D12_QUERY_TYPE_PIPELINE_STATISTICS,
    }
}

struct Heap {
    raw: Direct3D12::ID3D12QueryHeap,
    pages: PageAllocator,
}

unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

pub struct QueryPool {
    heaps: Mutex<[Heap; 3]>,
}

impl QueryPool {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        num_timestamp: u32,
        num_occlusion: u32,
        num_pipeline_stats: u32,
    ) -> Self {
        let make_heap = |ty: Direct3D12::D3D12_QUERY_HEAP_TYPE, count: u32| {
            let count = count.max(QUERY_PAGE_SIZE);
            let desc = Direct3D12::D3D12_QUERY_HEAP_DESC {
                Type: ty,
                Count: count,
                NodeMask: 0,
            };
            let mut heap: Option<Direct3D12::ID3D12QueryHeap> = None;
            unsafe { device.CreateQueryHeap(&desc, &mut heap) }.expect_hr("query heap creation");
            Heap {
                raw: heap.expect("query heap creation returned nothing"),
                pages: PageAllocator::new(count, QUERY_PAGE_SIZE),
            }
        };

        QueryPool {
            heaps: Mutex::new([
                make_heap(Direct3D12::D3D12_QUERY_HEAP_TYPE_TIMESTAMP, num_timestamp),
                make_heap(Direct3D12::D3D12_QUERY_HEAP_TYPE_OCCLUSION, num_occlusion),
                make_heap(
                    Direct3D12::D3D12_QUERY_HEAP_TYPE_PIPELINE_STATISTICS,
                    num_pipeline_stats,
                ),
            ]),
        }
    }

    pub fn create(&self, ty: QueryType, count: u32) -> handle::QueryRange {
        assert!(count > 0, "empty query range");
        let mut heaps = self.heaps.lock();
        let page = heaps[ty as usize]
            .pages
            .allocate(count)
            .expect("query heap exhausted");
        handle::QueryRange(page + INDEX_OFFSET_STEP * ty as u32)
    }

    pub fn free(&self, range: handle::QueryRange) {
        if !range.is_valid() {
            return;
        }
        let ty = query_type_of_handle(range);
        let mut heaps = self.heaps.lock();
        heaps[ty as usize]
            .pages
            .free(range.0 - INDEX_OFFSET_STEP * ty as u32);
    }

    /// Resolves a range element to (heap, heap-wide index, type).
    pub fn query(
        &self,
        range: handle::QueryRange,
        offset: u32,
    ) -> (Direct3D12::ID3D12QueryHeap, u32, QueryType) {
        let ty = query_type_of_handle(range);
        let page = range.0 - INDEX_OFFSET_STEP * ty as u32;
        let heaps = self.heaps.lock();
        let heap = &heaps[ty as usize];
        assert!(
            offset < heap.pages.allocation_size_in_elements(page),
            "query range access out of bounds"
        );
        (
            heap.raw.clone(),
            heap.pages.allocation_start_in_elements(page) + offset,
            ty,
        )
    }

    pub fn destroy(&mut self) {}
}
