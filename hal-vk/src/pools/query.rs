//! The query pool: paged ranges over three native query heaps.
//!
//! A query-range handle encodes its type in a fixed high-range offset
//! (1e6 per type); the low part indexes a page within that type's heap.

use ash::vk;
use parking_lot::Mutex;

use arclight_hal::handle;
use arclight_hal::pool::PageAllocator;
use arclight_hal::types::QueryType;

/// Queries per page; ranges are rounded up to page multiples.
pub const QUERY_PAGE_SIZE: u32 = 2;

/// Handle-range offset separating the three query types.
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

pub fn handle_from_page(page: u32, ty: QueryType) -> handle::QueryRange {
    handle::QueryRange(page + INDEX_OFFSET_STEP * ty as u32)
}

pub fn page_of_handle(range: handle::QueryRange, ty: QueryType) -> u32 {
    range.0 - INDEX_OFFSET_STEP * ty as u32
}

struct Heap {
    raw: vk::QueryPool,
    pages: PageAllocator,
}

pub struct QueryPool {
    device: ash::Device,
    heaps: Mutex<[Heap; 3]>,
}

impl QueryPool {
    pub fn new(
        device: &ash::Device,
        num_timestamp: u32,
        num_occlusion: u32,
        num_pipeline_stats: u32,
    ) -> Self {
        let make_heap = |ty: vk::QueryType, count: u32| {
            let count = count.max(QUERY_PAGE_SIZE);
            let mut info = vk::QueryPoolCreateInfo::default()
                .query_type(ty)
                .query_count(count);
            if ty == vk::QueryType::PIPELINE_STATISTICS {
                info = info.pipeline_statistics(
                    vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
                        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
                        | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS,
                );
            }
            let raw = unsafe {
                device
                    .create_query_pool(&info, None)
                    .expect("query pool creation failed")
            };
            Heap {
                raw,
                pages: PageAllocator::new(count, QUERY_PAGE_SIZE),
            }
        };

        QueryPool {
            device: device.clone(),
            heaps: Mutex::new([
                make_heap(vk::QueryType::TIMESTAMP, num_timestamp),
                make_heap(vk::QueryType::OCCLUSION, num_occlusion),
                make_heap(vk::QueryType::PIPELINE_STATISTICS, num_pipeline_stats),
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
        handle_from_page(page, ty)
    }

    pub fn free(&self, range: handle::QueryRange) {
        if !range.is_valid() {
            return;
        }
        let ty = query_type_of_handle(range);
        let mut heaps = self.heaps.lock();
        heaps[ty as usize].pages.free(page_of_handle(range, ty));
    }

    /// Resolves a range element to (heap, pool-wide query index, type).
    pub fn query(&self, range: handle::QueryRange, offset: u32) -> (vk::QueryPool, u32, QueryType) {
        let ty = query_type_of_handle(range);
        let page = page_of_handle(range, ty);
        let heaps = self.heaps.lock();
        let heap = &heaps[ty as usize];
        assert!(
            offset < heap.pages.allocation_size_in_elements(page),
            "query range access out of bounds"
        );
        (
            heap.raw,
            heap.pages.allocation_start_in_elements(page) + offset,
            ty,
        )
    }

    pub fn destroy(&mut self) {
        let heaps = self.heaps.get_mut();
        for heap in heaps.iter() {
            unsafe { self.device.destroy_query_pool(heap.raw, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_type_tagged() {
        let ts = handle_from_page(3, QueryType::Timestamp);
        let oc = handle_from_page(3, QueryType::Occlusion);
        let ps = handle_from_page(3, QueryType::PipelineStats);
        assert_eq!(query_type_of_handle(ts), QueryType::Timestamp);
        assert_eq!(query_type_of_handle(oc), QueryType::Occlusion);
        assert_eq!(query_type_of_handle(ps), QueryType::PipelineStats);
        assert_eq!(page_of_handle(oc, QueryType::Occlusion), 3);
    }
}
