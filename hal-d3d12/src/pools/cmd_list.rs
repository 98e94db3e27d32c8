//! Command-list allocation and submit tracking; same lifecycle as the
//! Vulkan side with native allocators and a refcounted fence ring.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D12;
use windows::Win32::System::Threading;
use windows::Win32::System::WindowsProgramming::INFINITE;

use arclight_hal::handle;
use arclight_hal::pool::AtomicLinkedPool;
use arclight_hal::types::QueueType;

use crate::device::DeviceContext;
use crate::state_cache::IncompleteStateCache;
use crate::HResult as _;

const NO_FENCE: u32 = u32::MAX;

/// Ring of submit-tracking fences with per-fence allocator refcounts.
/// Each ring slot owns one native fence and a monotonically increasing
/// target value; "signalled" means the fence passed its latest target.
pub struct FenceRing {
    fences: Vec<FenceNode>,
    next_fence: Mutex<usize>,
}

struct FenceNode {
    raw: Direct3D12::ID3D12Fence,
    event: HANDLE,
    target: AtomicU64,
    ref_count: AtomicI32,
}

unsafe impl Send for FenceNode {}
unsafe impl Sync for FenceNode {}

impl FenceRing {
    pub fn new(device: &Direct3D12::ID3D12Device, num_fences: u32) -> Self {
        let fences = (0..num_fences)
            .map(|_| {
                let raw: Direct3D12::ID3D12Fence =
                    unsafe { device.CreateFence(0, Direct3D12::D3D12_FENCE_FLAG_NONE) }
                        .expect_hr("submit fence creation");
                let event =
                    unsafe { Threading::CreateEventW(std::ptr::null(), false, false, None) };
                assert!(!event.is_invalid(), "fence event creation failed");
                FenceNode {
                    raw,
                    event,
                    target: AtomicU64::new(0),
                    ref_count: AtomicI32::new(0),
                }
            })
            .collect();
        FenceRing {
            fences,
            next_fence: Mutex::new(0),
        }
    }

    /// Acquires an unreferenced, passed fence and bumps its target. The
    /// caller must signal the returned target on the submission queue.
    /// Refcount starts at 1.
    pub fn acquire_fence(&self) -> (u32, u64) {
        let mut cursor = self.next_fence.lock();

        for pass in 0..2 {
            for _ in 0..self.fences.len() {
                let index = *cursor;
                *cursor = (*cursor + 1) % self.fences.len();
                let node = &self.fences[index];
                if node.ref_count.load(Ordering::Acquire) != 0 {
                    continue;
                }
                // second pass forces an unreferenced fence into use even
                // if the GPU has not passed it yet; this only happens
                // during long stalls
                let passed = unsafe { node.raw.GetCompletedValue() }
                    >= node.target.load(Ordering::Acquire);
                if pass == 0 && !passed {
                    continue;
                }
                let target = node.target.fetch_add(1, Ordering::AcqRel) + 1;
                node.ref_count.store(1, Ordering::Release);
                return (index as u32, target);
            }
        }

        panic!("fence ring exhausted: all fences are CPU-referenced");
    }

    pub fn raw(&self, index: u32) -> &Direct3D12::ID3D12Fence {
        &self.fences[index as usize].raw
    }

    pub fn target(&self, index: u32) -> u64 {
        self.fences[index as usize].target.load(Ordering::Acquire)
    }

    pub fn is_fence_signalled(&self, index: u32) -> bool {
        let node = &self.fences[index as usize];
        debug_assert!(node.ref_count.load(Ordering::Acquire) > 0);
        unsafe { node.raw.GetCompletedValue() } >= node.target.load(Ordering::Acquire)
    }

    pub fn wait_for_fence(&self, index: u32) {
        let node = &self.fences[index as usize];
        let target = node.target.load(Ordering::Acquire);
        if unsafe { node.raw.GetCompletedValue() } >= target {
            return;
        }
        unsafe {
            node.raw
                .SetEventOnCompletion(target, node.event)
                .expect_hr("fence completion event");
            Threading::WaitForSingleObject(node.event, INFINITE);
        }
    }

    pub fn increment_refcount(&self, index: u32, amount: i32) {
        let prev = self.fences[index as usize]
            .ref_count
            .fetch_add(amount, Ordering::AcqRel);
        debug_assert!(prev >= 0);
    }

    pub fn decrement_refcount(&self, index: u32) {
        let prev = self.fences[index as usize]
            .ref_count
            .fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1);
    }

    pub fn destroy(&mut self) {
        for node in &self.fences {
            unsafe {
                windows::Win32::Foundation::CloseHandle(node.event);
            }
        }
        self.fences.clear();
    }
}

/// One native command allocator with its preallocated (closed) lists.
pub struct CommandAllocator {
    raw: Direct3D12::ID3D12CommandAllocator,
    lists: Vec<Direct3D12::ID3D12GraphicsCommandList>,
    num_in_flight: u32,
    num_discarded: AtomicU32,
    num_pending_execution: AtomicU32,
    latest_fence: AtomicU32,
    /// RTV/DSV heap slots handed out while recording; recycled on reset.
    associated_rtv_slots: Mutex<Vec<u32>>,
    associated_dsv_slots: Mutex<Vec<u32>>,
}

unsafe impl Send for CommandAllocator {}
unsafe impl Sync for CommandAllocator {}

impl CommandAllocator {
    fn new(ctx: &DeviceContext, num_cmd_lists: u32, queue: QueueType) -> Self {
        let list_type = DeviceContext::list_type(queue);
        let raw: Direct3D12::ID3D12CommandAllocator =
            unsafe { ctx.device.CreateCommandAllocator(list_type) }
                .expect_hr("command allocator creation");

        let lists = (0..num_cmd_lists)
            .map(|_| {
                let list: Direct3D12::ID3D12GraphicsCommandList = unsafe {
                    ctx.device.CreateCommandList(0, list_type, &raw, None)
                }
                .expect_hr("command list creation");
                // lists are created open; store them closed
                unsafe { list.Close() }.expect_hr("command list close");
                list
            })
            .collect();

        CommandAllocator {
            raw,
            lists,
            num_in_flight: 0,
            num_discarded: AtomicU32::new(0),
            num_pending_execution: AtomicU32::new(0),
            latest_fence: AtomicU32::new(NO_FENCE),
            associated_rtv_slots: Mutex::new(Vec::new()),
            associated_dsv_slots: Mutex::new(Vec::new()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.num_in_flight as usize == self.lists.len()
    }

    fn is_submit_counter_up_to_date(&self) -> bool {
        self.num_in_flight
            == self.num_discarded.load(Ordering::Acquire)
                + self.num_pending_execution.load(Ordering::Acquire)
    }

    fn can_reset(&self) -> bool {
        self.is_full() && self.is_submit_counter_up_to_date()
    }

    fn acquire(
        &mut self,
        fence_ring: &FenceRing,
        rtv_recycler: &dyn Fn(&[u32], &[u32]),
    ) -> Direct3D12::ID3D12GraphicsCommandList {
        if self.is_full() {
            let recovered = self.try_reset_blocking(fence_ring, rtv_recycler);
            assert!(
                recovered,
                "command allocator overcommitted and unable to recover"
            );
        }

        let list = self.lists[self.num_in_flight as usize].clone();
        self.num_in_flight += 1;
        unsafe { list.Reset(&self.raw, None) }.expect_hr("command list reset");
        list
    }

    pub fn on_discard(&self, num: u32) {
        self.num_discarded.fetch_add(num, Ordering::AcqRel);
    }

    pub fn on_submit(&self, num: u32, fence_index: u32, fence_ring: &FenceRing) {
        let previous = self.latest_fence.swap(fence_index, Ordering::AcqRel);
        if previous != NO_FENCE && previous != fence_index {
            fence_ring.decrement_refcount(previous);
        }
        self.num_pending_execution.fetch_add(num, Ordering::AcqRel);
    }

    fn try_reset(&mut self, fence_ring: &FenceRing, rtv_recycler: &dyn Fn(&[u32], &[u32])) -> bool {
        if !self.can_reset() {
            return !self.is_full();
        }
        if self.num_pending_execution.load(Ordering::Acquire) == 0 {
            self.do_reset(rtv_recycler);
            return true;
        }
        let fence = self.latest_fence.load(Ordering::Acquire);
        debug_assert!(fence != NO_FENCE);
        if fence_ring.is_fence_signalled(fence) {
            fence_ring.decrement_refcount(fence);
            self.latest_fence.store(NO_FENCE, Ordering::Release);
            self.do_reset(rtv_recycler);
            true
        } else {
            false
        }
    }

    fn try_reset_blocking(
        &mut self,
        fence_ring: &FenceRing,
        rtv_recycler: &dyn Fn(&[u32], &[u32]),
    ) -> bool {
        if !self.can_reset() {
            return !self.is_full();
        }
        if self.num_pending_execution.load(Ordering::Acquire) > 0 {
            let fence = self.latest_fence.load(Ordering::Acquire);
            debug_assert!(fence != NO_FENCE);
            fence_ring.wait_for_fence(fence);
            fence_ring.decrement_refcount(fence);
            self.latest_fence.store(NO_FENCE, Ordering::Release);
        }
        self.do_reset(rtv_recycler);
        true
    }

    fn do_reset(&mut self, rtv_recycler: &dyn Fn(&[u32], &[u32])) {
        unsafe { self.raw.Reset() }.expect_hr("command allocator reset");
        let rtvs: Vec<u32> = self.associated_rtv_slots.lock().drain(..).collect();
        let dsvs: Vec<u32> = self.associated_dsv_slots.lock().drain(..).collect();
        rtv_recycler(&rtvs, &dsvs);
        self.num_in_flight = 0;
        self.num_discarded.store(0, Ordering::Release);
        self.num_pending_execution.store(0, Ordering::Release);
    }

    /// Pins transient RTV/DSV heap slots to this allocator; the next
    /// reset recycles them.
    pub fn add_associated_views(&self, rtv_slots: &[u32], dsv_slots: &[u32]) {
        self.associated_rtv_slots.lock().extend_from_slice(rtv_slots);
        self.associated_dsv_slots.lock().extend_from_slice(dsv_slots);
    }

    fn destroy(&mut self, fence_ring: &FenceRing, rtv_recycler: &dyn Fn(&[u32], &[u32])) {
        let fence = self.latest_fence.swap(NO_FENCE, Ordering::AcqRel);
        if fence != NO_FENCE {
            fence_ring.wait_for_fence(fence);
            fence_ring.decrement_refcount(fence);
        }
        self.do_reset(rtv_recycler);
    }
}

/// Rotating ring of allocators for one (thread, queue type).
pub struct CommandAllocatorBundle {
    allocators: Vec<CommandAllocator>,
    active: usize,
}

impl CommandAllocatorBundle {
    pub fn new(
        ctx: &DeviceContext,
        num_allocators: u32,
        num_cmdlists_per_allocator: u32,
        queue: QueueType,
    ) -> Self {
        CommandAllocatorBundle {
            allocators: (0..num_allocators)
                .map(|_| CommandAllocator::new(ctx, num_cmdlists_per_allocator, queue))
                .collect(),
            active: 0,
        }
    }

    pub fn acquire_memory(
        &mut self,
        fence_ring: &FenceRing,
        rtv_recycler: &dyn Fn(&[u32], &[u32]),
    ) -> (Direct3D12::ID3D12GraphicsCommandList, *const CommandAllocator) {
        let count = self.allocators.len();
        assert!(count > 0, "uninitialized command allocator bundle");

        let mut found = false;
        for _ in 0..count {
            let allocator = &mut self.allocators[self.active];
            if !allocator.is_full() || allocator.try_reset(fence_ring, rtv_recycler) {
                found = true;
                break;
            }
            self.active = (self.active + 1) % count;
        }
        if !found {
            for _ in 0..count {
                if self.allocators[self.active].try_reset_blocking(fence_ring, rtv_recycler) {
                    found = true;
                    break;
                }
                self.active = (self.active + 1) % count;
            }
        }
        assert!(found, "all command allocators overcommitted and unresettable");

        let allocator = &mut self.allocators[self.active];
        let list = allocator.acquire(fence_ring, rtv_recycler);
        (list, allocator as *const CommandAllocator)
    }

    fn destroy(&mut self, fence_ring: &FenceRing, rtv_recycler: &dyn Fn(&[u32], &[u32])) {
        for allocator in &mut self.allocators {
            allocator.destroy(fence_ring, rtv_recycler);
        }
    }
}

pub struct ThreadAllocators {
    pub direct: CommandAllocatorBundle,
    pub compute: CommandAllocatorBundle,
    pub copy: CommandAllocatorBundle,
}

impl ThreadAllocators {
    pub fn get(&mut self, queue: QueueType) -> &mut CommandAllocatorBundle {
        match queue {
            QueueType::Direct => &mut self.direct,
            QueueType::Compute => &mut self.compute,
            QueueType::Copy => &mut self.copy,
        }
    }

    pub fn destroy(&mut self, fence_ring: &FenceRing, rtv_recycler: &dyn Fn(&[u32], &[u32])) {
        self.direct.destroy(fence_ring, rtv_recycler);
        self.compute.destroy(fence_ring, rtv_recycler);
        self.copy.destroy(fence_ring, rtv_recycler);
    }
}

pub struct CmdListNode {
    pub list: Direct3D12::ID3D12GraphicsCommandList,
    pub responsible_allocator: *const CommandAllocator,
    pub state_cache: Mutex<IncompleteStateCache>,
    pub queue: QueueType,
}

unsafe impl Send for CmdListNode {}
unsafe impl Sync for CmdListNode {}

impl CmdListNode {
    pub fn allocator(&self) -> &CommandAllocator {
        unsafe { &*self.responsible_allocator }
    }
}

pub struct CommandListPool {
    pool: AtomicLinkedPool<CmdListNode>,
    pub fence_ring: FenceRing,
    consume_mutex: Mutex<()>,
}

impl CommandListPool {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        total_cmd_lists: u32,
        num_fences: u32,
    ) -> Self {
        CommandListPool {
            pool: AtomicLinkedPool::new(total_cmd_lists.max(1) as usize),
            fence_ring: FenceRing::new(device, num_fences),
            consume_mutex: Mutex::new(()),
        }
    }

    pub fn create(
        &self,
        thread_allocators: &mut ThreadAllocators,
        queue: QueueType,
        rtv_recycler: &dyn Fn(&[u32], &[u32]),
    ) -> (handle::CommandList, Direct3D12::ID3D12GraphicsCommandList) {
        let (list, allocator) = thread_allocators
            .get(queue)
            .acquire_memory(&self.fence_ring, rtv_recycler);
        let node = CmdListNode {
            list: list.clone(),
            responsible_allocator: allocator,
            state_cache: Mutex::new(IncompleteStateCache::new()),
            queue,
        };
        (handle::CommandList(self.pool.acquire(node)), list)
    }

    pub fn node(&self, cl: handle::CommandList) -> &CmdListNode {
        self.pool.get(cl.0)
    }

    pub fn add_associated_views(
        &self,
        cl: handle::CommandList,
        rtv_slots: &[u32],
        dsv_slots: &[u32],
    ) {
        self.node(cl).allocator().add_associated_views(rtv_slots, dsv_slots);
    }

    pub fn free_on_submit(&self, cls: &[handle::CommandList], fence_index: u32) {
        let mut unique: SmallVec<[(*const CommandAllocator, u32); 24]> = SmallVec::new();
        {
            let _guard = self.consume_mutex.lock();
            for &cl in cls {
                if !cl.is_valid() {
                    continue;
                }
                let node = self.pool.release(cl.0);
                match unique
                    .iter_mut()
                    .find(|(alloc, _)| *alloc == node.responsible_allocator)
                {
                    Some((_, count)) => *count += 1,
                    None => unique.push((node.responsible_allocator, 1)),
                }
            }
        }

        if unique.is_empty() {
            self.fence_ring.decrement_refcount(fence_index);
            return;
        }
        if unique.len() > 1 {
            self.fence_ring
                .increment_refcount(fence_index, unique.len() as i32 - 1);
        }
        for (allocator, count) in unique {
            unsafe { &*allocator }.on_submit(count, fence_index, &self.fence_ring);
        }
    }

    pub fn free_and_discard(&self, cls: &[handle::CommandList]) {
        let _guard = self.consume_mutex.lock();
        for &cl in cls {
            if !cl.is_valid() {
                continue;
            }
            let node = self.pool.release(cl.0);
            // discarded lists were left open; close them so the
            // allocator reset is legal
            unsafe { node.list.Close() }.ok();
            node.allocator().on_discard(1);
        }
    }

    pub fn discard_and_free_all(&mut self) -> usize {
        self.pool.drain_allocated(|node| {
            unsafe { node.list.Close() }.ok();
            node.allocator().on_discard(1);
        })
    }

    pub fn destroy(&mut self) {
        let leaks = self.discard_and_free_all();
        if leaks > 0 {
            info!("leaked {} command list handle(s)", leaks);
        }
        self.fence_ring.destroy();
    }
}
