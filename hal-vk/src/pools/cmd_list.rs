//! Command-list allocation and submit tracking.
//!
//! Native command buffers come from per-(thread, queue-type) allocator
//! bundles. An allocator hands out its preallocated buffers until full,
//! then becomes resettable once every handed-out buffer was either
//! discarded or has passed its submission fence. Fences live in a shared
//! ring and are refcounted by the allocators that depend on them.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use ash::vk;
use parking_lot::Mutex;
use smallvec::SmallVec;

use arclight_hal::handle;
use arclight_hal::pool::AtomicLinkedPool;
use arclight_hal::types::QueueType;

use crate::state_cache::IncompleteStateCache;

const NO_FENCE: u32 = u32::MAX;

/// Ring of submit-tracking fences with per-fence allocator refcounts.
pub struct FenceRing {
    fences: Vec<FenceNode>,
    next_fence: Mutex<usize>,
}

struct FenceNode {
    raw: vk::Fence,
    /// Number of allocators currently depending on this fence for reset.
    ref_count: AtomicI32,
}

impl FenceRing {
    pub fn new(device: &ash::Device, num_fences: u32) -> Self {
        // created signalled so acquire needs no special case for fresh
        // fences
        let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fences = (0..num_fences)
            .map(|_| FenceNode {
                raw: unsafe {
                    device
                        .create_fence(&info, None)
                        .expect("submit fence creation failed")
                },
                ref_count: AtomicI32::new(0),
            })
            .collect();
        FenceRing {
            fences,
            next_fence: Mutex::new(0),
        }
    }

    /// Acquires an unreferenced fence, resets it, and returns its index.
    /// The returned fence has a refcount of 1.
    pub fn acquire_fence(&self, device: &ash::Device) -> (u32, vk::Fence) {
        let mut cursor = self.next_fence.lock();

        // first pass: unreferenced AND already signalled (safe to reset)
        for _ in 0..self.fences.len() {
            let index = *cursor;
            *cursor = (*cursor + 1) % self.fences.len();
            let node = &self.fences[index];
            if node.ref_count.load(Ordering::Acquire) == 0
                && unsafe { device.get_fence_status(node.raw) }.unwrap_or(false)
            {
                unsafe { device.reset_fences(&[node.raw]).expect("fence reset failed") };
                node.ref_count.store(1, Ordering::Release);
                return (index as u32, node.raw);
            }
        }

        // none was resettable; force the first unreferenced one into use.
        // This only happens during long stalls (load screens); waiting
        // here instead can deadlock.
        for _ in 0..self.fences.len() {
            let index = *cursor;
            *cursor = (*cursor + 1) % self.fences.len();
            let node = &self.fences[index];
            if node.ref_count.load(Ordering::Acquire) == 0 {
                unsafe { device.reset_fences(&[node.raw]).expect("fence reset failed") };
                node.ref_count.store(1, Ordering::Release);
                return (index as u32, node.raw);
            }
        }

        panic!("fence ring exhausted: all fences are CPU-referenced");
    }

    pub fn is_fence_signalled(&self, device: &ash::Device, index: u32) -> bool {
        debug_assert!(self.fences[index as usize].ref_count.load(Ordering::Acquire) > 0);
        unsafe { device.get_fence_status(self.fences[index as usize].raw) }.unwrap_or(false)
    }

    /// Blocks until the fence at `index` signals.
    pub fn wait_for_fence(&self, device: &ash::Device, index: u32) {
        debug_assert!(self.fences[index as usize].ref_count.load(Ordering::Acquire) > 0);
        unsafe {
            device
                .wait_for_fences(&[self.fences[index as usize].raw], true, u64::MAX)
                .expect("fence wait failed");
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

    pub fn destroy(&mut self, device: &ash::Device) {
        for node in &self.fences {
            unsafe { device.destroy_fence(node.raw, None) };
        }
        self.fences.clear();
    }
}

/// One native command pool with its preallocated buffers.
///
/// Unsynchronized except for the submit/discard counters: acquisition
/// happens on the owning thread only, while submits and discards may be
/// signalled from whichever thread consumes the command list.
pub struct CommandAllocator {
    cmd_pool: vk::CommandPool,
    cmd_buffers: Vec<vk::CommandBuffer>,
    /// Buffers handed out.
    num_in_flight: u32,
    /// Buffers consumed by discard; always <= num_in_flight. Discarded
    /// buffers cannot be reused individually, only via a full pool reset.
    num_discarded: AtomicU32,
    /// Buffers consumed by submit; always <= num_in_flight.
    num_pending_execution: AtomicU32,
    /// Most recent fence index charged to this allocator.
    latest_fence: AtomicU32,
    /// Framebuffers created while recording buffers of this allocator;
    /// destroyed on reset, when the GPU is provably done with them.
    associated_framebuffers: Mutex<Vec<vk::Framebuffer>>,
    /// Their transient image views.
    associated_image_views: Mutex<Vec<vk::ImageView>>,
}

impl CommandAllocator {
    fn new(device: &ash::Device, num_cmd_lists: u32, queue_family_index: u32) -> Self {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let cmd_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .expect("command pool creation failed")
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(cmd_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(num_cmd_lists);
        let cmd_buffers = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .expect("command buffer allocation failed")
        };

        CommandAllocator {
            cmd_pool,
            cmd_buffers,
            num_in_flight: 0,
            num_discarded: AtomicU32::new(0),
            num_pending_execution: AtomicU32::new(0),
            latest_fence: AtomicU32::new(NO_FENCE),
            associated_framebuffers: Mutex::new(Vec::new()),
            associated_image_views: Mutex::new(Vec::new()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.num_in_flight as usize == self.cmd_buffers.len()
    }

    fn is_submit_counter_up_to_date(&self) -> bool {
        // num_in_flight is owned by this thread; the two atomics increase
        // monotonically and never exceed it, so load order is irrelevant
        self.num_in_flight
            == self.num_discarded.load(Ordering::Acquire)
                + self.num_pending_execution.load(Ordering::Acquire)
    }

    fn can_reset(&self) -> bool {
        self.is_full() && self.is_submit_counter_up_to_date()
    }

    /// Takes the next free buffer and opens it. Must not be called while
    /// full; blocks on a last-resort reset if it is.
    fn acquire(&mut self, device: &ash::Device, fence_ring: &FenceRing) -> vk::CommandBuffer {
        if self.is_full() {
            let recovered = self.try_reset_blocking(device, fence_ring);
            assert!(
                recovered,
                "command allocator overcommitted and unable to recover"
            );
        }

        let buffer = self.cmd_buffers[self.num_in_flight as usize];
        self.num_in_flight += 1;

        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(buffer, &info)
                .expect("command buffer begin failed");
        }
        buffer
    }

    /// Called when buffers of this allocator are discarded. Free-threaded.
    pub fn on_discard(&self, num: u32) {
        self.num_discarded.fetch_add(num, Ordering::AcqRel);
    }

    /// Called when `num` buffers of this allocator are submitted under
    /// the (refcount-incremented) fence `fence_index`. Free-threaded.
    pub fn on_submit(&self, num: u32, fence_index: u32, fence_ring: &FenceRing) {
        let previous = self.latest_fence.swap(fence_index, Ordering::AcqRel);
        if previous != NO_FENCE && previous != fence_index {
            fence_ring.decrement_refcount(previous);
        }
        // incremented second: pending_execution guards latest_fence reads
        self.num_pending_execution.fetch_add(num, Ordering::AcqRel);
    }

    /// Non-blocking reset attempt. True if the allocator is usable after.
    fn try_reset(&mut self, device: &ash::Device, fence_ring: &FenceRing) -> bool {
        if !self.can_reset() {
            return !self.is_full();
        }
        if self.num_pending_execution.load(Ordering::Acquire) == 0 {
            // everything was discarded, reset unconditionally
            self.do_reset(device);
            return true;
        }
        let fence = self.latest_fence.load(Ordering::Acquire);
        debug_assert!(fence != NO_FENCE);
        if fence_ring.is_fence_signalled(device, fence) {
            fence_ring.decrement_refcount(fence);
            self.latest_fence.store(NO_FENCE, Ordering::Release);
            self.do_reset(device);
            true
        } else {
            false
        }
    }

    /// Blocking reset attempt. True if the allocator is usable after.
    fn try_reset_blocking(&mut self, device: &ash::Device, fence_ring: &FenceRing) -> bool {
        if !self.can_reset() {
            return !self.is_full();
        }
        if self.num_pending_execution.load(Ordering::Acquire) > 0 {
            let fence = self.latest_fence.load(Ordering::Acquire);
            debug_assert!(fence != NO_FENCE);
            fence_ring.wait_for_fence(device, fence);
            fence_ring.decrement_refcount(fence);
            self.latest_fence.store(NO_FENCE, Ordering::Release);
        }
        self.do_reset(device);
        true
    }

    fn do_reset(&mut self, device: &ash::Device) {
        unsafe {
            device
                .reset_command_pool(self.cmd_pool, vk::CommandPoolResetFlags::RELEASE_RESOURCES)
                .expect("command pool reset failed");
        }
        for framebuffer in self.associated_framebuffers.lock().drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
        for view in self.associated_image_views.lock().drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        self.num_in_flight = 0;
        self.num_discarded.store(0, Ordering::Release);
        self.num_pending_execution.store(0, Ordering::Release);
    }

    /// Pins a framebuffer (and the image views backing it) to this
    /// allocator; the next reset destroys them.
    pub fn add_associated_framebuffer(&self, framebuffer: vk::Framebuffer, views: &[vk::ImageView]) {
        self.associated_framebuffers.lock().push(framebuffer);
        self.associated_image_views.lock().extend_from_slice(views);
    }

    fn destroy(&mut self, device: &ash::Device, fence_ring: &FenceRing) {
        let fence = self.latest_fence.swap(NO_FENCE, Ordering::AcqRel);
        if fence != NO_FENCE {
            fence_ring.decrement_refcount(fence);
        }
        self.do_reset(device);
        unsafe { device.destroy_command_pool(self.cmd_pool, None) };
    }
}

/// A ring of allocators for one (thread, queue type); rotates to the
/// first usable one, soft-resetting where possible.
pub struct CommandAllocatorBundle {
    allocators: Vec<CommandAllocator>,
    active: usize,
}

impl CommandAllocatorBundle {
    pub fn new(
        device: &ash::Device,
        num_allocators: u32,
        num_cmdlists_per_allocator: u32,
        queue_family_index: u32,
    ) -> Self {
        CommandAllocatorBundle {
            allocators: (0..num_allocators)
                .map(|_| CommandAllocator::new(device, num_cmdlists_per_allocator, queue_family_index))
                .collect(),
            active: 0,
        }
    }

    /// Acquires a freshly begun command buffer and the allocator
    /// responsible for it.
    pub fn acquire_memory(
        &mut self,
        device: &ash::Device,
        fence_ring: &FenceRing,
    ) -> (vk::CommandBuffer, *const CommandAllocator) {
        self.update_active_index(device, fence_ring);
        let allocator = &mut self.allocators[self.active];
        let buffer = allocator.acquire(device, fence_ring);
        (buffer, allocator as *const CommandAllocator)
    }

    fn update_active_index(&mut self, device: &ash::Device, fence_ring: &FenceRing) {
        let count = self.allocators.len();
        assert!(count > 0, "uninitialized command allocator bundle");

        for _ in 0..count {
            let allocator = &mut self.allocators[self.active];
            if !allocator.is_full() || allocator.try_reset(device, fence_ring) {
                return;
            }
            self.active = (self.active + 1) % count;
        }

        // every non-blocking path failed; now block
        for _ in 0..count {
            if self.allocators[self.active].try_reset_blocking(device, fence_ring) {
                return;
            }
            self.active = (self.active + 1) % count;
        }

        panic!("all command allocators overcommitted and unresettable");
    }

    fn destroy(&mut self, device: &ash::Device, fence_ring: &FenceRing) {
        for allocator in &mut self.allocators {
            allocator.destroy(device, fence_ring);
        }
    }
}

/// The three bundles of one thread.
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

    pub fn destroy(&mut self, device: &ash::Device, fence_ring: &FenceRing) {
        self.direct.destroy(device, fence_ring);
        self.compute.destroy(device, fence_ring);
        self.copy.destroy(device, fence_ring);
    }
}

/// A recorded command list: its native buffer, the allocator responsible
/// for that buffer, and its incomplete-state cache.
pub struct CmdListNode {
    pub raw_buffer: vk::CommandBuffer,
    /// Non-owning; the bundle outlives every node.
    pub responsible_allocator: *const CommandAllocator,
    pub state_cache: Mutex<IncompleteStateCache>,
    pub queue: QueueType,
}

unsafe impl Send for CmdListNode {}
unsafe impl Sync for CmdListNode {}

impl CmdListNode {
    fn allocator(&self) -> &CommandAllocator {
        unsafe { &*self.responsible_allocator }
    }
}

/// The application-wide command list pool. Lock-free handle churn; the
/// mutex only guards the submit/discard bookkeeping sequences.
pub struct CommandListPool {
    pool: AtomicLinkedPool<CmdListNode>,
    pub fence_ring: FenceRing,
    consume_mutex: Mutex<()>,
}

impl CommandListPool {
    pub fn new(device: &ash::Device, total_cmd_lists: u32, num_fences: u32) -> Self {
        CommandListPool {
            pool: AtomicLinkedPool::new(total_cmd_lists.max(1) as usize),
            fence_ring: FenceRing::new(device, num_fences),
            consume_mutex: Mutex::new(()),
        }
    }

    /// Allocates a node backed by the calling thread's allocators and
    /// returns its handle plus the freshly begun native buffer.
    pub fn create(
        &self,
        device: &ash::Device,
        thread_allocators: &mut ThreadAllocators,
        queue: QueueType,
    ) -> (handle::CommandList, vk::CommandBuffer) {
        let (buffer, allocator) = thread_allocators
            .get(queue)
            .acquire_memory(device, &self.fence_ring);
        let node = CmdListNode {
            raw_buffer: buffer,
            responsible_allocator: allocator,
            state_cache: Mutex::new(IncompleteStateCache::new()),
            queue,
        };
        (handle::CommandList(self.pool.acquire(node)), buffer)
    }

    pub fn node(&self, cl: handle::CommandList) -> &CmdListNode {
        self.pool.get(cl.0)
    }

    pub fn raw_buffer(&self, cl: handle::CommandList) -> vk::CommandBuffer {
        self.node(cl).raw_buffer
    }

    pub fn add_associated_framebuffer(
        &self,
        cl: handle::CommandList,
        framebuffer: vk::Framebuffer,
        views: &[vk::ImageView],
    ) {
        self.node(cl)
            .allocator()
            .add_associated_framebuffer(framebuffer, views);
    }

    /// Consumes submitted lists: releases their nodes and charges each
    /// unique responsible allocator with the fence. The fence arrives
    /// with refcount 1 and is bumped by (unique allocators - 1).
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
            // nothing consumed the fence; drop the initial reference
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

    /// Consumes lists that will never be submitted.
    pub fn free_and_discard(&self, cls: &[handle::CommandList]) {
        let _guard = self.consume_mutex.lock();
        for &cl in cls {
            if !cl.is_valid() {
                continue;
            }
            let node = self.pool.release(cl.0);
            node.allocator().on_discard(1);
        }
    }

    /// Discards every live command list; returns the leak count.
    pub fn discard_and_free_all(&mut self) -> usize {
        self.pool.drain_allocated(|node| {
            node.allocator().on_discard(1);
        })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        let leaks = self.discard_and_free_all();
        if leaks > 0 {
            info!("leaked {} command list handle(s)", leaks);
        }
        self.fence_ring.destroy(device);
    }
}
