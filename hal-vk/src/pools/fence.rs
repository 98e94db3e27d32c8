//! The fence pool: client-visible timeline semaphores.

use ash::vk;

use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::FenceOperation;

pub struct FencePool {
    device: ash::Device,
    pool: LinkedPool<vk::Semaphore>,
}

impl FencePool {
    pub fn new(device: &ash::Device, max_num_fences: u32) -> Self {
        FencePool {
            device: device.clone(),
            pool: LinkedPool::new(max_num_fences as usize),
        }
    }

    /// Creates a timeline semaphore starting at value 0.
    pub fn create_fence(&self) -> handle::Fence {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe {
            self.device
                .create_semaphore(&info, None)
                .expect("timeline semaphore creation failed")
        };
        handle::Fence(self.pool.acquire(semaphore))
    }

    pub fn raw(&self, fence: handle::Fence) -> vk::Semaphore {
        *self.pool.get(fence.0)
    }

    pub fn value(&self, fence: handle::Fence) -> u64 {
        unsafe {
            self.device
                .get_semaphore_counter_value(self.raw(fence))
                .expect("semaphore counter query failed")
        }
    }

    pub fn signal_cpu(&self, fence: handle::Fence, value: u64) {
        let info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.raw(fence))
            .value(value);
        unsafe {
            self.device
                .signal_semaphore(&info)
                .expect("semaphore signal failed");
        }
    }

    /// Blocks until `fence` reaches `value`.
    pub fn wait_cpu(&self, fence: handle::Fence, value: u64) {
        let semaphores = [self.raw(fence)];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.device
                .wait_semaphores(&info, u64::MAX)
                .expect("semaphore wait failed");
        }
    }

    /// Empty submission carrying only the timeline waits/signals; used
    /// for the standalone GPU-side fence operations.
    pub fn signal_wait_gpu(
        &self,
        signals: &[FenceOperation],
        waits: &[FenceOperation],
        queue: vk::Queue,
    ) {
        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|op| self.raw(op.fence)).collect();
        let wait_values: Vec<u64> = waits.iter().map(|op| op.value).collect();
        let signal_semaphores: Vec<vk::Semaphore> =
            signals.iter().map(|op| self.raw(op.fence)).collect();
        let signal_values: Vec<u64> = signals.iter().map(|op| op.value).collect();
        let wait_stages = vec![vk::PipelineStageFlags::BOTTOM_OF_PIPE; waits.len()];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(queue, &[submit], vk::Fence::null())
                .expect("fence-only submission failed");
        }
    }

    pub fn free_range(&self, fences: &[handle::Fence]) {
        for &fence in fences {
            if fence.is_valid() {
                let semaphore = self.pool.release(fence.0);
                unsafe { self.device.destroy_semaphore(semaphore, None) };
            }
        }
    }

    pub fn destroy(&mut self) {
        let device = self.device.clone();
        let leaks = self
            .pool
            .drain_allocated(|semaphore| unsafe { device.destroy_semaphore(semaphore, None) });
        if leaks > 0 {
            info!("leaked {} fence handle(s)", leaks);
        }
    }
}
