//! The fence pool: client-visible monotonic fences.

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D12;
use windows::Win32::System::Threading;
use windows::Win32::System::WindowsProgramming::INFINITE;

use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;

use crate::HResult as _;

struct FenceNode {
    raw: Direct3D12::ID3D12Fence,
    event: HANDLE,
}

unsafe impl Send for FenceNode {}
unsafe impl Sync for FenceNode {}

pub struct FencePool {
    device: Direct3D12::ID3D12Device,
    pool: LinkedPool<FenceNode>,
}

unsafe impl Send for FencePool {}
unsafe impl Sync for FencePool {}

impl FencePool {
    pub fn new(device: &Direct3D12::ID3D12Device, max_num_fences: u32) -> Self {
        FencePool {
            device: device.clone(),
            pool: LinkedPool::new(max_num_fences as usize),
        }
    }

    pub fn create_fence(&self) -> handle::Fence {
        let raw: Direct3D12::ID3D12Fence =
            unsafe { self.device.CreateFence(0, Direct3D12::D3D12_FENCE_FLAG_NONE) }
                .expect_hr("fence creation");
        let event = unsafe { Threading::CreateEventW(std::ptr::null(), false, false, None) };
        assert!(!event.is_invalid(), "fence event creation failed");
        handle::Fence(self.pool.acquire(FenceNode { raw, event }))
    }

    pub fn raw(&self, fence: handle::Fence) -> &Direct3D12::ID3D12Fence {
        &self.pool.get(fence.0).raw
    }

    pub fn value(&self, fence: handle::Fence) -> u64 {
        unsafe { self.pool.get(fence.0).raw.GetCompletedValue() }
    }

    pub fn signal_cpu(&self, fence: handle::Fence, value: u64) {
        unsafe { self.pool.get(fence.0).raw.Signal(value) }.expect_hr("fence CPU signal");
    }

    pub fn wait_cpu(&self, fence: handle::Fence, value: u64) {
        let node = self.pool.get(fence.0);
        if unsafe { node.raw.GetCompletedValue() } >= value {
            return;
        }
        unsafe {
            node.raw
                .SetEventOnCompletion(value, node.event)
                .expect_hr("fence completion event");
            Threading::WaitForSingleObject(node.event, INFINITE);
        }
    }

    pub fn signal_gpu(
        &self,
        fence: handle::Fence,
        value: u64,
        queue: &Direct3D12::ID3D12CommandQueue,
    ) {
        unsafe { queue.Signal(self.raw(fence), value) }.expect_hr("fence GPU signal");
    }

    pub fn wait_gpu(
        &self,
        fence: handle::Fence,
        value: u64,
        queue: &Direct3D12::ID3D12CommandQueue,
    ) {
        unsafe { queue.Wait(self.raw(fence), value) }.expect_hr("fence GPU wait");
    }

    pub fn free_range(&self, fences: &[handle::Fence]) {
        for &fence in fences {
            if fence.is_valid() {
                let node = self.pool.release(fence.0);
                unsafe {
                    windows::Win32::Foundation::CloseHandle(node.event);
                }
            }
        }
    }

    pub fn destroy(&mut self) {
        let leaks = self.pool.drain_allocated(|node| unsafe {
            windows::Win32::Foundation::CloseHandle(node.event);
        });
        if leaks > 0 {
            info!("leaked {} fence handle(s)", leaks);
        }
    }
}
