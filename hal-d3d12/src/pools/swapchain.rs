//! The swapchain pool: flip-discard DXGI swapchains with per-frame
//! throttling and the shared pending-resize contract.

use parking_lot::Mutex;
use windows::runtime::Interface;
use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::{Direct3D12, Dxgi};
use windows::Win32::System::Threading;
use windows::Win32::System::WindowsProgramming::INFINITE;

use arclight_hal::config::PresentMode;
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::window::WindowHandle;

use crate::descriptors::CpuDescriptorHeap;
use crate::HResult as _;

const BACKBUFFER_FORMAT: Dxgi::DXGI_FORMAT = Dxgi::DXGI_FORMAT_B8G8R8A8_UNORM;

struct Backbuffer {
    resource: Direct3D12::ID3D12Resource,
    rtv_slot: u32,
}

pub struct SwapchainNode {
    raw: Dxgi::IDXGISwapChain3,
    mode: PresentMode,
    width: u32,
    height: u32,
    has_resized: bool,
    backbuffers: Vec<Backbuffer>,
    /// Frame fence throttling CPU-ahead distance to the backbuffer count.
    frame_fence: Direct3D12::ID3D12Fence,
    frame_fence_event: HANDLE,
    next_fence_value: u64,
    /// Fence value of the last present that used each backbuffer slot.
    slot_fence_values: Vec<u64>,
}

unsafe impl Send for SwapchainNode {}
unsafe impl Sync for SwapchainNode {}

pub struct SwapchainPool {
    device: Direct3D12::ID3D12Device,
    factory: Dxgi::IDXGIFactory4,
    present_queue: Direct3D12::ID3D12CommandQueue,
    allow_tearing: bool,
    /// RTV slots for all backbuffers of all swapchains.
    pub rtv_heap: CpuDescriptorHeap,
    pool: LinkedPool<SwapchainNode>,
    _guard: Mutex<()>,
}

unsafe impl Send for SwapchainPool {}
unsafe impl Sync for SwapchainPool {}

impl SwapchainPool {
    pub fn new(
        device: &Direct3D12::ID3D12Device,
        factory: &Dxgi::IDXGIFactory4,
        present_queue: &Direct3D12::ID3D12CommandQueue,
        allow_tearing: bool,
        max_num_swapchains: u32,
    ) -> Self {
        SwapchainPool {
            device: device.clone(),
            factory: factory.clone(),
            present_queue: present_queue.clone(),
            allow_tearing,
            rtv_heap: CpuDescriptorHeap::new(
                device,
                Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                max_num_swapchains * 6,
            ),
            pool: LinkedPool::new(max_num_swapchains as usize),
            _guard: Mutex::new(()),
        }
    }

    pub fn create_swapchain(
        &self,
        window: &WindowHandle,
        width: u32,
        height: u32,
        mode: PresentMode,
        num_backbuffers: u32,
    ) -> handle::Swapchain {
        assert!(
            (2..=6).contains(&num_backbuffers),
            "num_backbuffers out of range"
        );
        let hwnd = match *window {
            WindowHandle::Win32 { hwnd, .. } => HWND(hwnd as isize),
            _ => panic!("the D3D12 backend requires a Win32 window handle"),
        };

        let tearing = self.allow_tearing && mode == PresentMode::AllowTearing;
        let desc = Dxgi::DXGI_SWAP_CHAIN_DESC1 {
            Width: width,
            Height: height,
            Format: BACKBUFFER_FORMAT,
            Stereo: false.into(),
            SampleDesc: Dxgi::DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: Dxgi::DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: num_backbuffers,
            Scaling: Dxgi::DXGI_SCALING_STRETCH,
            SwapEffect: Dxgi::DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: Dxgi::DXGI_ALPHA_MODE_IGNORE,
            Flags: if tearing {
                Dxgi::DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
            } else {
                0
            },
        };

        let swapchain1 = unsafe {
            self.factory.CreateSwapChainForHwnd(
                &self.present_queue,
                hwnd,
                &desc,
                std::ptr::null(),
                None,
            )
        }
        .expect_hr("swapchain creation");
        let raw: Dxgi::IDXGISwapChain3 =
            swapchain1.cast().expect("IDXGISwapChain3 query failed");

        let frame_fence: Direct3D12::ID3D12Fence =
            unsafe { self.device.CreateFence(0, Direct3D12::D3D12_FENCE_FLAG_NONE) }
                .expect_hr("frame fence creation");
        let frame_fence_event =
            unsafe { Threading::CreateEventW(std::ptr::null(), false, false, None) };
        assert!(!frame_fence_event.is_invalid());

        let mut node = SwapchainNode {
            raw,
            mode,
            width,
            height,
            has_resized: false,
            backbuffers: Vec::new(),
            frame_fence,
            frame_fence_event,
            next_fence_value: 1,
            slot_fence_values: vec![0; num_backbuffers as usize],
        };
        self.setup_backbuffers(&mut node, num_backbuffers);
        handle::Swapchain(self.pool.acquire(node))
    }

    fn setup_backbuffers(&self, node: &mut SwapchainNode, num_backbuffers: u32) {
        for bb in node.backbuffers.drain(..) {
            self.rtv_heap.free(bb.rtv_slot);
        }
        for i in 0..num_backbuffers {
            let resource: Direct3D12::ID3D12Resource =
                unsafe { node.raw.GetBuffer(i) }.expect_hr("backbuffer query");
            let (rtv_slot, rtv_handle) = self.rtv_heap.allocate();
            unsafe {
                self.device
                    .CreateRenderTargetView(&resource, std::ptr::null(), rtv_handle)
            };
            node.backbuffers.push(Backbuffer { resource, rtv_slot });
        }
    }

    fn wait_for_gpu(&self, node: &mut SwapchainNode) {
        let value = node.next_fence_value;
        node.next_fence_value += 1;
        unsafe {
            self.present_queue
                .Signal(&node.frame_fence, value)
                .expect_hr("frame fence signal");
        }
        if unsafe { node.frame_fence.GetCompletedValue() } < value {
            unsafe {
                node.frame_fence
                    .SetEventOnCompletion(value, node.frame_fence_event)
                    .expect_hr("frame fence event");
                Threading::WaitForSingleObject(node.frame_fence_event, INFINITE);
            }
        }
    }

    /// Blocks until the current backbuffer's previous use completed, then
    /// returns its resource, RTV slot and properties. Never fails on this
    /// API; resizes only happen through [`SwapchainPool::on_resize`].
    pub fn acquire_backbuffer(
        &self,
        swapchain: handle::Swapchain,
    ) -> (Direct3D12::ID3D12Resource, u32, u32, u32, Format) {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        let index = unsafe { node.raw.GetCurrentBackBufferIndex() } as usize;

        // throttle: wait until the last present that used this slot passed
        let pending = node.slot_fence_values[index];
        if pending != 0 && unsafe { node.frame_fence.GetCompletedValue() } < pending {
            unsafe {
                node.frame_fence
                    .SetEventOnCompletion(pending, node.frame_fence_event)
                    .expect_hr("frame fence event");
                Threading::WaitForSingleObject(node.frame_fence_event, INFINITE);
            }
        }

        let bb = &node.backbuffers[index];
        (
            bb.resource.clone(),
            bb.rtv_slot,
            node.width,
            node.height,
            Format::Bgra8Un,
        )
    }

    pub fn present(&self, swapchain: handle::Swapchain) {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        let index = unsafe { node.raw.GetCurrentBackBufferIndex() } as usize;

        let tearing = self.allow_tearing && node.mode == PresentMode::AllowTearing;
        let (interval, flags) = if tearing {
            (0, Dxgi::DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (1, 0)
        };

        let hr = unsafe { node.raw.Present(interval, flags) };
        if hr.is_err() {
            error!("present failed: 0x{:08x}", hr.0);
            node.has_resized = true;
        }

        let value = node.next_fence_value;
        node.next_fence_value += 1;
        unsafe {
            self.present_queue
                .Signal(&node.frame_fence, value)
                .expect_hr("frame fence signal");
        }
        node.slot_fence_values[index] = value;
    }

    pub fn on_resize(&self, swapchain: handle::Swapchain, width: u32, height: u32) {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        self.wait_for_gpu(node);

        let num = node.backbuffers.len() as u32;
        for bb in node.backbuffers.drain(..) {
            self.rtv_heap.free(bb.rtv_slot);
        }
        let tearing = self.allow_tearing && node.mode == PresentMode::AllowTearing;
        unsafe {
            node.raw.ResizeBuffers(
                num,
                width,
                height,
                BACKBUFFER_FORMAT,
                if tearing {
                    Dxgi::DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
                } else {
                    0
                },
            )
        }
        .expect_hr("swapchain resize");
        node.width = width;
        node.height = height;
        for value in &mut node.slot_fence_values {
            *value = 0;
        }
        self.setup_backbuffers(node, num);
        node.has_resized = true;
    }

    pub fn clear_resize_flag(&self, swapchain: handle::Swapchain) -> bool {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        std::mem::replace(&mut node.has_resized, false)
    }

    pub fn backbuffer_size(&self, swapchain: handle::Swapchain) -> (u32, u32) {
        let node = self.pool.get(swapchain.0);
        (node.width, node.height)
    }

    pub fn backbuffer_format(&self, _swapchain: handle::Swapchain) -> Format {
        Format::Bgra8Un
    }

    pub fn num_backbuffers(&self, swapchain: handle::Swapchain) -> u32 {
        self.pool.get(swapchain.0).backbuffers.len() as u32
    }

    pub fn free(&self, swapchain: handle::Swapchain) {
        if !swapchain.is_valid() {
            return;
        }
        let mut node = self.pool.release(swapchain.0);
        self.wait_for_gpu(&mut node);
        for bb in node.backbuffers.drain(..) {
            self.rtv_heap.free(bb.rtv_slot);
        }
        unsafe {
            windows::Win32::Foundation::CloseHandle(node.frame_fence_event);
        }
    }

    pub fn destroy(&mut self) {
        let rtv_heap = &self.rtv_heap;
        let present_queue = self.present_queue.clone();
        let leaks = self.pool.drain_allocated(|mut node| {
            let value = node.next_fence_value;
            unsafe {
                present_queue.Signal(&node.frame_fence, value).ok();
                if node.frame_fence.GetCompletedValue() < value {
                    node.frame_fence
                        .SetEventOnCompletion(value, node.frame_fence_event)
                        .ok();
                    Threading::WaitForSingleObject(node.frame_fence_event, INFINITE);
                }
            }
            for bb in node.backbuffers.drain(..) {
                rtv_heap.free(bb.rtv_slot);
            }
            unsafe {
                windows::Win32::Foundation::CloseHandle(node.frame_fence_event);
            }
        });
        if leaks > 0 {
            info!("leaked {} swapchain handle(s)", leaks);
        }
    }
}
