//! The swapchain pool: surfaces, backbuffer chains and present plumbing.
//!
//! Each backbuffer slot owns an image-available and a render-finished
//! semaphore, a throttle fence, and a small present command buffer that
//! transitions the backbuffer into the present state right before the
//! actual queue present.
//!
//! Per-swapchain calls (acquire, present, resize) are owned by one thread
//! at a time; only handle churn is synchronized.

use ash::vk;

use arclight_hal::config::PresentMode;
use arclight_hal::format::Format;
use arclight_hal::handle;
use arclight_hal::pool::LinkedPool;
use arclight_hal::types::ResourceState;
use arclight_hal::window::WindowHandle;

use crate::barrier::{BarrierBundle, StateChange};

pub struct Backbuffer {
    /// Signalled by the present submit; waited on (CPU) before the slot's
    /// semaphores are reused.
    fence: vk::Fence,
    /// Signalled by acquire, waited on (GPU) by the present submit.
    sem_image_available: vk::Semaphore,
    /// Signalled by the present submit, waited on (GPU) by the present.
    sem_render_finished: vk::Semaphore,
    present_cmdbuf: vk::CommandBuffer,
    pub image: vk::Image,
    pub view: vk::ImageView,
}

pub struct SwapchainNode {
    raw: vk::SwapchainKHR,
    surface: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub width: u32,
    pub height: u32,
    mode: PresentMode,
    has_resized: bool,
    active_fence_index: usize,
    active_image_index: usize,
    pub backbuffers: Vec<Backbuffer>,
}

pub struct SwapchainPool {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_ext: ash::khr::surface::Instance,
    swapchain_ext: ash::khr::swapchain::Device,
    win32_ext: Option<ash::khr::win32_surface::Instance>,
    xlib_ext: Option<ash::khr::xlib_surface::Instance>,
    wayland_ext: Option<ash::khr::wayland_surface::Instance>,
    present_queue: vk::Queue,
    present_cmd_pool: vk::CommandPool,
    pool: LinkedPool<SwapchainNode>,
}

impl SwapchainPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        present_queue: vk::Queue,
        present_queue_family: u32,
        max_num_swapchains: u32,
    ) -> Self {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(present_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let present_cmd_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .expect("present command pool creation failed")
        };

        SwapchainPool {
            device: device.clone(),
            physical_device,
            surface_ext: ash::khr::surface::Instance::new(entry, instance),
            swapchain_ext: ash::khr::swapchain::Device::new(instance, device),
            win32_ext: if cfg!(windows) {
                Some(ash::khr::win32_surface::Instance::new(entry, instance))
            } else {
                None
            },
            xlib_ext: if cfg!(unix) {
                Some(ash::khr::xlib_surface::Instance::new(entry, instance))
            } else {
                None
            },
            wayland_ext: if cfg!(unix) {
                Some(ash::khr::wayland_surface::Instance::new(entry, instance))
            } else {
                None
            },
            present_queue,
            present_cmd_pool,
            pool: LinkedPool::new(max_num_swapchains as usize),
        }
    }

    fn create_surface(&self, window: &WindowHandle) -> vk::SurfaceKHR {
        unsafe {
            match *window {
                WindowHandle::Win32 { hwnd, hinstance } => {
                    let info = vk::Win32SurfaceCreateInfoKHR::default()
                        .hwnd(hwnd as isize)
                        .hinstance(hinstance as isize);
                    self.win32_ext
                        .as_ref()
                        .expect("win32 surfaces are unavailable on this platform")
                        .create_win32_surface(&info, None)
                        .expect("surface creation failed")
                }
                WindowHandle::Xlib { display, window } => {
                    let info = vk::XlibSurfaceCreateInfoKHR::default()
                        .dpy(display as *mut _)
                        .window(window);
                    self.xlib_ext
                        .as_ref()
                        .expect("xlib surfaces are unavailable on this platform")
                        .create_xlib_surface(&info, None)
                        .expect("surface creation failed")
                }
                WindowHandle::Wayland { display, surface } => {
                    let info = vk::WaylandSurfaceCreateInfoKHR::default()
                        .display(display)
                        .surface(surface);
                    self.wayland_ext
                        .as_ref()
                        .expect("wayland surfaces are unavailable on this platform")
                        .create_wayland_surface(&info, None)
                        .expect("surface creation failed")
                }
            }
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
        let surface = self.create_surface(window);

        let node = SwapchainNode {
            raw: vk::SwapchainKHR::null(),
            surface,
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            width,
            height,
            mode,
            has_resized: false,
            active_fence_index: 0,
            active_image_index: 0,
            backbuffers: Vec::with_capacity(num_backbuffers as usize),
        };
        let handle = handle::Swapchain(self.pool.acquire(node));

        let node = unsafe { self.pool.get_unsync_mut(handle.0) };
        self.setup_swapchain(node, num_backbuffers as usize, width, height);
        handle
    }

    fn setup_swapchain(&self, node: &mut SwapchainNode, num_backbuffers: usize, width: u32, height: u32) {
        let caps = unsafe {
            self.surface_ext
                .get_physical_device_surface_capabilities(self.physical_device, node.surface)
                .expect("surface capability query failed")
        };
        let formats = unsafe {
            self.surface_ext
                .get_physical_device_surface_formats(self.physical_device, node.surface)
                .expect("surface format query failed")
        };
        node.format = formats
            .iter()
            .copied()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            .unwrap_or(formats[0]);

        let present_modes = unsafe {
            self.surface_ext
                .get_physical_device_surface_present_modes(self.physical_device, node.surface)
                .expect("present mode query failed")
        };
        let wanted = match node.mode {
            PresentMode::Synced => vk::PresentModeKHR::FIFO,
            PresentMode::AllowTearing => vk::PresentModeKHR::IMMEDIATE,
        };
        let present_mode = if present_modes.contains(&wanted) {
            wanted
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(1)),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(1)),
        };
        node.width = extent.width;
        node.height = extent.height;

        let min_images = (num_backbuffers as u32).max(caps.min_image_count);
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(node.surface)
            .min_image_count(min_images)
            .image_format(node.format.format)
            .image_color_space(node.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(node.raw);

        let new_swapchain = unsafe {
            self.swapchain_ext
                .create_swapchain(&info, None)
                .expect("swapchain creation failed")
        };
        self.teardown_chain(node);
        if node.raw != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_ext.destroy_swapchain(node.raw, None) };
        }
        node.raw = new_swapchain;

        let images = unsafe {
            self.swapchain_ext
                .get_swapchain_images(node.raw)
                .expect("swapchain image query failed")
        };

        let cmdbuf_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.present_cmd_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(images.len() as u32);
        let cmdbufs = unsafe {
            self.device
                .allocate_command_buffers(&cmdbuf_info)
                .expect("present command buffer allocation failed")
        };

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let sem_info = vk::SemaphoreCreateInfo::default();

        for (image, cmdbuf) in images.iter().zip(cmdbufs) {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(node.format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe {
                self.device
                    .create_image_view(&view_info, None)
                    .expect("backbuffer view creation failed")
            };
            node.backbuffers.push(Backbuffer {
                fence: unsafe { self.device.create_fence(&fence_info, None).unwrap() },
                sem_image_available: unsafe {
                    self.device.create_semaphore(&sem_info, None).unwrap()
                },
                sem_render_finished: unsafe {
                    self.device.create_semaphore(&sem_info, None).unwrap()
                },
                present_cmdbuf: cmdbuf,
                image: *image,
                view,
            });
        }
        node.active_fence_index = 0;
        node.active_image_index = 0;
    }

    fn teardown_chain(&self, node: &mut SwapchainNode) {
        if node.backbuffers.is_empty() {
            return;
        }
        unsafe {
            self.device.device_wait_idle().ok();
        }
        for bb in node.backbuffers.drain(..) {
            unsafe {
                self.device.destroy_image_view(bb.view, None);
                self.device.destroy_fence(bb.fence, None);
                self.device.destroy_semaphore(bb.sem_image_available, None);
                self.device.destroy_semaphore(bb.sem_render_finished, None);
                self.device
                    .free_command_buffers(self.present_cmd_pool, &[bb.present_cmdbuf]);
            }
        }
    }

    /// Blocks until a backbuffer is available. `None` means the swapchain
    /// went out of date and was recreated; the frame must be skipped.
    pub fn acquire_backbuffer(&self, swapchain: handle::Swapchain) -> Option<(vk::Image, vk::ImageView, u32, u32, Format)> {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        let num = node.backbuffers.len();
        let fence_index = (node.active_fence_index + 1) % num;

        unsafe {
            self.device
                .wait_for_fences(&[node.backbuffers[fence_index].fence], true, u64::MAX)
                .expect("backbuffer fence wait failed");
        }

        let acquired = unsafe {
            self.swapchain_ext.acquire_next_image(
                node.raw,
                u64::MAX,
                node.backbuffers[fence_index].sem_image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    node.has_resized = true;
                }
                index as usize
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                let (w, h, n) = (node.width, node.height, num);
                self.setup_swapchain(node, n, w, h);
                node.has_resized = true;
                return None;
            }
            Err(err) => panic!("backbuffer acquire failed: {:?}", err),
        };

        node.active_fence_index = fence_index;
        node.active_image_index = image_index;

        let bb = &node.backbuffers[image_index];
        Some((
            bb.image,
            bb.view,
            node.width,
            node.height,
            backbuffer_format(node.format.format),
        ))
    }

    /// Transitions the backbuffer from `current_state` and presents it.
    pub fn present(&self, swapchain: handle::Swapchain, current_state: ResourceState) {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        let slot = node.active_fence_index;
        let image_index = node.active_image_index;

        // record the present transition
        let cmdbuf = node.backbuffers[image_index].present_cmdbuf;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(cmdbuf, &begin_info)
                .expect("present command buffer begin failed");
        }
        if current_state != ResourceState::Present {
            let mut barriers = BarrierBundle::new();
            barriers.add_image_barrier(
                node.backbuffers[image_index].image,
                StateChange::new(
                    current_state,
                    ResourceState::Present,
                    vk::PipelineStageFlags::empty(),
                    vk::PipelineStageFlags::empty(),
                ),
                vk::ImageAspectFlags::COLOR,
            );
            barriers.record(&self.device, cmdbuf);
        }
        unsafe {
            self.device
                .end_command_buffer(cmdbuf)
                .expect("present command buffer end failed");
        }

        let wait_semaphores = [node.backbuffers[slot].sem_image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [node.backbuffers[slot].sem_render_finished];
        let cmdbufs = [cmdbuf];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmdbufs)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .reset_fences(&[node.backbuffers[slot].fence])
                .expect("present fence reset failed");
            self.device
                .queue_submit(self.present_queue, &[submit], node.backbuffers[slot].fence)
                .expect("present submit failed");
        }

        let swapchains = [node.raw];
        let image_indices = [image_index as u32];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_ext
                .queue_present(self.present_queue, &present_info)
        };
        match result {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                let (w, h, n) = (node.width, node.height, node.backbuffers.len());
                self.setup_swapchain(node, n, w, h);
                node.has_resized = true;
            }
            Err(err) => panic!("present failed: {:?}", err),
        }
    }

    pub fn on_resize(&self, swapchain: handle::Swapchain, width: u32, height: u32) {
        let node = unsafe { self.pool.get_unsync_mut(swapchain.0) };
        let num = node.backbuffers.len();
        self.setup_swapchain(node, num, width, height);
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

    pub fn backbuffer_format(&self, swapchain: handle::Swapchain) -> Format {
        backbuffer_format(self.pool.get(swapchain.0).format.format)
    }

    pub fn num_backbuffers(&self, swapchain: handle::Swapchain) -> u32 {
        self.pool.get(swapchain.0).backbuffers.len() as u32
    }

    pub fn free(&self, swapchain: handle::Swapchain) {
        if !swapchain.is_valid() {
            return;
        }
        let mut node = self.pool.release(swapchain.0);
        self.teardown_chain(&mut node);
        unsafe {
            self.swapchain_ext.destroy_swapchain(node.raw, None);
            self.surface_ext.destroy_surface(node.surface, None);
        }
    }

    pub fn destroy(&mut self) {
        let device = self.device.clone();
        let swapchain_ext = self.swapchain_ext.clone();
        let surface_ext = self.surface_ext.clone();
        let present_cmd_pool = self.present_cmd_pool;
        let leaks = self.pool.drain_allocated(|mut node| {
            unsafe { device.device_wait_idle().ok() };
            for bb in node.backbuffers.drain(..) {
                unsafe {
                    device.destroy_image_view(bb.view, None);
                    device.destroy_fence(bb.fence, None);
                    device.destroy_semaphore(bb.sem_image_available, None);
                    device.destroy_semaphore(bb.sem_render_finished, None);
                    device.free_command_buffers(present_cmd_pool, &[bb.present_cmdbuf]);
                }
            }
            unsafe {
                swapchain_ext.destroy_swapchain(node.raw, None);
                surface_ext.destroy_surface(node.surface, None);
            }
        });
        if leaks > 0 {
            info!("leaked {} swapchain handle(s)", leaks);
        }
        unsafe {
            self.device.destroy_command_pool(self.present_cmd_pool, None);
        }
    }
}

fn backbuffer_format(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Un,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Un,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8UnSrgb,
        other => {
            warn!("unrecognized backbuffer format {:?}, reporting BGRA8", other);
            Format::Bgra8Un
        }
    }
}
