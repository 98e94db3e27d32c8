//! Native window references.
//!
//! The windowing system itself is an external collaborator; backends only
//! need the raw platform handles to create a presentation surface.

use std::os::raw::c_void;

/// A raw reference to a native window, passed to swapchain creation.
#[derive(Copy, Clone, Debug)]
pub enum WindowHandle {
    /// Win32 window. `hinstance` may be null; the backend then queries it.
    Win32 {
        hwnd: *mut c_void,
        hinstance: *mut c_void,
    },
    /// X11 window on a given display connection.
    Xlib {
        display: *mut c_void,
        window: u64,
    },
    /// Wayland surface on a given display connection.
    Wayland {
        display: *mut c_void,
        surface: *mut c_void,
    },
}

unsafe impl Send for WindowHandle {}
unsafe impl Sync for WindowHandle {}
