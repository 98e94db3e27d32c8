//! RenderDoc bridge for forced captures.
//!
//! Detects an injected RenderDoc layer by looking for its module in the
//! process and drives frame captures through the in-application API.

use std::os::raw::c_void;

use libloading::Library;

type GetApiFn = unsafe extern "C" fn(u32, *mut *mut c_void) -> i32;
type CaptureFn = unsafe extern "C" fn(*mut c_void, *mut c_void);

const RENDERDOC_API_VERSION_1_1_2: u32 = 10102;

/// The prefix of RENDERDOC_API_1_1_2 up to the capture entry points.
#[repr(C)]
struct RenderDocApi {
    _before_capture_fns: [*mut c_void; 19],
    start_frame_capture: CaptureFn,
    is_frame_capturing: *mut c_void,
    end_frame_capture: unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32,
}

pub struct DiagnosticBridge {
    // kept loaded for the api pointer's lifetime
    _library: Option<Library>,
    api: *mut RenderDocApi,
}

unsafe impl Send for DiagnosticBridge {}
unsafe impl Sync for DiagnosticBridge {}

impl DiagnosticBridge {
    /// Attaches to an already-injected RenderDoc module if present; never
    /// loads RenderDoc into a process that does not have it.
    pub fn detect() -> Self {
        #[cfg(windows)]
        let module = "renderdoc.dll";
        #[cfg(not(windows))]
        let module = "librenderdoc.so";

        let library = unsafe { Library::new(module) }.ok();
        let mut api: *mut RenderDocApi = std::ptr::null_mut();

        if let Some(library) = &library {
            let get_api: Result<libloading::Symbol<'_, GetApiFn>, _> =
                unsafe { library.get(b"RENDERDOC_GetAPI\0") };
            if let Ok(get_api) = get_api {
                let mut raw: *mut c_void = std::ptr::null_mut();
                let ok = unsafe { get_api(RENDERDOC_API_VERSION_1_1_2, &mut raw) };
                if ok == 1 && !raw.is_null() {
                    api = raw as *mut RenderDocApi;
                    info!("RenderDoc detected, forced captures available");
                }
            }
        }

        DiagnosticBridge {
            _library: library,
            api,
        }
    }

    pub fn start_capture(&self) -> bool {
        if self.api.is_null() {
            warn!("forced capture requested but no diagnostic tool is attached");
            return false;
        }
        unsafe {
            ((*self.api).start_frame_capture)(std::ptr::null_mut(), std::ptr::null_mut());
        }
        true
    }

    pub fn end_capture(&self) -> bool {
        if self.api.is_null() {
            return false;
        }
        unsafe {
            ((*self.api).end_frame_capture)(std::ptr::null_mut(), std::ptr::null_mut()) == 1
        }
    }
}
