//! DXGI factory, adapter selection and device bootstrap.

use windows::runtime::Interface;
use windows::Win32::Graphics::{Direct3D11, Direct3D12, Dxgi};

use arclight_hal::config::{AdapterPreference, Config, ValidationLevel};
use arclight_hal::types::QueueType;
use arclight_hal::InitError;

use crate::HResult as _;

pub struct DeviceContext {
    pub factory: Dxgi::IDXGIFactory4,
    pub adapter: Dxgi::IDXGIAdapter1,
    pub device: Direct3D12::ID3D12Device,
    pub queue_direct: Direct3D12::ID3D12CommandQueue,
    pub queue_compute: Direct3D12::ID3D12CommandQueue,
    pub queue_copy: Direct3D12::ID3D12CommandQueue,
    pub raytracing_enabled: bool,
    pub allow_tearing: bool,
}

fn adapter_vram(adapter: &Dxgi::IDXGIAdapter1) -> u64 {
    match unsafe { adapter.GetDesc1() } {
        Ok(desc) => desc.DedicatedVideoMemory as u64,
        Err(_) => 0,
    }
}

fn adapter_is_software(adapter: &Dxgi::IDXGIAdapter1) -> bool {
    match unsafe { adapter.GetDesc1() } {
        Ok(desc) => (desc.Flags & Dxgi::DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0,
        Err(_) => true,
    }
}

fn create_device_for(
    adapter: &Dxgi::IDXGIAdapter1,
) -> Option<Direct3D12::ID3D12Device> {
    let mut device: Option<Direct3D12::ID3D12Device> = None;
    let hr = unsafe {
        Direct3D12::D3D12CreateDevice(
            adapter,
            Direct3D11::D3D_FEATURE_LEVEL_12_0,
            &mut device,
        )
    };
    match hr {
        Ok(()) => device,
        Err(_) => None,
    }
}

impl DeviceContext {
    pub fn new(config: &Config) -> Result<DeviceContext, InitError> {
        if config.validation != ValidationLevel::Off {
            let mut debug: Option<Direct3D12::ID3D12Debug> = None;
            if unsafe { Direct3D12::D3D12GetDebugInterface(&mut debug) }.is_ok() {
                if let Some(debug) = &debug {
                    unsafe { debug.EnableDebugLayer() };
                    if config.validation >= ValidationLevel::OnExtended {
                        if let Ok(debug1) = debug.cast::<Direct3D12::ID3D12Debug1>() {
                            unsafe { debug1.SetEnableGPUBasedValidation(true) };
                        }
                    }
                }
            } else {
                return Err(InitError::ValidationUnavailable(
                    "D3D12 debug layer unavailable (graphics tools not installed)".into(),
                ));
            }
            if config.validation == ValidationLevel::OnExtendedDred {
                let mut dred: Option<Direct3D12::ID3D12DeviceRemovedExtendedDataSettings> = None;
                if unsafe { Direct3D12::D3D12GetDebugInterface(&mut dred) }.is_ok() {
                    if let Some(dred) = &dred {
                        unsafe {
                            dred.SetAutoBreadcrumbsEnablement(
                                Direct3D12::D3D12_DRED_ENABLEMENT_FORCED_ON,
                            );
                            dred.SetPageFaultEnablement(
                                Direct3D12::D3D12_DRED_ENABLEMENT_FORCED_ON,
                            );
                        }
                    }
                }
            }
        }

        let factory: Dxgi::IDXGIFactory4 =
            unsafe { Dxgi::CreateDXGIFactory2(0) }.map_err(|e| {
                InitError::BackendUnsupported(format!("DXGI factory creation: {}", e.message()))
            })?;

        // tearing support (variable refresh rate)
        let allow_tearing = {
            let mut allowed: i32 = 0;
            if let Ok(factory5) = factory.cast::<Dxgi::IDXGIFactory5>() {
                unsafe {
                    factory5
                        .CheckFeatureSupport(
                            Dxgi::DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                            &mut allowed as *mut _ as *mut _,
                            std::mem::size_of::<i32>() as u32,
                        )
                        .ok();
                }
            }
            allowed != 0
        };

        // enumerate hardware adapters
        let mut candidates: Vec<Dxgi::IDXGIAdapter1> = Vec::new();
        let mut index = 0;
        loop {
            match unsafe { factory.EnumAdapters1(index) } {
                Ok(adapter) => {
                    if !adapter_is_software(&adapter) {
                        candidates.push(adapter);
                    }
                    index += 1;
                }
                Err(_) => break,
            }
        }
        if candidates.is_empty() {
            return Err(InitError::NoAdapterFound);
        }

        let chosen = match config.adapter_preference {
            AdapterPreference::ExplicitIndex => candidates
                .into_iter()
                .nth(config.explicit_adapter_index as usize)
                .ok_or(InitError::NoAdapterFound)?,
            AdapterPreference::First => candidates.remove(0),
            AdapterPreference::HighestVram
            | AdapterPreference::Integrated
            | AdapterPreference::HighestFeatureLevel => {
                // integrated preference inverts the vram ordering
                let invert = config.adapter_preference == AdapterPreference::Integrated;
                candidates
                    .into_iter()
                    .filter(|a| create_device_for(a).is_some())
                    .max_by_key(|a| {
                        let vram = adapter_vram(a);
                        if invert {
                            u64::MAX - vram
                        } else {
                            vram
                        }
                    })
                    .ok_or(InitError::NoAdapterFound)?
            }
        };

        let device = create_device_for(&chosen).ok_or_else(|| {
            InitError::BackendUnsupported("no adapter supports feature level 12_0".into())
        })?;

        if let Ok(desc) = unsafe { chosen.GetDesc1() } {
            let len = desc.Description.iter().take_while(|&&c| c != 0).count();
            info!(
                "selected adapter '{}' ({} MB VRAM)",
                String::from_utf16_lossy(&desc.Description[..len]),
                desc.DedicatedVideoMemory / (1024 * 1024)
            );
        }

        // raytracing support probe
        let raytracing_enabled = if config.enable_raytracing {
            let mut options5: Direct3D12::D3D12_FEATURE_DATA_D3D12_OPTIONS5 =
                unsafe { std::mem::zeroed() };
            let hr = unsafe {
                device.CheckFeatureSupport(
                    Direct3D12::D3D12_FEATURE_D3D12_OPTIONS5,
                    &mut options5 as *mut _ as *mut _,
                    std::mem::size_of::<Direct3D12::D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32,
                )
            };
            let supported = hr.is_ok()
                && options5.RaytracingTier.0 >= Direct3D12::D3D12_RAYTRACING_TIER_1_0.0;
            if !supported {
                info!("raytracing requested but the adapter lacks DXR tier 1.0");
            }
            supported
        } else {
            false
        };

        let make_queue = |ty: Direct3D12::D3D12_COMMAND_LIST_TYPE| {
            let desc = Direct3D12::D3D12_COMMAND_QUEUE_DESC {
                Type: ty,
                Priority: Direct3D12::D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
                Flags: Direct3D12::D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            };
            unsafe { device.CreateCommandQueue::<Direct3D12::ID3D12CommandQueue>(&desc) }
                .expect_hr("command queue creation")
        };

        Ok(DeviceContext {
            queue_direct: make_queue(Direct3D12::D3D12_COMMAND_LIST_TYPE_DIRECT),
            queue_compute: make_queue(Direct3D12::D3D12_COMMAND_LIST_TYPE_COMPUTE),
            queue_copy: make_queue(Direct3D12::D3D12_COMMAND_LIST_TYPE_COPY),
            factory,
            adapter: chosen,
            device,
            raytracing_enabled,
            allow_tearing,
        })
    }

    pub fn queue(&self, queue: QueueType) -> &Direct3D12::ID3D12CommandQueue {
        match queue {
            QueueType::Direct => &self.queue_direct,
            QueueType::Compute => &self.queue_compute,
            QueueType::Copy => &self.queue_copy,
        }
    }

    pub fn list_type(queue: QueueType) -> Direct3D12::D3D12_COMMAND_LIST_TYPE {
        match queue {
            QueueType::Direct => Direct3D12::D3D12_COMMAND_LIST_TYPE_DIRECT,
            QueueType::Compute => Direct3D12::D3D12_COMMAND_LIST_TYPE_COMPUTE,
            QueueType::Copy => Direct3D12::D3D12_COMMAND_LIST_TYPE_COPY,
        }
    }
}
