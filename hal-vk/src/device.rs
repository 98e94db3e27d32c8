//! Instance and device bootstrap: layers, debug messenger, adapter
//! choice, queue families, feature negotiation.

use std::ffi::{c_void, CStr, CString};

use ash::vk;

use arclight_hal::config::{AdapterPreference, Config, ValidationLevel};
use arclight_hal::types::QueueType;
use arclight_hal::InitError;

pub struct QueueFamilies {
    pub direct: u32,
    pub compute: u32,
    pub copy: u32,
    pub has_discrete_compute: bool,
    pub has_discrete_copy: bool,
}

pub struct DeviceContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub queue_direct: vk::Queue,
    pub queue_compute: vk::Queue,
    pub queue_copy: vk::Queue,
    pub properties: vk::PhysicalDeviceProperties,
    pub raytracing_enabled: bool,
    pub rt_pipeline_properties: Option<vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>>,
    debug_utils_instance: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    pub debug_utils_device: Option<ash::ext::debug_utils::Device>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        String::from("<empty validation message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy().into_owned()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {}", message);
    } else {
        debug!("[vulkan] {}", message);
    }
    vk::FALSE
}

fn score_adapter(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    preference: AdapterPreference,
) -> u64 {
    let props = unsafe { instance.get_physical_device_properties(physical) };
    let memory = unsafe { instance.get_physical_device_memory_properties(physical) };
    let vram: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    match preference {
        AdapterPreference::HighestVram => vram,
        AdapterPreference::Integrated => {
            if props.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
                1 << 60
            } else {
                vram
            }
        }
        AdapterPreference::HighestFeatureLevel => u64::from(props.api_version),
        AdapterPreference::First | AdapterPreference::ExplicitIndex => 0,
    }
}

fn find_queue_families(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };

    let direct = families.iter().position(|f| {
        f.queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    })? as u32;

    let compute = families
        .iter()
        .enumerate()
        .position(|(i, f)| {
            i as u32 != direct
                && f.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|i| i as u32);

    let copy = families
        .iter()
        .enumerate()
        .position(|(i, f)| {
            i as u32 != direct
                && f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && !f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|i| i as u32);

    Some(QueueFamilies {
        direct,
        compute: compute.unwrap_or(direct),
        copy: copy.unwrap_or(direct),
        has_discrete_compute: compute.is_some(),
        has_discrete_copy: copy.is_some(),
    })
}

impl DeviceContext {
    pub fn new(config: &Config) -> Result<DeviceContext, InitError> {
        let entry = unsafe {
            ash::Entry::load().map_err(|e| InitError::BackendUnsupported(e.to_string()))?
        };

        let wants_validation = config.validation != ValidationLevel::Off;
        let mut layers: Vec<CString> = Vec::new();
        if wants_validation {
            const KHRONOS: &str = "VK_LAYER_KHRONOS_validation";
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(|e| InitError::Native(format!("{:?}", e)))?;
            let found = available.iter().any(|prop| {
                unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) }.to_string_lossy() == KHRONOS
            });
            if found {
                layers.push(CString::new(KHRONOS).unwrap());
            } else {
                return Err(InitError::ValidationUnavailable(format!(
                    "{} layer not installed",
                    KHRONOS
                )));
            }
        }
        let layer_ptrs: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

        let mut extensions: Vec<*const i8> = vec![ash::khr::surface::NAME.as_ptr()];
        #[cfg(windows)]
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());
        #[cfg(unix)]
        {
            extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
            extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
        }
        if wants_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let app_name = CString::new("arclight").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(vk::API_VERSION_1_2);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extensions);

        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(|e| InitError::Native(format!("instance creation: {:?}", e)))?
        };

        let (debug_utils_instance, debug_messenger) = if wants_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&messenger_info, None)
                    .map_err(|e| InitError::Native(format!("debug messenger: {:?}", e)))?
            };
            (Some(loader), messenger)
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        // adapter choice
        let adapters = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| InitError::Native(format!("{:?}", e)))?;
        if adapters.is_empty() {
            return Err(InitError::NoAdapterFound);
        }

        let physical_device = if config.adapter_preference == AdapterPreference::ExplicitIndex {
            *adapters
                .get(config.explicit_adapter_index as usize)
                .ok_or(InitError::NoAdapterFound)?
        } else {
            adapters
                .iter()
                .copied()
                .filter(|&adapter| find_queue_families(&instance, adapter).is_some())
                .max_by_key(|&adapter| {
                    score_adapter(&instance, adapter, config.adapter_preference)
                })
                .ok_or(InitError::NoAdapterFound)?
        };

        let families =
            find_queue_families(&instance, physical_device).ok_or(InitError::NoAdapterFound)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let adapter_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        info!(
            "selected adapter '{}' (api {}.{}.{})",
            adapter_name.to_string_lossy(),
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
        );

        // raytracing support probe
        let mut raytracing_enabled = false;
        let mut rt_pipeline_properties = None;
        if config.enable_raytracing {
            let available = unsafe {
                instance.enumerate_device_extension_properties(physical_device)
            }
            .map_err(|e| InitError::Native(format!("{:?}", e)))?;
            let has_ext = |name: &CStr| {
                available.iter().any(|prop| {
                    (unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) }) == name
                })
            };
            raytracing_enabled = has_ext(ash::khr::acceleration_structure::NAME)
                && has_ext(ash::khr::ray_tracing_pipeline::NAME)
                && has_ext(ash::khr::deferred_host_operations::NAME);

            if raytracing_enabled {
                let mut rt_props =
                    vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
                let mut props2 =
                    vk::PhysicalDeviceProperties2::default().push_next(&mut rt_props);
                unsafe {
                    instance.get_physical_device_properties2(physical_device, &mut props2)
                };
                rt_pipeline_properties = Some(rt_props);
            } else {
                info!("raytracing requested but the adapter lacks the KHR extensions");
            }
        }

        // queues: one per unique family
        let priorities = [1.0f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(families.direct)
            .queue_priorities(&priorities)];
        if families.has_discrete_compute {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(families.compute)
                    .queue_priorities(&priorities),
            );
        }
        if families.has_discrete_copy {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(families.copy)
                    .queue_priorities(&priorities),
            );
        }

        let mut device_extensions: Vec<*const i8> = vec![ash::khr::swapchain::NAME.as_ptr()];
        if raytracing_enabled {
            device_extensions.push(ash::khr::acceleration_structure::NAME.as_ptr());
            device_extensions.push(ash::khr::ray_tracing_pipeline::NAME.as_ptr());
            device_extensions.push(ash::khr::deferred_host_operations::NAME.as_ptr());
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(raytracing_enabled);
        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);
        let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
            .ray_tracing_pipeline(true);

        let mut device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .push_next(&mut features12);
        if raytracing_enabled {
            device_info = device_info
                .push_next(&mut accel_features)
                .push_next(&mut rt_features);
        }

        let device = unsafe {
            instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| InitError::Native(format!("device creation: {:?}", e)))?
        };

        let queue_direct = unsafe { device.get_device_queue(families.direct, 0) };
        let queue_compute = if families.has_discrete_compute {
            unsafe { device.get_device_queue(families.compute, 0) }
        } else {
            queue_direct
        };
        let queue_copy = if families.has_discrete_copy {
            unsafe { device.get_device_queue(families.copy, 0) }
        } else {
            queue_direct
        };

        let debug_utils_device = debug_utils_instance
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(DeviceContext {
            entry,
            instance,
            physical_device,
            device,
            families,
            queue_direct,
            queue_compute,
            queue_copy,
            properties,
            raytracing_enabled,
            rt_pipeline_properties,
            debug_utils_instance,
            debug_messenger,
            debug_utils_device,
        })
    }

    pub fn queue(&self, queue: QueueType) -> vk::Queue {
        match queue {
            QueueType::Direct => self.queue_direct,
            QueueType::Compute => self.queue_compute,
            QueueType::Copy => self.queue_copy,
        }
    }

    pub fn queue_family(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Direct => self.families.direct,
            QueueType::Compute => self.families.compute,
            QueueType::Copy => self.families.copy,
        }
    }

    /// GPU timestamp frequency in Hz, derived from the tick period.
    pub fn timestamp_frequency(&self) -> u64 {
        let period_ns = f64::from(self.properties.limits.timestamp_period).max(f64::MIN_POSITIVE);
        (1.0e9 / period_ns) as u64
    }

    pub fn destroy(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            if let Some(loader) = &self.debug_utils_instance {
                loader.destroy_debug_utils_messenger(self.debug_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
