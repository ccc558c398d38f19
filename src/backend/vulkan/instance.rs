//! Vulkan instance setup.

use std::ffi::{CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::FrameError;

use super::debug;

// 1.2 keeps MoltenVK in play; nothing here needs the 1.3 feature set.
const API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the debug messenger, when validation is active.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Create an instance carrying the surface extensions the windowing system
/// behind `display_handle` needs, with validation layers when requested and
/// installed on the machine.
pub fn create_instance(
    entry: &ash::Entry,
    display_handle: RawDisplayHandle,
    want_validation: bool,
) -> Result<InstanceBundle, FrameError> {
    let validation = want_validation && validation_layer_present(entry);
    if want_validation && !validation {
        log::warn!("validation layers requested but not installed");
    }

    let app_name = CString::new("renderflow")
        .map_err(|e| FrameError::InitializationFailed(format!("invalid application name: {e}")))?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&app_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(API_VERSION);

    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| {
            FrameError::InitializationFailed(format!(
                "failed to enumerate surface extensions: {e:?}"
            ))
        })?
        .to_vec();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers: Vec<*const std::ffi::c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    #[cfg(target_os = "macos")]
    let flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        FrameError::InitializationFailed(format!("failed to create vulkan instance: {e:?}"))
    })?;

    let debug_utils = if validation {
        let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = debug::install_messenger(&loader)?;
        Some((loader, messenger))
    } else {
        None
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
    })
}

fn validation_layer_present(entry: &ash::Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers.iter().any(|layer| {
                unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER
            })
        })
        .unwrap_or(false)
}
