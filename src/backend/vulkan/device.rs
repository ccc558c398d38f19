//! Physical device selection and logical device creation.

use std::ffi::CStr;

use ash::vk;

use crate::error::FrameError;

/// Pick the GPU that can both render and present to the surface.
///
/// Discrete GPUs beat integrated ones; ties break on the maximum 2D image
/// dimension. Returns the device with the queue family used for graphics
/// and presentation alike, keeping swapchain image ownership exclusive.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32), FrameError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        FrameError::InitializationFailed(format!("failed to enumerate physical devices: {e:?}"))
    })?;

    let best = devices
        .into_iter()
        .filter_map(|device| {
            let family = present_capable_family(instance, device, surface_loader, surface)?;
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let score = rank(&properties);
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::info!(
                "candidate GPU {:?} ({:?}, rank {})",
                name,
                properties.device_type,
                score
            );
            Some((score, device, family))
        })
        .max_by_key(|(score, ..)| *score);

    match best {
        Some((_, device, family)) => Ok((device, family)),
        None => Err(FrameError::InitializationFailed(
            "no GPU can present to the surface".to_string(),
        )),
    }
}

fn rank(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let class = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    };
    class + properties.limits.max_image_dimension2_d / 1024
}

fn present_capable_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return None;
        }
        let can_present = unsafe {
            surface_loader.get_physical_device_surface_support(device, index, surface)
        }
        .unwrap_or(false);
        can_present.then_some(index)
    })
}

/// Create the logical device with the swapchain extension and fetch its
/// graphics queue.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue), FrameError> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)];

    let extensions = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(|e| {
            FrameError::InitializationFailed(format!("failed to create logical device: {e:?}"))
        })?;
    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    Ok((device, queue))
}
