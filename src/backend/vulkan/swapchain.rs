//! Vulkan swapchain creation and lifetime.
//!
//! Synchronization primitives live with the frame loop, not here; the
//! swapchain owns only the image chain and its views.

use ash::vk;

use super::conversion::{convert_present_mode, convert_texture_format, convert_vk_format};
use super::VulkanBackend;
use crate::error::FrameError;
use crate::swapchain::SwapchainDescriptor;
use crate::types::{Extent2d, TextureFormat};

/// Vulkan swapchain resources.
pub struct VulkanSwapchain {
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) image_views: Vec<vk::ImageView>,
    format: TextureFormat,
    pub(crate) vk_format: vk::Format,
    extent: vk::Extent2D,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl VulkanSwapchain {
    /// Negotiate surface parameters and create the swapchain.
    ///
    /// `old_swapchain` lets the driver recycle the image chain being
    /// replaced; pass null on first creation.
    pub fn new(
        backend: &VulkanBackend,
        descriptor: &SwapchainDescriptor,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self, FrameError> {
        let capabilities = backend.surface_capabilities()?;
        let surface_format = negotiate_format(backend, descriptor.format)?;
        let present_mode = negotiate_present_mode(backend, descriptor)?;
        let extent = negotiate_extent(&capabilities, descriptor);
        let image_count = negotiate_image_count(&capabilities);

        // TRANSFER_SRC lets presentable images be read back for captures
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(backend.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            backend
                .swapchain_loader()
                .create_swapchain(&create_info, None)
        }
        .map_err(|e| {
            FrameError::ResourceCreationFailed(format!("failed to create swapchain: {e:?}"))
        })?;

        let images = unsafe { backend.swapchain_loader().get_swapchain_images(swapchain) }
            .map_err(|e| {
                FrameError::ResourceCreationFailed(format!(
                    "failed to get swapchain images: {e:?}"
                ))
            })?;

        let image_views: Vec<vk::ImageView> = images
            .iter()
            .map(|&image| {
                create_presentable_view(backend.device(), image, surface_format.format)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "created vulkan swapchain {}x{} with {} images",
            extent.width,
            extent.height,
            images.len()
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: convert_vk_format(surface_format.format).unwrap_or(descriptor.format),
            vk_format: surface_format.format,
            extent,
            device: backend.device().clone(),
            swapchain_loader: backend.swapchain_loader().clone(),
        })
    }

    /// Number of presentable images in the chain.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Extent the chain was created with.
    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.extent.width, self.extent.height)
    }

    /// Format of the presentable images.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub(crate) fn vk_extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Destroy the swapchain and its image views.
    ///
    /// Called automatically on drop; the null-handle guard makes explicit
    /// destruction safe too.
    pub fn destroy(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }

        unsafe {
            let _ = self.device.device_wait_idle();

            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }

            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Prefer the requested format; fall back to whatever the surface offers
/// first when the driver does not support it.
fn negotiate_format(
    backend: &VulkanBackend,
    requested: TextureFormat,
) -> Result<vk::SurfaceFormatKHR, FrameError> {
    let formats = backend.surface_formats()?;
    let wanted = convert_texture_format(requested);
    formats
        .iter()
        .find(|f| f.format == wanted)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| {
            FrameError::ResourceCreationFailed("surface reports no formats".to_string())
        })
}

/// FIFO is the only mode Vulkan guarantees, so it is the fallback.
fn negotiate_present_mode(
    backend: &VulkanBackend,
    descriptor: &SwapchainDescriptor,
) -> Result<vk::PresentModeKHR, FrameError> {
    let available = backend.surface_present_modes()?;
    let wanted = convert_present_mode(descriptor.present_mode);
    Ok(if available.contains(&wanted) {
        wanted
    } else {
        log::debug!("present mode {:?} unavailable, using FIFO", wanted);
        vk::PresentModeKHR::FIFO
    })
}

/// The surface usually dictates the extent; when it leaves it open
/// (current extent is the u32::MAX sentinel), clamp the requested size into
/// the supported range.
fn negotiate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    descriptor: &SwapchainDescriptor,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: descriptor.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: descriptor.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One above the minimum avoids driver stalls; zero max means unbounded.
fn negotiate_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// Create a 2D color view over a presentable image.
fn create_presentable_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, FrameError> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
        FrameError::ResourceCreationFailed(format!(
            "failed to create swapchain image view: {e:?}"
        ))
    })
}
