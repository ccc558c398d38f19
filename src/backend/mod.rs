//! GPU backend abstraction.
//!
//! # Overview
//!
//! All GPU work goes through the [`RenderBackend`] trait. Two implementations
//! exist:
//!
//! - [`dummy::DummyBackend`] — a no-op backend that tracks synchronization
//!   state without touching a GPU. Always available; used headless and in
//!   tests.
//! - `vulkan::VulkanBackend` — the real device path, behind the
//!   `vulkan-backend` feature.
//!
//! Resources are handle enums ([`GpuImage`], [`GpuRenderpass`], ...) with one
//! variant per backend. Handles own their GPU objects exclusively and release
//! them on drop; anything else holding one does so through a non-owning
//! reference re-fetched from the owner after a rebuild.

pub mod dummy;
#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::FrameError;
use crate::stage::{AttachmentDescriptor, SubpassDescriptor};
use crate::swapchain::{AcquiredImage, SwapchainDescriptor};
use crate::types::{ClearValue, Extent2d, ImageDescriptor, TextureFormat};

use self::dummy::DummySwapchain;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

#[cfg(feature = "vulkan-backend")]
use self::vulkan::VulkanSwapchain;

/// An attachment image together with its view.
#[allow(clippy::large_enum_variant)]
pub enum GpuImage {
    Dummy {
        width: u32,
        height: u32,
        format: TextureFormat,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        image: vk::Image,
        view: vk::ImageView,
        allocation: Mutex<Option<Allocation>>,
    },
}

impl fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy {
                width,
                height,
                format,
            } => f
                .debug_struct("GpuImage::Dummy")
                .field("width", width)
                .field("height", height)
                .field("format", format)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, .. } => f
                .debug_struct("GpuImage::Vulkan")
                .field("image", image)
                .finish_non_exhaustive(),
        }
    }
}

/// A renderpass object describing attachment layouts and subpass ordering.
pub enum GpuRenderpass {
    Dummy {
        attachment_count: usize,
        subpass_count: usize,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        renderpass: vk::RenderPass,
    },
}

impl fmt::Debug for GpuRenderpass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy {
                attachment_count,
                subpass_count,
            } => f
                .debug_struct("GpuRenderpass::Dummy")
                .field("attachment_count", attachment_count)
                .field("subpass_count", subpass_count)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { renderpass, .. } => f
                .debug_struct("GpuRenderpass::Vulkan")
                .field("renderpass", renderpass)
                .finish_non_exhaustive(),
        }
    }
}

/// A framebuffer binding concrete images to a renderpass.
pub enum GpuFramebuffer {
    Dummy {
        width: u32,
        height: u32,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        framebuffer: vk::Framebuffer,
    },
}

impl fmt::Debug for GpuFramebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { width, height } => f
                .debug_struct("GpuFramebuffer::Dummy")
                .field("width", width)
                .field("height", height)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { framebuffer, .. } => f
                .debug_struct("GpuFramebuffer::Vulkan")
                .field("framebuffer", framebuffer)
                .finish_non_exhaustive(),
        }
    }
}

/// The presentable image chain shared with the display surface.
#[allow(clippy::large_enum_variant)]
pub enum GpuSwapchain {
    Dummy(DummySwapchain),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(VulkanSwapchain),
}

impl GpuSwapchain {
    /// Number of presentable images in the chain.
    pub fn image_count(&self) -> u32 {
        match self {
            Self::Dummy(swapchain) => swapchain.image_count(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(swapchain) => swapchain.image_count(),
        }
    }

    /// Extent the chain was created with.
    pub fn extent(&self) -> Extent2d {
        match self {
            Self::Dummy(swapchain) => swapchain.extent(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(swapchain) => swapchain.extent(),
        }
    }

    /// Format of the presentable images.
    pub fn format(&self) -> TextureFormat {
        match self {
            Self::Dummy(swapchain) => swapchain.format(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(swapchain) => swapchain.format(),
        }
    }
}

impl fmt::Debug for GpuSwapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy(swapchain) => f.debug_tuple("GpuSwapchain::Dummy").field(swapchain).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => f.debug_struct("GpuSwapchain::Vulkan").finish_non_exhaustive(),
        }
    }
}

/// GPU-to-CPU completion signal.
pub enum GpuFence {
    Dummy { signaled: AtomicBool },
    #[cfg(feature = "vulkan-backend")]
    Vulkan { device: ash::Device, fence: vk::Fence },
}

impl fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { signaled } => f
                .debug_struct("GpuFence::Dummy")
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// GPU-to-GPU queue ordering signal.
pub enum GpuSemaphore {
    Dummy,
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy => f.debug_struct("GpuSemaphore::Dummy").finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuSemaphore::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle commands are recorded into.
///
/// Cloning copies the handle, not the recording; the underlying buffer is
/// owned by the backend's command pool and freed with it.
#[derive(Clone)]
pub enum GpuCommandBuffer {
    Dummy,
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        command_buffer: vk::CommandBuffer,
    },
}

impl fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy => f.debug_struct("GpuCommandBuffer::Dummy").finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { command_buffer, .. } => f
                .debug_struct("GpuCommandBuffer::Vulkan")
                .field("command_buffer", command_buffer)
                .finish_non_exhaustive(),
        }
    }
}

/// Cache of compiled pipeline state, shared by all stages.
pub enum GpuPipelineCache {
    Dummy,
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        cache: vk::PipelineCache,
    },
}

impl fmt::Debug for GpuPipelineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy => f.debug_struct("GpuPipelineCache::Dummy").finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { cache, .. } => f
                .debug_struct("GpuPipelineCache::Vulkan")
                .field("cache", cache)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything a renderpass needs to know about its attachments and subpasses.
#[derive(Debug)]
pub struct RenderpassDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Attachments in declaration order.
    pub attachments: &'a [AttachmentDescriptor],
    /// Subpasses in execution order.
    pub subpasses: &'a [SubpassDescriptor],
    /// Format presentable attachments resolve to.
    pub surface_format: TextureFormat,
    /// Sample count multisampled attachments resolve to.
    pub sample_count: u32,
}

/// One slot of a framebuffer, matched by position to the renderpass
/// attachment declarations.
#[derive(Debug)]
pub enum FramebufferAttachment<'a> {
    /// An image owned by the render stage.
    Image(&'a GpuImage),
    /// One of the swapchain's presentable images.
    SwapchainImage { swapchain: &'a GpuSwapchain, index: u32 },
}

/// Everything a framebuffer needs: the renderpass it serves and one
/// attachment per renderpass attachment declaration, in the same order.
#[derive(Debug)]
pub struct FramebufferDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Renderpass the framebuffer is created against.
    pub renderpass: &'a GpuRenderpass,
    /// Attachments in renderpass declaration order.
    pub attachments: Vec<FramebufferAttachment<'a>>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Backend interface the orchestration layer records and submits through.
///
/// Implementations are driven from a single frame-loop thread; `Send + Sync`
/// is still required so handles can be shared with loader or event threads.
pub trait RenderBackend: Send + Sync + 'static {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Create an attachment image with its view.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, FrameError>;

    /// Create a renderpass from attachment and subpass declarations.
    fn create_renderpass(
        &self,
        descriptor: &RenderpassDescriptor<'_>,
    ) -> Result<GpuRenderpass, FrameError>;

    /// Create a framebuffer binding images to a renderpass.
    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor<'_>,
    ) -> Result<GpuFramebuffer, FrameError>;

    /// Create a swapchain, optionally recycling an old one being replaced.
    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        old: Option<&GpuSwapchain>,
    ) -> Result<GpuSwapchain, FrameError>;

    /// Create a fence, optionally pre-signaled.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, FrameError>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<GpuSemaphore, FrameError>;

    /// Allocate a primary command buffer from the backend's pool.
    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, FrameError>;

    /// Create the shared pipeline cache.
    fn create_pipeline_cache(&self) -> Result<GpuPipelineCache, FrameError>;

    /// Block until the fence signals or the timeout elapses. Returns whether
    /// the fence signaled in time.
    fn wait_fence_timeout(&self, fence: &GpuFence, timeout: Duration) -> bool;

    /// Return the fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence);

    /// Acquire the next presentable image, signaling `signal` when it is
    /// ready. A stale result carries no usable index.
    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        timeout: Duration,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, FrameError>;

    /// Queue the image for presentation after `wait` signals. Returns `true`
    /// if the surface reported staleness.
    fn present_image(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
        wait: &GpuSemaphore,
    ) -> Result<bool, FrameError>;

    /// Begin recording into the command buffer.
    fn begin_commands(&self, command_buffer: &GpuCommandBuffer) -> Result<(), FrameError>;

    /// Finish recording.
    fn end_commands(&self, command_buffer: &GpuCommandBuffer) -> Result<(), FrameError>;

    /// Record a renderpass begin, clearing attachments and setting viewport
    /// and scissor to the render area.
    fn begin_renderpass(
        &self,
        command_buffer: &GpuCommandBuffer,
        renderpass: &GpuRenderpass,
        framebuffer: &GpuFramebuffer,
        render_area: Extent2d,
        clear_values: &[ClearValue],
    );

    /// Record a transition to the next subpass.
    fn next_subpass(&self, command_buffer: &GpuCommandBuffer);

    /// Record the renderpass end.
    fn end_renderpass(&self, command_buffer: &GpuCommandBuffer);

    /// Submit the recording: waits on `wait`, signals `signal` and `fence`
    /// on completion.
    fn submit_commands(
        &self,
        command_buffer: &GpuCommandBuffer,
        wait: &GpuSemaphore,
        signal: &GpuSemaphore,
        fence: &GpuFence,
    ) -> Result<(), FrameError>;

    /// Read a presentable image back as tightly packed RGBA8 rows.
    fn read_swapchain_image(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
    ) -> Result<Vec<u8>, FrameError>;

    /// Block until the device finishes all submitted work.
    fn wait_idle(&self);
}

/// Pick the best available backend.
///
/// Tries Vulkan when compiled in and window handles are supplied, falling
/// back to the dummy backend otherwise.
pub fn create_backend(
    window: Option<(RawDisplayHandle, RawWindowHandle)>,
) -> Arc<dyn RenderBackend> {
    #[cfg(feature = "vulkan-backend")]
    if let Some((display_handle, window_handle)) = window {
        match vulkan::VulkanBackend::new(display_handle, window_handle) {
            Ok(backend) => {
                log::info!("using vulkan backend");
                return Arc::new(backend);
            }
            Err(err) => {
                log::warn!("vulkan backend unavailable: {}", err);
            }
        }
    }
    #[cfg(not(feature = "vulkan-backend"))]
    let _ = window;

    log::info!("using dummy backend");
    Arc::new(dummy::DummyBackend::new())
}

// ===== Vulkan Resource Cleanup =====

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuImage {
    fn drop(&mut self) {
        if let Self::Vulkan {
            device,
            allocator,
            image,
            view,
            allocation,
        } = self
        {
            unsafe {
                device.destroy_image_view(*view, None);
                device.destroy_image(*image, None);
            }
            if let Some(allocation) = allocation.lock().take() {
                if let Err(err) = allocator.lock().free(allocation) {
                    log::warn!("failed to free image allocation: {}", err);
                }
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuRenderpass {
    fn drop(&mut self) {
        if let Self::Vulkan { device, renderpass } = self {
            unsafe { device.destroy_render_pass(*renderpass, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFramebuffer {
    fn drop(&mut self) {
        if let Self::Vulkan {
            device,
            framebuffer,
        } = self
        {
            unsafe { device.destroy_framebuffer(*framebuffer, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let Self::Vulkan { device, fence } = self {
            unsafe { device.destroy_fence(*fence, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let Self::Vulkan { device, semaphore } = self {
            unsafe { device.destroy_semaphore(*semaphore, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuPipelineCache {
    fn drop(&mut self) {
        if let Self::Vulkan { device, cache } = self {
            unsafe { device.destroy_pipeline_cache(*cache, None) };
        }
    }
}

static_assertions::assert_impl_all!(GpuImage: Send, Sync);
static_assertions::assert_impl_all!(GpuRenderpass: Send, Sync);
static_assertions::assert_impl_all!(GpuFramebuffer: Send, Sync);
static_assertions::assert_impl_all!(GpuSwapchain: Send, Sync);
static_assertions::assert_impl_all!(GpuFence: Send, Sync);
static_assertions::assert_impl_all!(GpuSemaphore: Send, Sync);
static_assertions::assert_impl_all!(GpuCommandBuffer: Send, Sync);
static_assertions::assert_impl_all!(GpuPipelineCache: Send, Sync);
static_assertions::assert_obj_safe!(RenderBackend);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend_without_window_falls_back_to_dummy() {
        let backend = create_backend(None);
        assert_eq!(backend.name(), "dummy");
    }

    #[test]
    fn test_dummy_handles_format_debug() {
        let image = GpuImage::Dummy {
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
        };
        let formatted = format!("{:?}", image);
        assert!(formatted.contains("GpuImage::Dummy"));

        let fence = GpuFence::Dummy {
            signaled: AtomicBool::new(true),
        };
        assert!(format!("{:?}", fence).contains("GpuFence::Dummy"));
    }
}
