//! No-op backend for headless runs and tests.
//!
//! Tracks fence state and swapchain image rotation without touching a GPU,
//! so the full frame protocol can run on machines with no graphics device.
//! Staleness and fence-timeout injection hooks let tests drive the
//! recreation and device-loss paths deterministically.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{
    FramebufferDescriptor, GpuCommandBuffer, GpuFence, GpuFramebuffer, GpuImage,
    GpuPipelineCache, GpuRenderpass, GpuSemaphore, GpuSwapchain, RenderBackend,
    RenderpassDescriptor,
};
use crate::error::FrameError;
use crate::swapchain::{AcquiredImage, SwapchainDescriptor};
use crate::types::{ClearValue, Extent2d, ImageDescriptor, TextureFormat};

fn dummy_fence(fence: &GpuFence) -> Option<&AtomicBool> {
    match fence {
        GpuFence::Dummy { signaled } => Some(signaled),
        #[cfg(feature = "vulkan-backend")]
        GpuFence::Vulkan { .. } => None,
    }
}

fn dummy_swapchain(swapchain: &GpuSwapchain) -> Option<&DummySwapchain> {
    match swapchain {
        GpuSwapchain::Dummy(swapchain) => Some(swapchain),
        #[cfg(feature = "vulkan-backend")]
        GpuSwapchain::Vulkan(_) => None,
    }
}

/// Presentable image chain of the dummy backend.
///
/// Images are purely virtual; acquisition rotates through the indices the
/// way a FIFO swapchain would.
#[derive(Debug)]
pub struct DummySwapchain {
    image_count: u32,
    extent: Extent2d,
    format: TextureFormat,
    next_image: AtomicU32,
}

impl DummySwapchain {
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    fn acquire(&self) -> u32 {
        self.next_image.fetch_add(1, Ordering::AcqRel) % self.image_count
    }
}

/// Backend that accepts every command and completes every submission
/// immediately.
#[derive(Debug)]
pub struct DummyBackend {
    image_count: AtomicU32,
    stale_acquires: AtomicU32,
    present_stale: AtomicBool,
    fail_next_fence_wait: AtomicBool,
    swapchains_created: AtomicU32,
    renderpasses_created: AtomicU32,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            image_count: AtomicU32::new(3),
            stale_acquires: AtomicU32::new(0),
            present_stale: AtomicBool::new(false),
            fail_next_fence_wait: AtomicBool::new(false),
            swapchains_created: AtomicU32::new(0),
            renderpasses_created: AtomicU32::new(0),
        }
    }

    /// Number of images swapchains created from now on will hold.
    pub fn set_image_count(&self, count: u32) {
        self.image_count.store(count.max(1), Ordering::Release);
    }

    /// Make the next image acquisition report a stale surface. Calling this
    /// repeatedly queues one stale result per call.
    pub fn mark_acquire_stale(&self) {
        self.stale_acquires.fetch_add(1, Ordering::AcqRel);
    }

    /// Make the next present report a stale surface.
    pub fn mark_present_stale(&self) {
        self.present_stale.store(true, Ordering::Release);
    }

    /// Make the next fence wait time out regardless of fence state.
    pub fn fail_next_fence_wait(&self) {
        self.fail_next_fence_wait.store(true, Ordering::Release);
    }

    /// Total number of swapchains created, recreations included.
    pub fn swapchains_created(&self) -> u32 {
        self.swapchains_created.load(Ordering::Acquire)
    }

    /// Total number of renderpasses created.
    pub fn renderpasses_created(&self) -> u32 {
        self.renderpasses_created.load(Ordering::Acquire)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, FrameError> {
        log::trace!(
            "DummyBackend: created {}x{} image ({:?})",
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(GpuImage::Dummy {
            width: descriptor.width,
            height: descriptor.height,
            format: descriptor.format,
        })
    }

    fn create_renderpass(
        &self,
        descriptor: &RenderpassDescriptor<'_>,
    ) -> Result<GpuRenderpass, FrameError> {
        self.renderpasses_created.fetch_add(1, Ordering::AcqRel);
        log::trace!(
            "DummyBackend: created renderpass '{}' ({} attachments, {} subpasses)",
            descriptor.label,
            descriptor.attachments.len(),
            descriptor.subpasses.len()
        );
        Ok(GpuRenderpass::Dummy {
            attachment_count: descriptor.attachments.len(),
            subpass_count: descriptor.subpasses.len(),
        })
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor<'_>,
    ) -> Result<GpuFramebuffer, FrameError> {
        log::trace!(
            "DummyBackend: created {}x{} framebuffer '{}'",
            descriptor.width,
            descriptor.height,
            descriptor.label
        );
        Ok(GpuFramebuffer::Dummy {
            width: descriptor.width,
            height: descriptor.height,
        })
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        _old: Option<&GpuSwapchain>,
    ) -> Result<GpuSwapchain, FrameError> {
        self.swapchains_created.fetch_add(1, Ordering::AcqRel);
        log::trace!(
            "DummyBackend: created {}x{} swapchain",
            descriptor.width,
            descriptor.height
        );
        Ok(GpuSwapchain::Dummy(DummySwapchain {
            image_count: self.image_count.load(Ordering::Acquire),
            extent: Extent2d::new(descriptor.width, descriptor.height),
            format: descriptor.format,
            next_image: AtomicU32::new(0),
        }))
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, FrameError> {
        Ok(GpuFence::Dummy {
            signaled: AtomicBool::new(signaled),
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, FrameError> {
        Ok(GpuSemaphore::Dummy)
    }

    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, FrameError> {
        Ok(GpuCommandBuffer::Dummy)
    }

    fn create_pipeline_cache(&self) -> Result<GpuPipelineCache, FrameError> {
        Ok(GpuPipelineCache::Dummy)
    }

    fn wait_fence_timeout(&self, fence: &GpuFence, timeout: Duration) -> bool {
        if self.fail_next_fence_wait.swap(false, Ordering::AcqRel) {
            log::trace!("DummyBackend: forced fence wait timeout");
            return false;
        }
        let Some(signaled) = dummy_fence(fence) else {
            log::error!("DummyBackend: foreign fence handle");
            return false;
        };
        let deadline = Instant::now() + timeout;
        loop {
            if signaled.load(Ordering::Acquire) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::yield_now();
        }
    }

    fn reset_fence(&self, fence: &GpuFence) {
        if let Some(signaled) = dummy_fence(fence) {
            signaled.store(false, Ordering::Release);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        _timeout: Duration,
        _signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, FrameError> {
        if self
            .stale_acquires
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
        {
            log::trace!("DummyBackend: acquire reports stale surface");
            return Ok(AcquiredImage {
                index: 0,
                stale: true,
            });
        }
        let swapchain = dummy_swapchain(swapchain)
            .ok_or_else(|| FrameError::Internal("foreign swapchain handle".into()))?;
        let index = swapchain.acquire();
        log::trace!("DummyBackend: acquired image {}", index);
        Ok(AcquiredImage {
            index,
            stale: false,
        })
    }

    fn present_image(
        &self,
        _swapchain: &GpuSwapchain,
        image_index: u32,
        _wait: &GpuSemaphore,
    ) -> Result<bool, FrameError> {
        let stale = self.present_stale.swap(false, Ordering::AcqRel);
        log::trace!(
            "DummyBackend: presented image {} (stale: {})",
            image_index,
            stale
        );
        Ok(stale)
    }

    fn begin_commands(&self, _command_buffer: &GpuCommandBuffer) -> Result<(), FrameError> {
        log::trace!("DummyBackend: begin commands");
        Ok(())
    }

    fn end_commands(&self, _command_buffer: &GpuCommandBuffer) -> Result<(), FrameError> {
        log::trace!("DummyBackend: end commands");
        Ok(())
    }

    fn begin_renderpass(
        &self,
        _command_buffer: &GpuCommandBuffer,
        _renderpass: &GpuRenderpass,
        _framebuffer: &GpuFramebuffer,
        render_area: Extent2d,
        clear_values: &[ClearValue],
    ) {
        log::trace!(
            "DummyBackend: begin renderpass {}x{} ({} clear values)",
            render_area.width,
            render_area.height,
            clear_values.len()
        );
    }

    fn next_subpass(&self, _command_buffer: &GpuCommandBuffer) {
        log::trace!("DummyBackend: next subpass");
    }

    fn end_renderpass(&self, _command_buffer: &GpuCommandBuffer) {
        log::trace!("DummyBackend: end renderpass");
    }

    fn submit_commands(
        &self,
        _command_buffer: &GpuCommandBuffer,
        _wait: &GpuSemaphore,
        _signal: &GpuSemaphore,
        fence: &GpuFence,
    ) -> Result<(), FrameError> {
        if let Some(signaled) = dummy_fence(fence) {
            signaled.store(true, Ordering::Release);
        }
        log::trace!("DummyBackend: submitted commands");
        Ok(())
    }

    fn read_swapchain_image(
        &self,
        swapchain: &GpuSwapchain,
        _image_index: u32,
    ) -> Result<Vec<u8>, FrameError> {
        let extent = swapchain.extent();
        let mut data = vec![0u8; extent.width as usize * extent.height as usize * 4];
        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        Ok(data)
    }

    fn wait_idle(&self) {
        log::trace!("DummyBackend: wait idle");
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn swapchain_descriptor(width: u32, height: u32) -> SwapchainDescriptor {
        SwapchainDescriptor {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            present_mode: Default::default(),
        }
    }

    #[test]
    fn test_fence_lifecycle() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        assert!(backend.wait_fence_timeout(&fence, Duration::ZERO));

        backend.reset_fence(&fence);
        assert!(!backend.wait_fence_timeout(&fence, Duration::ZERO));

        let command_buffer = backend.create_command_buffer().unwrap();
        let wait = backend.create_semaphore().unwrap();
        let signal = backend.create_semaphore().unwrap();
        backend
            .submit_commands(&command_buffer, &wait, &signal, &fence)
            .unwrap();
        assert!(backend.wait_fence_timeout(&fence, Duration::ZERO));
    }

    #[test]
    fn test_forced_fence_timeout_fires_once() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        backend.fail_next_fence_wait();
        assert!(!backend.wait_fence_timeout(&fence, Duration::from_secs(1)));
        assert!(backend.wait_fence_timeout(&fence, Duration::ZERO));
    }

    #[test]
    fn test_acquire_rotates_through_images() {
        let backend = DummyBackend::new();
        let swapchain = backend
            .create_swapchain(&swapchain_descriptor(800, 600), None)
            .unwrap();
        let semaphore = backend.create_semaphore().unwrap();

        let mut indices = Vec::new();
        for _ in 0..4 {
            let acquired = backend
                .acquire_next_image(&swapchain, Duration::ZERO, &semaphore)
                .unwrap();
            assert!(!acquired.stale);
            indices.push(acquired.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_acquire_staleness_reported_once() {
        let backend = DummyBackend::new();
        let swapchain = backend
            .create_swapchain(&swapchain_descriptor(800, 600), None)
            .unwrap();
        let semaphore = backend.create_semaphore().unwrap();

        backend.mark_acquire_stale();
        let first = backend
            .acquire_next_image(&swapchain, Duration::ZERO, &semaphore)
            .unwrap();
        assert!(first.stale);

        let second = backend
            .acquire_next_image(&swapchain, Duration::ZERO, &semaphore)
            .unwrap();
        assert!(!second.stale);
    }

    #[test]
    fn test_present_staleness_reported_once() {
        let backend = DummyBackend::new();
        let swapchain = backend
            .create_swapchain(&swapchain_descriptor(800, 600), None)
            .unwrap();
        let semaphore = backend.create_semaphore().unwrap();

        backend.mark_present_stale();
        assert!(backend.present_image(&swapchain, 0, &semaphore).unwrap());
        assert!(!backend.present_image(&swapchain, 1, &semaphore).unwrap());
    }

    #[test]
    fn test_swapchain_respects_configured_image_count() {
        let backend = DummyBackend::new();
        backend.set_image_count(2);
        let swapchain = backend
            .create_swapchain(&swapchain_descriptor(800, 600), None)
            .unwrap();
        assert_eq!(swapchain.image_count(), 2);
        assert_eq!(backend.swapchains_created(), 1);
    }

    #[test]
    fn test_swapchain_readback_is_opaque() {
        let backend = DummyBackend::new();
        let swapchain = backend
            .create_swapchain(&swapchain_descriptor(2, 2), None)
            .unwrap();
        let data = backend.read_swapchain_image(&swapchain, 0).unwrap();
        assert_eq!(data.len(), 16);
        assert!(data.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }
}
