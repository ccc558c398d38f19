//! Swapchain ownership and recreation.
//!
//! [`SwapchainManager`] owns the presentable image chain for one surface.
//! It relays acquire and present calls to the backend, reporting staleness
//! to the caller instead of failing, and recreates the chain against the
//! live display size when asked. Every recreation bumps a generation
//! counter, reported through [`SwapchainManager::generation`] for logging
//! and diagnostics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{GpuSemaphore, GpuSwapchain, RenderBackend};
use crate::display::Display;
use crate::error::FrameError;
use crate::types::{Extent2d, TextureFormat};

/// How presentation is paced against the display refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// Present immediately, tearing allowed.
    Immediate,
    /// Triple-buffered, latest-ready image wins.
    Mailbox,
    /// Queue presented images, vsync. Always available.
    #[default]
    Fifo,
    /// Vsync unless a frame is late.
    FifoRelaxed,
}

/// Parameters a swapchain is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Presentable image format.
    pub format: TextureFormat,
    /// Presentation pacing.
    pub present_mode: PresentMode,
}

/// Result of an image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index of the presentable image. Meaningless when `stale` is set.
    pub index: u32,
    /// The surface changed under the swapchain; recreate before rendering.
    pub stale: bool,
}

/// Owns the swapchain for one display surface.
pub struct SwapchainManager {
    backend: Arc<dyn RenderBackend>,
    display: Arc<dyn Display>,
    present_mode: PresentMode,
    swapchain: GpuSwapchain,
    generation: u64,
}

impl SwapchainManager {
    /// Create the manager and its initial swapchain at the current display
    /// size.
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        display: Arc<dyn Display>,
        present_mode: PresentMode,
    ) -> Result<Self, FrameError> {
        let descriptor = Self::current_descriptor(display.as_ref(), present_mode);
        let swapchain = backend.create_swapchain(&descriptor, None)?;
        log::debug!(
            "created {}x{} swapchain with {} images",
            descriptor.width,
            descriptor.height,
            swapchain.image_count()
        );
        Ok(Self {
            backend,
            display,
            present_mode,
            swapchain,
            generation: 0,
        })
    }

    fn current_descriptor(display: &dyn Display, present_mode: PresentMode) -> SwapchainDescriptor {
        SwapchainDescriptor {
            width: display.width(),
            height: display.height(),
            format: display.surface_format(),
            present_mode,
        }
    }

    /// Replace the swapchain with one matching the current display size.
    ///
    /// The old chain is handed to the backend for recycling and destroyed
    /// once the new one exists. Callers must ensure no GPU work is still
    /// using it, which the orchestrator guarantees by recreating only at
    /// frame boundaries.
    pub fn recreate(&mut self) -> Result<(), FrameError> {
        let start = Instant::now();
        let descriptor = Self::current_descriptor(self.display.as_ref(), self.present_mode);
        let swapchain = self
            .backend
            .create_swapchain(&descriptor, Some(&self.swapchain))?;
        self.swapchain = swapchain;
        self.generation += 1;
        log::debug!(
            "recreated swapchain at {}x{} with {} images (generation {}) in {:?}",
            descriptor.width,
            descriptor.height,
            self.swapchain.image_count(),
            self.generation,
            start.elapsed()
        );
        Ok(())
    }

    /// The current swapchain handle.
    pub fn swapchain(&self) -> &GpuSwapchain {
        &self.swapchain
    }

    /// Number of presentable images in the current chain.
    pub fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    /// Extent of the current chain.
    pub fn extent(&self) -> Extent2d {
        self.swapchain.extent()
    }

    /// Number of recreations since construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Acquire the next presentable image.
    pub fn acquire(
        &self,
        timeout: Duration,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, FrameError> {
        self.backend
            .acquire_next_image(&self.swapchain, timeout, signal)
    }

    /// Present an acquired image. Returns `true` if the surface reported
    /// staleness.
    pub fn present(&self, image_index: u32, wait: &GpuSemaphore) -> Result<bool, FrameError> {
        self.backend
            .present_image(&self.swapchain, image_index, wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::display::SharedDisplay;

    fn manager_with_backend() -> (Arc<DummyBackend>, Arc<SharedDisplay>, SwapchainManager) {
        let backend = Arc::new(DummyBackend::new());
        let display = Arc::new(SharedDisplay::new(800, 600, TextureFormat::Bgra8Unorm));
        let manager = SwapchainManager::new(
            backend.clone() as Arc<dyn RenderBackend>,
            display.clone() as Arc<dyn Display>,
            PresentMode::Fifo,
        )
        .unwrap();
        (backend, display, manager)
    }

    #[test]
    fn test_initial_swapchain_matches_display() {
        let (backend, _display, manager) = manager_with_backend();
        assert_eq!(manager.extent(), Extent2d::new(800, 600));
        assert_eq!(manager.image_count(), 3);
        assert_eq!(manager.generation(), 0);
        assert_eq!(backend.swapchains_created(), 1);
    }

    #[test]
    fn test_recreate_follows_display_size() {
        let (backend, display, mut manager) = manager_with_backend();
        display.set_size(1920, 1080);
        manager.recreate().unwrap();
        assert_eq!(manager.extent(), Extent2d::new(1920, 1080));
        assert_eq!(manager.generation(), 1);
        assert_eq!(backend.swapchains_created(), 2);
    }

    #[test]
    fn test_recreate_picks_up_new_image_count() {
        let (backend, _display, mut manager) = manager_with_backend();
        backend.set_image_count(2);
        manager.recreate().unwrap();
        assert_eq!(manager.image_count(), 2);
    }

    #[test]
    fn test_acquire_and_present_round_trip() {
        let (backend, _display, manager) = manager_with_backend();
        let semaphore = backend.create_semaphore().unwrap();
        let acquired = manager.acquire(Duration::from_secs(1), &semaphore).unwrap();
        assert!(!acquired.stale);
        assert_eq!(acquired.index, 0);
        assert!(!manager.present(acquired.index, &semaphore).unwrap());
    }
}
