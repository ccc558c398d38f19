//! Display surface abstraction.
//!
//! The orchestration layer never talks to a windowing library directly. It
//! reads the current surface size through the [`Display`] trait, which the
//! embedding application implements (or uses [`SharedDisplay`], a ready-made
//! implementation the window event loop can update from its resize handler).
//!
//! Render stages configured with [`SizePolicy::TrackDisplay`] resolve their
//! extent from the display on every query, so a resize is picked up without
//! any explicit notification.
//!
//! [`SizePolicy::TrackDisplay`]: crate::stage::SizePolicy::TrackDisplay

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::TextureFormat;

/// Source of truth for the presentable surface dimensions.
///
/// Implementations must be callable from any thread; the orchestrator reads
/// sizes during frame ticks while the window thread may update them.
pub trait Display: Send + Sync + 'static {
    /// Current surface width in pixels.
    fn width(&self) -> u32;

    /// Current surface height in pixels.
    fn height(&self) -> u32;

    /// Format presentable attachments are created with.
    fn surface_format(&self) -> TextureFormat;

    /// Sample count multisampled attachments are created with.
    fn sample_count(&self) -> u32;

    /// Monotonic counter bumped on every size change.
    ///
    /// The orchestrator compares this against the value it saw last frame to
    /// schedule swapchain recreation at a frame boundary.
    fn resize_generation(&self) -> u64;
}

/// Thread-safe [`Display`] backed by atomics.
///
/// The window event loop calls [`set_size`] from its resize handler; the
/// orchestrator reads the values during ticks.
///
/// [`set_size`]: SharedDisplay::set_size
#[derive(Debug)]
pub struct SharedDisplay {
    width: AtomicU32,
    height: AtomicU32,
    generation: AtomicU64,
    format: TextureFormat,
    sample_count: u32,
}

impl SharedDisplay {
    /// Create a display with an initial size and surface format.
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
            generation: AtomicU64::new(0),
            format,
            sample_count: 1,
        }
    }

    /// Set the sample count multisampled attachments resolve to.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Update the surface size, bumping the resize generation.
    ///
    /// Setting the same size again still bumps the generation; callers are
    /// expected to invoke this only on actual resize events.
    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Display for SharedDisplay {
    fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    fn surface_format(&self) -> TextureFormat {
        self.format
    }

    fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn resize_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

static_assertions::assert_impl_all!(SharedDisplay: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_shared_display_reports_initial_size() {
        let display = SharedDisplay::new(1280, 720, TextureFormat::Bgra8Unorm);
        assert_eq!(display.width(), 1280);
        assert_eq!(display.height(), 720);
        assert_eq!(display.surface_format(), TextureFormat::Bgra8Unorm);
        assert_eq!(display.resize_generation(), 0);
    }

    #[test]
    fn test_set_size_bumps_generation() {
        let display = SharedDisplay::new(800, 600, TextureFormat::Bgra8UnormSrgb);
        display.set_size(1024, 768);
        assert_eq!(display.width(), 1024);
        assert_eq!(display.height(), 768);
        assert_eq!(display.resize_generation(), 1);

        display.set_size(1920, 1080);
        assert_eq!(display.resize_generation(), 2);
    }

    #[test]
    fn test_set_size_from_another_thread() {
        let display = Arc::new(SharedDisplay::new(640, 480, TextureFormat::Bgra8Unorm));
        let writer = Arc::clone(&display);
        let handle = std::thread::spawn(move || {
            writer.set_size(320, 240);
        });
        handle.join().unwrap();
        assert_eq!(display.width(), 320);
        assert_eq!(display.height(), 240);
        assert_eq!(display.resize_generation(), 1);
    }
}
