//! Render stage lifecycle.
//!
//! A [`RenderStage`] turns its immutable [`RenderStageDescriptor`] into GPU
//! resources: one renderpass created on the first build and kept afterwards,
//! a depth image and offscreen color images recreated at the current extent
//! on every rebuild, and one framebuffer per swapchain image when the stage
//! renders to the display (a single framebuffer otherwise).
//!
//! Stages start out uninitialized and are built by the orchestrator before
//! the first frame. [`RenderStage::is_out_of_date`] compares the resolved
//! extent against the last observed one, so a resized display marks
//! display-tracking stages for a rebuild exactly once per change.

mod config;

pub use config::{
    AttachmentDescriptor, AttachmentKind, PipelineBindPoint, RenderStageDescriptor, SizePolicy,
    SubpassDescriptor,
};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{
    FramebufferAttachment, FramebufferDescriptor, GpuFramebuffer, GpuImage, GpuRenderpass,
    GpuSwapchain, RenderBackend, RenderpassDescriptor,
};
use crate::display::Display;
use crate::error::{ConfigError, FrameError};
use crate::types::{ClearValue, Extent2d, ImageDescriptor, ImageUsage};

/// Lifecycle of a stage's GPU resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    /// No resources exist yet.
    #[default]
    Uninitialized,
    /// Resources match the last observed extent and swapchain.
    Built,
    /// The resolved extent changed; resources must be rebuilt.
    OutOfDate,
}

/// Runtime render stage owning its renderpass, attachment images and
/// framebuffers.
///
/// All resources are exclusively owned. References handed out by the
/// accessors stay valid only until the next [`rebuild`]; holders re-fetch
/// them instead of caching.
///
/// [`rebuild`]: RenderStage::rebuild
pub struct RenderStage {
    descriptor: RenderStageDescriptor,
    display: Arc<dyn Display>,
    state: StageState,
    clear_values: Vec<ClearValue>,
    subpass_attachment_counts: Vec<u32>,
    renderpass: Option<GpuRenderpass>,
    depth_image: Option<GpuImage>,
    color_images: Vec<(u32, GpuImage)>,
    framebuffers: Vec<GpuFramebuffer>,
    last_width: u32,
    last_height: u32,
}

impl RenderStage {
    /// Validate the descriptor and derive clear values and per-subpass
    /// attachment counts. No GPU resources are created until the first
    /// [`rebuild`].
    ///
    /// [`rebuild`]: RenderStage::rebuild
    pub fn new(
        descriptor: RenderStageDescriptor,
        display: Arc<dyn Display>,
    ) -> Result<Self, ConfigError> {
        descriptor.validate()?;
        let clear_values = descriptor.clear_values();
        let subpass_attachment_counts = descriptor.subpass_attachment_counts();
        Ok(Self {
            descriptor,
            display,
            state: StageState::default(),
            clear_values,
            subpass_attachment_counts,
            renderpass: None,
            depth_image: None,
            color_images: Vec::new(),
            framebuffers: Vec::new(),
            last_width: 0,
            last_height: 0,
        })
    }

    /// Stage width, resolved against the size policy on every call.
    pub fn width(&self) -> u32 {
        match self.descriptor.size_policy {
            SizePolicy::Fixed { width, .. } => width,
            SizePolicy::TrackDisplay => self.display.width(),
        }
    }

    /// Stage height, resolved against the size policy on every call.
    pub fn height(&self) -> u32 {
        match self.descriptor.size_policy {
            SizePolicy::Fixed { height, .. } => height,
            SizePolicy::TrackDisplay => self.display.height(),
        }
    }

    /// Resolved extent of the stage.
    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.width(), self.height())
    }

    /// Compare the resolved extent against the last observed one.
    ///
    /// Updates the observation, so a single size change reports `true` at
    /// most once; calling again without an intervening change returns
    /// `false`. A built stage that reports `true` is marked out of date.
    pub fn is_out_of_date(&mut self) -> bool {
        let width = self.width();
        let height = self.height();
        let out_of_date = width != self.last_width || height != self.last_height;
        self.last_width = width;
        self.last_height = height;
        if out_of_date && self.state == StageState::Built {
            self.state = StageState::OutOfDate;
        }
        out_of_date
    }

    /// Destroy and recreate the stage's sized resources against the current
    /// extent and swapchain.
    ///
    /// The renderpass is created on the first build and reused afterwards;
    /// attachment formats never change, only extents do. Depth and color
    /// images and all framebuffers are recreated every time. On success the
    /// observed extent is updated and the stage is `Built`.
    pub fn rebuild(
        &mut self,
        backend: &dyn RenderBackend,
        swapchain: &GpuSwapchain,
    ) -> Result<(), FrameError> {
        let start = Instant::now();
        let width = self.width();
        let height = self.height();
        let sample_count = self.display.sample_count();

        if self.renderpass.is_none() {
            let descriptor = RenderpassDescriptor {
                label: &self.descriptor.label,
                attachments: &self.descriptor.attachments,
                subpasses: &self.descriptor.subpasses,
                surface_format: swapchain.format(),
                sample_count,
            };
            self.renderpass = Some(backend.create_renderpass(&descriptor)?);
        }

        // Framebuffers reference the images, so they go first.
        self.framebuffers.clear();
        self.depth_image = None;
        self.color_images.clear();

        if let Some(attachment) = self.descriptor.depth_attachment() {
            let mut descriptor = ImageDescriptor::new(
                width,
                height,
                attachment.format,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
            )
            .with_label(format!("{}/{}", self.descriptor.label, attachment.label));
            if attachment.multisampled {
                descriptor = descriptor.with_sample_count(sample_count);
            }
            self.depth_image = Some(backend.create_image(&descriptor)?);
        }

        for attachment in &self.descriptor.attachments {
            if attachment.kind != AttachmentKind::Color {
                continue;
            }
            let mut descriptor = ImageDescriptor::new(
                width,
                height,
                attachment.format,
                ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            )
            .with_label(format!("{}/{}", self.descriptor.label, attachment.label));
            if attachment.multisampled {
                descriptor = descriptor.with_sample_count(sample_count);
            }
            self.color_images
                .push((attachment.binding, backend.create_image(&descriptor)?));
        }

        let framebuffer_count = if self.descriptor.has_presentable() {
            swapchain.image_count()
        } else {
            1
        };
        let mut framebuffers = Vec::with_capacity(framebuffer_count as usize);
        for index in 0..framebuffer_count {
            let attachments = self.framebuffer_attachments(swapchain, index)?;
            let renderpass = self
                .renderpass
                .as_ref()
                .ok_or_else(|| FrameError::Internal("renderpass not created".into()))?;
            let descriptor = FramebufferDescriptor {
                label: &self.descriptor.label,
                renderpass,
                attachments,
                width,
                height,
            };
            framebuffers.push(backend.create_framebuffer(&descriptor)?);
        }
        self.framebuffers = framebuffers;

        self.last_width = width;
        self.last_height = height;
        self.state = StageState::Built;
        log::debug!(
            "rebuilt stage '{}' at {}x{} with {} framebuffers in {:?}",
            self.descriptor.label,
            width,
            height,
            self.framebuffers.len(),
            start.elapsed()
        );
        Ok(())
    }

    fn framebuffer_attachments<'a>(
        &'a self,
        swapchain: &'a GpuSwapchain,
        image_index: u32,
    ) -> Result<Vec<FramebufferAttachment<'a>>, FrameError> {
        let mut attachments = Vec::with_capacity(self.descriptor.attachments.len());
        for attachment in &self.descriptor.attachments {
            match attachment.kind {
                AttachmentKind::Depth => {
                    let image = self.depth_image.as_ref().ok_or_else(|| {
                        FrameError::Internal(format!(
                            "stage '{}' has no depth image",
                            self.descriptor.label
                        ))
                    })?;
                    attachments.push(FramebufferAttachment::Image(image));
                }
                AttachmentKind::Color => {
                    let image = self
                        .color_images
                        .iter()
                        .find(|(binding, _)| *binding == attachment.binding)
                        .map(|(_, image)| image)
                        .ok_or_else(|| {
                            FrameError::Internal(format!(
                                "stage '{}' has no image for binding {}",
                                self.descriptor.label, attachment.binding
                            ))
                        })?;
                    attachments.push(FramebufferAttachment::Image(image));
                }
                AttachmentKind::Presentable => {
                    attachments.push(FramebufferAttachment::SwapchainImage {
                        swapchain,
                        index: image_index,
                    });
                }
            }
        }
        Ok(attachments)
    }

    /// Framebuffer for a swapchain image index.
    ///
    /// An out-of-range index falls back to framebuffer `0` rather than
    /// failing. Returns `None` only if the stage has never been built.
    pub fn active_framebuffer(&self, image_index: u32) -> Option<&GpuFramebuffer> {
        let index = image_index as usize;
        if index >= self.framebuffers.len() && !self.framebuffers.is_empty() {
            log::debug!(
                "stage '{}': framebuffer index {} out of range, using framebuffer 0",
                self.descriptor.label,
                image_index
            );
        }
        self.framebuffers.get(index).or_else(|| self.framebuffers.first())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// The descriptor the stage was created from.
    pub fn descriptor(&self) -> &RenderStageDescriptor {
        &self.descriptor
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.descriptor.label
    }

    /// The stage's renderpass, once built.
    pub fn renderpass(&self) -> Option<&GpuRenderpass> {
        self.renderpass.as_ref()
    }

    /// The stage's depth image, once built.
    pub fn depth_image(&self) -> Option<&GpuImage> {
        self.depth_image.as_ref()
    }

    /// Offscreen color image for an attachment binding, once built.
    pub fn color_image(&self, binding: u32) -> Option<&GpuImage> {
        self.color_images
            .iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, image)| image)
    }

    /// Clear values in attachment declaration order.
    pub fn clear_values(&self) -> &[ClearValue] {
        &self.clear_values
    }

    /// Number of color attachments each subpass writes, indexed by subpass
    /// binding.
    pub fn subpass_attachment_counts(&self) -> &[u32] {
        &self.subpass_attachment_counts
    }

    /// Number of subpasses.
    pub fn subpass_count(&self) -> usize {
        self.descriptor.subpasses.len()
    }

    /// Number of framebuffers currently built.
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

impl fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderStage")
            .field("label", &self.descriptor.label)
            .field("state", &self.state)
            .field("framebuffers", &self.framebuffers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::GpuImage;
    use crate::display::SharedDisplay;
    use crate::swapchain::SwapchainDescriptor;
    use crate::types::TextureFormat;

    fn context(width: u32, height: u32) -> (Arc<DummyBackend>, Arc<SharedDisplay>, GpuSwapchain) {
        let backend = Arc::new(DummyBackend::new());
        let display = Arc::new(SharedDisplay::new(width, height, TextureFormat::Bgra8Unorm));
        let swapchain = backend
            .create_swapchain(
                &SwapchainDescriptor {
                    width,
                    height,
                    format: TextureFormat::Bgra8Unorm,
                    present_mode: Default::default(),
                },
                None,
            )
            .unwrap();
        (backend, display, swapchain)
    }

    fn main_pass() -> RenderStageDescriptor {
        RenderStageDescriptor::new("main")
            .with_attachment(
                AttachmentDescriptor::color(0, "scene", TextureFormat::Rgba8Unorm)
                    .with_clear_color(0.2, 0.2, 0.2, 1.0),
            )
            .with_attachment(AttachmentDescriptor::depth(1, "depth"))
            .with_subpass(SubpassDescriptor::new(0, [0, 1]))
    }

    fn present_pass() -> RenderStageDescriptor {
        RenderStageDescriptor::new("present")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0]))
    }

    #[test]
    fn test_new_rejects_dangling_reference() {
        let (_backend, display, _swapchain) = context(800, 600);
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0, 5]));
        let result = RenderStage::new(descriptor, display);
        assert_eq!(
            result.err(),
            Some(ConfigError::DanglingAttachment {
                subpass: 0,
                binding: 5
            })
        );
    }

    #[test]
    fn test_rebuild_derives_clear_values_in_order() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(main_pass(), display).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        let clear_values = stage.clear_values();
        assert_eq!(clear_values.len(), 2);
        assert_eq!(clear_values[0], ClearValue::color(0.2, 0.2, 0.2, 1.0));
        assert_eq!(clear_values[1], ClearValue::depth_stencil(1.0, 0));
    }

    #[test]
    fn test_framebuffer_count_matches_swapchain_for_presentable() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        assert_eq!(stage.framebuffer_count() as u32, swapchain.image_count());
    }

    #[test]
    fn test_offscreen_stage_builds_single_framebuffer() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(main_pass(), display).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        assert_eq!(stage.framebuffer_count(), 1);
    }

    #[rstest]
    #[case(3)]
    #[case(4)]
    #[case(99)]
    fn test_active_framebuffer_out_of_range_falls_back_to_first(#[case] image_index: u32) {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        let fallback = stage.active_framebuffer(image_index).unwrap();
        let first = stage.active_framebuffer(0).unwrap();
        assert!(std::ptr::eq(fallback, first));
    }

    #[test]
    fn test_active_framebuffer_in_range_is_distinct() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        let first = stage.active_framebuffer(0).unwrap();
        let second = stage.active_framebuffer(1).unwrap();
        assert!(!std::ptr::eq(first, second));
    }

    #[test]
    fn test_active_framebuffer_before_build_is_none() {
        let (_backend, display, _swapchain) = context(800, 600);
        let stage = RenderStage::new(present_pass(), display).unwrap();
        assert!(stage.active_framebuffer(0).is_none());
    }

    #[test]
    fn test_track_display_resolves_size_per_call() {
        let (_backend, display, _swapchain) = context(800, 600);
        let stage = RenderStage::new(present_pass(), display.clone()).unwrap();
        assert_eq!(stage.width(), 800);
        assert_eq!(stage.height(), 600);

        display.set_size(1920, 1080);
        assert_eq!(stage.width(), 1920);
        assert_eq!(stage.height(), 1080);
    }

    #[test]
    fn test_fixed_size_ignores_display_resize() {
        let (_backend, display, _swapchain) = context(800, 600);
        let descriptor = main_pass().with_fixed_size(512, 512);
        let stage = RenderStage::new(descriptor, display.clone()).unwrap();

        display.set_size(1920, 1080);
        assert_eq!(stage.width(), 512);
        assert_eq!(stage.height(), 512);
    }

    #[test]
    fn test_is_out_of_date_reports_change_once() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display.clone()).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        assert!(!stage.is_out_of_date());

        display.set_size(1920, 1080);
        assert!(stage.is_out_of_date());
        assert_eq!(stage.state(), StageState::OutOfDate);
        assert!(!stage.is_out_of_date());
    }

    #[test]
    fn test_rebuild_updates_tracked_size_after_resize() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display.clone()).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        display.set_size(1920, 1080);
        assert!(stage.is_out_of_date());
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        assert_eq!(stage.state(), StageState::Built);
        assert!(!stage.is_out_of_date());
        assert_eq!(stage.extent(), Extent2d::new(1920, 1080));
    }

    #[test]
    fn test_lifecycle_states() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(present_pass(), display.clone()).unwrap();
        assert_eq!(stage.state(), StageState::Uninitialized);

        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        assert_eq!(stage.state(), StageState::Built);

        display.set_size(1024, 768);
        stage.is_out_of_date();
        assert_eq!(stage.state(), StageState::OutOfDate);

        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        assert_eq!(stage.state(), StageState::Built);
    }

    #[test]
    fn test_renderpass_created_once_across_rebuilds() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(main_pass(), display.clone()).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();
        display.set_size(1024, 768);
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        assert_eq!(backend.renderpasses_created(), 1);
        assert!(stage.renderpass().is_some());
    }

    #[test]
    fn test_rebuild_resizes_owned_images() {
        let (backend, display, swapchain) = context(800, 600);
        let mut stage = RenderStage::new(main_pass(), display.clone()).unwrap();
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        display.set_size(1024, 768);
        stage.rebuild(backend.as_ref(), &swapchain).unwrap();

        match stage.depth_image().unwrap() {
            GpuImage::Dummy { width, height, .. } => assert_eq!((*width, *height), (1024, 768)),
            #[cfg(feature = "vulkan-backend")]
            other => panic!("dummy backend produced {other:?}"),
        }
        match stage.color_image(0).unwrap() {
            GpuImage::Dummy { width, height, .. } => assert_eq!((*width, *height), (1024, 768)),
            #[cfg(feature = "vulkan-backend")]
            other => panic!("dummy backend produced {other:?}"),
        }
    }

    #[test]
    fn test_subpass_attachment_counts_exclude_depth() {
        let (_backend, display, _swapchain) = context(800, 600);
        let stage = RenderStage::new(main_pass(), display).unwrap();
        assert_eq!(stage.subpass_attachment_counts(), &[1]);
        assert_eq!(stage.subpass_count(), 1);
    }
}
