//! Per-frame orchestration.
//!
//! # Overview
//!
//! [`FrameOrchestrator`] owns the ordered render stages, the swapchain, the
//! command recording handle and the synchronization primitives of the frame
//! loop. One [`tick`] runs the whole protocol:
//!
//! 1. Wait on the in-flight fence (bounded; a timeout is device loss).
//! 2. Recreate the swapchain and every stage if a resize or a stale present
//!    was observed since the last frame, then acquire the next image. A
//!    stale acquire triggers the same recreation and one re-acquire.
//! 3. Rebuild any stage whose resolved extent changed.
//! 4. For each stage in declared order: begin its renderpass, hand every
//!    subpass to the [`RenderRecorder`], end the renderpass.
//! 5. Submit the recording and present the acquired image. Staleness at
//!    present schedules recreation for the next frame instead of failing
//!    this one.
//!
//! The protocol methods are public, so a host that needs to interleave its
//! own work between stages can drive them directly; [`tick`] is the
//! composed path. Illegal sequencing (re-entrant renderpass begin, subpass
//! advance past the end) surfaces as [`ProtocolError`] and is never
//! silently absorbed.
//!
//! [`tick`]: FrameOrchestrator::tick
//! [`ProtocolError`]: crate::error::ProtocolError
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use renderflow::{
//!     create_backend, AttachmentDescriptor, FrameContext, FrameOrchestrator,
//!     OrchestratorDescriptor, RenderRecorder, RenderStageDescriptor, SharedDisplay,
//!     SubpassDescriptor, TextureFormat,
//! };
//!
//! struct ClearOnly;
//!
//! impl RenderRecorder for ClearOnly {
//!     fn record(&mut self, _frame: &FrameContext, _stage: usize, _subpass: usize) {
//!         // draw submissions go here
//!     }
//! }
//!
//! # fn main() -> Result<(), renderflow::FrameError> {
//! let backend = create_backend(None);
//! let display = Arc::new(SharedDisplay::new(1280, 720, TextureFormat::Bgra8Unorm));
//! let descriptor = OrchestratorDescriptor::new().with_stage(
//!     RenderStageDescriptor::new("main")
//!         .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
//!         .with_subpass(SubpassDescriptor::new(0, [0])),
//! );
//! let mut orchestrator = FrameOrchestrator::new(backend, display, descriptor)?;
//!
//! let mut recorder = ClearOnly;
//! orchestrator.tick(&mut recorder)?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{
    GpuCommandBuffer, GpuFence, GpuPipelineCache, GpuSemaphore, RenderBackend,
};
use crate::display::Display;
use crate::error::{FrameError, ProtocolError};
use crate::stage::{RenderStage, RenderStageDescriptor, StageState};
use crate::swapchain::{PresentMode, SwapchainManager};

/// Records draw work for one subpass.
///
/// The orchestrator drives *when* subpasses happen; what gets drawn into
/// them is entirely the recorder's business. Called once per
/// `(stage, subpass)` pair per frame, in declared stage order and ascending
/// subpass order, with the renderpass already begun on the frame's command
/// buffer.
pub trait RenderRecorder {
    fn record(&mut self, frame: &FrameContext, stage_index: usize, subpass_index: usize);
}

/// Per-frame state, created at acquire and discarded after present.
#[derive(Debug)]
pub struct FrameContext {
    command_buffer: GpuCommandBuffer,
    fence: Arc<GpuFence>,
    image_available: Arc<GpuSemaphore>,
    render_finished: Arc<GpuSemaphore>,
    image_index: u32,
    frame_number: u64,
    active_stage: Option<usize>,
    subpass_index: usize,
}

impl FrameContext {
    /// Handle draw commands for this frame are recorded into.
    pub fn command_buffer(&self) -> &GpuCommandBuffer {
        &self.command_buffer
    }

    /// Fence signaled when this frame's submission completes.
    pub fn fence(&self) -> &GpuFence {
        &self.fence
    }

    /// Semaphore signaled when the acquired image is ready.
    pub fn image_available(&self) -> &GpuSemaphore {
        &self.image_available
    }

    /// Semaphore the submission signals for presentation.
    pub fn render_finished(&self) -> &GpuSemaphore {
        &self.render_finished
    }

    /// Swapchain image index this frame renders into.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Monotonic frame counter.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Stage whose renderpass is currently open, if any.
    pub fn active_stage(&self) -> Option<usize> {
        self.active_stage
    }

    /// Subpass the recording currently sits in.
    pub fn subpass_index(&self) -> usize {
        self.subpass_index
    }
}

/// Configuration for a [`FrameOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorDescriptor {
    /// Stage descriptors in execution order.
    pub stages: Vec<RenderStageDescriptor>,
    /// Presentation pacing for the swapchain.
    pub present_mode: PresentMode,
    /// Upper bound for fence and acquire waits. Exceeding it is treated as
    /// device loss.
    pub frame_timeout: Duration,
}

impl Default for OrchestratorDescriptor {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            present_mode: PresentMode::default(),
            frame_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. Stages execute in the order they are added.
    pub fn with_stage(mut self, stage: RenderStageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Set the presentation pacing.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    /// Set the fence/acquire wait bound.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }
}

/// Drives the per-frame protocol over an ordered list of render stages.
pub struct FrameOrchestrator {
    backend: Arc<dyn RenderBackend>,
    display: Arc<dyn Display>,
    swapchain: SwapchainManager,
    stages: Vec<RenderStage>,
    command_buffer: GpuCommandBuffer,
    in_flight_fence: Arc<GpuFence>,
    image_available: Arc<GpuSemaphore>,
    render_finished: Arc<GpuSemaphore>,
    pipeline_cache: GpuPipelineCache,
    frame: Option<FrameContext>,
    frame_number: u64,
    frame_timeout: Duration,
    last_image_index: u32,
    last_resize_generation: u64,
    recreate_pending: bool,
}

impl FrameOrchestrator {
    /// Validate every stage descriptor and create the swapchain, command
    /// buffer, synchronization primitives and pipeline cache.
    ///
    /// Stages hold no GPU resources yet; they are built on the first
    /// [`tick`](FrameOrchestrator::tick).
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        display: Arc<dyn Display>,
        descriptor: OrchestratorDescriptor,
    ) -> Result<Self, FrameError> {
        let mut stages = Vec::with_capacity(descriptor.stages.len());
        for stage in descriptor.stages {
            stages.push(RenderStage::new(stage, display.clone())?);
        }

        let swapchain =
            SwapchainManager::new(backend.clone(), display.clone(), descriptor.present_mode)?;
        let command_buffer = backend.create_command_buffer()?;
        // Signaled so the first frame's wait passes immediately.
        let in_flight_fence = Arc::new(backend.create_fence(true)?);
        let image_available = Arc::new(backend.create_semaphore()?);
        let render_finished = Arc::new(backend.create_semaphore()?);
        let pipeline_cache = backend.create_pipeline_cache()?;
        let last_resize_generation = display.resize_generation();

        log::debug!(
            "frame orchestrator ready: {} stages on {} backend",
            stages.len(),
            backend.name()
        );
        Ok(Self {
            backend,
            display,
            swapchain,
            stages,
            command_buffer,
            in_flight_fence,
            image_available,
            render_finished,
            pipeline_cache,
            frame: None,
            frame_number: 0,
            frame_timeout: descriptor.frame_timeout,
            last_image_index: 0,
            last_resize_generation,
            recreate_pending: false,
        })
    }

    /// Run one frame: acquire, record every stage through the recorder,
    /// submit and present.
    ///
    /// Returns without error when the frame was skipped (zero-sized display
    /// or a surface that stayed stale through recreation).
    pub fn tick(&mut self, recorder: &mut dyn RenderRecorder) -> Result<(), FrameError> {
        if !self.acquire_frame()? {
            return Ok(());
        }
        for stage_index in 0..self.stages.len() {
            self.start_renderpass(stage_index)?;
            let subpass_count = self
                .stages
                .get(stage_index)
                .map(RenderStage::subpass_count)
                .unwrap_or(0);
            for subpass_index in 0..subpass_count {
                if subpass_index > 0 {
                    self.next_subpass()?;
                }
                let frame = self.frame.as_ref().ok_or(ProtocolError::FrameNotStarted)?;
                recorder.record(frame, stage_index, subpass_index);
            }
            self.end_renderpass(stage_index)?;
        }
        self.finish_frame()
    }

    /// Begin a frame: wait for the previous submission, absorb any pending
    /// surface changes, acquire an image and open the command recording.
    ///
    /// Returns `Ok(false)` when no frame was started and the caller should
    /// try again next loop iteration.
    pub fn acquire_frame(&mut self) -> Result<bool, FrameError> {
        if self.frame.is_some() {
            return Err(ProtocolError::FrameAlreadyStarted.into());
        }
        if self.display.width() == 0 || self.display.height() == 0 {
            log::trace!("display has zero extent, skipping frame");
            return Ok(false);
        }

        if !self
            .backend
            .wait_fence_timeout(&self.in_flight_fence, self.frame_timeout)
        {
            return Err(FrameError::DeviceLost(
                "in-flight fence wait timed out".into(),
            ));
        }

        // Resize notifications and present staleness are absorbed here, at
        // the frame boundary, while no GPU work is in flight.
        let resize_generation = self.display.resize_generation();
        if self.recreate_pending || resize_generation != self.last_resize_generation {
            self.recreate_surface()?;
            self.recreate_pending = false;
            self.last_resize_generation = resize_generation;
        }

        let mut acquired = self
            .swapchain
            .acquire(self.frame_timeout, &self.image_available)?;
        if acquired.stale {
            log::debug!("stale surface on acquire, recreating swapchain");
            self.recreate_surface()?;
            acquired = self
                .swapchain
                .acquire(self.frame_timeout, &self.image_available)?;
            if acquired.stale {
                log::warn!("surface still stale after recreation, skipping frame");
                return Ok(false);
            }
        }

        for stage in &mut self.stages {
            if stage.state() != StageState::Built || stage.is_out_of_date() {
                stage.rebuild(self.backend.as_ref(), self.swapchain.swapchain())?;
            }
        }

        self.backend.begin_commands(&self.command_buffer)?;
        self.frame = Some(FrameContext {
            command_buffer: self.command_buffer.clone(),
            fence: Arc::clone(&self.in_flight_fence),
            image_available: Arc::clone(&self.image_available),
            render_finished: Arc::clone(&self.render_finished),
            image_index: acquired.index,
            frame_number: self.frame_number,
            active_stage: None,
            subpass_index: 0,
        });
        log::trace!(
            "frame {} acquired image {}",
            self.frame_number,
            acquired.index
        );
        Ok(true)
    }

    /// Begin the renderpass of a stage, clearing its attachments and
    /// resetting the subpass cursor.
    pub fn start_renderpass(&mut self, stage_index: usize) -> Result<(), FrameError> {
        let frame = self.frame.as_mut().ok_or(ProtocolError::FrameNotStarted)?;
        if let Some(stage) = frame.active_stage {
            return Err(ProtocolError::RenderpassActive { stage }.into());
        }
        let stage = self
            .stages
            .get(stage_index)
            .ok_or(ProtocolError::StageOutOfRange {
                index: stage_index,
                count: self.stages.len(),
            })?;
        let renderpass = stage.renderpass().ok_or_else(|| {
            FrameError::Internal(format!("stage '{}' has no renderpass", stage.label()))
        })?;
        let framebuffer = stage.active_framebuffer(frame.image_index).ok_or_else(|| {
            FrameError::Internal(format!("stage '{}' was never built", stage.label()))
        })?;

        self.backend.begin_renderpass(
            &frame.command_buffer,
            renderpass,
            framebuffer,
            stage.extent(),
            stage.clear_values(),
        );
        frame.active_stage = Some(stage_index);
        frame.subpass_index = 0;
        log::trace!(
            "frame {}: begun stage {} '{}'",
            frame.frame_number,
            stage_index,
            stage.label()
        );
        Ok(())
    }

    /// Advance the active renderpass to its next subpass.
    ///
    /// Advancing past the last subpass is a [`ProtocolError`], surfaced to
    /// the caller rather than clamped.
    ///
    /// [`ProtocolError`]: crate::error::ProtocolError
    pub fn next_subpass(&mut self) -> Result<(), FrameError> {
        let frame = self.frame.as_mut().ok_or(ProtocolError::FrameNotStarted)?;
        let stage_index = frame.active_stage.ok_or(ProtocolError::NoActiveRenderpass)?;
        let stage = self.stages.get(stage_index).ok_or_else(|| {
            FrameError::Internal(format!("active stage {} disappeared", stage_index))
        })?;
        let subpass_count = stage.subpass_count();
        if frame.subpass_index + 1 >= subpass_count {
            return Err(ProtocolError::SubpassOutOfRange {
                current: frame.subpass_index,
                count: subpass_count,
            }
            .into());
        }
        self.backend.next_subpass(&frame.command_buffer);
        frame.subpass_index += 1;
        Ok(())
    }

    /// End the renderpass of the active stage.
    pub fn end_renderpass(&mut self, stage_index: usize) -> Result<(), FrameError> {
        let frame = self.frame.as_mut().ok_or(ProtocolError::FrameNotStarted)?;
        let active = frame.active_stage.ok_or(ProtocolError::NoActiveRenderpass)?;
        if active != stage_index {
            return Err(ProtocolError::StageMismatch {
                active,
                requested: stage_index,
            }
            .into());
        }
        self.backend.end_renderpass(&frame.command_buffer);
        frame.active_stage = None;
        frame.subpass_index = 0;
        Ok(())
    }

    /// Close the frame: submit the recording and present the image.
    ///
    /// A stale surface at present schedules recreation for the next frame;
    /// the current one still counts as presented.
    pub fn finish_frame(&mut self) -> Result<(), FrameError> {
        let frame = self.frame.take().ok_or(ProtocolError::FrameNotStarted)?;
        if let Some(stage) = frame.active_stage {
            self.frame = Some(frame);
            return Err(ProtocolError::RenderpassActive { stage }.into());
        }

        self.backend.end_commands(&frame.command_buffer)?;
        // Reset only right before submit; a skipped frame must leave the
        // fence signaled for the next wait.
        self.backend.reset_fence(&self.in_flight_fence);
        self.backend.submit_commands(
            &frame.command_buffer,
            &self.image_available,
            &self.render_finished,
            &self.in_flight_fence,
        )?;

        let stale = self
            .swapchain
            .present(frame.image_index, &self.render_finished)?;
        if stale {
            log::debug!("stale surface on present, scheduling recreation");
            self.recreate_pending = true;
        }

        self.last_image_index = frame.image_index;
        self.frame_number += 1;
        log::trace!(
            "frame {} presented image {}",
            frame.frame_number,
            frame.image_index
        );
        Ok(())
    }

    /// Write the most recently presented image to `path`.
    ///
    /// Blocks until the device is idle. Fails with a protocol error while a
    /// frame is open between acquire and finish.
    pub fn capture_screenshot(&self, path: impl AsRef<Path>) -> Result<(), FrameError> {
        if self.frame.is_some() {
            return Err(ProtocolError::FrameAlreadyStarted.into());
        }
        let start = Instant::now();
        self.backend.wait_idle();
        let extent = self.swapchain.extent();
        let data = self
            .backend
            .read_swapchain_image(self.swapchain.swapchain(), self.last_image_index)?;
        image::save_buffer(
            path.as_ref(),
            &data,
            extent.width,
            extent.height,
            image::ColorType::Rgba8,
        )
        .map_err(|err| FrameError::Internal(format!("failed to write screenshot: {}", err)))?;
        log::info!(
            "captured {}x{} screenshot to {} in {:?}",
            extent.width,
            extent.height,
            path.as_ref().display(),
            start.elapsed()
        );
        Ok(())
    }

    fn recreate_surface(&mut self) -> Result<(), FrameError> {
        self.swapchain.recreate()?;
        for stage in &mut self.stages {
            stage.rebuild(self.backend.as_ref(), self.swapchain.swapchain())?;
        }
        Ok(())
    }

    /// The stages in execution order.
    pub fn stages(&self) -> &[RenderStage] {
        &self.stages
    }

    /// A stage by index.
    pub fn stage(&self, index: usize) -> Option<&RenderStage> {
        self.stages.get(index)
    }

    /// The swapchain manager.
    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// The shared pipeline cache.
    pub fn pipeline_cache(&self) -> &GpuPipelineCache {
        &self.pipeline_cache
    }

    /// The open frame, if one is between acquire and finish.
    pub fn frame(&self) -> Option<&FrameContext> {
        self.frame.as_ref()
    }

    /// Number of frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Swapchain image index of the most recently presented frame.
    pub fn active_image_index(&self) -> u32 {
        self.last_image_index
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        // Stages and the swapchain hold resources the GPU may still read.
        self.backend.wait_idle();
    }
}

static_assertions::assert_obj_safe!(RenderRecorder);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::display::SharedDisplay;
    use crate::error::ConfigError;
    use crate::stage::{AttachmentDescriptor, SubpassDescriptor};
    use crate::types::{Extent2d, TextureFormat};

    #[derive(Default)]
    struct CountingRecorder {
        calls: Vec<(usize, usize)>,
    }

    impl RenderRecorder for CountingRecorder {
        fn record(&mut self, frame: &FrameContext, stage_index: usize, subpass_index: usize) {
            assert_eq!(frame.active_stage(), Some(stage_index));
            assert_eq!(frame.subpass_index(), subpass_index);
            self.calls.push((stage_index, subpass_index));
        }
    }

    fn scene_stage() -> RenderStageDescriptor {
        RenderStageDescriptor::new("scene")
            .with_attachment(AttachmentDescriptor::depth(0, "depth"))
            .with_attachment(
                AttachmentDescriptor::color(1, "scene", TextureFormat::Rgba8Unorm)
                    .with_clear_color(0.2, 0.2, 0.2, 1.0),
            )
            .with_subpass(SubpassDescriptor::new(0, [0, 1]))
            .with_subpass(SubpassDescriptor::new(1, [1]))
    }

    fn present_stage() -> RenderStageDescriptor {
        RenderStageDescriptor::new("present")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0]))
    }

    fn orchestrator() -> (Arc<DummyBackend>, Arc<SharedDisplay>, FrameOrchestrator) {
        let backend = Arc::new(DummyBackend::new());
        let display = Arc::new(SharedDisplay::new(800, 600, TextureFormat::Bgra8Unorm));
        let descriptor = OrchestratorDescriptor::new()
            .with_stage(scene_stage())
            .with_stage(present_stage());
        let orchestrator = FrameOrchestrator::new(
            backend.clone() as Arc<dyn RenderBackend>,
            display.clone() as Arc<dyn Display>,
            descriptor,
        )
        .unwrap();
        (backend, display, orchestrator)
    }

    #[test]
    fn test_new_rejects_invalid_stage() {
        let backend = Arc::new(DummyBackend::new()) as Arc<dyn RenderBackend>;
        let display = Arc::new(SharedDisplay::new(800, 600, TextureFormat::Bgra8Unorm));
        let descriptor = OrchestratorDescriptor::new().with_stage(
            RenderStageDescriptor::new("bad")
                .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
                .with_subpass(SubpassDescriptor::new(0, [9])),
        );
        let result = FrameOrchestrator::new(backend, display, descriptor);
        assert!(matches!(
            result.err(),
            Some(FrameError::Config(ConfigError::DanglingAttachment { .. }))
        ));
    }

    #[test]
    fn test_new_rejects_out_of_order_subpasses() {
        let backend = Arc::new(DummyBackend::new()) as Arc<dyn RenderBackend>;
        let display = Arc::new(SharedDisplay::new(800, 600, TextureFormat::Bgra8Unorm));
        // declaration order [1, 0] would execute subpasses under the wrong
        // numbers, so the descriptor never reaches the frame loop
        let descriptor = OrchestratorDescriptor::new().with_stage(
            RenderStageDescriptor::new("bad")
                .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
                .with_subpass(SubpassDescriptor::new(1, [0]))
                .with_subpass(SubpassDescriptor::new(0, [0])),
        );
        let result = FrameOrchestrator::new(backend, display, descriptor);
        assert!(matches!(
            result.err(),
            Some(FrameError::Config(ConfigError::SubpassOutOfOrder {
                binding: 1,
                position: 0
            }))
        ));
    }

    #[test]
    fn test_tick_records_stages_and_subpasses_in_order() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(recorder.calls, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(orchestrator.frame_number(), 1);
        assert!(orchestrator.frame().is_none());
    }

    #[test]
    fn test_ticks_rotate_swapchain_images() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(orchestrator.active_image_index(), 0);
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(orchestrator.active_image_index(), 1);
        assert_eq!(orchestrator.frame_number(), 2);
    }

    #[test]
    fn test_first_tick_builds_all_stages() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        assert_eq!(orchestrator.stages()[0].state(), StageState::Uninitialized);
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();
        assert!(orchestrator
            .stages()
            .iter()
            .all(|stage| stage.state() == StageState::Built));
        // offscreen scene stage has one framebuffer, present stage one per image
        assert_eq!(orchestrator.stages()[0].framebuffer_count(), 1);
        assert_eq!(orchestrator.stages()[1].framebuffer_count(), 3);
    }

    #[test]
    fn test_acquire_twice_is_protocol_error() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        assert!(orchestrator.acquire_frame().unwrap());
        assert!(matches!(
            orchestrator.acquire_frame(),
            Err(FrameError::Protocol(ProtocolError::FrameAlreadyStarted))
        ));
    }

    #[test]
    fn test_protocol_calls_require_open_frame() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        assert!(matches!(
            orchestrator.start_renderpass(0),
            Err(FrameError::Protocol(ProtocolError::FrameNotStarted))
        ));
        assert!(matches!(
            orchestrator.next_subpass(),
            Err(FrameError::Protocol(ProtocolError::FrameNotStarted))
        ));
        assert!(matches!(
            orchestrator.finish_frame(),
            Err(FrameError::Protocol(ProtocolError::FrameNotStarted))
        ));
    }

    #[test]
    fn test_next_subpass_requires_active_renderpass() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        assert!(matches!(
            orchestrator.next_subpass(),
            Err(FrameError::Protocol(ProtocolError::NoActiveRenderpass))
        ));
    }

    #[test]
    fn test_next_subpass_past_last_is_protocol_error() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        orchestrator.start_renderpass(0).unwrap();
        orchestrator.next_subpass().unwrap();

        // the scene stage has two subpasses; a third is out of range,
        // and repeating the call keeps failing rather than clamping
        for _ in 0..2 {
            assert!(matches!(
                orchestrator.next_subpass(),
                Err(FrameError::Protocol(ProtocolError::SubpassOutOfRange {
                    current: 1,
                    count: 2
                }))
            ));
        }
    }

    #[test]
    fn test_start_renderpass_while_active_is_protocol_error() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        orchestrator.start_renderpass(0).unwrap();
        assert!(matches!(
            orchestrator.start_renderpass(1),
            Err(FrameError::Protocol(ProtocolError::RenderpassActive {
                stage: 0
            }))
        ));
    }

    #[test]
    fn test_end_renderpass_checks_stage() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        orchestrator.start_renderpass(0).unwrap();
        assert!(matches!(
            orchestrator.end_renderpass(1),
            Err(FrameError::Protocol(ProtocolError::StageMismatch {
                active: 0,
                requested: 1
            }))
        ));
        orchestrator.end_renderpass(0).unwrap();
    }

    #[test]
    fn test_start_renderpass_rejects_bad_stage_index() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        assert!(matches!(
            orchestrator.start_renderpass(9),
            Err(FrameError::Protocol(ProtocolError::StageOutOfRange {
                index: 9,
                count: 2
            }))
        ));
    }

    #[test]
    fn test_finish_with_open_renderpass_is_protocol_error() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();
        orchestrator.start_renderpass(0).unwrap();
        assert!(matches!(
            orchestrator.finish_frame(),
            Err(FrameError::Protocol(ProtocolError::RenderpassActive {
                stage: 0
            }))
        ));
        // the frame stays open; closing the renderpass lets it finish
        orchestrator.end_renderpass(0).unwrap();
        orchestrator.finish_frame().unwrap();
    }

    #[test]
    fn test_fence_timeout_surfaces_device_loss() {
        let (backend, _display, mut orchestrator) = orchestrator();
        backend.fail_next_fence_wait();
        let mut recorder = CountingRecorder::default();
        assert!(matches!(
            orchestrator.tick(&mut recorder),
            Err(FrameError::DeviceLost(_))
        ));
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_stale_acquire_recreates_swapchain_and_stages() {
        let (backend, _display, mut orchestrator) = orchestrator();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();

        backend.set_image_count(2);
        backend.mark_acquire_stale();
        recorder.calls.clear();
        orchestrator.tick(&mut recorder).unwrap();

        // initial chain plus the stale-triggered recreation
        assert_eq!(backend.swapchains_created(), 2);
        assert_eq!(orchestrator.swapchain().image_count(), 2);
        // present stage framebuffers follow the new image count
        assert_eq!(orchestrator.stages()[1].framebuffer_count(), 2);
        assert_eq!(recorder.calls, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_persistently_stale_surface_skips_frame() {
        let (backend, _display, mut orchestrator) = orchestrator();
        backend.mark_acquire_stale();
        backend.mark_acquire_stale();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();

        assert!(recorder.calls.is_empty());
        assert_eq!(orchestrator.frame_number(), 0);

        // the fence was left signaled, so the next tick proceeds normally
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(recorder.calls, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(orchestrator.frame_number(), 1);
    }

    #[test]
    fn test_stale_present_recreates_next_frame() {
        let (backend, _display, mut orchestrator) = orchestrator();
        backend.mark_present_stale();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();

        // the stale present completed the frame without recreating
        assert_eq!(orchestrator.frame_number(), 1);
        assert_eq!(backend.swapchains_created(), 1);

        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(backend.swapchains_created(), 2);
        assert_eq!(orchestrator.frame_number(), 2);
    }

    #[test]
    fn test_display_resize_recreates_at_frame_boundary() {
        let (backend, display, mut orchestrator) = orchestrator();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(orchestrator.swapchain().extent(), Extent2d::new(800, 600));

        display.set_size(1920, 1080);
        orchestrator.tick(&mut recorder).unwrap();

        assert_eq!(backend.swapchains_created(), 2);
        assert_eq!(orchestrator.swapchain().extent(), Extent2d::new(1920, 1080));
        assert_eq!(
            orchestrator.stages()[0].extent(),
            Extent2d::new(1920, 1080)
        );
    }

    #[test]
    fn test_zero_extent_skips_frame() {
        let (_backend, display, mut orchestrator) = orchestrator();
        display.set_size(0, 600);
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();
        assert!(recorder.calls.is_empty());
        assert_eq!(orchestrator.frame_number(), 0);

        display.set_size(800, 600);
        orchestrator.tick(&mut recorder).unwrap();
        assert_eq!(orchestrator.frame_number(), 1);
    }

    #[test]
    fn test_capture_screenshot_rejects_open_frame() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        orchestrator.acquire_frame().unwrap();

        let path = std::env::temp_dir().join("renderflow_capture_open_frame.png");
        assert!(matches!(
            orchestrator.capture_screenshot(&path),
            Err(FrameError::Protocol(ProtocolError::FrameAlreadyStarted))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_capture_screenshot_writes_file() {
        let (_backend, _display, mut orchestrator) = orchestrator();
        let mut recorder = CountingRecorder::default();
        orchestrator.tick(&mut recorder).unwrap();

        let path = std::env::temp_dir().join("renderflow_capture_test.png");
        orchestrator.capture_screenshot(&path).unwrap();
        let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        std::fs::remove_file(&path).ok();
        assert!(written > 0);
    }
}
