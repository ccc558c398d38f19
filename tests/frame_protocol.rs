//! End-to-end runs of the frame protocol through the public API, against the
//! dummy backend.
//!
//! Covered here:
//! - full acquire/record/submit/present loops across several frames
//! - driving the renderpass protocol manually, outside of `tick`
//! - display resizes absorbed at the next frame boundary
//! - screenshot capture after presentation
//!
//! Run with `cargo test --test frame_protocol`.

use std::sync::Arc;

use renderflow::backend::dummy::DummyBackend;
use renderflow::{
    create_backend, AttachmentDescriptor, Extent2d, FrameContext, FrameOrchestrator,
    OrchestratorDescriptor, RenderRecorder, RenderStageDescriptor, SharedDisplay,
    SubpassDescriptor, TextureFormat,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct RecordingLog {
    entries: Vec<(u64, usize, usize)>,
}

impl RenderRecorder for RecordingLog {
    fn record(&mut self, frame: &FrameContext, stage_index: usize, subpass_index: usize) {
        self.entries
            .push((frame.frame_number(), stage_index, subpass_index));
    }
}

fn deferred_descriptor() -> OrchestratorDescriptor {
    OrchestratorDescriptor::new()
        .with_stage(
            RenderStageDescriptor::new("geometry")
                .with_attachment(AttachmentDescriptor::depth(0, "depth"))
                .with_attachment(
                    AttachmentDescriptor::color(1, "albedo", TextureFormat::Rgba8Unorm)
                        .with_clear_color(0.0, 0.0, 0.0, 1.0),
                )
                .with_attachment(AttachmentDescriptor::color(
                    2,
                    "normals",
                    TextureFormat::Rgba16Float,
                ))
                .with_subpass(SubpassDescriptor::new(0, [0, 1, 2])),
        )
        .with_stage(
            RenderStageDescriptor::new("composite")
                .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
                .with_subpass(SubpassDescriptor::new(0, [0])),
        )
}

#[test]
fn test_multi_frame_loop_visits_every_stage_and_subpass() {
    init_logging();
    let backend = create_backend(None);
    let display = Arc::new(SharedDisplay::new(1024, 768, TextureFormat::Bgra8Unorm));
    let mut orchestrator = FrameOrchestrator::new(backend, display, deferred_descriptor()).unwrap();

    let mut recorder = RecordingLog::default();
    for _ in 0..3 {
        orchestrator.tick(&mut recorder).unwrap();
    }

    assert_eq!(orchestrator.frame_number(), 3);
    let expected: Vec<(u64, usize, usize)> = (0..3)
        .flat_map(|frame| [(frame, 0, 0), (frame, 1, 0)])
        .collect();
    assert_eq!(recorder.entries, expected);
}

#[test]
fn test_manual_protocol_drive() {
    init_logging();
    let backend = create_backend(None);
    let display = Arc::new(SharedDisplay::new(640, 480, TextureFormat::Bgra8Unorm));
    let mut orchestrator = FrameOrchestrator::new(backend, display, deferred_descriptor()).unwrap();

    assert!(orchestrator.acquire_frame().unwrap());
    let stage_count = orchestrator.stages().len();
    for stage_index in 0..stage_count {
        orchestrator.start_renderpass(stage_index).unwrap();
        orchestrator.end_renderpass(stage_index).unwrap();
    }
    orchestrator.finish_frame().unwrap();

    assert_eq!(orchestrator.frame_number(), 1);
    assert!(orchestrator.frame().is_none());
}

#[test]
fn test_resize_is_absorbed_between_frames() {
    init_logging();
    let backend = Arc::new(DummyBackend::new());
    let display = Arc::new(SharedDisplay::new(800, 600, TextureFormat::Bgra8Unorm));
    let mut orchestrator =
        FrameOrchestrator::new(backend.clone(), display.clone(), deferred_descriptor()).unwrap();

    let mut recorder = RecordingLog::default();
    orchestrator.tick(&mut recorder).unwrap();
    assert_eq!(backend.swapchains_created(), 1);

    display.set_size(1280, 720);
    orchestrator.tick(&mut recorder).unwrap();

    assert_eq!(backend.swapchains_created(), 2);
    assert_eq!(orchestrator.swapchain().extent(), Extent2d::new(1280, 720));
    assert_eq!(orchestrator.stages()[0].extent(), Extent2d::new(1280, 720));
}

#[test]
fn test_screenshot_after_present() {
    init_logging();
    let backend = create_backend(None);
    let display = Arc::new(SharedDisplay::new(320, 240, TextureFormat::Bgra8Unorm));
    let mut orchestrator = FrameOrchestrator::new(backend, display, deferred_descriptor()).unwrap();

    let mut recorder = RecordingLog::default();
    orchestrator.tick(&mut recorder).unwrap();

    let path = std::env::temp_dir().join("renderflow_frame_protocol_capture.png");
    orchestrator.capture_screenshot(&path).unwrap();
    assert!(path.exists());
    std::fs::remove_file(&path).ok();
}
