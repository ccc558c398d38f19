//! # Renderflow
//!
//! Frame orchestration for renderpass-based renderers.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameOrchestrator`] - Drives the frame loop: acquire, record, submit, present
//! - [`RenderStageDescriptor`] - Declarative description of a renderpass with its attachments and subpasses
//! - [`RenderBackend`] - Trait for GPU backend implementations
//! - Two backends: Vulkan (behind the `vulkan-backend` feature) and Dummy (for tests and headless runs)
//!
//! Stages own their renderpass, attachment images and framebuffers, and are
//! rebuilt automatically when the display resizes or the surface goes stale.
//! See the [`orchestrator`] module docs for the frame protocol and a full
//! example.
//!
//! ## Example
//!
//! ```ignore
//! use renderflow::{create_backend, FrameOrchestrator, OrchestratorDescriptor};
//!
//! let backend = create_backend(None);
//! let mut orchestrator = FrameOrchestrator::new(backend, display, descriptor)?;
//! orchestrator.tick(&mut recorder)?;
//! ```

pub mod backend;
pub mod display;
pub mod error;
pub mod orchestrator;
pub mod stage;
pub mod swapchain;
pub mod types;

// Re-export main types for convenience
pub use backend::{create_backend, RenderBackend};
pub use display::{Display, SharedDisplay};
pub use error::{ConfigError, FrameError, ProtocolError};
pub use orchestrator::{FrameContext, FrameOrchestrator, OrchestratorDescriptor, RenderRecorder};
pub use stage::{
    AttachmentDescriptor, AttachmentKind, PipelineBindPoint, RenderStage, RenderStageDescriptor,
    SizePolicy, StageState, SubpassDescriptor,
};
pub use swapchain::{AcquiredImage, PresentMode, SwapchainDescriptor, SwapchainManager};
pub use types::{ClearValue, Extent2d, ImageDescriptor, ImageUsage, TextureFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library.
///
/// Optional; logs the version so captures and bug reports can be matched to
/// a build.
pub fn init() {
    log::info!("renderflow v{} initialized", VERSION);
}
