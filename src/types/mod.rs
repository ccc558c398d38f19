//! Common types and descriptors shared across the crate.
//!
//! This module contains the format enum, usage flags, extents, clear values,
//! and the image descriptor used by the backends.

mod common;
mod format;

pub use common::{ClearValue, Extent2d};
pub use format::{ImageDescriptor, ImageUsage, TextureFormat};
