//! Image formats, usage flags and the image descriptor.

use bitflags::bitflags;

/// Pixel format of an attachment image.
///
/// Swapchain surfaces typically report one of the BGRA variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit-per-channel RGBA, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit-per-channel RGBA in sRGB space.
    Rgba8UnormSrgb,
    /// 8-bit-per-channel BGRA, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit-per-channel BGRA in sRGB space.
    Bgra8UnormSrgb,
    /// 16-bit-per-channel float RGBA.
    Rgba16Float,
    /// 32-bit-per-channel float RGBA.
    Rgba32Float,
    /// 32-bit float depth, no stencil.
    Depth32Float,
    /// 32-bit float depth paired with 8-bit stencil.
    Depth32FloatStencil8,
    /// 24-bit depth packed with 8-bit stencil.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Whether the format carries depth or stencil data.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth32Float | Self::Depth32FloatStencil8 | Self::Depth24PlusStencil8
        )
    }

    /// Whether the format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth32FloatStencil8 | Self::Depth24PlusStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for attachment images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const TRANSFER_SRC = 1 << 0;
        /// Image can be copied to.
        const TRANSFER_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be used as a color attachment.
        const COLOR_ATTACHMENT = 1 << 3;
        /// Image can be used as a depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT = 1 << 4;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Parameters for creating an attachment image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Debug label, used for allocation names and logs.
    pub label: Option<String>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Samples per pixel; 1 disables multisampling.
    pub sample_count: u32,
    /// How the image will be used.
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Describe a single-sampled 2D image.
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            sample_count: 1,
            usage,
        }
    }

    /// Attach a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the samples per pixel.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }
}
