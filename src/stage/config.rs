//! Declarative render stage configuration.
//!
//! A [`RenderStageDescriptor`] names the attachments a stage renders into,
//! the subpasses that touch them and the policy used to resolve the stage
//! extent. Descriptors are plain data built once at graph-definition time;
//! [`RenderStage`] validates them on construction and derives clear values,
//! per-subpass attachment counts and the depth/presentable roles from them.
//!
//! [`RenderStage`]: crate::stage::RenderStage

use crate::error::ConfigError;
use crate::types::{ClearValue, TextureFormat};

/// Role of an attachment within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    /// Offscreen color target, readable by later stages.
    Color,
    /// Depth/stencil target owned by the stage.
    Depth,
    /// Swapchain image presented to the display.
    Presentable,
}

/// Declares one image slot of a render stage.
///
/// The `binding` id is how subpasses reference the attachment; ids are local
/// to one stage and must be unique within it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    /// Binding id referenced by subpasses.
    pub binding: u32,
    /// Debug label.
    pub label: String,
    /// Attachment role.
    pub kind: AttachmentKind,
    /// Image format. Ignored for `Presentable`, which always uses the
    /// display surface format.
    pub format: TextureFormat,
    /// Clear color applied when the renderpass begins. Only meaningful for
    /// `Color` attachments.
    pub clear_color: [f32; 4],
    /// Whether the attachment is rendered at the display sample count.
    pub multisampled: bool,
}

impl AttachmentDescriptor {
    /// Declare an offscreen color attachment.
    pub fn color(binding: u32, label: impl Into<String>, format: TextureFormat) -> Self {
        Self {
            binding,
            label: label.into(),
            kind: AttachmentKind::Color,
            format,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            multisampled: false,
        }
    }

    /// Declare the depth/stencil attachment.
    pub fn depth(binding: u32, label: impl Into<String>) -> Self {
        Self {
            binding,
            label: label.into(),
            kind: AttachmentKind::Depth,
            format: TextureFormat::Depth24PlusStencil8,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            multisampled: false,
        }
    }

    /// Declare the presentable (swapchain) attachment.
    pub fn presentable(binding: u32, label: impl Into<String>) -> Self {
        Self {
            binding,
            label: label.into(),
            kind: AttachmentKind::Presentable,
            format: TextureFormat::Bgra8Unorm,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            multisampled: false,
        }
    }

    /// Set the clear color. Only applies to `Color` attachments; depth and
    /// presentable attachments use fixed clear values.
    pub fn with_clear_color(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.clear_color = [r, g, b, a];
        self
    }

    /// Override the image format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Render this attachment at the display sample count.
    pub fn with_multisampling(mut self) -> Self {
        self.multisampled = true;
        self
    }

    /// Clear value this attachment contributes to the renderpass begin.
    ///
    /// `Color` uses the configured clear color, `Depth` clears to the far
    /// plane with zero stencil and `Presentable` clears to opaque black.
    pub fn clear_value(&self) -> ClearValue {
        match self.kind {
            AttachmentKind::Color => {
                let [r, g, b, a] = self.clear_color;
                ClearValue::color(r, g, b, a)
            }
            AttachmentKind::Depth => ClearValue::depth_stencil(1.0, 0),
            AttachmentKind::Presentable => ClearValue::color(0.0, 0.0, 0.0, 1.0),
        }
    }
}

/// Pipeline type a subpass binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineBindPoint {
    /// Rasterization pipeline.
    #[default]
    Graphics,
    /// Compute pipeline.
    Compute,
}

/// One sub-phase of a stage, referencing attachments by binding id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpassDescriptor {
    /// Binding index of the subpass. Must equal the subpass's position in
    /// the stage's declaration list, so declaration order is execution
    /// order.
    pub binding: u32,
    /// Attachment bindings this subpass writes, in declaration order.
    pub attachment_bindings: Vec<u32>,
    /// Pipeline type bound during the subpass.
    pub bind_point: PipelineBindPoint,
}

impl SubpassDescriptor {
    /// Create a graphics subpass over the given attachment bindings.
    pub fn new(binding: u32, attachment_bindings: impl Into<Vec<u32>>) -> Self {
        Self {
            binding,
            attachment_bindings: attachment_bindings.into(),
            bind_point: PipelineBindPoint::default(),
        }
    }

    /// Set the pipeline bind point.
    pub fn with_bind_point(mut self, bind_point: PipelineBindPoint) -> Self {
        self.bind_point = bind_point;
        self
    }
}

/// How a stage resolves its extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    /// Follow the live display size; the stage goes out of date on resize.
    #[default]
    TrackDisplay,
    /// Fixed extent, unaffected by display resizes.
    Fixed { width: u32, height: u32 },
}

/// Immutable description of a render stage.
///
/// Built once at graph-definition time with the `with_*` methods and handed
/// to the orchestrator; all GPU resources a stage owns are derived from it.
#[derive(Debug, Clone, Default)]
pub struct RenderStageDescriptor {
    /// Debug label, used in resource labels and rebuild logs.
    pub label: String,
    /// Attachments in declaration order.
    pub attachments: Vec<AttachmentDescriptor>,
    /// Subpasses in execution order.
    pub subpasses: Vec<SubpassDescriptor>,
    /// Extent resolution policy.
    pub size_policy: SizePolicy,
}

impl RenderStageDescriptor {
    /// Create an empty descriptor with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Append an attachment declaration.
    pub fn with_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Append a subpass declaration.
    pub fn with_subpass(mut self, subpass: SubpassDescriptor) -> Self {
        self.subpasses.push(subpass);
        self
    }

    /// Set the size policy.
    pub fn with_size_policy(mut self, policy: SizePolicy) -> Self {
        self.size_policy = policy;
        self
    }

    /// Use a fixed extent instead of tracking the display.
    pub fn with_fixed_size(mut self, width: u32, height: u32) -> Self {
        self.size_policy = SizePolicy::Fixed { width, height };
        self
    }

    /// Check the topology of the descriptor.
    ///
    /// Fails if attachment or subpass bindings collide, if a subpass binding
    /// cannot index the subpass list, if subpasses are declared out of
    /// binding order or if a subpass references an attachment binding that
    /// was never declared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, attachment) in self.attachments.iter().enumerate() {
            if self.attachments[..i]
                .iter()
                .any(|other| other.binding == attachment.binding)
            {
                return Err(ConfigError::DuplicateAttachmentBinding {
                    binding: attachment.binding,
                });
            }
        }
        for (i, subpass) in self.subpasses.iter().enumerate() {
            if self.subpasses[..i]
                .iter()
                .any(|other| other.binding == subpass.binding)
            {
                return Err(ConfigError::DuplicateSubpassBinding {
                    binding: subpass.binding,
                });
            }
            if subpass.binding as usize >= self.subpasses.len() {
                return Err(ConfigError::SubpassBindingOutOfRange {
                    binding: subpass.binding,
                    count: self.subpasses.len(),
                });
            }
            // Execution numbers subpasses by list position, so the binding
            // must agree with where the subpass was declared.
            if subpass.binding as usize != i {
                return Err(ConfigError::SubpassOutOfOrder {
                    binding: subpass.binding,
                    position: i,
                });
            }
            for &binding in &subpass.attachment_bindings {
                if self.attachment(binding).is_none() {
                    return Err(ConfigError::DanglingAttachment {
                        subpass: subpass.binding,
                        binding,
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up an attachment by binding id.
    pub fn attachment(&self, binding: u32) -> Option<&AttachmentDescriptor> {
        self.attachments.iter().find(|a| a.binding == binding)
    }

    /// The depth attachment, if one was declared.
    pub fn depth_attachment(&self) -> Option<&AttachmentDescriptor> {
        self.attachments
            .iter()
            .find(|a| a.kind == AttachmentKind::Depth)
    }

    /// The presentable attachment, if one was declared.
    pub fn presentable_attachment(&self) -> Option<&AttachmentDescriptor> {
        self.attachments
            .iter()
            .find(|a| a.kind == AttachmentKind::Presentable)
    }

    /// True if the stage renders into a swapchain image.
    pub fn has_presentable(&self) -> bool {
        self.presentable_attachment().is_some()
    }

    /// Clear values in attachment declaration order, one per attachment.
    pub fn clear_values(&self) -> Vec<ClearValue> {
        self.attachments.iter().map(|a| a.clear_value()).collect()
    }

    /// Number of color attachments each subpass writes, indexed by subpass
    /// binding. Depth and presentable attachments are not counted.
    pub fn subpass_attachment_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.subpasses.len()];
        for attachment in &self.attachments {
            if attachment.kind != AttachmentKind::Color {
                continue;
            }
            for subpass in &self.subpasses {
                if subpass.attachment_bindings.contains(&attachment.binding) {
                    counts[subpass.binding as usize] += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deferred_descriptor() -> RenderStageDescriptor {
        RenderStageDescriptor::new("deferred")
            .with_attachment(AttachmentDescriptor::depth(0, "depth"))
            .with_attachment(
                AttachmentDescriptor::color(1, "albedo", TextureFormat::Rgba8Unorm)
                    .with_clear_color(0.2, 0.2, 0.2, 1.0),
            )
            .with_attachment(AttachmentDescriptor::color(
                2,
                "normals",
                TextureFormat::Rgba16Float,
            ))
            .with_attachment(AttachmentDescriptor::presentable(3, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0, 1, 2]))
            .with_subpass(SubpassDescriptor::new(1, [3]))
    }

    #[test]
    fn test_validate_accepts_well_formed_descriptor() {
        assert!(deferred_descriptor().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_attachment() {
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0, 7]));
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::DanglingAttachment {
                subpass: 0,
                binding: 7
            })
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_attachment_binding() {
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::depth(0, "depth"))
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"));
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::DuplicateAttachmentBinding { binding: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_subpass_binding() {
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(0, [0]))
            .with_subpass(SubpassDescriptor::new(0, [0]));
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::DuplicateSubpassBinding { binding: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_unaddressable_subpass_binding() {
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(3, [0]));
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::SubpassBindingOutOfRange {
                binding: 3,
                count: 1
            })
        );
    }

    #[test]
    fn test_validate_rejects_out_of_order_subpasses() {
        let descriptor = RenderStageDescriptor::new("bad")
            .with_attachment(AttachmentDescriptor::presentable(0, "swapchain"))
            .with_subpass(SubpassDescriptor::new(1, [0]))
            .with_subpass(SubpassDescriptor::new(0, [0]));
        assert_eq!(
            descriptor.validate(),
            Err(ConfigError::SubpassOutOfOrder {
                binding: 1,
                position: 0
            })
        );
    }

    #[test]
    fn test_clear_values_match_declaration_order() {
        let descriptor = deferred_descriptor();
        let clear_values = descriptor.clear_values();
        assert_eq!(clear_values.len(), descriptor.attachments.len());
        assert_eq!(clear_values[0], ClearValue::depth_stencil(1.0, 0));
        assert_eq!(clear_values[1], ClearValue::color(0.2, 0.2, 0.2, 1.0));
        assert_eq!(clear_values[2], ClearValue::color(0.0, 0.0, 0.0, 1.0));
        assert_eq!(clear_values[3], ClearValue::color(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_presentable_clear_ignores_configured_color() {
        let attachment =
            AttachmentDescriptor::presentable(0, "swapchain").with_clear_color(1.0, 0.0, 0.0, 1.0);
        assert_eq!(attachment.clear_value(), ClearValue::color(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_subpass_attachment_counts_skip_depth_and_presentable() {
        let counts = deferred_descriptor().subpass_attachment_counts();
        assert_eq!(counts, vec![2, 0]);
    }

    #[test]
    fn test_role_lookups() {
        let descriptor = deferred_descriptor();
        assert_eq!(descriptor.depth_attachment().map(|a| a.binding), Some(0));
        assert_eq!(
            descriptor.presentable_attachment().map(|a| a.binding),
            Some(3)
        );
        assert!(descriptor.has_presentable());
        assert_eq!(descriptor.attachment(2).map(|a| a.label.as_str()), Some("normals"));
        assert!(descriptor.attachment(9).is_none());
    }
}
