//! Error types for stage configuration, the frame protocol, and the backends.

use std::fmt;

/// Errors detected while validating a stage's attachment/subpass topology.
///
/// These are fatal at construction time: a stage graph that fails validation
/// is never built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A subpass references an attachment binding that was never declared.
    DanglingAttachment { subpass: u32, binding: u32 },
    /// Two attachments declare the same binding id.
    DuplicateAttachmentBinding { binding: u32 },
    /// Two subpasses declare the same binding index.
    DuplicateSubpassBinding { binding: u32 },
    /// A subpass binding index is not addressable within the subpass list.
    SubpassBindingOutOfRange { binding: u32, count: usize },
    /// A subpass was declared at a position that does not match its binding
    /// index, so declaration order and execution order would disagree.
    SubpassOutOfOrder { binding: u32, position: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingAttachment { subpass, binding } => write!(
                f,
                "subpass {subpass} references undeclared attachment binding {binding}"
            ),
            Self::DuplicateAttachmentBinding { binding } => {
                write!(f, "attachment binding {binding} declared more than once")
            }
            Self::DuplicateSubpassBinding { binding } => {
                write!(f, "subpass binding {binding} declared more than once")
            }
            Self::SubpassBindingOutOfRange { binding, count } => write!(
                f,
                "subpass binding {binding} out of range for {count} subpasses"
            ),
            Self::SubpassOutOfOrder { binding, position } => write!(
                f,
                "subpass binding {binding} declared at position {position}; \
                 subpasses must be declared in binding order"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Frame-protocol violations.
///
/// These indicate misuse of the renderpass/subpass sequencing API and are
/// always surfaced, never clamped or silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// A protocol operation was issued before a frame was acquired.
    FrameNotStarted,
    /// A frame was acquired while a previous frame is still open.
    FrameAlreadyStarted,
    /// A renderpass is already active for the given stage.
    RenderpassActive { stage: usize },
    /// A subpass or end operation was issued with no renderpass active.
    NoActiveRenderpass,
    /// A renderpass was ended for a stage other than the active one.
    StageMismatch { active: usize, requested: usize },
    /// A subpass advance would move past the last subpass.
    SubpassOutOfRange { current: usize, count: usize },
    /// A stage index is out of range for the configured stage list.
    StageOutOfRange { index: usize, count: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameNotStarted => write!(f, "no frame has been acquired"),
            Self::FrameAlreadyStarted => write!(f, "a frame is already in flight"),
            Self::RenderpassActive { stage } => {
                write!(f, "a renderpass is already active for stage {stage}")
            }
            Self::NoActiveRenderpass => write!(f, "no renderpass is active"),
            Self::StageMismatch { active, requested } => write!(
                f,
                "stage {requested} is not the active stage (stage {active} is)"
            ),
            Self::SubpassOutOfRange { current, count } => write!(
                f,
                "cannot advance past subpass {current} of {count}"
            ),
            Self::StageOutOfRange { index, count } => {
                write!(f, "stage index {index} out of range for {count} stages")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors that can occur while building or driving the frame orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The stage graph failed validation.
    Config(ConfigError),
    /// The frame protocol was violated.
    Protocol(ProtocolError),
    /// Failed to initialize a backend.
    InitializationFailed(String),
    /// Failed to create a GPU resource.
    ResourceCreationFailed(String),
    /// A synchronization wait timed out or a submission failed.
    DeviceLost(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid stage configuration: {err}"),
            Self::Protocol(err) => write!(f, "frame protocol violation: {err}"),
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::DeviceLost(msg) => write!(f, "GPU device lost: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for FrameError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<ProtocolError> for FrameError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DanglingAttachment {
            subpass: 1,
            binding: 4,
        };
        assert_eq!(
            err.to_string(),
            "subpass 1 references undeclared attachment binding 4"
        );

        let err = ConfigError::SubpassOutOfOrder {
            binding: 1,
            position: 0,
        };
        assert_eq!(
            err.to_string(),
            "subpass binding 1 declared at position 0; subpasses must be declared in binding order"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::SubpassOutOfRange {
            current: 2,
            count: 3,
        };
        assert_eq!(err.to_string(), "cannot advance past subpass 2 of 3");

        let err = ProtocolError::StageMismatch {
            active: 0,
            requested: 1,
        };
        assert_eq!(
            err.to_string(),
            "stage 1 is not the active stage (stage 0 is)"
        );
    }

    #[test]
    fn test_frame_error_wraps_sources() {
        let err = FrameError::from(ConfigError::DuplicateAttachmentBinding { binding: 0 });
        assert!(matches!(err, FrameError::Config(_)));
        assert_eq!(
            err.to_string(),
            "invalid stage configuration: attachment binding 0 declared more than once"
        );

        let err = FrameError::from(ProtocolError::FrameNotStarted);
        assert_eq!(
            err.to_string(),
            "frame protocol violation: no frame has been acquired"
        );
    }

    #[test]
    fn test_device_lost_display() {
        let err = FrameError::DeviceLost("fence wait timed out".to_string());
        assert_eq!(err.to_string(), "GPU device lost: fence wait timed out");
    }
}
