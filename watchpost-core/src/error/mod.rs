//! error — failure taxonomy for the per-frame pipeline
//!
//! Frame-level failures end the current frame only; everything else halts the
//! run loop and surfaces to the host.

use thiserror::Error;

/// Errors raised while admitting, staging, inferring or decoding a frame.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The camera delivered a frame without usable pixel data.
    #[error("frame unavailable: {reason}")]
    FrameUnavailable {
        /// What was missing from the frame.
        reason: String,
    },

    /// The inference engine could not be loaded from its asset.
    #[error("failed to load inference engine from '{asset}'")]
    EngineLoad {
        /// Asset identifier the engine was loaded from.
        asset: String,
        #[source]
        source: anyhow::Error,
    },

    /// The engine produced output that does not follow the detection schema.
    #[error("engine output violates the detection contract: {0}")]
    DecodeContractViolation(String),

    /// Camera access was refused before the pipeline could start.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// A single `forward` call failed.
    #[error("inference failed")]
    Engine(#[source] anyhow::Error),

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn frame_unavailable(reason: impl Into<String>) -> Self {
        Self::FrameUnavailable {
            reason: reason.into(),
        }
    }

    pub fn contract(detail: impl Into<String>) -> Self {
        Self::DecodeContractViolation(detail.into())
    }

    /// Whether the error halts the pipeline rather than just the current frame.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FrameUnavailable { .. } | Self::Engine(_) => false,
            Self::EngineLoad { .. }
            | Self::DecodeContractViolation(_)
            | Self::PermissionDenied(_)
            | Self::Config(_) => true,
        }
    }
}
