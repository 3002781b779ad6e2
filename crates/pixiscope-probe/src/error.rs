//! Error types for the pixiscope-probe crate.
//!
//! The `Display` text of each variant is the exact `error` string the agent
//! reports to callers, so these messages are part of the wire contract.

use thiserror::Error;

/// Errors that can occur while inspecting a page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    /// None of the known registration points exposed an application,
    /// display root, or renderer.
    #[error("No PixiJS application found")]
    NoApplication,

    /// The display root could not be resolved.
    #[error("No stage found")]
    NoStage,

    /// The renderer could not be resolved.
    #[error("No renderer found")]
    NoRenderer,

    /// An operation that renders needs both the renderer and the display root.
    #[error("No renderer or stage found")]
    NoRendererOrStage,

    /// Capture needs a pipeline with flattened instruction sets.
    #[error("Capture requires PixiJS v8 with render groups")]
    CaptureUnsupported,

    /// Instruction listing needs a pipeline with flattened instruction sets.
    #[error("Instructions require PixiJS v8 with render groups")]
    InstructionsUnsupported,

    /// The renderer has no texture manager.
    #[error("Texture system not available")]
    NoTextureSystem,

    /// Page code threw while rendering.
    #[error("Render failed during {phase}: {message}")]
    RenderFailed { phase: RenderPhase, message: String },

    /// A namespace method was called with unusable arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Page code called back into the agent while a call that needs the
    /// same state was still running.
    #[error("Agent is busy")]
    Busy,
}

/// Which render pass a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Baseline,
    Instrumented,
    Benchmark,
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderPhase::Baseline => write!(f, "baseline render"),
            RenderPhase::Instrumented => write!(f, "instrumented render"),
            RenderPhase::Benchmark => write!(f, "benchmark"),
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
