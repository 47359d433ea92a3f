//! Error taxonomy for the pipeline (spec §7).
//!
//! Every error that can escape the pipeline is fatal: there is no
//! recovery path, only a diagnostic and an abort. Stages never swallow
//! an error and "try the next thing."

use std::fmt;
use std::io;

use thiserror::Error;

/// The top-level error type returned by every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upstream IR or declarative definitions violate an invariant:
    /// unknown opcode, operand-width mismatch, non-monotone variant widths.
    #[error("malformed input: {0}")]
    InputMalformed(String),

    /// An API call or relocation kind that the pipeline does not (yet)
    /// know how to lower or classify.
    #[error("unsupported construct: {construct} (at {location})")]
    UnsupportedConstruct { construct: String, location: String },

    /// Two variants claim the same opcode ordinal, or two placeholders
    /// claim the same ordinal within a stencil.
    #[error("layout conflict: {0}")]
    LayoutConflict(String),

    /// The desugaring driver exceeded its iteration cap for a level
    /// without reaching a fixed point.
    #[error("inliner did not converge at level {level:?} after {passes} passes")]
    InlinerNonConvergence { level: String, passes: u32 },

    /// A child invocation of the external object-code toolchain failed.
    #[error("toolchain failure running `{command}` (exit {exit_code:?}):\n{stderr}")]
    ToolchainFailure {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// I/O failure while reading an input artifact or writing an output
    /// artifact.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The self-describing interchange container failed to deserialize.
    #[error("malformed interchange artifact: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn unsupported(construct: impl fmt::Display, location: impl fmt::Display) -> Self {
        PipelineError::UnsupportedConstruct {
            construct: construct.to_string(),
            location: location.to_string(),
        }
    }
}
