//! Error taxonomy for the generation pipeline.
//!
//! Every failure surfaced to a caller carries a stage tag. Validation
//! outcomes with `requires_manual_fix` are NOT errors — they are returned
//! as a structured issue list in [`crate::pipeline::GenerationOutcome`].
//! Cache and embedding failures are swallowed and logged at their call
//! sites and never appear here.

use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalizing,
    ExtractingSemantics,
    SynthesizingIr,
    Validating,
    AutoFixing,
    Emitting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Normalizing => "normalizing",
            Stage::ExtractingSemantics => "extracting_semantics",
            Stage::SynthesizingIr => "synthesizing_ir",
            Stage::Validating => "validating",
            Stage::AutoFixing => "auto_fixing",
            Stage::Emitting => "emitting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad or empty input — the caller's fault (4xx-equivalent).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The generation service failed or returned an unparsable semantic
    /// core. No retry is attempted at this stage.
    #[error("semantic extraction failed: {0}")]
    SemanticExtraction(String),

    /// IR synthesis exhausted its bounded retries.
    #[error("IR synthesis failed after {attempts} attempt(s): {message}")]
    IrSynthesis { attempts: usize, message: String },

    /// The emitter could not serialize a validated IR. Rare; indicates a
    /// bug rather than a model failure.
    #[error("diagram emission failed: {0}")]
    Emit(String),
}

impl PipelineError {
    /// Stage tag for structured caller-facing errors.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidInput(_) => Stage::Normalizing,
            PipelineError::SemanticExtraction(_) => Stage::ExtractingSemantics,
            PipelineError::IrSynthesis { .. } => Stage::SynthesizingIr,
            PipelineError::Emit(_) => Stage::Emitting,
        }
    }
}
