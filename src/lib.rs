//! bpmn-forge - Process descriptions in, BPMN 2.0 diagrams out
//!
//! A staged generation pipeline: free-form input (text, or transcripts from
//! images and recordings) is normalized, run through two generation-service
//! calls (semantic extraction, then IR synthesis with bounded corrective
//! retries), structurally validated and auto-repaired, and emitted as
//! instrumented BPMN 2.0 XML. A multi-tier cache short-circuits repeated
//! and semantically similar requests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bpmn_forge::cache::MemoryCacheStore;
//! use bpmn_forge::config::PipelineConfig;
//! use bpmn_forge::input::RawInput;
//! use bpmn_forge::llm::AnthropicClient;
//! use bpmn_forge::pipeline::{GenerationOutcome, GenerationRequest, Pipeline};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_env();
//! let cache = Arc::new(MemoryCacheStore::with_ttl(config.cache_ttl_days));
//! let pipeline = Pipeline::new(config, Arc::new(AnthropicClient::from_env()?), cache);
//! let request = GenerationRequest::create(RawInput::text(
//!     "Order approval: manager reviews, then either approves or rejects",
//! ));
//! match pipeline.generate(request).await? {
//!     GenerationOutcome::Completed(result) => println!("{}", result.xml),
//!     GenerationOutcome::RequiresManualFix { issues } => eprintln!("{issues:?}"),
//! }
//! # Ok(())
//! # }
//! ```

// Error taxonomy with stage tags
pub mod error;

// Pipeline configuration
pub mod config;

// Stage data models
pub mod input;
pub mod ir;
pub mod semantic;

// Generation and embedding service clients
pub mod llm;

// Generation stages
pub mod extract;
pub mod synth;

// Structural validation and repair
pub mod autofix;
pub mod validate;

// Multi-tier cache
pub mod cache;

// XML emission and monitoring instrumentation
pub mod emit;
pub mod instrument;

// Request orchestration
pub mod pipeline;

pub use error::{PipelineError, Stage};
pub use pipeline::{
    GenerationMode, GenerationOutcome, GenerationRequest, GenerationResult, Pipeline,
};
