//! Pipeline orchestrator.
//!
//! One request runs the staged sequence normalize → extract semantics →
//! synthesize IR → validate/auto-fix → emit → instrument, with cache
//! short-circuits before the two generation-service calls and an exact plus
//! nearest-neighbor lookup on finished diagrams. Stages are strictly
//! ordered; there is no intra-request parallelism because each prompt
//! depends on the previous stage's validated output.
//!
//! Cache writes happen after the response is ready, as fire-and-forget
//! tasks. A cache failure is never a request failure.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use crate::cache::{combined_hash, content_hash, CacheNamespace, CacheStore, PURGE_HIT_FLOOR};
use crate::config::PipelineConfig;
use crate::emit::emit;
use crate::error::{PipelineError, Stage};
use crate::extract::SemanticExtractor;
use crate::input::{normalize, RawInput};
use crate::instrument::instrument;
use crate::ir::{DiagramType, ProcessIR, StyleProfile, TemplateConstraints};
use crate::llm::{Embedder, GenerationClient};
use crate::semantic::SemanticCore;
use crate::synth::IrSynthesizer;
use crate::validate::{validate_and_fix, Issue, ValidationStatus};

/// Whether the request creates a new diagram or refines an existing one.
/// Refinement uses a stricter semantic-cache threshold so it never lands on
/// a merely similar diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    #[default]
    Create,
    Refine,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub input: RawInput,
    pub diagram_type: DiagramType,
    pub style: StyleProfile,
    /// Overrides the constraints derived from the extracted semantics.
    pub constraints_override: Option<TemplateConstraints>,
    pub mode: GenerationMode,
}

impl GenerationRequest {
    pub fn create(input: RawInput) -> Self {
        Self {
            input,
            diagram_type: DiagramType::Bpmn,
            style: StyleProfile::default(),
            constraints_override: None,
            mode: GenerationMode::Create,
        }
    }

    pub fn refine(input: RawInput) -> Self {
        Self {
            mode: GenerationMode::Refine,
            ..Self::create(input)
        }
    }

    pub fn with_diagram_type(mut self, diagram_type: DiagramType) -> Self {
        self.diagram_type = diagram_type;
        self
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub xml: String,
    /// True when the finished diagram came from the result cache.
    pub cached: bool,
    /// Cosine similarity of the nearest-neighbor hit, when one was used.
    pub similarity: Option<f32>,
    pub warnings: Vec<String>,
}

/// A request either completes with a diagram or stops at validation with
/// issues the caller must resolve. The latter is a structured outcome, not
/// an error.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed(GenerationResult),
    RequiresManualFix { issues: Vec<Issue> },
}

pub struct Pipeline {
    config: PipelineConfig,
    cache: Arc<dyn CacheStore>,
    embedder: Option<Arc<dyn Embedder>>,
    extractor: SemanticExtractor,
    synthesizer: IrSynthesizer,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn GenerationClient>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let extractor = SemanticExtractor::new(Arc::clone(&client), config.generation.clone());
        let synthesizer = IrSynthesizer::new(
            Arc::clone(&client),
            config.generation.clone(),
            config.max_synthesis_retries,
        );
        Self {
            config,
            cache,
            embedder: None,
            extractor,
            synthesizer,
        }
    }

    /// Attach an embedding client, enabling the semantic result-cache tier
    /// when the config also turns it on.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run one request end to end.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, PipelineError> {
        info!(stage = %Stage::Normalizing, "pipeline started");
        let normalized = normalize(&request.input, self.config.max_input_chars)?;
        let input_hash = content_hash(&normalized.content);
        let result_key = combined_hash(&[&input_hash, request.diagram_type.as_str()]);

        // ── Result tier: exact, then nearest-neighbor ──
        if let Some(hit) = self.lookup::<CachedDiagram>(CacheNamespace::Result, &result_key).await
        {
            info!(key = %result_key, "exact result-cache hit");
            return Ok(GenerationOutcome::Completed(GenerationResult {
                xml: hit.xml,
                cached: true,
                similarity: None,
                warnings: hit.warnings,
            }));
        }

        let mut embedding: Option<Vec<f32>> = None;
        if self.config.semantic_cache_enabled {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&normalized.content).await {
                    Ok(vector) => {
                        let threshold = self.min_similarity(request.mode);
                        match self
                            .cache
                            .get_nearest(CacheNamespace::Result, &vector, threshold)
                            .await
                        {
                            Ok(Some((entry, similarity))) => {
                                if let Ok(hit) =
                                    serde_json::from_value::<CachedDiagram>(entry.payload)
                                {
                                    info!(similarity, "semantic result-cache hit");
                                    return Ok(GenerationOutcome::Completed(GenerationResult {
                                        xml: hit.xml,
                                        cached: true,
                                        similarity: Some(similarity),
                                        warnings: hit.warnings,
                                    }));
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "semantic cache lookup failed"),
                        }
                        embedding = Some(vector);
                    }
                    // Embedding trouble never fails a request.
                    Err(e) => warn!(error = %e, "embedding failed, skipping semantic cache"),
                }
            }
        }

        // ── Semantic tier ──
        info!(stage = %Stage::ExtractingSemantics, "extracting semantics");
        let core = match self.lookup::<SemanticCore>(CacheNamespace::Semantic, &input_hash).await
        {
            Some(core) => {
                info!("semantic-tier cache hit");
                core
            }
            None => self.extractor.extract(&normalized).await?,
        };

        let constraints = request
            .constraints_override
            .clone()
            .unwrap_or_else(|| TemplateConstraints::from_semantic(&core));

        // ── IR tier ──
        info!(stage = %Stage::SynthesizingIr, "synthesizing IR");
        let ir_key = combined_hash(&[
            &core.deterministic_json(),
            &serde_json::to_string(&constraints).unwrap_or_default(),
            &serde_json::to_string(&request.style).unwrap_or_default(),
            request.diagram_type.as_str(),
        ]);
        let ir = match self.lookup::<ProcessIR>(CacheNamespace::Ir, &ir_key).await {
            Some(ir) => {
                info!("IR-tier cache hit");
                ir
            }
            None => {
                self.synthesizer
                    .synthesize(&core, &constraints, &request.style, request.diagram_type, None)
                    .await?
            }
        };

        // ── Validation / auto-fix ──
        info!(stage = %Stage::Validating, "validating IR");
        let report = validate_and_fix(&ir);
        if report.status == ValidationStatus::RequiresManualFix {
            info!(issues = report.issues.len(), "validation requires manual fix");
            return Ok(GenerationOutcome::RequiresManualFix {
                issues: report.issues,
            });
        }
        if report.status == ValidationStatus::AutoFixed {
            info!(stage = %Stage::AutoFixing, fixes = report.fixes.len(), "auto-fix applied");
        }
        let final_ir = report.fixed_ir.unwrap_or(ir);
        let mut warnings: Vec<String> = report
            .fixes
            .iter()
            .map(|f| format!("auto-fix applied: {} ({})", f.action, f.details))
            .collect();

        // ── Emission / instrumentation ──
        info!(stage = %Stage::Emitting, "emitting diagram");
        let xml = emit(&final_ir)?;
        let instrumented = instrument(&xml);
        warnings.extend(instrumented.warnings);

        self.spawn_cache_write(
            CacheNamespace::Semantic,
            input_hash,
            serde_json::to_value(&core).unwrap_or_default(),
            None,
        );
        self.spawn_cache_write(
            CacheNamespace::Ir,
            ir_key,
            serde_json::to_value(&final_ir).unwrap_or_default(),
            None,
        );
        self.spawn_cache_write(
            CacheNamespace::Result,
            result_key,
            json!({ "xml": instrumented.xml, "warnings": warnings }),
            embedding,
        );

        Ok(GenerationOutcome::Completed(GenerationResult {
            xml: instrumented.xml,
            cached: false,
            similarity: None,
            warnings,
        }))
    }

    /// Maintenance entry point: drop expired and cold entries across all
    /// tiers. Errors are logged, not propagated.
    pub async fn purge_cache(&self) -> usize {
        match self.cache.purge(PURGE_HIT_FLOOR).await {
            Ok(removed) => {
                info!(removed, "cache purge complete");
                removed
            }
            Err(e) => {
                warn!(error = %e, "cache purge failed");
                0
            }
        }
    }

    fn min_similarity(&self, mode: GenerationMode) -> f32 {
        match mode {
            GenerationMode::Create => self.config.create_min_similarity,
            GenerationMode::Refine => self.config.refine_min_similarity,
        }
    }

    /// Cache read that treats every failure (store error, decode error) as
    /// a miss.
    async fn lookup<T: DeserializeOwned>(&self, namespace: CacheNamespace, key: &str) -> Option<T> {
        let entry = match self.cache.get(namespace, key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(namespace = namespace.as_str(), error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = namespace.as_str(), error = %e, "cached payload undecodable");
                None
            }
        }
    }

    fn spawn_cache_write(
        &self,
        namespace: CacheNamespace,
        key: String,
        payload: serde_json::Value,
        embedding: Option<Vec<f32>>,
    ) {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.put(namespace, key, payload, embedding).await {
                warn!(namespace = namespace.as_str(), error = %e, "cache write failed");
            }
        });
    }
}

/// Payload shape of the result tier.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CachedDiagram {
    xml: String,
    #[serde(default)]
    warnings: Vec<String>,
}
