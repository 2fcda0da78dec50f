//! Semantic extraction.
//!
//! One call to the generation service turns normalized input into a
//! [`SemanticCore`]. No retry loop here — a malformed response is a
//! [`PipelineError::SemanticExtraction`] surfaced to the orchestrator.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::error::PipelineError;
use crate::input::NormalizedInput;
use crate::llm::{GenerationClient, GenerationParams};
use crate::semantic::SemanticCore;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a business-process analyst. Extract the process structure from the description you are given.

Return a JSON object with exactly this shape:
{
  "actors": [{"id": "...", "name": "..."}],
  "activities": [{"id": "...", "name": "...", "actor": "<actor id>"}],
  "decisions": [{"id": "...", "question": "...", "actor": "<actor id>", "outcomes": ["...", "..."]}],
  "control_flow": [{"from": "<activity or decision id>", "to": "<activity or decision id>", "label": "optional outcome label"}]
}

Rules:
- Every actor id must be unique; activities and decisions reference actors by id.
- Ids are short lowercase snake_case tokens.
- Every decision needs at least two outcomes.
- control_flow edges connect activity/decision ids in execution order.
- Do not invent steps the description does not mention."#;

pub struct SemanticExtractor {
    client: Arc<dyn GenerationClient>,
    params: GenerationParams,
}

impl SemanticExtractor {
    pub fn new(client: Arc<dyn GenerationClient>, params: GenerationParams) -> Self {
        Self { client, params }
    }

    pub async fn extract(&self, input: &NormalizedInput) -> Result<SemanticCore, PipelineError> {
        let user_prompt = format!(
            "Source kind: {:?}. Locale: {}.\n\nProcess description:\n{}",
            input.source_kind, input.locale, input.content
        );
        debug!(prompt_chars = user_prompt.len(), "extracting semantics");

        let response = self
            .client
            .complete_json(EXTRACTION_SYSTEM_PROMPT, &user_prompt, &self.params)
            .await
            .map_err(|e| PipelineError::SemanticExtraction(e.to_string()))?;

        let core = parse_semantic_core(&response)?;
        if let Some(problem) = core.shape_error() {
            return Err(PipelineError::SemanticExtraction(format!(
                "response failed schema check: {}",
                problem
            )));
        }
        Ok(core)
    }
}

fn parse_semantic_core(response: &str) -> Result<SemanticCore, PipelineError> {
    match serde_json::from_str::<SemanticCore>(response.trim()) {
        Ok(core) => Ok(core),
        Err(first_err) => {
            // One recovery pass: pull a JSON fragment out of surrounding prose
            // or markdown fences before giving up.
            let Some(fragment) = recover_json(response) else {
                return Err(PipelineError::SemanticExtraction(format!(
                    "response is not JSON: {}",
                    first_err
                )));
            };
            serde_json::from_str::<SemanticCore>(&fragment).map_err(|e| {
                PipelineError::SemanticExtraction(format!("recovered fragment is not valid: {}", e))
            })
        }
    }
}

/// Pull the most plausible JSON object out of a model response: prefer a
/// fenced ```json block, then fall back to the first balanced `{ ... }`.
pub(crate) fn recover_json(text: &str) -> Option<String> {
    if let Some(captures) = fence_regex().captures(text) {
        return Some(captures[1].trim().to_string());
    }
    balanced_object(text)
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
    })
}

/// First balanced top-level `{ ... }`, string-literal aware.
fn balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
