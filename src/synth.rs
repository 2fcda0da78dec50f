//! IR synthesis.
//!
//! The second generation-service call: semantic core + derived constraints +
//! style profile → [`ProcessIR`]. The response is checked referentially
//! before being returned; each failing attempt appends explicit corrective
//! feedback to the next prompt, bounded at
//! [`crate::config::PipelineConfig::max_synthesis_retries`] retries.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::extract::recover_json;
use crate::ir::{DiagramType, ProcessIR, StyleProfile, TemplateConstraints};
use crate::llm::{GenerationClient, GenerationParams};
use crate::semantic::SemanticCore;

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a BPMN modeling assistant. Transform the extracted process semantics into a lane/node/flow structure.

Return a JSON object with exactly this shape:
{
  "process": {"id": "...", "name": "..."},
  "lanes": [{"id": "...", "name": "..."}],
  "nodes": [{"id": "...", "name": "...", "type": "...", "lane": "<lane id>"}],
  "flows": [{"id": "...", "from": "<node id>", "to": "<node id>", "label": "optional"}]
}

Node types (no others are accepted): start_event, end_event, user_task, service_task, script_task, call_activity, exclusive_gateway, parallel_gateway.

Rules:
- One lane per actor unless the layout hint says otherwise.
- Every node's "lane" must be a declared lane id; every flow endpoint must be a declared node id.
- Model each decision as an exclusive_gateway with one labeled outgoing flow per outcome.
- Exactly one start_event; at least one end_event; every path must reach an end_event.
- Ids are short lowercase snake_case tokens, unique within the document."#;

pub struct IrSynthesizer {
    client: Arc<dyn GenerationClient>,
    params: GenerationParams,
    max_retries: usize,
}

impl IrSynthesizer {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        params: GenerationParams,
        max_retries: usize,
    ) -> Self {
        Self {
            client,
            params,
            max_retries,
        }
    }

    /// Synthesize an IR, retrying with accumulated feedback on referential
    /// or parse failures. `reference` optionally carries example output the
    /// caller wants imitated.
    pub async fn synthesize(
        &self,
        core: &SemanticCore,
        constraints: &TemplateConstraints,
        style: &StyleProfile,
        diagram_type: DiagramType,
        reference: Option<&str>,
    ) -> Result<ProcessIR, PipelineError> {
        let base_prompt = build_user_prompt(core, constraints, style, diagram_type, reference);

        // Bounded, explicit retry state: attempt counter plus the feedback
        // accumulated so far, rebuilt into each prompt.
        let mut feedback: Vec<String> = Vec::new();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let prompt = if feedback.is_empty() {
                base_prompt.clone()
            } else {
                format!(
                    "{}\n\nYour previous response had these problems. Fix all of them and return the corrected JSON:\n- {}",
                    base_prompt,
                    feedback.join("\n- ")
                )
            };
            debug!(attempt = attempts, feedback = feedback.len(), "synthesizing IR");

            let failure = match self
                .client
                .complete_json(SYNTHESIS_SYSTEM_PROMPT, &prompt, &self.params)
                .await
            {
                Ok(response) => match check_response(&response) {
                    Ok(ir) => return Ok(ir),
                    Err(problems) => problems,
                },
                // Malformed/truncated transport responses are retryable at
                // this stage too.
                Err(e) => vec![format!("the service call failed: {}", e)],
            };

            if attempts > self.max_retries {
                return Err(PipelineError::IrSynthesis {
                    attempts,
                    message: failure.join("; "),
                });
            }
            warn!(attempt = attempts, problems = ?failure, "IR synthesis check failed, retrying");
            feedback.extend(failure);
        }
    }
}

/// Parse and referentially check one response. Returns the IR or the list
/// of problems to feed back.
fn check_response(response: &str) -> Result<ProcessIR, Vec<String>> {
    let ir: ProcessIR = match serde_json::from_str(response.trim()) {
        Ok(ir) => ir,
        Err(first_err) => {
            let Some(fragment) = recover_json(response) else {
                return Err(vec![format!("the response was not a JSON object: {}", first_err)]);
            };
            match serde_json::from_str(&fragment) {
                Ok(ir) => ir,
                Err(e) => {
                    return Err(vec![format!(
                        "the JSON did not match the required shape: {}",
                        e
                    )])
                }
            }
        }
    };

    let mut problems = Vec::new();
    if ir.process.id.trim().is_empty() {
        problems.push("process.id is empty".to_string());
    }
    if ir.lanes.is_empty() {
        problems.push("no lanes declared".to_string());
    }
    if ir.nodes.is_empty() {
        problems.push("no nodes declared".to_string());
    }
    problems.extend(ir.referential_errors());
    if problems.is_empty() {
        Ok(ir)
    } else {
        Err(problems)
    }
}

fn build_user_prompt(
    core: &SemanticCore,
    constraints: &TemplateConstraints,
    style: &StyleProfile,
    diagram_type: DiagramType,
    reference: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Extracted semantics\n");
    prompt.push_str(&core.deterministic_json());
    prompt.push_str("\n\n## Minimum element counts\n");
    prompt.push_str(&format!(
        "- nodes: {}\n- gateways: {}\n- end events: {}\n",
        constraints.min_nodes, constraints.min_gateways, constraints.min_end_events
    ));
    prompt.push_str("\n## Style\n");
    prompt.push_str(&format!(
        "- label case: {:?}\n- label language: {}\n- verb-first task labels: {}\n",
        style.label_case, style.language, style.verb_first_labels
    ));
    prompt.push_str(&format!("\n## Layout hint\n- diagram type: {}\n", diagram_type.as_str()));
    if diagram_type == DiagramType::Swimlane {
        prompt.push_str("- one lane per actor is required\n");
    }
    if let Some(example) = reference {
        prompt.push_str("\n## Reference example\n");
        prompt.push_str(example);
        prompt.push('\n');
    }
    prompt.push_str("\nGenerate the process structure now.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted client: pops one canned response per call.
    struct ScriptedClient {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn complete_json(
            &self,
            _system: &str,
            _user: &str,
            _params: &GenerationParams,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            responses.remove(0).map_err(|e| anyhow!(e))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    const GOOD_IR: &str = r#"{
        "process": {"id": "p1", "name": "P"},
        "lanes": [{"id": "l1", "name": "Manager"}],
        "nodes": [
            {"id": "start", "name": "Start", "type": "start_event", "lane": "l1"},
            {"id": "review", "name": "Review", "type": "user_task", "lane": "l1"},
            {"id": "end", "name": "End", "type": "end_event", "lane": "l1"}
        ],
        "flows": [
            {"id": "f1", "from": "start", "to": "review"},
            {"id": "f2", "from": "review", "to": "end"}
        ]
    }"#;

    const BROKEN_REF_IR: &str = r#"{
        "process": {"id": "p1", "name": "P"},
        "lanes": [{"id": "l1", "name": "Manager"}],
        "nodes": [{"id": "start", "name": "Start", "type": "start_event", "lane": "l1"}],
        "flows": [{"id": "f1", "from": "start", "to": "ghost"}]
    }"#;

    fn fixture_core() -> SemanticCore {
        serde_json::from_str(
            r#"{"actors":[{"id":"m","name":"M"}],"activities":[{"id":"r","name":"R","actor":"m"}],"decisions":[],"control_flow":[]}"#,
        )
        .unwrap()
    }

    fn synthesizer(client: Arc<ScriptedClient>) -> IrSynthesizer {
        IrSynthesizer::new(client, GenerationParams::default(), 2)
    }

    #[tokio::test]
    async fn first_attempt_success_makes_one_call() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(GOOD_IR.to_string())]));
        let synth = synthesizer(client.clone());
        let core = fixture_core();
        let constraints = TemplateConstraints::from_semantic(&core);
        let ir = synth
            .synthesize(
                &core,
                &constraints,
                &StyleProfile::default(),
                DiagramType::Bpmn,
                None,
            )
            .await
            .unwrap();
        assert_eq!(ir.nodes.len(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn referential_failure_retries_with_feedback_then_succeeds() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(BROKEN_REF_IR.to_string()),
            Ok(GOOD_IR.to_string()),
        ]));
        let synth = synthesizer(client.clone());
        let core = fixture_core();
        let constraints = TemplateConstraints::from_semantic(&core);
        let ir = synth
            .synthesize(
                &core,
                &constraints,
                &StyleProfile::default(),
                DiagramType::Bpmn,
                None,
            )
            .await
            .unwrap();
        assert_eq!(ir.process.id, "p1");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausting_retries_raises_ir_synthesis_error() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok("not json at all".to_string()),
            Ok(BROKEN_REF_IR.to_string()),
            Ok(BROKEN_REF_IR.to_string()),
        ]));
        let synth = synthesizer(client.clone());
        let core = fixture_core();
        let constraints = TemplateConstraints::from_semantic(&core);
        let err = synth
            .synthesize(
                &core,
                &constraints,
                &StyleProfile::default(),
                DiagramType::Bpmn,
                None,
            )
            .await
            .unwrap_err();
        match err {
            PipelineError::IrSynthesis { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("ghost"));
            }
            other => panic!("expected IrSynthesis, got {other:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fenced_response_is_recovered() {
        let fenced = format!("```json\n{}\n```", GOOD_IR);
        let client = Arc::new(ScriptedClient::new(vec![Ok(fenced)]));
        let synth = synthesizer(client);
        let core = fixture_core();
        let constraints = TemplateConstraints::from_semantic(&core);
        let ir = synth
            .synthesize(
                &core,
                &constraints,
                &StyleProfile::default(),
                DiagramType::Bpmn,
                None,
            )
            .await
            .unwrap();
        assert_eq!(ir.flows.len(), 2);
    }
}
