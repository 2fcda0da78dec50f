//! Process IR: the notation-specific structural model (lanes, nodes, flows)
//! produced by the synthesizer and consumed by the validator and emitter.
//!
//! Node and flow shapes are closed tagged types so an unknown `type` coming
//! back from the generation service is a deserialization error, never a
//! silently accepted string.

use serde::{Deserialize, Serialize};

use crate::semantic::SemanticCore;

/// Closed set of node types the emitter knows how to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    StartEvent,
    EndEvent,
    UserTask,
    ServiceTask,
    ScriptTask,
    CallActivity,
    ExclusiveGateway,
    ParallelGateway,
}

impl NodeType {
    pub fn is_event(self) -> bool {
        matches!(self, NodeType::StartEvent | NodeType::EndEvent)
    }

    pub fn is_task(self) -> bool {
        matches!(
            self,
            NodeType::UserTask | NodeType::ServiceTask | NodeType::ScriptTask
        )
    }

    pub fn is_gateway(self) -> bool {
        matches!(self, NodeType::ExclusiveGateway | NodeType::ParallelGateway)
    }

    /// BPMN element local name, e.g. `userTask`.
    pub fn bpmn_element(self) -> &'static str {
        match self {
            NodeType::StartEvent => "startEvent",
            NodeType::EndEvent => "endEvent",
            NodeType::UserTask => "userTask",
            NodeType::ServiceTask => "serviceTask",
            NodeType::ScriptTask => "scriptTask",
            NodeType::CallActivity => "callActivity",
            NodeType::ExclusiveGateway => "exclusiveGateway",
            NodeType::ParallelGateway => "parallelGateway",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// References a [`Lane::id`].
    pub lane: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessIR {
    pub process: ProcessInfo,
    pub lanes: Vec<Lane>,
    pub nodes: Vec<Node>,
    pub flows: Vec<Flow>,
}

impl ProcessIR {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Referential problems a synthesized IR must not have: dangling flow
    /// endpoints and nodes pointing at unknown lanes. These are the checks
    /// the synthesizer feeds back to the generation service on retry.
    pub fn referential_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let node_ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();
        let lane_ids: std::collections::HashSet<&str> =
            self.lanes.iter().map(|l| l.id.as_str()).collect();

        for node in &self.nodes {
            if !lane_ids.contains(node.lane.as_str()) {
                errors.push(format!(
                    "node '{}' references unknown lane '{}'",
                    node.id, node.lane
                ));
            }
        }
        for flow in &self.flows {
            if !node_ids.contains(flow.from.as_str()) {
                errors.push(format!(
                    "flow '{}' has unknown source node '{}'",
                    flow.id, flow.from
                ));
            }
            if !node_ids.contains(flow.to.as_str()) {
                errors.push(format!(
                    "flow '{}' has unknown target node '{}'",
                    flow.id, flow.to
                ));
            }
        }
        errors
    }

    /// Deterministic JSON for cache keying and equality in tests.
    pub fn deterministic_json(&self) -> String {
        let mut ir = self.clone();
        ir.lanes.sort_by(|a, b| a.id.cmp(&b.id));
        ir.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        ir.flows.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string(&ir).unwrap_or_default()
    }
}

/// Target dialect requested by the caller. Both emit BPMN 2.0; swimlane
/// forces one lane per actor while plain BPMN lets the synthesizer collapse
/// single-actor processes into one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramType {
    Bpmn,
    Swimlane,
}

impl DiagramType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagramType::Bpmn => "bpmn",
            DiagramType::Swimlane => "swimlane",
        }
    }
}

/// Minimum element counts the synthesized IR is asked to satisfy, derived
/// from the extracted semantics. Prompt-side guidance; the hard checks on
/// the response are referential, not numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConstraints {
    pub min_nodes: usize,
    pub min_gateways: usize,
    pub min_end_events: usize,
}

impl TemplateConstraints {
    pub fn from_semantic(core: &SemanticCore) -> Self {
        let decisions = core.decisions.len();
        Self {
            // start + end + one node per activity/decision
            min_nodes: 2 + core.activities.len() + decisions,
            min_gateways: decisions,
            // every decision can terminate on its negative branch
            min_end_events: 1.max(decisions),
        }
    }
}

/// Naming and formatting conventions forwarded to the synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleProfile {
    pub label_case: LabelCase,
    /// BCP-47 language tag for generated labels.
    pub language: String,
    /// Prefer verb-first task labels ("Review order", not "Order review").
    pub verb_first_labels: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCase {
    Sentence,
    Title,
}

impl Default for StyleProfile {
    fn default() -> Self {
        Self {
            label_case: LabelCase::Sentence,
            language: "en".to_string(),
            verb_first_labels: true,
        }
    }
}
