//! Structural validation of a [`ProcessIR`].
//!
//! Pure and deterministic: a fixed battery of graph checks, no network
//! access. Error-severity issues mean the IR is not safely repairable and
//! the whole battery's findings go back to the caller; warning-only
//! outcomes are handed to the auto-fixer.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::autofix::{auto_fix, AppliedFix};
use crate::ir::{NodeType, ProcessIR};

/// Rule codes, stable across releases; callers match on these.
pub mod rules {
    pub const START_EVENT_REQUIRED: &str = "BPMN_START_EVENT_REQUIRED";
    pub const END_EVENT_REQUIRED: &str = "BPMN_END_EVENT_REQUIRED";
    pub const FLOW_ENDPOINT_MISSING: &str = "BPMN_FLOW_ENDPOINT_MISSING";
    pub const UNKNOWN_LANE: &str = "BPMN_UNKNOWN_LANE";
    pub const ORPHAN_NODE: &str = "BPMN_ORPHAN_NODE";
    pub const NO_PATH_TO_END: &str = "BPMN_NO_PATH_TO_END";
    pub const PARALLEL_GATEWAY_SHAPE: &str = "BPMN_PARALLEL_GATEWAY_SHAPE";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
}

impl Issue {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Error,
            message,
            node_id: None,
            flow_id: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Warning,
            message,
            node_id: None,
            flow_id: None,
        }
    }

    fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn with_flow(mut self, flow_id: &str) -> Self {
        self.flow_id = Some(flow_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    AutoFixed,
    RequiresManualFix,
}

/// Outcome of `validate_and_fix`. `fixed_ir` is present when status is
/// `AutoFixed` — a fresh, fully self-consistent IR, never a partial edit of
/// the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ir: Option<ProcessIR>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<AppliedFix>,
}

/// Run the full rule battery. Order is fixed so issue lists are
/// deterministic for identical inputs.
pub fn validate(ir: &ProcessIR) -> Vec<Issue> {
    let mut issues = Vec::new();

    let node_ids: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    let lane_ids: HashSet<&str> = ir.lanes.iter().map(|l| l.id.as_str()).collect();

    // Missing start/end events are warnings: the auto-fixer can synthesize
    // both. Referential breakage below is error severity and blocks repair.
    if !ir.nodes.iter().any(|n| n.node_type == NodeType::StartEvent) {
        issues.push(Issue::warning(
            rules::START_EVENT_REQUIRED,
            "process has no start event".to_string(),
        ));
    }
    if !ir.nodes.iter().any(|n| n.node_type == NodeType::EndEvent) {
        issues.push(Issue::warning(
            rules::END_EVENT_REQUIRED,
            "process has no end event".to_string(),
        ));
    }

    for flow in &ir.flows {
        if !node_ids.contains(flow.from.as_str()) {
            issues.push(
                Issue::error(
                    rules::FLOW_ENDPOINT_MISSING,
                    format!("flow '{}' references unknown source '{}'", flow.id, flow.from),
                )
                .with_flow(&flow.id),
            );
        }
        if !node_ids.contains(flow.to.as_str()) {
            issues.push(
                Issue::error(
                    rules::FLOW_ENDPOINT_MISSING,
                    format!("flow '{}' references unknown target '{}'", flow.id, flow.to),
                )
                .with_flow(&flow.id),
            );
        }
    }

    for node in &ir.nodes {
        if !lane_ids.contains(node.lane.as_str()) {
            issues.push(
                Issue::error(
                    rules::UNKNOWN_LANE,
                    format!("node '{}' references unknown lane '{}'", node.id, node.lane),
                )
                .with_node(&node.id),
            );
        }
    }

    let (incoming, outgoing) = degree_maps(ir);

    for node in &ir.nodes {
        if node.node_type.is_event() {
            continue;
        }
        let has_in = incoming.get(node.id.as_str()).is_some_and(|v| !v.is_empty());
        let has_out = outgoing.get(node.id.as_str()).is_some_and(|v| !v.is_empty());
        if !has_in && !has_out {
            issues.push(
                Issue::error(
                    rules::ORPHAN_NODE,
                    format!("node '{}' has no incoming or outgoing flow", node.id),
                )
                .with_node(&node.id),
            );
        }
    }

    // Reachability: every node with outgoing flow must reach an end event.
    // The DFS keeps a per-path visited set so diamond reconvergence is not
    // mistaken for a cycle; nodes proven to reach an end are memoized to
    // keep pathological graphs from going exponential.
    let mut reaches_end: HashMap<&str, bool> = HashMap::new();
    for node in &ir.nodes {
        let has_out = outgoing.get(node.id.as_str()).is_some_and(|v| !v.is_empty());
        if !has_out {
            continue;
        }
        let mut on_path = HashSet::new();
        if !dfs_reaches_end(ir, &outgoing, node.id.as_str(), &mut on_path, &mut reaches_end) {
            issues.push(
                Issue::warning(
                    rules::NO_PATH_TO_END,
                    format!("no path from node '{}' reaches an end event", node.id),
                )
                .with_node(&node.id),
            );
        }
    }

    // A parallel gateway with one-in/one-out is neither a split nor a join.
    for node in &ir.nodes {
        if node.node_type != NodeType::ParallelGateway {
            continue;
        }
        let in_count = incoming.get(node.id.as_str()).map_or(0, |v| v.len());
        let out_count = outgoing.get(node.id.as_str()).map_or(0, |v| v.len());
        if in_count == 1 && out_count == 1 {
            issues.push(
                Issue::warning(
                    rules::PARALLEL_GATEWAY_SHAPE,
                    format!(
                        "parallel gateway '{}' has one incoming and one outgoing flow",
                        node.id
                    ),
                )
                .with_node(&node.id),
            );
        }
    }

    issues
}

/// Validate, then auto-fix if (and only if) every issue is a warning.
pub fn validate_and_fix(ir: &ProcessIR) -> ValidationReport {
    let issues = validate(ir);

    if issues.iter().any(|i| i.severity == Severity::Error) {
        return ValidationReport {
            status: ValidationStatus::RequiresManualFix,
            issues,
            fixed_ir: None,
            fixes: Vec::new(),
        };
    }
    if issues.is_empty() {
        return ValidationReport {
            status: ValidationStatus::Valid,
            issues,
            fixed_ir: None,
            fixes: Vec::new(),
        };
    }

    let (fixed, fixes) = auto_fix(ir, &issues);
    if fixes.is_empty() {
        // Warnings the fixer has no repair for (gateway shape) pass through.
        return ValidationReport {
            status: ValidationStatus::Valid,
            issues,
            fixed_ir: None,
            fixes,
        };
    }
    ValidationReport {
        status: ValidationStatus::AutoFixed,
        issues,
        fixed_ir: Some(fixed),
        fixes,
    }
}

/// Incoming/outgoing flow indexes keyed by node id. Flows with dangling
/// endpoints still count on the side that exists.
pub(crate) fn degree_maps(
    ir: &ProcessIR,
) -> (HashMap<&str, Vec<&str>>, HashMap<&str, Vec<&str>>) {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for flow in &ir.flows {
        outgoing
            .entry(flow.from.as_str())
            .or_default()
            .push(flow.to.as_str());
        incoming
            .entry(flow.to.as_str())
            .or_default()
            .push(flow.from.as_str());
    }
    (incoming, outgoing)
}

fn dfs_reaches_end<'a>(
    ir: &'a ProcessIR,
    outgoing: &HashMap<&'a str, Vec<&'a str>>,
    node_id: &'a str,
    on_path: &mut HashSet<&'a str>,
    memo: &mut HashMap<&'a str, bool>,
) -> bool {
    if let Some(&known) = memo.get(node_id) {
        return known;
    }
    let Some(node) = ir.node(node_id) else {
        // Dangling endpoint; reported separately as an error.
        return false;
    };
    if node.node_type == NodeType::EndEvent {
        memo.insert(node_id, true);
        return true;
    }
    if !on_path.insert(node_id) {
        // Cycle along this path.
        return false;
    }
    let mut found = false;
    if let Some(successors) = outgoing.get(node_id) {
        for next in successors {
            if dfs_reaches_end(ir, outgoing, next, on_path, memo) {
                found = true;
                break;
            }
        }
    }
    on_path.remove(node_id);
    if found {
        // Only positive results are safe to memoize: a negative may be an
        // artifact of the current path's cycle guard.
        memo.insert(node_id, true);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Flow, Lane, Node, ProcessInfo};

    fn lane(id: &str) -> Lane {
        Lane {
            id: id.to_string(),
            name: id.to_string(),
        }
    }

    fn node(id: &str, node_type: NodeType, lane: &str) -> Node {
        Node {
            id: id.to_string(),
            name: id.to_string(),
            node_type,
            lane: lane.to_string(),
        }
    }

    fn flow(id: &str, from: &str, to: &str) -> Flow {
        Flow {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            label: None,
        }
    }

    fn ir(nodes: Vec<Node>, flows: Vec<Flow>) -> ProcessIR {
        ProcessIR {
            process: ProcessInfo {
                id: "p".to_string(),
                name: "P".to_string(),
            },
            lanes: vec![lane("l1"), lane("l2")],
            nodes,
            flows,
        }
    }

    fn valid_ir() -> ProcessIR {
        ir(
            vec![
                node("start", NodeType::StartEvent, "l1"),
                node("review", NodeType::UserTask, "l1"),
                node("end", NodeType::EndEvent, "l2"),
            ],
            vec![flow("f1", "start", "review"), flow("f2", "review", "end")],
        )
    }

    #[test]
    fn valid_ir_has_no_issues() {
        let issues = validate(&valid_ir());
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        let report = validate_and_fix(&valid_ir());
        assert_eq!(report.status, ValidationStatus::Valid);
        assert!(report.fixed_ir.is_none());
    }

    #[test]
    fn missing_start_is_a_warning() {
        let ir = ir(
            vec![
                node("review", NodeType::UserTask, "l1"),
                node("end", NodeType::EndEvent, "l1"),
            ],
            vec![flow("f1", "review", "end")],
        );
        let issues = validate(&ir);
        let start_issue = issues
            .iter()
            .find(|i| i.rule == rules::START_EVENT_REQUIRED)
            .unwrap();
        assert_eq!(start_issue.severity, Severity::Warning);
    }

    #[test]
    fn dangling_flow_endpoint_is_an_error() {
        let mut bad = valid_ir();
        bad.flows.push(flow("f3", "review", "ghost"));
        let issues = validate(&bad);
        let issue = issues
            .iter()
            .find(|i| i.rule == rules::FLOW_ENDPOINT_MISSING)
            .unwrap();
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.flow_id.as_deref(), Some("f3"));
        assert_eq!(
            validate_and_fix(&bad).status,
            ValidationStatus::RequiresManualFix
        );
    }

    #[test]
    fn unknown_lane_is_an_error() {
        let mut bad = valid_ir();
        bad.nodes[1].lane = "ghost".to_string();
        let issues = validate(&bad);
        assert!(issues.iter().any(|i| i.rule == rules::UNKNOWN_LANE));
    }

    #[test]
    fn orphan_task_is_an_error_and_blocks_auto_fix() {
        let mut bad = valid_ir();
        bad.nodes.push(node("loner", NodeType::ServiceTask, "l1"));
        let issues = validate(&bad);
        let orphans: Vec<_> = issues
            .iter()
            .filter(|i| i.rule == rules::ORPHAN_NODE)
            .collect();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].node_id.as_deref(), Some("loner"));

        let report = validate_and_fix(&bad);
        assert_eq!(report.status, ValidationStatus::RequiresManualFix);
        assert!(report.fixed_ir.is_none());
        assert!(report.fixes.is_empty());
    }

    #[test]
    fn diamond_reconvergence_is_not_a_cycle() {
        let diamond = ir(
            vec![
                node("start", NodeType::StartEvent, "l1"),
                node("split", NodeType::ParallelGateway, "l1"),
                node("a", NodeType::UserTask, "l1"),
                node("b", NodeType::UserTask, "l1"),
                node("join", NodeType::ParallelGateway, "l1"),
                node("end", NodeType::EndEvent, "l1"),
            ],
            vec![
                flow("f1", "start", "split"),
                flow("f2", "split", "a"),
                flow("f3", "split", "b"),
                flow("f4", "a", "join"),
                flow("f5", "b", "join"),
                flow("f6", "join", "end"),
            ],
        );
        let issues = validate(&diamond);
        assert!(
            !issues.iter().any(|i| i.rule == rules::NO_PATH_TO_END),
            "diamond should reach end: {issues:?}"
        );
    }

    #[test]
    fn true_cycle_gets_a_reachability_warning() {
        let cyclic = ir(
            vec![
                node("start", NodeType::StartEvent, "l1"),
                node("a", NodeType::UserTask, "l1"),
                node("b", NodeType::UserTask, "l1"),
                node("end", NodeType::EndEvent, "l1"),
            ],
            vec![
                flow("f1", "start", "a"),
                flow("f2", "a", "b"),
                flow("f3", "b", "a"),
            ],
        );
        let issues = validate(&cyclic);
        let warnings: Vec<_> = issues
            .iter()
            .filter(|i| i.rule == rules::NO_PATH_TO_END)
            .collect();
        assert!(!warnings.is_empty());
        assert!(warnings.iter().all(|i| i.severity == Severity::Warning));
    }

    #[test]
    fn pass_through_parallel_gateway_is_a_warning() {
        let pg = ir(
            vec![
                node("start", NodeType::StartEvent, "l1"),
                node("gw", NodeType::ParallelGateway, "l1"),
                node("end", NodeType::EndEvent, "l1"),
            ],
            vec![flow("f1", "start", "gw"), flow("f2", "gw", "end")],
        );
        let issues = validate(&pg);
        let issue = issues
            .iter()
            .find(|i| i.rule == rules::PARALLEL_GATEWAY_SHAPE)
            .unwrap();
        assert_eq!(issue.severity, Severity::Warning);
        // Not auto-fixable, but not an error either: status stays valid.
        assert_eq!(validate_and_fix(&pg).status, ValidationStatus::Valid);
    }

    #[test]
    fn issue_order_is_deterministic() {
        let mut bad = valid_ir();
        bad.nodes[1].lane = "ghost".to_string();
        bad.flows.push(flow("f9", "nowhere", "end"));
        let a = validate(&bad);
        let b = validate(&bad);
        let codes_a: Vec<_> = a.iter().map(|i| i.rule.clone()).collect();
        let codes_b: Vec<_> = b.iter().map(|i| i.rule.clone()).collect();
        assert_eq!(codes_a, codes_b);
    }
}
