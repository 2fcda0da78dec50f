//! Deterministic repair of warning-level structural defects.
//!
//! The fixer never touches error-severity findings and always returns a new
//! [`ProcessIR`]; the input is left untouched. The repair set is bounded and
//! non-generative: synthetic start/end events, dangling-node hookup, and
//! orphan removal.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::ir::{Flow, Node, NodeType, ProcessIR};
use crate::validate::{degree_maps, rules, Issue};

/// One applied repair, recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFix {
    pub action: String,
    pub details: String,
}

impl AppliedFix {
    fn new(action: &str, details: String) -> Self {
        Self {
            action: action.to_string(),
            details,
        }
    }
}

/// Apply the bounded repair set for the given findings. Returns the repaired
/// copy and the list of applied fixes (empty when nothing was repairable).
pub fn auto_fix(ir: &ProcessIR, issues: &[Issue]) -> (ProcessIR, Vec<AppliedFix>) {
    let mut fixed = ir.clone();
    let mut fixes = Vec::new();

    let has_issue = |rule: &str| issues.iter().any(|i| i.rule == rule);

    // Orphan removal first so synthetic events never attach to a node that
    // is about to be deleted.
    let orphan_ids: HashSet<&str> = issues
        .iter()
        .filter(|i| i.rule == rules::ORPHAN_NODE)
        .filter_map(|i| i.node_id.as_deref())
        .collect();
    if !orphan_ids.is_empty() {
        let removed: Vec<String> = fixed
            .nodes
            .iter()
            .filter(|n| orphan_ids.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        fixed.nodes.retain(|n| !orphan_ids.contains(n.id.as_str()));
        fixed.flows.retain(|f| {
            !orphan_ids.contains(f.from.as_str()) && !orphan_ids.contains(f.to.as_str())
        });
        for id in removed {
            fixes.push(AppliedFix::new(
                "remove_orphan_node",
                format!("removed orphan node '{}' and its flows", id),
            ));
        }
    }

    if has_issue(rules::START_EVENT_REQUIRED) {
        insert_start_event(&mut fixed, &mut fixes);
    }

    let needs_end = has_issue(rules::END_EVENT_REQUIRED);
    let broken_paths = has_issue(rules::NO_PATH_TO_END);
    if needs_end || broken_paths {
        ensure_terminal_paths(&mut fixed, needs_end, &mut fixes);
    }

    (fixed, fixes)
}

/// Insert a synthetic start event into the first lane and connect it to a
/// task in that lane (falling back to any task, then any non-event node).
fn insert_start_event(ir: &mut ProcessIR, fixes: &mut Vec<AppliedFix>) {
    let Some(first_lane) = ir.lanes.first().map(|l| l.id.clone()) else {
        return;
    };
    let start_id = unique_node_id(ir, "start");

    let target = ir
        .nodes
        .iter()
        .find(|n| n.lane == first_lane && (n.node_type.is_task() || n.node_type == NodeType::CallActivity))
        .or_else(|| {
            ir.nodes
                .iter()
                .find(|n| n.node_type.is_task() || n.node_type == NodeType::CallActivity)
        })
        .or_else(|| ir.nodes.iter().find(|n| !n.node_type.is_event()))
        .map(|n| n.id.clone());

    ir.nodes.insert(
        0,
        Node {
            id: start_id.clone(),
            name: "Start".to_string(),
            node_type: NodeType::StartEvent,
            lane: first_lane.clone(),
        },
    );
    let details = match &target {
        Some(target_id) => {
            let flow_id = unique_flow_id(ir, &start_id, target_id);
            ir.flows.push(Flow {
                id: flow_id,
                from: start_id.clone(),
                to: target_id.clone(),
                label: None,
            });
            format!(
                "inserted start event '{}' in lane '{}', connected to '{}'",
                start_id, first_lane, target_id
            )
        }
        None => format!(
            "inserted start event '{}' in lane '{}' (no task to connect)",
            start_id, first_lane
        ),
    };
    fixes.push(AppliedFix::new("insert_start_event", details));
}

/// Ensure terminal paths exist: synthesize an end event in the last lane
/// when none exists, then route every dangling non-end node to an end event.
fn ensure_terminal_paths(ir: &mut ProcessIR, synthesize_end: bool, fixes: &mut Vec<AppliedFix>) {
    let end_id = if synthesize_end {
        let Some(last_lane) = ir.lanes.last().map(|l| l.id.clone()) else {
            return;
        };
        let end_id = unique_node_id(ir, "end");
        ir.nodes.push(Node {
            id: end_id.clone(),
            name: "End".to_string(),
            node_type: NodeType::EndEvent,
            lane: last_lane.clone(),
        });
        fixes.push(AppliedFix::new(
            "insert_end_event",
            format!("inserted end event '{}' in lane '{}'", end_id, last_lane),
        ));
        end_id
    } else {
        match ir.nodes.iter().find(|n| n.node_type == NodeType::EndEvent) {
            Some(end) => end.id.clone(),
            None => return,
        }
    };

    let dangling: Vec<String> = {
        let (_, outgoing) = degree_maps(ir);
        ir.nodes
            .iter()
            .filter(|n| n.node_type != NodeType::EndEvent)
            .filter(|n| outgoing.get(n.id.as_str()).is_none_or(|v| v.is_empty()))
            .map(|n| n.id.clone())
            .collect()
    };
    for node_id in dangling {
        let flow_id = unique_flow_id(ir, &node_id, &end_id);
        ir.flows.push(Flow {
            id: flow_id,
            from: node_id.clone(),
            to: end_id.clone(),
            label: None,
        });
        fixes.push(AppliedFix::new(
            "connect_dangling_node",
            format!("connected dangling node '{}' to end event '{}'", node_id, end_id),
        ));
    }
}

fn unique_node_id(ir: &ProcessIR, base: &str) -> String {
    let existing: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    if !existing.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !existing.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

fn unique_flow_id(ir: &ProcessIR, from: &str, to: &str) -> String {
    let existing: HashSet<&str> = ir.flows.iter().map(|f| f.id.as_str()).collect();
    let base = format!("flow_{}_to_{}", from, to);
    if !existing.contains(base.as_str()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !existing.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}
