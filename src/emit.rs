//! BPMN 2.0 XML emission.
//!
//! Serializes a validated [`ProcessIR`] into the BPMN dialect understood by
//! standard viewers, including a minimal DI section laid out topologically.
//! Emission is deterministic: identical IR yields byte-identical XML.
//!
//! Lanes are emitted without `flowNodeRef` children — downstream renderers
//! resolve membership from the DI coordinates instead.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write;

use crate::error::PipelineError;
use crate::ir::ProcessIR;

const LANE_HEIGHT: f64 = 150.0;
const RANK_WIDTH: f64 = 180.0;

/// Serialize an IR to pretty-printed BPMN 2.0 XML.
pub fn emit(ir: &ProcessIR) -> Result<String, PipelineError> {
    let mut xml = String::new();
    write_definitions(ir, &mut xml).map_err(|e| PipelineError::Emit(e.to_string()))?;
    Ok(xml)
}

fn write_definitions(ir: &ProcessIR, xml: &mut String) -> std::fmt::Result {
    let process_id = sanitize_ncname(&ir.process.id);
    let bpmn_ids = compute_bpmn_ids(ir);
    let layout = topo_layout(ir);

    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        xml,
        r#"<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL""#
    )?;
    writeln!(
        xml,
        r#"                  xmlns:bpmndi="http://www.omg.org/spec/BPMN/20100524/DI""#
    )?;
    writeln!(
        xml,
        r#"                  xmlns:dc="http://www.omg.org/spec/DD/20100524/DC""#
    )?;
    writeln!(
        xml,
        r#"                  xmlns:di="http://www.omg.org/spec/DD/20100524/DI""#
    )?;
    writeln!(
        xml,
        r#"                  id="Definitions_1" targetNamespace="http://bpmn.io/schema/bpmn">"#
    )?;

    writeln!(
        xml,
        r#"  <bpmn:process id="{}" name="{}" isExecutable="true">"#,
        process_id,
        xml_escape(&ir.process.name)
    )?;

    // ── Lanes ──
    if !ir.lanes.is_empty() {
        writeln!(xml, r#"    <bpmn:laneSet id="LaneSet_1">"#)?;
        for lane in &ir.lanes {
            writeln!(
                xml,
                r#"      <bpmn:lane id="{}" name="{}" />"#,
                sanitize_ncname(&lane.id),
                xml_escape(&lane.name)
            )?;
        }
        writeln!(xml, r#"    </bpmn:laneSet>"#)?;
    }

    // ── Flow nodes ──
    for node in &ir.nodes {
        writeln!(
            xml,
            r#"    <bpmn:{element} id="{id}" name="{name}" />"#,
            element = node.node_type.bpmn_element(),
            id = bpmn_ids[node.id.as_str()],
            name = xml_escape(&node.name)
        )?;
    }

    // ── Sequence flows ──
    for flow in &ir.flows {
        let flow_id = seq_flow_id(&bpmn_ids, &flow.from, &flow.to);
        let name_attr = flow
            .label
            .as_deref()
            .map(|l| format!(r#" name="{}""#, xml_escape(l)))
            .unwrap_or_default();
        writeln!(
            xml,
            r#"    <bpmn:sequenceFlow id="{}"{} sourceRef="{}" targetRef="{}" />"#,
            flow_id, name_attr, bpmn_ids[flow.from.as_str()], bpmn_ids[flow.to.as_str()]
        )?;
    }

    writeln!(xml, r#"  </bpmn:process>"#)?;

    // ── DI ──
    writeln!(xml, r#"  <bpmndi:BPMNDiagram id="BPMNDiagram_1">"#)?;
    writeln!(
        xml,
        r#"    <bpmndi:BPMNPlane id="BPMNPlane_1" bpmnElement="{}">"#,
        process_id
    )?;

    for node in &ir.nodes {
        let bid = &bpmn_ids[node.id.as_str()];
        let (x, y) = layout.get(node.id.as_str()).copied().unwrap_or((0.0, 0.0));
        let (w, h) = shape_size(node.node_type.is_event(), node.node_type.is_gateway());
        writeln!(
            xml,
            r#"      <bpmndi:BPMNShape id="{bid}_di" bpmnElement="{bid}">
        <dc:Bounds x="{x:.0}" y="{y:.0}" width="{w:.0}" height="{h:.0}" />
      </bpmndi:BPMNShape>"#
        )?;
    }

    for flow in &ir.flows {
        let flow_id = seq_flow_id(&bpmn_ids, &flow.from, &flow.to);
        let (x1, y1) = layout.get(flow.from.as_str()).copied().unwrap_or((0.0, 0.0));
        let (x2, y2) = layout
            .get(flow.to.as_str())
            .copied()
            .unwrap_or((RANK_WIDTH, 0.0));
        writeln!(
            xml,
            r#"      <bpmndi:BPMNEdge id="{flow_id}_di" bpmnElement="{flow_id}">
        <di:waypoint x="{:.0}" y="{:.0}" />
        <di:waypoint x="{:.0}" y="{:.0}" />
      </bpmndi:BPMNEdge>"#,
            x1 + 50.0,
            y1 + 20.0,
            x2,
            y2 + 20.0
        )?;
    }

    writeln!(xml, r#"    </bpmndi:BPMNPlane>"#)?;
    writeln!(xml, r#"  </bpmndi:BPMNDiagram>"#)?;
    writeln!(xml, r#"</bpmn:definitions>"#)?;
    Ok(())
}

// ── Internal helpers ──

/// Map IR node ids to emitted BPMN ids. Sanitization can collide
/// (`review order` and `review_order` both sanitize to `review_order`), so
/// colliding ids get a deterministic short-hash suffix.
fn compute_bpmn_ids(ir: &ProcessIR) -> HashMap<&str, String> {
    let mut ids: HashMap<&str, String> = HashMap::new();
    let mut taken: std::collections::HashSet<String> = std::collections::HashSet::new();
    for node in &ir.nodes {
        let mut bid = sanitize_ncname(&node.id);
        if taken.contains(&bid) {
            bid = format!("{}_{}", bid, short_hash(&node.id));
        }
        taken.insert(bid.clone());
        ids.insert(node.id.as_str(), bid);
    }
    ids
}

fn seq_flow_id(bpmn_ids: &HashMap<&str, String>, from: &str, to: &str) -> String {
    format!("flow_{}_to_{}", bpmn_ids[from], bpmn_ids[to])
}

/// Sanitize a string to a valid XML NCName: start with letter or
/// underscore, then alphanumeric, underscore, hyphen, or period.
pub(crate) fn sanitize_ncname(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for (i, ch) in s.chars().enumerate() {
        if i == 0 {
            if ch.is_ascii_alphabetic() || ch == '_' {
                result.push(ch);
            } else {
                result.push('_');
                if ch.is_ascii_alphanumeric() {
                    result.push(ch);
                }
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
            result.push(ch);
        } else {
            result.push('_');
        }
    }
    if result.is_empty() {
        result.push_str("_id");
    }
    result
}

/// First 4 bytes (8 hex chars) of SHA-256 — deterministic.
fn short_hash(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn shape_size(is_event: bool, is_gateway: bool) -> (f64, f64) {
    if is_event {
        (36.0, 36.0)
    } else if is_gateway {
        (50.0, 50.0)
    } else {
        (100.0, 80.0)
    }
}

/// Left-to-right layout: X from topological rank (Kahn's algorithm with a
/// sorted queue for determinism), Y from the node's lane index.
fn topo_layout(ir: &ProcessIR) -> HashMap<&str, (f64, f64)> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in &ir.nodes {
        in_degree.entry(node.id.as_str()).or_insert(0);
    }
    for flow in &ir.flows {
        successors
            .entry(flow.from.as_str())
            .or_default()
            .push(flow.to.as_str());
        *in_degree.entry(flow.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    queue.sort();

    let mut rank: HashMap<&str, usize> = HashMap::new();
    while let Some(node) = queue.first().copied() {
        queue.remove(0);
        let r = rank.get(node).copied().unwrap_or(0);
        if let Some(succs) = successors.get(node) {
            for &s in succs {
                let entry = rank.entry(s).or_insert(0);
                if r + 1 > *entry {
                    *entry = r + 1;
                }
                if let Some(deg) = in_degree.get_mut(s) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push(s);
                        queue.sort();
                    }
                }
            }
        }
        rank.entry(node).or_insert(r);
    }

    let lane_index: HashMap<&str, usize> = ir
        .lanes
        .iter()
        .enumerate()
        .map(|(i, l)| (l.id.as_str(), i))
        .collect();

    let mut positions = HashMap::new();
    for node in &ir.nodes {
        let r = rank.get(node.id.as_str()).copied().unwrap_or(0);
        let lane = lane_index.get(node.lane.as_str()).copied().unwrap_or(0);
        let x = 60.0 + (r as f64) * RANK_WIDTH;
        let y = 40.0 + (lane as f64) * LANE_HEIGHT;
        positions.insert(node.id.as_str(), (x, y));
    }
    positions
}
