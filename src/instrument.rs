//! Monitoring instrumentation for emitted BPMN XML.
//!
//! A pure transform over the serialized document: one scan pass collects
//! ids and existing instrumentation, one write pass produces a new document
//! with execution listeners and monitoring attributes on every
//! activity-bearing element. Running the pass on its own output is a no-op.
//!
//! Instrumentation is best-effort: if the XML does not parse, the original
//! document is returned untouched with a warning attached.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use rand::Rng;
use tracing::warn;

const CAMUNDA_NS: (&str, &str) = ("xmlns:camunda", "http://camunda.org/schema/1.0/bpmn");
const FORGE_NS: (&str, &str) = ("xmlns:forge", "http://bpmn-forge.dev/schema/monitoring");
const LISTENER_CLASS: &str = "org.forge.monitoring.ProcessActivityListener";

const ACTIVITY_ELEMENTS: &[&[u8]] = &[
    b"task",
    b"userTask",
    b"serviceTask",
    b"scriptTask",
    b"sendTask",
    b"receiveTask",
    b"manualTask",
    b"businessRuleTask",
    b"callActivity",
    b"subProcess",
];

/// Result of the instrumentation pass. `warnings` covers synthesized ids,
/// missing start/end events, and any fallback to the uninstrumented input.
#[derive(Debug, Clone)]
pub struct Instrumented {
    pub xml: String,
    pub warnings: Vec<String>,
}

/// Instrument a BPMN document. Never fails: malformed input is passed
/// through unchanged with a warning.
pub fn instrument(xml: &str) -> Instrumented {
    let mut warnings = Vec::new();
    match transform(xml, &mut warnings) {
        Ok(out) => Instrumented { xml: out, warnings },
        Err(e) => {
            warn!(error = %e, "instrumentation pass failed, returning uninstrumented XML");
            Instrumented {
                xml: xml.to_string(),
                warnings: vec![format!("instrumentation skipped: {}", e)],
            }
        }
    }
}

// ── Scan pass ──

#[derive(Default)]
struct ActivityScan {
    has_extension_elements: bool,
    listener_events: HashSet<String>,
}

struct ScanReport {
    ids: HashSet<String>,
    has_start_event: bool,
    has_end_event: bool,
    // Activity-bearing elements in document order.
    activities: Vec<ActivityScan>,
}

fn is_activity(local: &[u8]) -> bool {
    ACTIVITY_ELEMENTS.contains(&local)
}

fn scan(xml: &str) -> anyhow::Result<ScanReport> {
    let mut reader = Reader::from_str(xml);
    let mut report = ScanReport {
        ids: HashSet::new(),
        has_start_event: false,
        has_end_event: false,
        activities: Vec::new(),
    };
    // One entry per open element; Some(index) marks an activity frame.
    let mut stack: Vec<Option<usize>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                scan_element(&e, &mut report, &stack)?;
                let frame = if is_activity(e.local_name().as_ref()) {
                    report.activities.push(ActivityScan::default());
                    Some(report.activities.len() - 1)
                } else {
                    None
                };
                stack.push(frame);
            }
            Event::Empty(e) => {
                scan_element(&e, &mut report, &stack)?;
                if is_activity(e.local_name().as_ref()) {
                    report.activities.push(ActivityScan::default());
                }
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(report)
}

fn scan_element(
    e: &BytesStart<'_>,
    report: &mut ScanReport,
    stack: &[Option<usize>],
) -> anyhow::Result<()> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"id" {
            report.ids.insert(attr.unescape_value()?.into_owned());
        }
    }
    match e.local_name().as_ref() {
        b"startEvent" => report.has_start_event = true,
        b"endEvent" => report.has_end_event = true,
        b"extensionElements" => {
            if let Some(Some(idx)) = stack.last() {
                report.activities[*idx].has_extension_elements = true;
            }
        }
        b"executionListener" => {
            if let Some(idx) = stack.iter().rev().flatten().next() {
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"event" {
                        report.activities[*idx]
                            .listener_events
                            .insert(attr.unescape_value()?.into_owned());
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ── Write pass ──

struct ActivityFrame {
    missing_listeners: Vec<&'static str>,
    injected: bool,
}

fn transform(xml: &str, warnings: &mut Vec<String>) -> anyhow::Result<String> {
    let mut report = scan(xml)?;
    if !report.has_start_event {
        warnings.push("document has no start event".to_string());
    }
    if !report.has_end_event {
        warnings.push("document has no end event".to_string());
    }

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    // Frames for open elements; Some for activity-bearing ones.
    let mut stack: Vec<Option<ActivityFrame>> = Vec::new();
    let mut activity_cursor = 0usize;
    let mut root_written = false;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) => {
                let local = e.local_name();
                let local = local.as_ref().to_vec();
                if !root_written && local == b"definitions" {
                    root_written = true;
                    let (qname, attrs) = with_namespaces(e)?;
                    write_start(&mut writer, &qname, &attrs)?;
                    stack.push(None);
                } else if is_activity(&local) {
                    let info = &report.activities[activity_cursor];
                    activity_cursor += 1;
                    let missing = missing_listeners(info);
                    let has_extension = info.has_extension_elements;
                    let (qname, attrs) =
                        activity_attrs(e, &mut report.ids, warnings)?;
                    write_start(&mut writer, &qname, &attrs)?;
                    let mut frame = ActivityFrame {
                        missing_listeners: missing,
                        injected: false,
                    };
                    if !has_extension && !frame.missing_listeners.is_empty() {
                        write_extension_block(&mut writer, &frame.missing_listeners)?;
                        frame.injected = true;
                    }
                    stack.push(Some(frame));
                } else if local == b"extensionElements" {
                    writer.write_event(Event::Start(e.to_owned()))?;
                    // Inject missing listeners into the activity's own
                    // extension block, right after its start tag.
                    if let Some(Some(frame)) = stack.last_mut() {
                        if !frame.injected {
                            write_listeners(&mut writer, &frame.missing_listeners)?;
                            frame.injected = true;
                        }
                    }
                    stack.push(None);
                } else {
                    root_written = true;
                    writer.write_event(Event::Start(e.to_owned()))?;
                    stack.push(None);
                }
            }
            Event::Empty(ref e) => {
                let local = e.local_name();
                let local = local.as_ref().to_vec();
                if is_activity(&local) {
                    let info = &report.activities[activity_cursor];
                    activity_cursor += 1;
                    let missing = missing_listeners(info);
                    let (qname, attrs) =
                        activity_attrs(e, &mut report.ids, warnings)?;
                    write_start(&mut writer, &qname, &attrs)?;
                    write_extension_block(&mut writer, &missing)?;
                    writer.write_event(Event::End(quick_xml::events::BytesEnd::new(
                        qname.as_str(),
                    )))?;
                } else {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) => {
                stack.pop();
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Text(ref t) => {
                // The indenting writer owns whitespace; only real text
                // content is replayed.
                if !t.iter().all(|b| b.is_ascii_whitespace()) {
                    writer.write_event(Event::Text(t.to_owned()))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other.into_owned())?,
        }
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

fn missing_listeners(info: &ActivityScan) -> Vec<&'static str> {
    ["start", "end"]
        .into_iter()
        .filter(|ev| !info.listener_events.contains(*ev))
        .collect()
}

/// Root element attributes with the camunda and forge namespaces ensured.
fn with_namespaces(e: &BytesStart<'_>) -> anyhow::Result<(String, Vec<(String, String)>)> {
    let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    let mut seen = HashSet::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        seen.insert(key.clone());
        attrs.push((key, value));
    }
    for (key, value) in [CAMUNDA_NS, FORGE_NS] {
        if !seen.contains(key) {
            attrs.push((key.to_string(), value.to_string()));
        }
    }
    Ok((qname, attrs))
}

/// Activity attributes with an id ensured and monitoring attributes added
/// when absent. Synthesized ids are collision-checked against every id in
/// the document and recorded as warnings.
fn activity_attrs(
    e: &BytesStart<'_>,
    ids: &mut HashSet<String>,
    warnings: &mut Vec<String>,
) -> anyhow::Result<(String, Vec<(String, String)>)> {
    let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    let mut seen = HashSet::new();
    let mut id: Option<String> = None;
    let mut name: Option<String> = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        if key == "id" {
            id = Some(value.clone());
        } else if key == "name" {
            name = Some(value.clone());
        }
        seen.insert(key.clone());
        attrs.push((key, value));
    }

    let id = match id {
        Some(id) => id,
        None => {
            let fresh = fresh_id(ids);
            warnings.push(format!(
                "synthesized id \"{}\" for <{}> element without one",
                fresh, qname
            ));
            attrs.push(("id".to_string(), fresh.clone()));
            fresh
        }
    };

    if !seen.contains("forge:monitoringEnabled") {
        attrs.push(("forge:monitoringEnabled".to_string(), "true".to_string()));
    }
    if !seen.contains("forge:activityName") {
        attrs.push((
            "forge:activityName".to_string(),
            name.unwrap_or_else(|| id.clone()),
        ));
    }
    if !seen.contains("forge:caseId") {
        attrs.push(("forge:caseId".to_string(), "${caseId}".to_string()));
    }

    Ok((qname, attrs))
}

/// Random-suffix id, retried until unique against the document's id set.
fn fresh_id(ids: &mut HashSet<String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let suffix: String = (0..6)
            .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
            .collect();
        let candidate = format!("activity_{}", suffix.to_lowercase());
        if ids.insert(candidate.clone()) {
            return candidate;
        }
    }
}

fn write_start(
    writer: &mut Writer<Vec<u8>>,
    qname: &str,
    attrs: &[(String, String)],
) -> anyhow::Result<()> {
    let mut elem = BytesStart::new(qname);
    for (key, value) in attrs {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(elem))?;
    Ok(())
}

fn write_extension_block(
    writer: &mut Writer<Vec<u8>>,
    listeners: &[&'static str],
) -> anyhow::Result<()> {
    if listeners.is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new("bpmn:extensionElements")))?;
    write_listeners(writer, listeners)?;
    writer.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "bpmn:extensionElements",
    )))?;
    Ok(())
}

fn write_listeners(
    writer: &mut Writer<Vec<u8>>,
    listeners: &[&'static str],
) -> anyhow::Result<()> {
    for event in listeners {
        let mut listener = BytesStart::new("camunda:executionListener");
        listener.push_attribute(("event", *event));
        listener.push_attribute(("class", LISTENER_CLASS));
        writer.write_event(Event::Empty(listener))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL" id="Definitions_1">
  <bpmn:process id="p1" isExecutable="true">
    <bpmn:startEvent id="start" name="Start" />
    <bpmn:userTask id="review" name="Review order" />
    <bpmn:endEvent id="end" name="End" />
  </bpmn:process>
</bpmn:definitions>
"#;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn adds_namespaces_listeners_and_monitoring_attributes() {
        let out = instrument(SMALL_DOC);
        assert!(out.xml.contains(CAMUNDA_NS.1));
        assert!(out.xml.contains(FORGE_NS.1));
        assert!(out.xml.contains(r#"forge:monitoringEnabled="true""#));
        assert!(out.xml.contains(r#"forge:activityName="Review order""#));
        assert!(out.xml.contains(r#"forge:caseId="${caseId}""#));
        assert_eq!(count(&out.xml, "camunda:executionListener"), 2);
        assert_eq!(count(&out.xml, r#"event="start""#), 1);
        assert_eq!(count(&out.xml, r#"event="end""#), 1);
        // Events are not activity-bearing and stay untouched.
        assert!(!out.xml.contains(r#"<bpmn:startEvent id="start" name="Start" forge"#));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn pass_is_idempotent() {
        let once = instrument(SMALL_DOC);
        let twice = instrument(&once.xml);
        assert_eq!(once.xml, twice.xml);
        assert_eq!(count(&twice.xml, "camunda:executionListener"), 2);
        assert!(twice.warnings.is_empty());
    }

    #[test]
    fn synthesizes_missing_activity_id_with_warning() {
        let doc = SMALL_DOC.replace(r#"<bpmn:userTask id="review" "#, "<bpmn:userTask ");
        let out = instrument(&doc);
        assert!(out.xml.contains("id=\"activity_"));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("synthesized id"));

        // Re-running keeps the assigned id stable.
        let again = instrument(&out.xml);
        assert_eq!(again.xml, out.xml);
        assert!(again.warnings.is_empty());
    }

    #[test]
    fn missing_start_and_end_events_are_warned() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL" id="D1">
  <bpmn:process id="p1">
    <bpmn:userTask id="t1" name="Lonely" />
  </bpmn:process>
</bpmn:definitions>"#;
        let out = instrument(doc);
        assert!(out.warnings.iter().any(|w| w.contains("no start event")));
        assert!(out.warnings.iter().any(|w| w.contains("no end event")));
    }

    #[test]
    fn malformed_xml_falls_back_to_original() {
        let doc = "<bpmn:definitions><unclosed";
        let out = instrument(doc);
        assert_eq!(out.xml, doc);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("instrumentation skipped"));
    }

    #[test]
    fn existing_listeners_are_not_duplicated() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL" xmlns:camunda="http://camunda.org/schema/1.0/bpmn" id="D1">
  <bpmn:process id="p1">
    <bpmn:startEvent id="s" />
    <bpmn:userTask id="t1" name="Review">
      <bpmn:extensionElements>
        <camunda:executionListener event="start" class="com.example.Custom" />
      </bpmn:extensionElements>
    </bpmn:userTask>
    <bpmn:endEvent id="e" />
  </bpmn:process>
</bpmn:definitions>"#;
        let out = instrument(doc);
        // The start listener is respected, only the end listener is added.
        assert_eq!(count(&out.xml, r#"event="start""#), 1);
        assert_eq!(count(&out.xml, r#"event="end""#), 1);
        assert!(out.xml.contains("com.example.Custom"));
    }
}
