//! End-to-end pipeline tests with scripted service clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use bpmn_forge::cache::{CacheNamespace, CacheStore, MemoryCacheStore};
use bpmn_forge::config::PipelineConfig;
use bpmn_forge::input::RawInput;
use bpmn_forge::llm::embedder::{Embedder, Embedding};
use bpmn_forge::llm::{GenerationClient, GenerationParams};
use bpmn_forge::pipeline::{GenerationOutcome, GenerationRequest, Pipeline};
use bpmn_forge::validate::rules;

/// Pops one canned response per service call, in order.
struct SequencedClient {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl SequencedClient {
    fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for SequencedClient {
    async fn complete_json(
        &self,
        _system: &str,
        _user: &str,
        _params: &GenerationParams,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow!("no scripted response left"));
        }
        Ok(responses.remove(0))
    }

    fn model_name(&self) -> &str {
        "sequenced"
    }
}

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(vec![0.6, 0.8, 0.0])
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        3
    }
}

const ORDER_CORE: &str = r#"{
    "actors": [{"id": "manager", "name": "Manager"}],
    "activities": [
        {"id": "review", "name": "Review order", "actor": "manager"},
        {"id": "notify", "name": "Notify requester", "actor": "manager"}
    ],
    "decisions": [
        {"id": "approve", "question": "Approve?", "actor": "manager", "outcomes": ["approved", "rejected"]}
    ],
    "control_flow": [
        {"from": "review", "to": "approve"},
        {"from": "approve", "to": "notify", "label": "approved"}
    ]
}"#;

const ORDER_IR: &str = r#"{
    "process": {"id": "order_approval", "name": "Order approval"},
    "lanes": [{"id": "lane_manager", "name": "Manager"}],
    "nodes": [
        {"id": "start", "name": "Start", "type": "start_event", "lane": "lane_manager"},
        {"id": "review", "name": "Review order", "type": "user_task", "lane": "lane_manager"},
        {"id": "approve", "name": "Approve?", "type": "exclusive_gateway", "lane": "lane_manager"},
        {"id": "end_approved", "name": "Approved", "type": "end_event", "lane": "lane_manager"},
        {"id": "end_rejected", "name": "Rejected", "type": "end_event", "lane": "lane_manager"}
    ],
    "flows": [
        {"id": "f1", "from": "start", "to": "review"},
        {"id": "f2", "from": "review", "to": "approve"},
        {"id": "f3", "from": "approve", "to": "end_approved", "label": "approved"},
        {"id": "f4", "from": "approve", "to": "end_rejected", "label": "rejected"}
    ]
}"#;

/// IR with a task that has neither incoming nor outgoing flows.
const ORPHAN_IR: &str = r#"{
    "process": {"id": "p1", "name": "P"},
    "lanes": [{"id": "l1", "name": "Manager"}],
    "nodes": [
        {"id": "start", "name": "Start", "type": "start_event", "lane": "l1"},
        {"id": "review", "name": "Review", "type": "user_task", "lane": "l1"},
        {"id": "loner", "name": "Loner", "type": "user_task", "lane": "l1"},
        {"id": "end", "name": "End", "type": "end_event", "lane": "l1"}
    ],
    "flows": [
        {"id": "f1", "from": "start", "to": "review"},
        {"id": "f2", "from": "review", "to": "end"}
    ]
}"#;

/// IR missing its start event, otherwise warning-free.
const NO_START_IR: &str = r#"{
    "process": {"id": "p1", "name": "P"},
    "lanes": [{"id": "l1", "name": "Manager"}],
    "nodes": [
        {"id": "review", "name": "Review", "type": "user_task", "lane": "l1"},
        {"id": "end", "name": "End", "type": "end_event", "lane": "l1"}
    ],
    "flows": [
        {"id": "f1", "from": "review", "to": "end"}
    ]
}"#;

const ORDER_INPUT: &str = "Order approval: manager reviews, then either approves or rejects";

async fn wait_for_writes(cache: &MemoryCacheStore, expected: usize) {
    for _ in 0..200 {
        if cache.len().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache writes never landed");
}

#[tokio::test]
async fn order_approval_scenario_completes() {
    let client = SequencedClient::new(vec![ORDER_CORE, ORDER_IR]);
    let cache = Arc::new(MemoryCacheStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), client.clone(), cache);

    let outcome = pipeline
        .generate(GenerationRequest::create(RawInput::text(ORDER_INPUT)))
        .await
        .unwrap();

    let result = match outcome {
        GenerationOutcome::Completed(result) => result,
        GenerationOutcome::RequiresManualFix { issues } => {
            panic!("unexpected manual-fix outcome: {issues:?}")
        }
    };
    assert!(!result.cached);
    assert_eq!(client.calls(), 2);
    assert!(result.xml.contains("<bpmn:definitions"));
    assert!(result.xml.contains("lane_manager"));
    assert!(result.xml.contains("<bpmn:userTask"));
    assert!(result.xml.contains("<bpmn:exclusiveGateway"));
    assert!(result.xml.contains("camunda:executionListener"));
    assert!(result.xml.contains("forge:monitoringEnabled"));
}

#[tokio::test]
async fn identical_request_twice_is_served_from_cache() {
    let client = SequencedClient::new(vec![ORDER_CORE, ORDER_IR]);
    let cache = Arc::new(MemoryCacheStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), client.clone(), cache.clone());

    let first = match pipeline
        .generate(GenerationRequest::create(RawInput::text(ORDER_INPUT)))
        .await
        .unwrap()
    {
        GenerationOutcome::Completed(result) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(client.calls(), 2);

    // Writes are fire-and-forget; all three tiers must land first.
    wait_for_writes(&cache, 3).await;

    let second = match pipeline
        .generate(GenerationRequest::create(RawInput::text(ORDER_INPUT)))
        .await
        .unwrap()
    {
        GenerationOutcome::Completed(result) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(second.cached);
    assert_eq!(second.xml, first.xml);
    // No additional service calls for the cached request.
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn whitespace_variants_share_one_cache_entry() {
    let client = SequencedClient::new(vec![ORDER_CORE, ORDER_IR]);
    let cache = Arc::new(MemoryCacheStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), client.clone(), cache.clone());

    let sloppy = "Order approval:   manager reviews,\r\nthen either approves or rejects";
    pipeline
        .generate(GenerationRequest::create(RawInput::text(
            "Order approval: manager reviews,\nthen either approves or rejects",
        )))
        .await
        .unwrap();
    wait_for_writes(&cache, 3).await;

    let second = match pipeline
        .generate(GenerationRequest::create(RawInput::text(sloppy)))
        .await
        .unwrap()
    {
        GenerationOutcome::Completed(result) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(second.cached);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn orphan_node_stops_at_validation() {
    let client = SequencedClient::new(vec![ORDER_CORE, ORPHAN_IR]);
    let cache = Arc::new(MemoryCacheStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), client.clone(), cache.clone());

    let outcome = pipeline
        .generate(GenerationRequest::create(RawInput::text(ORDER_INPUT)))
        .await
        .unwrap();

    match outcome {
        GenerationOutcome::RequiresManualFix { issues } => {
            assert!(issues.iter().any(|i| i.rule == rules::ORPHAN_NODE));
        }
        other => panic!("expected manual-fix outcome, got {other:?}"),
    }

    // A rejected diagram is never cached.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let key = bpmn_forge::cache::combined_hash(&[
        &bpmn_forge::cache::content_hash(ORDER_INPUT),
        "bpmn",
    ]);
    assert!(cache
        .get(CacheNamespace::Result, &key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_start_event_is_auto_fixed() {
    let client = SequencedClient::new(vec![ORDER_CORE, NO_START_IR]);
    let cache = Arc::new(MemoryCacheStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), client, cache);

    let result = match pipeline
        .generate(GenerationRequest::create(RawInput::text(ORDER_INPUT)))
        .await
        .unwrap()
    {
        GenerationOutcome::Completed(result) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(result.xml.contains("<bpmn:startEvent"));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("insert_start_event")));
}

#[tokio::test]
async fn semantic_cache_serves_similar_input_without_service_calls() {
    let client = SequencedClient::new(vec![]);
    let cache = Arc::new(MemoryCacheStore::new());
    let config = PipelineConfig {
        semantic_cache_enabled: true,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config, client.clone(), cache.clone())
        .with_embedder(Arc::new(FixedEmbedder));

    // A previously finished diagram, stored under a different exact key but
    // with a colinear embedding.
    cache
        .put(
            CacheNamespace::Result,
            "some-other-key".to_string(),
            serde_json::json!({ "xml": "<bpmn:definitions/>", "warnings": [] }),
            Some(vec![0.6, 0.8, 0.0]),
        )
        .await
        .unwrap();

    let result = match pipeline
        .generate(GenerationRequest::create(RawInput::text(
            "Purchase approval: manager reviews, then approves or rejects",
        )))
        .await
        .unwrap()
    {
        GenerationOutcome::Completed(result) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(result.cached);
    let similarity = result.similarity.expect("similarity must be reported");
    assert!(similarity > 0.99);
    assert_eq!(client.calls(), 0);
}
