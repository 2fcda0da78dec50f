//! Semantic core model.
//!
//! The notation-independent picture of a process: who acts, what they do,
//! where it branches, and how control moves. Produced once per request by
//! the extractor (or a cache hit) and never mutated afterwards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub name: String,
    /// References an [`Actor::id`].
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub question: String,
    /// References an [`Actor::id`].
    pub actor: String,
    /// Labels of the possible outcomes, e.g. `["approved", "rejected"]`.
    pub outcomes: Vec<String>,
}

/// Control-flow edge between activity/decision ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCore {
    pub actors: Vec<Actor>,
    pub activities: Vec<Activity>,
    pub decisions: Vec<Decision>,
    pub control_flow: Vec<ControlEdge>,
}

impl SemanticCore {
    /// Shape check applied to every freshly parsed extraction response.
    /// Returns the first problem found, or `None` for a well-formed core.
    pub fn shape_error(&self) -> Option<String> {
        if self.actors.is_empty() {
            return Some("no actors extracted".to_string());
        }
        let mut actor_ids = std::collections::HashSet::new();
        for actor in &self.actors {
            if actor.id.is_empty() {
                return Some(format!("actor '{}' has an empty id", actor.name));
            }
            if !actor_ids.insert(actor.id.as_str()) {
                return Some(format!("duplicate actor id: {}", actor.id));
            }
        }
        for activity in &self.activities {
            if !actor_ids.contains(activity.actor.as_str()) {
                return Some(format!(
                    "activity '{}' references unknown actor '{}'",
                    activity.id, activity.actor
                ));
            }
        }
        for decision in &self.decisions {
            if !actor_ids.contains(decision.actor.as_str()) {
                return Some(format!(
                    "decision '{}' references unknown actor '{}'",
                    decision.id, decision.actor
                ));
            }
            if decision.outcomes.len() < 2 {
                return Some(format!(
                    "decision '{}' has {} outcome(s), need at least 2",
                    decision.id,
                    decision.outcomes.len()
                ));
            }
        }
        None
    }

    /// Deterministic JSON: clone, sort every collection, serialize. Used for
    /// the IR-tier cache key so element order never changes the key.
    pub fn deterministic_json(&self) -> String {
        let mut core = self.clone();
        core.actors.sort_by(|a, b| a.id.cmp(&b.id));
        core.activities.sort_by(|a, b| a.id.cmp(&b.id));
        core.decisions.sort_by(|a, b| a.id.cmp(&b.id));
        core.control_flow
            .sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));
        serde_json::to_string(&core).unwrap_or_default()
    }
}
