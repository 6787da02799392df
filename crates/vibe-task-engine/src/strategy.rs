//! Agent assignment strategies
//!
//! Pure selection over a pre-filtered pool of available agents. The hybrid
//! strategy blends load, track record, and capability coverage.

use crate::agent::{Agent, AgentCapability};
use serde::{Deserialize, Serialize};

/// How the engine picks an agent for a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    RoundRobin,
    LeastLoaded,
    CapabilityFirst,
    PerformanceBased,
    IntelligentHybrid,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        AssignmentStrategy::IntelligentHybrid
    }
}

/// Hybrid score: spare capacity, success history, capability coverage.
pub fn hybrid_score(agent: &Agent, required: &[AgentCapability]) -> f64 {
    (1.0 - agent.current_load) * 0.3
        + agent.performance.success_rate * 0.4
        + agent.capability_match(required) * 0.3
}

impl AssignmentStrategy {
    /// Pick one agent from an already-available pool. `cursor` only matters
    /// for round robin, where it advances one slot per assignment.
    pub fn select<'a>(
        &self,
        agents: &'a [Agent],
        required: &[AgentCapability],
        cursor: usize,
    ) -> Option<&'a Agent> {
        if agents.is_empty() {
            return None;
        }
        match self {
            AssignmentStrategy::RoundRobin => agents.get(cursor % agents.len()),
            AssignmentStrategy::LeastLoaded => agents.iter().min_by(|a, b| {
                a.current_load
                    .partial_cmp(&b.current_load)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            AssignmentStrategy::CapabilityFirst => agents.iter().find(|a| a.covers(required)),
            AssignmentStrategy::PerformanceBased => agents.iter().max_by(|a, b| {
                a.performance
                    .success_rate
                    .partial_cmp(&b.performance.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            AssignmentStrategy::IntelligentHybrid => agents.iter().max_by(|a, b| {
                hybrid_score(a, required)
                    .partial_cmp(&hybrid_score(b, required))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }
}
