//! Orchestration metrics
//!
//! Monotonic counters updated on the hot path plus a point-in-time snapshot
//! assembled once a minute by the metrics timer.

use crate::agent::{Agent, AgentStatus};
use crate::execution::{ExecutionContext, ExecutionStatus};
use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts of workflows by coarse state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkflowCounts {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Counts of executions by state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Point-in-time orchestration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationMetrics {
    pub timestamp: DateTime<Utc>,
    pub agents_by_status: HashMap<String, usize>,
    pub workflows: WorkflowCounts,
    pub executions: ExecutionCounts,
    pub tasks_completed_total: u64,
    pub tasks_failed_total: u64,
    pub throughput_per_minute: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
}

/// Counter state shared by the engine; counters only go up.
#[derive(Debug)]
pub struct MetricsCollector {
    started_at: DateTime<Utc>,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    response_time_total_ms: AtomicU64,
    responses: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            response_time_total_ms: AtomicU64::new(0),
            responses: AtomicU64::new(0),
        }
    }

    pub fn record_completion(&self, success: bool, response_time_ms: u64) {
        if success {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.response_time_total_ms
            .fetch_add(response_time_ms, Ordering::Relaxed);
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Assemble a snapshot over the live registry contents.
    pub fn snapshot(
        &self,
        agents: &[Agent],
        workflows: &[Workflow],
        executions: &[ExecutionContext],
    ) -> OrchestrationMetrics {
        let mut agents_by_status: HashMap<String, usize> = HashMap::new();
        for agent in agents {
            let key = status_key(agent.status).to_string();
            *agents_by_status.entry(key).or_insert(0) += 1;
        }

        let mut workflow_counts = WorkflowCounts::default();
        for workflow in workflows {
            match workflow.status {
                crate::workflow::WorkflowStatus::Completed => workflow_counts.completed += 1,
                crate::workflow::WorkflowStatus::Failed => workflow_counts.failed += 1,
                _ => workflow_counts.active += 1,
            }
        }

        let mut execution_counts = ExecutionCounts::default();
        for execution in executions {
            match execution.status {
                ExecutionStatus::Running | ExecutionStatus::Pending => execution_counts.running += 1,
                ExecutionStatus::Completed => execution_counts.completed += 1,
                ExecutionStatus::Failed | ExecutionStatus::Cancelled => execution_counts.failed += 1,
                ExecutionStatus::Timeout => execution_counts.timed_out += 1,
            }
        }

        let completed = self.tasks_completed();
        let failed = self.tasks_failed();
        let total = completed + failed;
        let minutes = ((Utc::now() - self.started_at).num_seconds().max(1) as f64) / 60.0;
        let responses = self.responses.load(Ordering::Relaxed);

        OrchestrationMetrics {
            timestamp: Utc::now(),
            agents_by_status,
            workflows: workflow_counts,
            executions: execution_counts,
            tasks_completed_total: completed,
            tasks_failed_total: failed,
            throughput_per_minute: total as f64 / minutes,
            success_rate: if total > 0 { completed as f64 / total as f64 } else { 1.0 },
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            average_response_time_ms: if responses > 0 {
                self.response_time_total_ms.load(Ordering::Relaxed) as f64 / responses as f64
            } else {
                0.0
            },
        }
    }
}

fn status_key(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Online => "online",
        AgentStatus::Offline => "offline",
        AgentStatus::Busy => "busy",
        AgentStatus::Idle => "idle",
        AgentStatus::Error => "error",
        AgentStatus::Maintenance => "maintenance",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCapability, AgentInfo};

    #[test]
    fn test_counters_are_monotonic() {
        let collector = MetricsCollector::new();
        collector.record_completion(true, 100);
        collector.record_completion(false, 300);
        collector.record_completion(true, 200);
        assert_eq!(collector.tasks_completed(), 2);
        assert_eq!(collector.tasks_failed(), 1);

        let snapshot = collector.snapshot(&[], &[], &[]);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.average_response_time_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_partitions_registry_state() {
        let collector = MetricsCollector::new();
        let mut online = Agent::from_info(
            "a1",
            AgentInfo {
                name: "w".into(),
                capabilities: vec![AgentCapability::TaskExecution],
                max_concurrent_tasks: 1,
                version: "1.0".into(),
                endpoint: None,
                heartbeat_interval_ms: 30_000,
            },
        );
        let mut offline = online.clone();
        online.id = "a1".into();
        offline.id = "a2".into();
        offline.status = AgentStatus::Offline;

        let mut done = Workflow::new("W1", "P1", "S1", "test");
        done.status = crate::workflow::WorkflowStatus::Completed;
        let active = Workflow::new("W2", "P1", "S2", "test");

        let snapshot = collector.snapshot(&[online, offline], &[done, active], &[]);
        assert_eq!(snapshot.agents_by_status["online"], 1);
        assert_eq!(snapshot.agents_by_status["offline"], 1);
        assert_eq!(snapshot.workflows.completed, 1);
        assert_eq!(snapshot.workflows.active, 1);
    }
}
