//! Execution contexts
//!
//! One context tracks a single task run on a single agent: progress
//! percentage, log lines, runtime metrics, and the watchdog bookkeeping
//! that times out silent executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }
}

/// Timestamped log line reported by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Runtime measurements reported with progress updates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub memory_usage_mb: f64,
    pub cpu_usage: f64,
    pub response_time_ms: u64,
}

/// Watchdog bookkeeping for one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WatchdogState {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub last_check: DateTime<Utc>,
    pub violations: u32,
}

/// Live record of one task running on one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: String,
    pub workflow_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub progress: u8,
    pub logs: Vec<ExecutionLog>,
    pub errors: Vec<String>,
    pub metrics: ExecutionMetrics,
    pub watchdog: WatchdogState,
}

impl ExecutionContext {
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status: ExecutionStatus::Running,
            start_time: now,
            end_time: None,
            progress: 0,
            logs: Vec::new(),
            errors: Vec::new(),
            metrics: ExecutionMetrics::default(),
            watchdog: WatchdogState {
                enabled: true,
                timeout_ms,
                last_check: now,
                violations: 0,
            },
        }
    }

    /// Record an agent progress signal; every signal feeds the watchdog.
    pub fn record_progress(&mut self, progress: u8, logs: Vec<String>) {
        self.progress = progress.min(100);
        let now = Utc::now();
        self.watchdog.last_check = now;
        self.logs
            .extend(logs.into_iter().map(|message| ExecutionLog { at: now, message }));
    }

    /// Close the execution with a terminal status.
    pub fn finish(&mut self, status: ExecutionStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        let now = Utc::now();
        self.end_time = Some(now);
        self.metrics.response_time_ms = (now - self.start_time).num_milliseconds().max(0) as u64;
        if status == ExecutionStatus::Completed {
            self.progress = 100;
        }
    }

    /// Milliseconds since the last progress signal.
    pub fn silence_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.watchdog.last_check).num_milliseconds().max(0) as u64
    }
}
