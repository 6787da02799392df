//! Agent model and registry records
//!
//! Agents are external workers that report status into the engine over a
//! transport-agnostic surface. The registry tracks capability coverage,
//! load, and rolling performance per agent.

use crate::types::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported agent availability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Idle,
    Error,
    Maintenance,
}

/// What an agent can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    TaskExecution,
    CodeGeneration,
    Testing,
    Documentation,
    Research,
    Analysis,
    Deployment,
    Monitoring,
    Debugging,
}

impl AgentCapability {
    /// Capability a task of the given type calls for.
    pub fn for_task_type(task_type: TaskType) -> AgentCapability {
        match task_type {
            TaskType::Development => AgentCapability::CodeGeneration,
            TaskType::Testing => AgentCapability::Testing,
            TaskType::Documentation => AgentCapability::Documentation,
            TaskType::Deployment => AgentCapability::Deployment,
            TaskType::Research => AgentCapability::Research,
            TaskType::Review => AgentCapability::Analysis,
        }
    }
}

/// Rolling performance counters for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub average_task_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub last_activity: DateTime<Utc>,
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            average_task_time_ms: 0.0,
            success_rate: 1.0,
            error_rate: 0.0,
            last_activity: Utc::now(),
        }
    }
}

/// Registration-time metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Registered agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub capabilities: Vec<AgentCapability>,
    pub current_load: f64,
    pub max_concurrent_tasks: usize,
    pub current_tasks: Vec<String>,
    pub performance: AgentPerformance,
    pub metadata: AgentMetadata,
}

/// Registration input from an agent transport.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub name: String,
    pub capabilities: Vec<AgentCapability>,
    pub max_concurrent_tasks: usize,
    pub version: String,
    pub endpoint: Option<String>,
    pub heartbeat_interval_ms: u64,
}

impl Agent {
    pub fn from_info(id: impl Into<String>, info: AgentInfo) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: info.name,
            status: AgentStatus::Online,
            capabilities: info.capabilities,
            current_load: 0.0,
            max_concurrent_tasks: info.max_concurrent_tasks.max(1),
            current_tasks: Vec::new(),
            performance: AgentPerformance::default(),
            metadata: AgentMetadata {
                version: info.version,
                endpoint: info.endpoint,
                heartbeat_interval_ms: info.heartbeat_interval_ms,
                last_heartbeat: now,
                registered_at: now,
            },
        }
    }

    /// Keep `current_load` equal to tasks over capacity.
    pub fn recompute_load(&mut self) {
        self.current_load = self.current_tasks.len() as f64 / self.max_concurrent_tasks as f64;
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks.len() < self.max_concurrent_tasks
    }

    pub fn covers(&self, required: &[AgentCapability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    /// Fraction of required capabilities this agent covers; 1.0 when nothing
    /// is required.
    pub fn capability_match(&self, required: &[AgentCapability]) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let covered = required.iter().filter(|c| self.capabilities.contains(c)).count();
        covered as f64 / required.len() as f64
    }

    /// Online or idle, below capacity, and covering the requirements.
    pub fn is_available(&self, required: &[AgentCapability]) -> bool {
        matches!(self.status, AgentStatus::Online | AgentStatus::Idle)
            && self.has_capacity()
            && self.covers(required)
    }
}
