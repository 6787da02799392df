//! Engine configuration
//!
//! A nested configuration tree with defaults matching the shipped behavior.
//! `EngineConfig::from_env` layers environment-style overrides on top; an
//! unparsable value keeps the default and logs a warning instead of failing
//! startup.

use crate::types::TaskType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub scheduling: SchedulingConfig,
    pub rdd: RddConfig,
    pub orchestration: OrchestrationConfig,
    pub prompts: PromptConfig,
}

/// Scheduling algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    HybridOptimal,
    PriorityFirst,
    EarliestDeadline,
    ShortestJob,
    CriticalPath,
    ResourceAware,
}

impl std::str::FromStr for SchedulingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid_optimal" => Ok(SchedulingAlgorithm::HybridOptimal),
            "priority_first" => Ok(SchedulingAlgorithm::PriorityFirst),
            "earliest_deadline" => Ok(SchedulingAlgorithm::EarliestDeadline),
            "shortest_job" => Ok(SchedulingAlgorithm::ShortestJob),
            "critical_path" => Ok(SchedulingAlgorithm::CriticalPath),
            "resource_aware" => Ok(SchedulingAlgorithm::ResourceAware),
            other => Err(format!("unknown scheduling algorithm: {other}")),
        }
    }
}

/// Per-task-type resource allocation profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub memory_mb: usize,
    pub cpu_weight: f64,
    pub agent_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub algorithm: SchedulingAlgorithm,
    pub max_concurrent_tasks: usize,
    pub max_memory_mb: usize,
    pub max_cpu_utilization: f64,
    pub available_agents: usize,
    pub batch_size: usize,
    pub scheduling_interval_ms: u64,
    pub priority_weights: PriorityWeights,
    pub resource_profiles: HashMap<TaskType, ResourceProfile>,
    pub default_profile: ResourceProfile,
}

/// Scoring weight per priority band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl PriorityWeights {
    pub fn for_priority(&self, priority: crate::types::TaskPriority) -> f64 {
        match priority {
            crate::types::TaskPriority::Low => self.low,
            crate::types::TaskPriority::Medium => self.medium,
            crate::types::TaskPriority::High => self.high,
            crate::types::TaskPriority::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RddConfig {
    pub max_depth: usize,
    pub max_sub_tasks: usize,
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub watchdog_interval_ms: u64,
    pub default_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub workflow_retention_ms: u64,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub auto_retry: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub directory: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            scheduling: SchedulingConfig::default(),
            rdd: RddConfig::default(),
            orchestration: OrchestrationConfig::default(),
            prompts: PromptConfig {
                directory: PathBuf::from("prompts"),
            },
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        let mut resource_profiles = HashMap::new();
        resource_profiles.insert(
            TaskType::Development,
            ResourceProfile { memory_mb: 512, cpu_weight: 1.0, agent_count: 1 },
        );
        resource_profiles.insert(
            TaskType::Testing,
            ResourceProfile { memory_mb: 384, cpu_weight: 0.8, agent_count: 1 },
        );
        resource_profiles.insert(
            TaskType::Documentation,
            ResourceProfile { memory_mb: 128, cpu_weight: 0.3, agent_count: 1 },
        );
        resource_profiles.insert(
            TaskType::Deployment,
            ResourceProfile { memory_mb: 768, cpu_weight: 1.2, agent_count: 1 },
        );
        resource_profiles.insert(
            TaskType::Research,
            ResourceProfile { memory_mb: 256, cpu_weight: 0.5, agent_count: 1 },
        );
        resource_profiles.insert(
            TaskType::Review,
            ResourceProfile { memory_mb: 128, cpu_weight: 0.4, agent_count: 1 },
        );

        Self {
            algorithm: SchedulingAlgorithm::HybridOptimal,
            max_concurrent_tasks: 10,
            max_memory_mb: 4096,
            max_cpu_utilization: 0.8,
            available_agents: 4,
            batch_size: 20,
            scheduling_interval_ms: 5_000,
            priority_weights: PriorityWeights {
                low: 1.0,
                medium: 2.0,
                high: 3.0,
                critical: 5.0,
            },
            resource_profiles,
            default_profile: ResourceProfile { memory_mb: 256, cpu_weight: 0.5, agent_count: 1 },
        }
    }
}

impl Default for RddConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_sub_tasks: 5,
            min_confidence: 0.7,
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            watchdog_interval_ms: 10_000,
            default_timeout_ms: 300_000,
            cleanup_interval_ms: 3_600_000,
            metrics_interval_ms: 60_000,
            workflow_retention_ms: 86_400_000,
            recovery: RecoveryConfig {
                auto_retry: true,
                max_retries: 3,
                retry_delay_ms: 5_000,
            },
        }
    }
}

impl SchedulingConfig {
    pub fn profile_for(&self, task_type: TaskType) -> ResourceProfile {
        self.resource_profiles
            .get(&task_type)
            .copied()
            .unwrap_or(self.default_profile)
    }
}

impl EngineConfig {
    /// Build a configuration from defaults plus `VIBE_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();

        if let Ok(dir) = std::env::var("VIBE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("VIBE_PROMPTS_DIR") {
            config.prompts.directory = PathBuf::from(dir);
        }

        read_env("VIBE_SCHEDULING_ALGORITHM", &mut config.scheduling.algorithm);
        read_env("VIBE_SCHEDULING_MAX_CONCURRENT_TASKS", &mut config.scheduling.max_concurrent_tasks);
        read_env("VIBE_SCHEDULING_MAX_MEMORY_MB", &mut config.scheduling.max_memory_mb);
        read_env("VIBE_SCHEDULING_MAX_CPU_UTILIZATION", &mut config.scheduling.max_cpu_utilization);
        read_env("VIBE_SCHEDULING_AVAILABLE_AGENTS", &mut config.scheduling.available_agents);
        read_env("VIBE_SCHEDULING_BATCH_SIZE", &mut config.scheduling.batch_size);
        read_env("VIBE_SCHEDULING_INTERVAL_MS", &mut config.scheduling.scheduling_interval_ms);
        read_env("VIBE_RDD_MAX_DEPTH", &mut config.rdd.max_depth);
        read_env("VIBE_RDD_MAX_SUBTASKS", &mut config.rdd.max_sub_tasks);
        read_env("VIBE_RDD_MIN_CONFIDENCE", &mut config.rdd.min_confidence);
        read_env("VIBE_ORCH_HEARTBEAT_INTERVAL_MS", &mut config.orchestration.heartbeat_interval_ms);
        read_env("VIBE_ORCH_HEARTBEAT_TIMEOUT_MS", &mut config.orchestration.heartbeat_timeout_ms);
        read_env("VIBE_ORCH_WATCHDOG_INTERVAL_MS", &mut config.orchestration.watchdog_interval_ms);
        read_env("VIBE_ORCH_DEFAULT_TIMEOUT_MS", &mut config.orchestration.default_timeout_ms);
        read_env("VIBE_ORCH_AUTO_RETRY", &mut config.orchestration.recovery.auto_retry);
        read_env("VIBE_ORCH_MAX_RETRIES", &mut config.orchestration.recovery.max_retries);
        read_env("VIBE_ORCH_RETRY_DELAY_MS", &mut config.orchestration.recovery.retry_delay_ms);

        config
    }
}

fn read_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "Ignoring unparsable configuration override");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.rdd.max_depth, 3);
        assert_eq!(config.rdd.max_sub_tasks, 5);
        assert!((config.rdd.min_confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.scheduling.algorithm, SchedulingAlgorithm::HybridOptimal);
        assert_eq!(config.scheduling.scheduling_interval_ms, 5_000);
        assert_eq!(config.orchestration.watchdog_interval_ms, 10_000);
        assert!(config.orchestration.recovery.auto_retry);
    }

    #[test]
    fn test_algorithm_parses_from_snake_case() {
        assert_eq!(
            "critical_path".parse::<SchedulingAlgorithm>().unwrap(),
            SchedulingAlgorithm::CriticalPath
        );
        assert!("fastest_first".parse::<SchedulingAlgorithm>().is_err());
    }

    #[test]
    fn test_profile_fallback_for_unknown_type() {
        let mut config = SchedulingConfig::default();
        config.resource_profiles.remove(&TaskType::Review);
        let profile = config.profile_for(TaskType::Review);
        assert_eq!(profile.memory_mb, config.default_profile.memory_mb);
    }
}
