//! Vibe Task Manager Core Engine
//!
//! This crate provides the task management core shared by the developer
//! assistance tools:
//! - Recursive decomposition of development requests into atomic tasks
//! - Dependency graph construction with cycle refusal and critical paths
//! - Multi-factor priority scheduling into parallel execution batches
//! - Agent orchestration with heartbeats, watchdogs, and recovery
//! - Durable file-per-entity storage with searchable indexes

pub mod agent;
pub mod atomic;
pub mod config;
pub mod execution;
pub mod graph;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod rdd;
pub mod recovery;
pub mod scheduler;
pub mod storage;
pub mod strategy;
pub mod types;
pub mod workflow;

pub use agent::{Agent, AgentCapability, AgentInfo, AgentPerformance, AgentStatus};
pub use atomic::{AtomicDetector, AtomicityAnalysis, ProjectContext};
pub use config::{
    EngineConfig, OrchestrationConfig, PromptConfig, RddConfig, RecoveryConfig,
    ResourceProfile, SchedulingAlgorithm, SchedulingConfig,
};
pub use execution::{ExecutionContext, ExecutionStatus, WatchdogState};
pub use graph::DependencyGraph;
pub use llm::{LanguageModel, OutputFormat, ScriptedModel};
pub use metrics::OrchestrationMetrics;
pub use orchestrator::{EngineDeps, OrchestrationEngine, ScheduleEntry, TaskAssignment};
pub use prompts::{PromptRecord, PromptService};
pub use rdd::{DecompositionEngine, DecompositionResult, DecompositionSession};
pub use scheduler::{
    ExecutionBatch, Schedule, ScheduledTask, SchedulingEnvironment, ScoreBreakdown,
    TaskScheduler, Timeline,
};
pub use storage::EntityStore;
pub use strategy::AssignmentStrategy;
pub use types::{
    AtomicTask, Dependency, DependencyType, Epic, Project, ProjectStatus, TaskPriority,
    TaskStatus, TaskType,
};
pub use workflow::{Workflow, WorkflowEvent, WorkflowPhase, WorkflowProgress, WorkflowStatus};

use thiserror::Error;

/// Errors surfaced by every engine component.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Dependency cycle: {0}")]
    Cycle(String),

    #[error("Resource exhausted: {0}")]
    Resource(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("System error: {0}")]
    System(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

/// Stable error categories exposed to external clients.
///
/// Callers translate these to wire-level error codes; the underlying
/// `EngineError` message never leaks a stack trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Validation,
    Cycle,
    Resource,
    Parsing,
    System,
    Cancelled,
    Timeout,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Cycle(_) => ErrorKind::Cycle,
            EngineError::Resource(_) => ErrorKind::Resource,
            EngineError::Parse(_) => ErrorKind::Parsing,
            EngineError::System(_) => ErrorKind::System,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Stable code for external clients.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Cycle => "CYCLE",
            ErrorKind::Resource => "RESOURCE",
            ErrorKind::Parsing => "PARSING",
            ErrorKind::System => "SYSTEM",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::System(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

/// Cancellation handle paired with the signal it controls.
///
/// Long-running operations poll the signal between steps; the handle side
/// stays with the caller.
#[derive(Debug)]
pub struct CancelHandle {
    tx: tokio::sync::watch::Sender<bool>,
}

/// Cheap-to-clone cancellation signal checked inside engine loops.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<tokio::sync::watch::Receiver<bool>>,
}

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    /// A signal that never fires, for callers without cancellation needs.
    pub fn none() -> Self {
        CancelSignal { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Convert entity-level hours into a runtime duration.
///
/// Entity durations are fractional hours; everything the runtime measures is
/// milliseconds. This is the only conversion point.
pub fn hours_to_duration(hours: f64) -> std::time::Duration {
    std::time::Duration::from_millis((hours.max(0.0) * 3_600_000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(EngineError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(EngineError::Cycle("a->b".into()).kind(), ErrorKind::Cycle);
        assert_eq!(EngineError::Cancelled.code(), "CANCELLED");
        assert_eq!(EngineError::Timeout(100).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_cancel_signal_fires_once_cancelled() {
        let (handle, signal) = CancelHandle::new();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(!CancelSignal::none().is_cancelled());
    }

    #[test]
    fn test_hours_to_duration_converts_at_the_boundary() {
        assert_eq!(hours_to_duration(1.0).as_millis(), 3_600_000);
        assert_eq!(hours_to_duration(0.25).as_millis(), 900_000);
        assert_eq!(hours_to_duration(-1.0).as_millis(), 0);
    }
}
