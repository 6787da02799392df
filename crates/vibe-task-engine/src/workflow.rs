//! Workflow state machine
//!
//! One workflow covers a decompose/schedule/execute cycle for a project.
//! Phases advance along a fixed chain; any non-terminal phase may divert to
//! error recovery, which resumes at assignment or closes at completion.
//! Transitions happen only through `transition_to`, which hands back the
//! event to publish.

use crate::types::TaskPriority;
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a workflow's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Initialization,
    Decomposition,
    Planning,
    Assignment,
    Execution,
    Monitoring,
    Validation,
    Completion,
    ErrorRecovery,
}

impl WorkflowPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowPhase::Completion)
    }

    /// Whether the state machine admits `self -> next`.
    pub fn can_transition_to(self, next: WorkflowPhase) -> bool {
        use WorkflowPhase::*;
        matches!(
            (self, next),
            (Initialization, Decomposition)
                | (Decomposition, Planning)
                | (Planning, Assignment)
                | (Assignment, Execution)
                | (Execution, Monitoring)
                | (Monitoring, Validation)
                | (Validation, Completion)
                | (ErrorRecovery, Assignment)
                | (ErrorRecovery, Completion)
        ) || (next == ErrorRecovery && !self.is_terminal() && self != ErrorRecovery)
    }
}

/// Overall workflow outcome state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Task completion counters; `total` never decreases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub percentage: f64,
}

impl WorkflowProgress {
    pub fn set_total(&mut self, total: usize) {
        self.total = self.total.max(total);
        self.refresh();
    }

    pub fn record_completion(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        self.percentage = if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub initiator: String,
    pub priority: TaskPriority,
    pub estimated_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_ms: Option<u64>,
}

/// Per-session unit of orchestrated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub phase: WorkflowPhase,
    pub status: WorkflowStatus,
    pub tasks: Vec<String>,
    pub assigned_agents: Vec<String>,
    pub progress: WorkflowProgress,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub metadata: WorkflowMetadata,
}

/// Published on every accepted phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_id: String,
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        initiator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            session_id: session_id.into(),
            phase: WorkflowPhase::Initialization,
            status: WorkflowStatus::Pending,
            tasks: Vec::new(),
            assigned_agents: Vec::new(),
            progress: WorkflowProgress::default(),
            start_time: Utc::now(),
            end_time: None,
            metadata: WorkflowMetadata {
                initiator: initiator.into(),
                priority: TaskPriority::Medium,
                estimated_duration_ms: 0,
                actual_duration_ms: None,
            },
        }
    }

    /// Advance to `next`. Same-phase updates are a no-op with no event;
    /// disallowed transitions are validation errors.
    pub fn transition_to(&mut self, next: WorkflowPhase) -> Result<Option<WorkflowEvent>, EngineError> {
        if self.phase == next {
            return Ok(None);
        }
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::Validation(format!(
                "workflow {} cannot move {:?} -> {:?}",
                self.id, self.phase, next
            )));
        }
        let event = WorkflowEvent {
            workflow_id: self.id.clone(),
            from: self.phase,
            to: next,
            at: Utc::now(),
        };
        self.phase = next;
        match next {
            WorkflowPhase::Completion => {
                self.status = if self.progress.failed > 0 {
                    WorkflowStatus::Failed
                } else {
                    WorkflowStatus::Completed
                };
                let now = Utc::now();
                self.end_time = Some(now);
                self.metadata.actual_duration_ms =
                    Some((now - self.start_time).num_milliseconds().max(0) as u64);
            }
            WorkflowPhase::Initialization => {}
            _ => self.status = WorkflowStatus::Running,
        }
        Ok(Some(event))
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> Workflow {
        Workflow::new("W1", "P1", "S1", "cli")
    }

    #[test]
    fn test_linear_chain_is_accepted() {
        let mut w = workflow();
        let chain = [
            WorkflowPhase::Decomposition,
            WorkflowPhase::Planning,
            WorkflowPhase::Assignment,
            WorkflowPhase::Execution,
            WorkflowPhase::Monitoring,
            WorkflowPhase::Validation,
            WorkflowPhase::Completion,
        ];
        for phase in chain {
            let event = w.transition_to(phase).unwrap();
            assert_eq!(event.unwrap().to, phase);
        }
        assert_eq!(w.status, WorkflowStatus::Completed);
        assert!(w.end_time.is_some());
    }

    #[test]
    fn test_same_phase_is_a_silent_no_op() {
        let mut w = workflow();
        assert!(w.transition_to(WorkflowPhase::Initialization).unwrap().is_none());
    }

    #[test]
    fn test_skipping_phases_is_rejected() {
        let mut w = workflow();
        let err = w.transition_to(WorkflowPhase::Execution).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert_eq!(w.phase, WorkflowPhase::Initialization);
    }

    #[test]
    fn test_error_recovery_branches() {
        let mut w = workflow();
        w.transition_to(WorkflowPhase::Decomposition).unwrap();
        w.transition_to(WorkflowPhase::ErrorRecovery).unwrap();
        assert!(w.phase.can_transition_to(WorkflowPhase::Assignment));
        assert!(w.phase.can_transition_to(WorkflowPhase::Completion));
        assert!(!w.phase.can_transition_to(WorkflowPhase::Planning));

        // Terminal workflows never divert to recovery.
        assert!(!WorkflowPhase::Completion.can_transition_to(WorkflowPhase::ErrorRecovery));
    }

    #[test]
    fn test_progress_percentage_and_total_floor() {
        let mut p = WorkflowProgress::default();
        p.set_total(4);
        p.record_completion(true);
        p.record_completion(true);
        p.record_completion(false);
        assert!((p.percentage - 50.0).abs() < 1e-9);
        assert!(p.completed + p.failed <= p.total);

        // Totals never shrink.
        p.set_total(2);
        assert_eq!(p.total, 4);
    }
}
