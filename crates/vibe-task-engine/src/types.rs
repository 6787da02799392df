//! Core task management entities
//!
//! Projects own epics, epics own atomic tasks, and dependencies are directed
//! edges between tasks. Every entity round-trips through YAML for the
//! file-per-entity store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
    Archived,
}

/// Lifecycle status of an epic or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

/// Priority bands used across scheduling and assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Base weight fed into priority scoring.
    pub fn base_weight(&self) -> f64 {
        match self {
            TaskPriority::Low => 1.0,
            TaskPriority::Medium => 2.0,
            TaskPriority::High => 3.0,
            TaskPriority::Critical => 5.0,
        }
    }
}

/// Category of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Development,
    Testing,
    Documentation,
    Deployment,
    Research,
    Review,
}

/// Top-level unit of work owning epics and tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub root_path: String,
    pub status: ProjectStatus,
    pub tags: Vec<String>,
    pub epic_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, root_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            root_path: root_path.into(),
            status: ProjectStatus::Pending,
            tags: Vec::new(),
            epic_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Named grouping of related tasks under a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub estimated_hours: f64,
    pub task_ids: Vec<String>,
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Epic {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            estimated_hours: 0.0,
            task_ids: Vec::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Smallest schedulable unit of work, produced by decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicTask {
    pub id: String,
    pub project_id: String,
    pub epic_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub estimated_hours: f64,
    pub actual_hours: Option<f64>,
    pub file_paths: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub tags: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AtomicTask {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        epic_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            epic_id: epic_id.into(),
            title: title.into(),
            description: String::new(),
            task_type: TaskType::Development,
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            estimated_hours: 0.0,
            actual_hours: None,
            file_paths: Vec::new(),
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            tags: Vec::new(),
            created_by: "rdd-engine".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Required fields the scheduler validates before any allocation.
    pub fn validate(&self) -> Result<(), crate::EngineError> {
        if self.id.trim().is_empty() {
            return Err(crate::EngineError::Validation("task id is empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(crate::EngineError::Validation(format!(
                "task {} has an empty title",
                self.id
            )));
        }
        if self.project_id.trim().is_empty() {
            return Err(crate::EngineError::Validation(format!(
                "task {} has no project",
                self.id
            )));
        }
        if self.estimated_hours < 0.0 || !self.estimated_hours.is_finite() {
            return Err(crate::EngineError::Validation(format!(
                "task {} has invalid estimated hours {}",
                self.id, self.estimated_hours
            )));
        }
        Ok(())
    }
}

/// Kind of relationship a dependency edge expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Blocks,
    Enables,
    Related,
}

/// Directed edge between two tasks: `from_task` must precede `to_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    pub from_task: String,
    pub to_task: String,
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
    pub weight: u32,
    pub hard: bool,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    pub fn new(
        id: impl Into<String>,
        from_task: impl Into<String>,
        to_task: impl Into<String>,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            id: id.into(),
            from_task: from_task.into(),
            to_task: to_task.into(),
            dependency_type,
            weight: 1,
            hard: true,
            rationale: String::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weights_are_ordered() {
        assert!(TaskPriority::Critical.base_weight() > TaskPriority::High.base_weight());
        assert!(TaskPriority::High.base_weight() > TaskPriority::Medium.base_weight());
        assert!(TaskPriority::Medium.base_weight() > TaskPriority::Low.base_weight());
    }

    #[test]
    fn test_task_yaml_round_trip() {
        let mut task = AtomicTask::new("T0001-01", "P001", "E001", "Implement login endpoint");
        task.task_type = TaskType::Development;
        task.priority = TaskPriority::High;
        task.estimated_hours = 0.2;
        task.file_paths = vec!["src/auth/login.rs".to_string()];
        task.acceptance_criteria = vec!["POST /login returns a session token".to_string()];
        task.tags = vec!["auth".to_string()];

        let yaml = serde_yaml::to_string(&task).unwrap();
        let restored: AtomicTask = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(task, restored);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let yaml = serde_yaml::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(yaml.trim(), "in_progress");
        let back: TaskStatus = serde_yaml::from_str("blocked").unwrap();
        assert_eq!(back, TaskStatus::Blocked);
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let task = AtomicTask::new("T1", "P1", "E1", "  ");
        assert!(task.validate().is_err());

        let mut task = AtomicTask::new("T1", "P1", "E1", "Write docs");
        task.estimated_hours = f64::NAN;
        assert!(task.validate().is_err());

        let task = AtomicTask::new("T1", "P1", "E1", "Write docs");
        assert!(task.validate().is_ok());
    }
}
