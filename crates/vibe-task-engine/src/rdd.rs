//! Recursive task decomposition
//!
//! Splits non-atomic tasks into sub-tasks through the model, then recurses
//! on each sub-task until everything left is atomic or the depth bound is
//! hit. Model trouble during a split downgrades the task to atomic instead
//! of failing the run; only detector errors and cancellation surface.

use crate::atomic::{AtomicDetector, ProjectContext};
use crate::config::RddConfig;
use crate::llm::{LanguageModel, OutputFormat};
use crate::prompts::PromptService;
use crate::types::{AtomicTask, TaskPriority, TaskStatus, TaskType};
use crate::{CancelSignal, EngineError};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of decomposing one task.
#[derive(Debug, Clone)]
pub struct DecompositionResult {
    pub success: bool,
    pub is_atomic: bool,
    pub sub_tasks: Vec<AtomicTask>,
    pub original_task: AtomicTask,
    pub depth: usize,
    pub error: Option<String>,
}

/// Summary of a whole decomposition run.
#[derive(Debug, Clone)]
pub struct DecompositionSession {
    pub id: Uuid,
    pub project_id: String,
    pub root_task_id: String,
    pub total_produced: usize,
    pub max_depth_reached: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubTaskDescriptor {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    estimated_hours: Option<f64>,
    #[serde(default)]
    file_paths: Vec<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    dependencies: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubTaskEnvelope {
    sub_tasks: Vec<SubTaskDescriptor>,
}

#[derive(Default)]
struct SessionStats {
    max_depth_reached: usize,
}

/// Recursive decomposition engine.
pub struct DecompositionEngine {
    detector: AtomicDetector,
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptService>,
    config: RddConfig,
}

impl DecompositionEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<PromptService>,
        config: RddConfig,
    ) -> Self {
        Self {
            detector: AtomicDetector::new(model.clone(), prompts.clone()),
            model,
            prompts,
            config,
        }
    }

    /// Decompose one task to atomic leaves.
    pub async fn decompose_task(
        &self,
        task: &AtomicTask,
        context: &ProjectContext,
        cancel: &CancelSignal,
    ) -> Result<DecompositionResult, EngineError> {
        let mut stats = SessionStats::default();
        self.decompose_inner(task.clone(), context, 0, &mut stats, cancel)
            .await
    }

    /// `decompose_task` plus a run summary for observability.
    pub async fn decompose_with_session(
        &self,
        task: &AtomicTask,
        context: &ProjectContext,
        cancel: &CancelSignal,
    ) -> Result<(DecompositionResult, DecompositionSession), EngineError> {
        let started = std::time::Instant::now();
        let mut stats = SessionStats::default();
        let result = self
            .decompose_inner(task.clone(), context, 0, &mut stats, cancel)
            .await?;
        let session = DecompositionSession {
            id: Uuid::new_v4(),
            project_id: task.project_id.clone(),
            root_task_id: task.id.clone(),
            total_produced: result.sub_tasks.len(),
            max_depth_reached: stats.max_depth_reached,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        Ok((result, session))
    }

    fn decompose_inner<'a>(
        &'a self,
        task: AtomicTask,
        context: &'a ProjectContext,
        depth: usize,
        stats: &'a mut SessionStats,
        cancel: &'a CancelSignal,
    ) -> Pin<Box<dyn Future<Output = Result<DecompositionResult, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            stats.max_depth_reached = stats.max_depth_reached.max(depth);

            if depth >= self.config.max_depth {
                tracing::debug!(task_id = %task.id, depth, "Depth bound reached, forcing atomic");
                return Ok(atomic_result(task, depth));
            }

            let analysis = match self.detector.analyze(&task, context, cancel).await {
                Ok(analysis) => analysis,
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, "Atomicity detection failed");
                    return Ok(DecompositionResult {
                        success: false,
                        is_atomic: false,
                        sub_tasks: Vec::new(),
                        original_task: task,
                        depth,
                        error: Some(err.to_string()),
                    });
                }
            };

            if analysis.is_atomic && analysis.confidence >= self.config.min_confidence {
                return Ok(atomic_result(task, depth));
            }

            let Some(children) = self.split_task(&task, context).await else {
                // Model trouble during the split leaves the task intact.
                return Ok(atomic_result(task, depth));
            };
            if children.is_empty() {
                return Ok(atomic_result(task, depth));
            }

            let mut leaves: Vec<AtomicTask> = Vec::new();
            for child in children {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let child_result = self
                    .decompose_inner(child, context, depth + 1, stats, cancel)
                    .await?;
                if !child_result.success {
                    tracing::warn!(
                        task_id = %child_result.original_task.id,
                        error = child_result.error.as_deref().unwrap_or("unknown"),
                        "Keeping sub-task undivided after failed analysis"
                    );
                    leaves.push(child_result.original_task);
                } else if child_result.is_atomic {
                    leaves.push(child_result.original_task);
                } else {
                    leaves.extend(child_result.sub_tasks);
                }
            }

            if leaves.len() > self.config.max_sub_tasks {
                tracing::warn!(
                    task_id = %task.id,
                    produced = leaves.len(),
                    kept = self.config.max_sub_tasks,
                    "Truncating decomposition output"
                );
                leaves.truncate(self.config.max_sub_tasks);
            }

            tracing::info!(
                task_id = %task.id,
                depth,
                sub_tasks = leaves.len(),
                "Task decomposed"
            );
            Ok(DecompositionResult {
                success: true,
                is_atomic: false,
                sub_tasks: leaves,
                original_task: task,
                depth,
                error: None,
            })
        })
    }

    /// Ask the model for sub-task descriptors. Any failure returns `None`.
    async fn split_task(
        &self,
        task: &AtomicTask,
        context: &ProjectContext,
    ) -> Option<Vec<AtomicTask>> {
        let variables = HashMap::from([
            ("title".to_string(), task.title.clone()),
            ("description".to_string(), task.description.clone()),
            ("estimated_hours".to_string(), task.estimated_hours.to_string()),
            ("max_sub_tasks".to_string(), self.config.max_sub_tasks.to_string()),
            ("languages".to_string(), context.languages.join(", ")),
            ("frameworks".to_string(), context.frameworks.join(", ")),
        ]);
        let prompt = self
            .prompts
            .get_prompt_with_variables("decomposition", &variables)
            .await;
        let system_prompt = self.prompts.get_prompt("agent_system").await;

        let raw = match self
            .model
            .invoke("decomposition", &prompt, &system_prompt, 0.2, OutputFormat::Json)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "Split request failed");
                return None;
            }
        };

        let descriptors = match parse_descriptors(&raw) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "Split output not parseable");
                return None;
            }
        };

        Some(self.build_children(task, descriptors))
    }

    fn build_children(
        &self,
        parent: &AtomicTask,
        descriptors: Vec<SubTaskDescriptor>,
    ) -> Vec<AtomicTask> {
        let mut children: Vec<AtomicTask> = Vec::new();
        let mut raw_dependencies: Vec<Vec<serde_json::Value>> = Vec::new();

        for descriptor in descriptors.into_iter().take(self.config.max_sub_tasks) {
            if descriptor.title.trim().is_empty() {
                tracing::warn!(parent = %parent.id, "Dropping sub-task with empty title");
                continue;
            }
            let hours = descriptor.estimated_hours.unwrap_or(0.0);
            if !(hours > 0.0 && hours <= 4.0) {
                tracing::warn!(
                    parent = %parent.id,
                    title = %descriptor.title,
                    hours,
                    "Dropping sub-task outside the (0, 4] hour bound"
                );
                continue;
            }

            let id = format!("{}-{:02}", parent.id, children.len() + 1);
            let mut child = AtomicTask::new(&id, &parent.project_id, &parent.epic_id, descriptor.title.trim());
            child.description = descriptor.description;
            child.task_type = descriptor
                .task_type
                .as_deref()
                .and_then(parse_enum::<TaskType>)
                .unwrap_or(parent.task_type);
            child.priority = descriptor
                .priority
                .as_deref()
                .and_then(parse_enum::<TaskPriority>)
                .unwrap_or(parent.priority);
            child.status = TaskStatus::Pending;
            child.estimated_hours = hours;
            child.file_paths = descriptor.file_paths;
            child.acceptance_criteria = descriptor.acceptance_criteria;
            child.tags = if descriptor.tags.is_empty() {
                parent.tags.clone()
            } else {
                descriptor.tags
            };
            children.push(child);
            raw_dependencies.push(descriptor.dependencies);
        }

        // Dependencies reference siblings by 1-based position or by id.
        let ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        for (child, raw) in children.iter_mut().zip(raw_dependencies) {
            for value in raw {
                let resolved = match &value {
                    serde_json::Value::Number(n) => n
                        .as_u64()
                        .and_then(|p| p.checked_sub(1))
                        .and_then(|i| ids.get(i as usize))
                        .cloned(),
                    serde_json::Value::String(s) if ids.contains(s) => Some(s.clone()),
                    _ => None,
                };
                match resolved {
                    Some(dep_id) if dep_id != child.id => child.dependencies.push(dep_id),
                    _ => {
                        tracing::warn!(task_id = %child.id, reference = %value, "Dropping unresolvable dependency reference");
                    }
                }
            }
        }
        children
    }
}

fn atomic_result(task: AtomicTask, depth: usize) -> DecompositionResult {
    DecompositionResult {
        success: true,
        is_atomic: true,
        sub_tasks: Vec::new(),
        original_task: task,
        depth,
        error: None,
    }
}

fn parse_descriptors(raw: &str) -> Result<Vec<SubTaskDescriptor>, EngineError> {
    let body = crate::atomic::extract_json(raw);
    if let Ok(list) = serde_json::from_str::<Vec<SubTaskDescriptor>>(body) {
        return Ok(list);
    }
    serde_json::from_str::<SubTaskEnvelope>(body)
        .map(|e| e.sub_tasks)
        .map_err(|e| EngineError::Parse(format!("sub-task list: {e}")))
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;

    fn engine_with(model: Arc<ScriptedModel>, config: RddConfig) -> (tempfile::TempDir, DecompositionEngine) {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(PromptService::new(dir.path()));
        (dir, DecompositionEngine::new(model, prompts, config))
    }

    fn root_task() -> AtomicTask {
        let mut task = AtomicTask::new("T0001", "P1", "E1", "Implement user management system");
        task.estimated_hours = 12.0;
        task.acceptance_criteria = vec!["users can register, log in, and manage profiles".into()];
        task.priority = TaskPriority::High;
        task
    }

    const NON_ATOMIC: &str = r#"{"isAtomic": false, "confidence": 0.95, "reasoning": "multi-feature"}"#;
    const ATOMIC: &str = r#"{"isAtomic": true, "confidence": 0.9, "reasoning": "single concern"}"#;

    #[tokio::test]
    async fn test_complex_task_decomposes_into_ordered_sub_ids() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.script("atomic_detection", ATOMIC).await;
        model
            .script(
                "decomposition",
                r#"[
                    {"title": "Implement user authentication", "estimatedHours": 0.2, "acceptanceCriteria": ["login works"]},
                    {"title": "Implement profile management", "estimatedHours": 0.2, "acceptanceCriteria": ["profile saves"], "dependencies": [1]}
                ]"#,
            )
            .await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.is_atomic);
        assert_eq!(result.sub_tasks.len(), 2);
        assert_eq!(result.sub_tasks[0].id, "T0001-01");
        assert_eq!(result.sub_tasks[0].title, "Implement user authentication");
        assert_eq!(result.sub_tasks[1].id, "T0001-02");
        assert_eq!(result.sub_tasks[1].dependencies, vec!["T0001-01".to_string()]);
        assert_eq!(result.original_task.id, "T0001");
    }

    #[tokio::test]
    async fn test_atomic_task_returns_without_split() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", ATOMIC).await;
        let (_dir, engine) = engine_with(model.clone(), RddConfig::default());

        let mut task = root_task();
        task.estimated_hours = 0.2;
        let result = engine
            .decompose_task(&task, &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert!(result.is_atomic);
        assert!(result.sub_tasks.is_empty());
        assert!(!model.calls().await.iter().any(|c| c.logical_task == "decomposition"));
    }

    #[tokio::test]
    async fn test_depth_bound_forces_atomic_without_detection() {
        let model = Arc::new(ScriptedModel::new());
        let (_dir, engine) = engine_with(
            model.clone(),
            RddConfig { max_depth: 0, ..RddConfig::default() },
        );

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert!(result.is_atomic);
        assert!(model.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_split_failure_downgrades_to_atomic() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.fail("decomposition", "model offline").await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.is_atomic);
        assert!(result.sub_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_split_output_downgrades_to_atomic() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.script("decomposition", "sure! here are some ideas").await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert!(result.is_atomic);
    }

    #[tokio::test]
    async fn test_detector_failure_bubbles_as_unsuccessful() {
        let model = Arc::new(ScriptedModel::new());
        model.fail("atomic_detection", "provider down").await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("provider down"));
        assert_eq!(result.original_task.id, "T0001");
    }

    #[tokio::test]
    async fn test_oversized_estimates_and_empty_titles_are_dropped() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.script("atomic_detection", ATOMIC).await;
        model
            .script(
                "decomposition",
                r#"{"subTasks": [
                    {"title": "", "estimatedHours": 0.2},
                    {"title": "Too big", "estimatedHours": 6.0},
                    {"title": "Just right", "estimatedHours": 0.2, "type": "testing", "priority": "bogus"}
                ]}"#,
            )
            .await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(result.sub_tasks.len(), 1);
        let child = &result.sub_tasks[0];
        assert_eq!(child.id, "T0001-01");
        assert_eq!(child.task_type, TaskType::Testing);
        // Invalid priority falls back to the parent's.
        assert_eq!(child.priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn test_sub_task_cap_is_enforced() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.script("atomic_detection", ATOMIC).await;
        let descriptors: Vec<String> = (0..7)
            .map(|i| format!(r#"{{"title": "part {i}", "estimatedHours": 0.1}}"#))
            .collect();
        model
            .script("decomposition", format!("[{}]", descriptors.join(",")))
            .await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let result = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(result.sub_tasks.len(), 5);
    }

    #[tokio::test]
    async fn test_cancellation_discards_partial_output() {
        let model = Arc::new(ScriptedModel::new());
        let (_dir, engine) = engine_with(model, RddConfig::default());
        let (handle, signal) = crate::CancelHandle::new();
        handle.cancel();

        let err = engine
            .decompose_task(&root_task(), &ProjectContext::default(), &signal)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_session_summary_counts_leaves() {
        let model = Arc::new(ScriptedModel::new());
        model.script("atomic_detection", NON_ATOMIC).await;
        model.script("atomic_detection", ATOMIC).await;
        model
            .script(
                "decomposition",
                r#"[{"title": "a", "estimatedHours": 0.1}, {"title": "b", "estimatedHours": 0.1}]"#,
            )
            .await;
        let (_dir, engine) = engine_with(model, RddConfig::default());

        let (result, session) = engine
            .decompose_with_session(&root_task(), &ProjectContext::default(), &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(session.total_produced, result.sub_tasks.len());
        assert_eq!(session.root_task_id, "T0001");
        assert_eq!(session.max_depth_reached, 1);
    }
}
