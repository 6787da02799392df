//! Orchestration engine
//!
//! Owns the agent registry, the pending-work queue, live assignments and
//! executions, and the workflow registry. Five independent timers drive it:
//! task scheduling, the execution watchdog, agent heartbeat checks, stale
//! workflow cleanup, and metrics snapshots. Ticks log failures instead of
//! panicking, and the scheduling tick skips itself while a previous tick is
//! still running.
//!
//! The engine is a constructed value: collaborators arrive through
//! `EngineDeps` at build time and tests create fresh engines instead of
//! resetting shared state.

use crate::agent::{Agent, AgentCapability, AgentInfo, AgentStatus};
use crate::config::EngineConfig;
use crate::execution::{ExecutionContext, ExecutionStatus};
use crate::llm::LanguageModel;
use crate::metrics::{MetricsCollector, OrchestrationMetrics};
use crate::prompts::PromptService;
use crate::recovery::{heartbeat_expired, next_retry};
use crate::scheduler::{Schedule, SchedulingEnvironment, TaskScheduler};
use crate::storage::EntityStore;
use crate::strategy::AssignmentStrategy;
use crate::types::{AtomicTask, Epic, TaskPriority, TaskStatus};
use crate::workflow::{Workflow, WorkflowEvent, WorkflowPhase, WorkflowStatus};
use crate::{CancelSignal, EngineError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle of one task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// A task handed to a specific agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub workflow_id: String,
    pub assigned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
    pub priority: TaskPriority,
    pub estimated_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_ms: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Queue state of one pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEntryStatus {
    Pending,
    Assigned,
    Completed,
    Cancelled,
}

/// Constraints the scheduler honors when picking an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntryConstraints {
    pub required_capabilities: Vec<AgentCapability>,
    pub preferred_agents: Vec<String>,
    pub excluded_agents: Vec<String>,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

/// One task waiting in the pending pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub task_id: String,
    pub workflow_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub priority: TaskPriority,
    pub dependencies: Vec<String>,
    pub constraints: ScheduleEntryConstraints,
    pub status: ScheduleEntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub estimated_duration_ms: u64,
    pub retry_count: u32,
}

/// Collaborators injected at construction.
pub struct EngineDeps {
    pub store: Option<Arc<EntityStore>>,
    pub model: Arc<dyn LanguageModel>,
    pub prompts: Arc<PromptService>,
}

/// The orchestration engine.
pub struct OrchestrationEngine {
    config: EngineConfig,
    deps: EngineDeps,
    strategy: AssignmentStrategy,
    scheduler: TaskScheduler,
    agents: DashMap<String, Agent>,
    workflows: DashMap<String, Workflow>,
    assignments: DashMap<String, TaskAssignment>,
    executions: DashMap<String, ExecutionContext>,
    pending: Arc<DashMap<String, ScheduleEntry>>,
    completed_tasks: DashMap<String, ()>,
    metrics: MetricsCollector,
    events: broadcast::Sender<WorkflowEvent>,
    round_robin_cursor: AtomicUsize,
    tick_guard: parking_lot::Mutex<()>,
    timers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl OrchestrationEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            scheduler: TaskScheduler::new(config.scheduling.clone()),
            strategy: AssignmentStrategy::default(),
            config,
            deps,
            agents: DashMap::new(),
            workflows: DashMap::new(),
            assignments: DashMap::new(),
            executions: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            completed_tasks: DashMap::new(),
            metrics: MetricsCollector::new(),
            events,
            round_robin_cursor: AtomicUsize::new(0),
            tick_guard: parking_lot::Mutex::new(()),
            timers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_strategy(mut self, strategy: AssignmentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> Arc<dyn LanguageModel> {
        self.deps.model.clone()
    }

    pub fn prompts(&self) -> Arc<PromptService> {
        self.deps.prompts.clone()
    }

    // ---- agent registry ------------------------------------------------

    /// Register an agent; it starts online with a fresh id.
    pub fn register_agent(&self, info: AgentInfo) -> String {
        let id = Uuid::new_v4().to_string();
        let agent = Agent::from_info(&id, info);
        tracing::info!(agent_id = %id, name = %agent.name, "Agent registered");
        self.agents.insert(id.clone(), agent);
        id
    }

    pub fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), EngineError> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::NotFound(format!("agent {agent_id}")))?;
        agent.status = status;
        agent.metadata.last_heartbeat = Utc::now();
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Available agents covering the requirements, least loaded first and
    /// best track record breaking ties.
    pub fn get_available_agents(&self, required: &[AgentCapability]) -> Vec<Agent> {
        let mut available: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.is_available(required))
            .map(|a| a.clone())
            .collect();
        available.sort_by(|a, b| {
            a.current_load
                .partial_cmp(&b.current_load)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.performance
                        .success_rate
                        .partial_cmp(&a.performance.success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        available
    }

    /// Agent transport: liveness signal.
    pub fn heartbeat(&self, agent_id: &str) -> Result<(), EngineError> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::NotFound(format!("agent {agent_id}")))?;
        agent.metadata.last_heartbeat = Utc::now();
        agent.performance.last_activity = Utc::now();
        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Online;
            tracing::info!(agent_id = %agent_id, "Agent back online");
        }
        Ok(())
    }

    // ---- workflows -----------------------------------------------------

    pub fn create_workflow(
        &self,
        project_id: &str,
        session_id: &str,
        initiator: &str,
    ) -> Workflow {
        let id = Uuid::new_v4().to_string();
        let workflow = Workflow::new(&id, project_id, session_id, initiator);
        self.workflows.insert(id, workflow.clone());
        workflow
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.get(workflow_id).map(|w| w.clone())
    }

    /// Drive the workflow state machine; the only mutation path for phases.
    pub fn update_workflow_phase(
        &self,
        workflow_id: &str,
        phase: WorkflowPhase,
    ) -> Result<(), EngineError> {
        let mut workflow = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id}")))?;
        if let Some(event) = workflow.transition_to(phase)? {
            tracing::info!(
                workflow_id = %workflow_id,
                from = ?event.from,
                to = ?event.to,
                "Workflow phase changed"
            );
            let _ = self.events.send(event);
        }
        Ok(())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Cancel a workflow: running executions become cancelled, their
    /// assignments go back to pending unless retries ran out.
    pub fn cancel_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        {
            let mut workflow = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id}")))?;
            workflow.status = WorkflowStatus::Cancelled;
            workflow.end_time = Some(Utc::now());
        }

        let execution_ids: Vec<String> = self
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id && !e.status.is_terminal())
            .map(|e| e.id.clone())
            .collect();
        for id in execution_ids {
            self.abort_execution(&id, ExecutionStatus::Cancelled);
        }

        let entry_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.id.clone())
            .collect();
        for id in entry_ids {
            if let Some(mut entry) = self.pending.get_mut(&id) {
                entry.status = ScheduleEntryStatus::Cancelled;
            }
        }
        Ok(())
    }

    // ---- scheduling ----------------------------------------------------

    /// Queue every scheduled task of a generated schedule behind a workflow.
    pub async fn enqueue_schedule(
        &self,
        schedule: &Schedule,
        workflow_id: &str,
    ) -> Result<usize, EngineError> {
        let mut enqueued = 0usize;
        for batch in &schedule.execution_batches {
            for task_id in &batch.task_ids {
                let scheduled = &schedule.scheduled_tasks[task_id];
                self.ensure_epic(&scheduled.task).await?;
                let entry = ScheduleEntry {
                    id: Uuid::new_v4().to_string(),
                    task_id: task_id.clone(),
                    workflow_id: workflow_id.to_string(),
                    scheduled_at: scheduled.scheduled_start,
                    priority: scheduled.task.priority,
                    dependencies: scheduled.task.dependencies.clone(),
                    constraints: ScheduleEntryConstraints {
                        required_capabilities: vec![AgentCapability::for_task_type(
                            scheduled.task.task_type,
                        )],
                        preferred_agents: Vec::new(),
                        excluded_agents: Vec::new(),
                        max_retries: self.config.orchestration.recovery.max_retries,
                        timeout_ms: self.config.orchestration.default_timeout_ms,
                    },
                    status: ScheduleEntryStatus::Pending,
                    assigned_agent: None,
                    estimated_duration_ms: crate::hours_to_duration(
                        scheduled.task.estimated_hours,
                    )
                    .as_millis() as u64,
                    retry_count: 0,
                };
                self.pending.insert(entry.id.clone(), entry);
                enqueued += 1;
            }
        }

        if let Some(mut workflow) = self.workflows.get_mut(workflow_id) {
            let mut task_ids: Vec<String> = schedule.scheduled_tasks.keys().cloned().collect();
            task_ids.sort();
            workflow.tasks = task_ids;
            let total = workflow.tasks.len();
            workflow.progress.set_total(total);
        }
        Ok(enqueued)
    }

    /// A task whose epic is unknown gets a default epic created for it.
    async fn ensure_epic(&self, task: &AtomicTask) -> Result<(), EngineError> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        if task.epic_id.trim().is_empty() || !store.epic_exists(&task.epic_id).await {
            let title = task
                .tags
                .first()
                .map(|t| format!("{t} tasks"))
                .unwrap_or_else(|| "General Tasks".to_string());
            let epic_id = if task.epic_id.trim().is_empty() {
                format!("E-{}", Uuid::new_v4())
            } else {
                task.epic_id.clone()
            };
            let mut epic = Epic::new(&epic_id, &task.project_id, title);
            epic.task_ids.push(task.id.clone());
            match store.create_epic(&epic).await {
                Ok(()) => {
                    tracing::info!(epic_id = %epic_id, task_id = %task.id, "Created default epic");
                }
                Err(EngineError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Regenerate a schedule from the project's still-pending tasks.
    pub async fn reschedule(&self, project_id: &str) -> Result<Schedule, EngineError> {
        let store = self
            .deps
            .store
            .as_ref()
            .ok_or_else(|| EngineError::Validation("rescheduling needs an entity store".into()))?;
        let tasks = store
            .get_tasks_by_status(TaskStatus::Pending, Some(project_id))
            .await?;
        let graph = crate::graph::DependencyGraph::from_tasks(project_id, &tasks);
        let env = SchedulingEnvironment {
            agents: self.agents.iter().map(|a| a.clone()).collect(),
            ..SchedulingEnvironment::default()
        };
        self.scheduler
            .generate_schedule(&tasks, &graph, project_id, &env, &CancelSignal::none())
    }

    /// One pass of the assignment loop. Skips itself when the previous pass
    /// has not finished.
    pub fn schedule_tick(&self) {
        let Some(_guard) = self.tick_guard.try_lock() else {
            tracing::debug!("Scheduling tick still running, skipping");
            return;
        };

        let mut ready: Vec<ScheduleEntry> = self
            .pending
            .iter()
            .filter(|e| e.status == ScheduleEntryStatus::Pending)
            .filter(|e| {
                e.dependencies
                    .iter()
                    .all(|d| self.completed_tasks.contains_key(d))
            })
            .map(|e| e.clone())
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .base_weight()
                .partial_cmp(&a.priority.base_weight())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
        });

        for entry in ready {
            if self.try_assign(&entry).is_none() {
                tracing::debug!(task_id = %entry.task_id, "No agent available");
            }
        }
    }

    /// Find an agent for one entry and record the assignment atomically
    /// with the agent's load update.
    fn try_assign(&self, entry: &ScheduleEntry) -> Option<String> {
        let mut pool: Vec<Agent> = self
            .get_available_agents(&entry.constraints.required_capabilities)
            .into_iter()
            .filter(|a| !entry.constraints.excluded_agents.contains(&a.id))
            .collect();
        if !entry.constraints.preferred_agents.is_empty() {
            pool.sort_by_key(|a| !entry.constraints.preferred_agents.contains(&a.id));
        }

        let cursor = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
        let agent_id = self
            .strategy
            .select(&pool, &entry.constraints.required_capabilities, cursor)?
            .id
            .clone();

        let assignment_id = Uuid::new_v4().to_string();
        {
            let mut agent = self.agents.get_mut(&agent_id)?;
            agent.current_tasks.push(entry.task_id.clone());
            agent.recompute_load();
            if !agent.has_capacity() {
                agent.status = AgentStatus::Busy;
            }
        }
        self.assignments.insert(
            assignment_id.clone(),
            TaskAssignment {
                id: assignment_id.clone(),
                task_id: entry.task_id.clone(),
                agent_id: agent_id.clone(),
                workflow_id: entry.workflow_id.clone(),
                assigned_at: Utc::now(),
                started_at: None,
                completed_at: None,
                status: AssignmentStatus::Assigned,
                priority: entry.priority,
                estimated_duration_ms: entry.estimated_duration_ms,
                actual_duration_ms: None,
                retry_count: entry.retry_count,
                max_retries: entry.constraints.max_retries,
            },
        );
        if let Some(mut workflow) = self.workflows.get_mut(&entry.workflow_id) {
            if !workflow.assigned_agents.contains(&agent_id) {
                workflow.assigned_agents.push(agent_id.clone());
            }
        }
        if let Some(mut stored) = self.pending.get_mut(&entry.id) {
            stored.status = ScheduleEntryStatus::Assigned;
            stored.assigned_agent = Some(agent_id.clone());
        }

        tracing::info!(
            task_id = %entry.task_id,
            agent_id = %agent_id,
            assignment_id = %assignment_id,
            "Task assigned"
        );
        Some(assignment_id)
    }

    pub fn get_assignment(&self, assignment_id: &str) -> Option<TaskAssignment> {
        self.assignments.get(assignment_id).map(|a| a.clone())
    }

    pub fn list_assignments(&self) -> Vec<TaskAssignment> {
        self.assignments.iter().map(|a| a.clone()).collect()
    }

    pub fn pending_entries(&self) -> Vec<ScheduleEntry> {
        self.pending.iter().map(|e| e.clone()).collect()
    }

    // ---- execution lifecycle -------------------------------------------

    /// Move an assignment into execution with the watchdog armed.
    pub fn start_execution(&self, assignment_id: &str) -> Result<String, EngineError> {
        let (task_id, agent_id, workflow_id) = {
            let mut assignment = self
                .assignments
                .get_mut(assignment_id)
                .ok_or_else(|| EngineError::NotFound(format!("assignment {assignment_id}")))?;
            if assignment.status != AssignmentStatus::Assigned {
                return Err(EngineError::Validation(format!(
                    "assignment {assignment_id} is {:?}, not assigned",
                    assignment.status
                )));
            }
            assignment.status = AssignmentStatus::Running;
            assignment.started_at = Some(Utc::now());
            (
                assignment.task_id.clone(),
                assignment.agent_id.clone(),
                assignment.workflow_id.clone(),
            )
        };

        let timeout_ms = self
            .pending
            .iter()
            .find(|e| e.task_id == task_id && e.status == ScheduleEntryStatus::Assigned)
            .map(|e| e.constraints.timeout_ms)
            .unwrap_or(self.config.orchestration.default_timeout_ms);

        let execution_id = Uuid::new_v4().to_string();
        let context = ExecutionContext::new(&execution_id, &workflow_id, &task_id, &agent_id, timeout_ms);
        self.executions.insert(execution_id.clone(), context);

        tracing::info!(
            execution_id = %execution_id,
            assignment_id = %assignment_id,
            task_id = %task_id,
            "Execution started"
        );
        Ok(execution_id)
    }

    /// Agent transport: progress signal; feeds the watchdog.
    pub fn report_progress(
        &self,
        execution_id: &str,
        progress: u8,
        logs: Vec<String>,
    ) -> Result<(), EngineError> {
        let mut execution = self
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        if execution.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "execution {execution_id} already finished"
            )));
        }
        execution.record_progress(progress, logs);
        Ok(())
    }

    /// Agent transport: terminal signal for one execution.
    pub fn report_completion(
        &self,
        execution_id: &str,
        success: bool,
        result: Option<String>,
    ) -> Result<(), EngineError> {
        let (task_id, agent_id, workflow_id, response_time_ms) = {
            let mut execution = self
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
            if execution.status.is_terminal() {
                return Err(EngineError::Validation(format!(
                    "execution {execution_id} already finished"
                )));
            }
            execution.finish(if success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            });
            if let Some(result) = result {
                let progress = execution.progress;
                execution.record_progress(progress, vec![result]);
            }
            if !success {
                execution.errors.push("agent reported failure".to_string());
            }
            (
                execution.task_id.clone(),
                execution.agent_id.clone(),
                execution.workflow_id.clone(),
                execution.metrics.response_time_ms,
            )
        };

        self.settle_assignment(
            &task_id,
            &agent_id,
            &workflow_id,
            if success {
                AssignmentStatus::Completed
            } else {
                AssignmentStatus::Failed
            },
            response_time_ms,
        );
        Ok(())
    }

    /// Shared terminal path for completion, failure, timeout, and
    /// cancellation of the active assignment for `task_id`.
    fn settle_assignment(
        &self,
        task_id: &str,
        agent_id: &str,
        workflow_id: &str,
        outcome: AssignmentStatus,
        response_time_ms: u64,
    ) {
        let success = outcome == AssignmentStatus::Completed;

        let (retry_count, max_retries) = {
            let assignment = self.assignments.iter_mut().find(|a| {
                a.task_id == task_id
                    && matches!(a.status, AssignmentStatus::Assigned | AssignmentStatus::Running)
            });
            match assignment {
                Some(mut assignment) => {
                    assignment.status = outcome;
                    assignment.completed_at = Some(Utc::now());
                    if let Some(started) = assignment.started_at {
                        assignment.actual_duration_ms =
                            Some((Utc::now() - started).num_milliseconds().max(0) as u64);
                    }
                    (assignment.retry_count, assignment.max_retries)
                }
                None => (0, 0),
            }
        };

        if let Some(mut agent) = self.agents.get_mut(agent_id) {
            agent.current_tasks.retain(|t| t != task_id);
            agent.recompute_load();
            if agent.status == AgentStatus::Busy && agent.has_capacity() {
                agent.status = AgentStatus::Online;
            }
            agent.performance.last_activity = Utc::now();
            // Exponential moving average over task duration.
            agent.performance.average_task_time_ms = if agent.performance.average_task_time_ms == 0.0 {
                response_time_ms as f64
            } else {
                agent.performance.average_task_time_ms * 0.8 + response_time_ms as f64 * 0.2
            };
            if success {
                agent.performance.success_rate = (agent.performance.success_rate + 0.01).min(1.0);
            } else {
                agent.performance.error_rate = (agent.performance.error_rate + 0.01).min(1.0);
                agent.performance.success_rate = (agent.performance.success_rate - 0.01).max(0.0);
            }
        }

        self.metrics.record_completion(success, response_time_ms);

        let retrying = if success {
            false
        } else {
            let decision = next_retry(&self.config.orchestration.recovery, retry_count);
            if decision.retry && retry_count < max_retries {
                self.requeue_task(task_id, decision.delay_ms);
                true
            } else {
                false
            }
        };

        if success {
            self.completed_tasks.insert(task_id.to_string(), ());
            self.mark_entry(task_id, ScheduleEntryStatus::Completed);
        }

        if !retrying && outcome != AssignmentStatus::Cancelled {
            if let Some(mut workflow) = self.workflows.get_mut(workflow_id) {
                workflow.progress.record_completion(success);
            }
            if !success {
                // Out of retries: the workflow diverts to error recovery.
                let _ = self.update_workflow_phase(workflow_id, WorkflowPhase::ErrorRecovery);
            }

            // Reflect the outcome on the stored task off the hot path.
            if let Some(store) = &self.deps.store {
                let store = Arc::clone(store);
                let task_id = task_id.to_string();
                let status = if success { TaskStatus::Completed } else { TaskStatus::Blocked };
                tokio::spawn(async move {
                    match store.get_task(&task_id).await {
                        Ok(mut task) => {
                            task.status = status;
                            task.actual_hours = Some(response_time_ms as f64 / 3_600_000.0);
                            task.updated_at = Utc::now();
                            if let Err(err) = store.update_task(&task).await {
                                tracing::warn!(task_id = %task_id, error = %err, "Task outcome not persisted");
                            }
                        }
                        Err(EngineError::NotFound(_)) => {}
                        Err(err) => {
                            tracing::warn!(task_id = %task_id, error = %err, "Task outcome not persisted");
                        }
                    }
                });
            }
        }

        tracing::info!(
            task_id = %task_id,
            agent_id = %agent_id,
            outcome = ?outcome,
            retrying,
            "Assignment settled"
        );
    }

    fn mark_entry(&self, task_id: &str, status: ScheduleEntryStatus) {
        let entry_id = self
            .pending
            .iter()
            .find(|e| e.task_id == task_id && e.status == ScheduleEntryStatus::Assigned)
            .map(|e| e.id.clone());
        if let Some(id) = entry_id {
            if let Some(mut entry) = self.pending.get_mut(&id) {
                entry.status = status;
            }
        }
    }

    /// Return a task to the pending pool after `delay_ms`, bumping its
    /// retry count.
    fn requeue_task(&self, task_id: &str, delay_ms: u64) {
        let entry_id = self
            .pending
            .iter()
            .find(|e| e.task_id == task_id && e.status == ScheduleEntryStatus::Assigned)
            .map(|e| e.id.clone());
        let Some(entry_id) = entry_id else {
            return;
        };

        let revert = {
            let pending = Arc::clone(&self.pending);
            move || {
                if let Some(mut entry) = pending.get_mut(&entry_id) {
                    // A workflow cancelled in the meantime wins.
                    if entry.status != ScheduleEntryStatus::Assigned {
                        return;
                    }
                    entry.status = ScheduleEntryStatus::Pending;
                    entry.assigned_agent = None;
                    entry.retry_count += 1;
                    tracing::info!(task_id = %entry.task_id, retry = entry.retry_count, "Task requeued");
                }
            }
        };

        if delay_ms == 0 {
            revert();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                revert();
            });
        }
    }

    fn abort_execution(&self, execution_id: &str, status: ExecutionStatus) {
        let info = {
            let mut execution = match self.executions.get_mut(execution_id) {
                Some(e) => e,
                None => return,
            };
            if execution.status.is_terminal() {
                return;
            }
            execution.finish(status);
            (
                execution.task_id.clone(),
                execution.agent_id.clone(),
                execution.workflow_id.clone(),
                execution.metrics.response_time_ms,
            )
        };
        let outcome = match status {
            ExecutionStatus::Timeout => AssignmentStatus::Timeout,
            ExecutionStatus::Cancelled => AssignmentStatus::Cancelled,
            _ => AssignmentStatus::Failed,
        };
        self.settle_assignment(&info.0, &info.1, &info.2, outcome, info.3);
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.executions.get(execution_id).map(|e| e.clone())
    }

    // ---- timers --------------------------------------------------------

    /// One watchdog pass: silent executions accrue violations; the third
    /// strike times the execution out.
    pub fn watchdog_tick(&self) {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        for mut execution in self.executions.iter_mut() {
            if execution.status != ExecutionStatus::Running || !execution.watchdog.enabled {
                continue;
            }
            if execution.silence_ms(now) > execution.watchdog.timeout_ms {
                execution.watchdog.violations += 1;
                tracing::warn!(
                    execution_id = %execution.id,
                    violations = execution.watchdog.violations,
                    "Watchdog violation"
                );
                if execution.watchdog.violations >= 3 {
                    timed_out.push(execution.id.clone());
                }
            }
        }
        for id in timed_out {
            self.abort_execution(&id, ExecutionStatus::Timeout);
        }
    }

    /// One heartbeat pass: silent agents go offline and shed their work.
    pub fn heartbeat_tick(&self) {
        let now = Utc::now();
        let timeout_ms = self.config.orchestration.heartbeat_timeout_ms;
        let lost: Vec<String> = self
            .agents
            .iter()
            .filter(|a| a.status != AgentStatus::Offline && heartbeat_expired(&a, timeout_ms, now))
            .map(|a| a.id.clone())
            .collect();

        for agent_id in lost {
            tracing::warn!(agent_id = %agent_id, "Agent heartbeat lost, marking offline");
            let executions: Vec<String> = self
                .executions
                .iter()
                .filter(|e| e.agent_id == agent_id && !e.status.is_terminal())
                .map(|e| e.id.clone())
                .collect();
            for id in executions {
                self.abort_execution(&id, ExecutionStatus::Cancelled);
            }
            if let Some(mut agent) = self.agents.get_mut(&agent_id) {
                agent.status = AgentStatus::Offline;
                agent.current_tasks.clear();
                agent.recompute_load();
            }
        }
    }

    /// Garbage-collect workflows finished longer ago than the retention
    /// window, together with their assignments and executions.
    pub fn cleanup_tick(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::milliseconds(self.config.orchestration.workflow_retention_ms as i64);
        let stale: Vec<String> = self
            .workflows
            .iter()
            .filter(|w| w.is_finished() && w.end_time.map(|t| t < cutoff).unwrap_or(false))
            .map(|w| w.id.clone())
            .collect();

        for workflow_id in stale {
            self.workflows.remove(&workflow_id);
            self.assignments.retain(|_, a| a.workflow_id != workflow_id);
            self.executions.retain(|_, e| e.workflow_id != workflow_id);
            self.pending.retain(|_, e| e.workflow_id != workflow_id);
            tracing::info!(workflow_id = %workflow_id, "Stale workflow cleaned up");
        }
    }

    /// Metrics snapshot; also persists registry snapshots when a store is
    /// attached.
    pub async fn metrics_tick(&self) {
        let snapshot = self.get_metrics();
        tracing::info!(
            agents = self.agents.len(),
            workflows = self.workflows.len(),
            throughput_per_minute = snapshot.throughput_per_minute,
            success_rate = snapshot.success_rate,
            "Orchestration metrics"
        );
        if let Some(store) = &self.deps.store {
            let agents: Vec<Agent> = self.agents.iter().map(|a| a.clone()).collect();
            let workflows: Vec<Workflow> = self.workflows.iter().map(|w| w.clone()).collect();
            if let Err(err) = store.snapshot_agents(&agents).await {
                tracing::warn!(error = %err, "Agent snapshot failed");
            }
            if let Err(err) = store.snapshot_workflows(&workflows).await {
                tracing::warn!(error = %err, "Workflow snapshot failed");
            }
        }
    }

    pub fn get_metrics(&self) -> OrchestrationMetrics {
        let agents: Vec<Agent> = self.agents.iter().map(|a| a.clone()).collect();
        let workflows: Vec<Workflow> = self.workflows.iter().map(|w| w.clone()).collect();
        let executions: Vec<ExecutionContext> =
            self.executions.iter().map(|e| e.clone()).collect();
        self.metrics.snapshot(&agents, &workflows, &executions)
    }

    /// Spawn the five periodic timers. Idempotent only in the sense that a
    /// second call adds nothing while timers are alive; `shutdown` stops
    /// them.
    pub fn start(self: &Arc<Self>) {
        let mut timers = self.timers.lock();
        if !timers.is_empty() {
            return;
        }

        let intervals = [
            self.config.scheduling.scheduling_interval_ms,
            self.config.orchestration.watchdog_interval_ms,
            self.config.orchestration.heartbeat_interval_ms,
            self.config.orchestration.cleanup_interval_ms,
            self.config.orchestration.metrics_interval_ms,
        ];

        let engine = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_ms(intervals[0]);
            loop {
                ticker.tick().await;
                engine.schedule_tick();
            }
        }));

        let engine = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_ms(intervals[1]);
            loop {
                ticker.tick().await;
                engine.watchdog_tick();
            }
        }));

        let engine = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_ms(intervals[2]);
            loop {
                ticker.tick().await;
                engine.heartbeat_tick();
            }
        }));

        let engine = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_ms(intervals[3]);
            loop {
                ticker.tick().await;
                engine.cleanup_tick();
            }
        }));

        let engine = Arc::clone(self);
        timers.push(tokio::spawn(async move {
            let mut ticker = interval_ms(intervals[4]);
            loop {
                ticker.tick().await;
                engine.metrics_tick().await;
            }
        }));

        tracing::info!("Orchestration timers started");
    }

    pub fn shutdown(&self) {
        let mut timers = self.timers.lock();
        for timer in timers.drain(..) {
            timer.abort();
        }
        tracing::info!("Orchestration timers stopped");
    }
}

impl Drop for OrchestrationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn interval_ms(ms: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}
