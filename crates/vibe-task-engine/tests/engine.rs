//! End-to-end engine tests: decompose, persist, schedule, orchestrate.

use std::collections::HashMap;
use std::sync::Arc;
use vibe_task_engine::orchestrator::{AssignmentStatus, ScheduleEntryStatus};
use vibe_task_engine::types::DependencyType;
use vibe_task_engine::{
    AgentCapability, AgentInfo, AtomicTask, CancelSignal, DecompositionEngine, DependencyGraph,
    EngineConfig, EngineDeps, EntityStore, OrchestrationEngine, Project, ProjectContext,
    PromptService, ScriptedModel, SchedulingEnvironment, TaskPriority, TaskScheduler, TaskStatus,
    WorkflowPhase, WorkflowStatus,
};

const NON_ATOMIC: &str = r#"{"isAtomic": false, "confidence": 0.95, "reasoning": "multi-feature"}"#;
const ATOMIC: &str = r#"{"isAtomic": true, "confidence": 0.9, "reasoning": "single concern"}"#;

fn worker(name: &str) -> AgentInfo {
    AgentInfo {
        name: name.to_string(),
        capabilities: vec![
            AgentCapability::TaskExecution,
            AgentCapability::CodeGeneration,
        ],
        max_concurrent_tasks: 2,
        version: "1.0".into(),
        endpoint: None,
        heartbeat_interval_ms: 30_000,
    }
}

async fn scripted_split_model() -> Arc<ScriptedModel> {
    let model = Arc::new(ScriptedModel::new());
    model.script("atomic_detection", NON_ATOMIC).await;
    model.script("atomic_detection", ATOMIC).await;
    model
        .script(
            "decomposition",
            r#"[
                {"title": "Implement user authentication", "estimatedHours": 0.2,
                 "acceptanceCriteria": ["login returns a token"], "filePaths": ["src/auth.rs"]},
                {"title": "Implement profile management", "estimatedHours": 0.2,
                 "acceptanceCriteria": ["profile saves"], "dependencies": [1]}
            ]"#,
        )
        .await;
    model
}

#[tokio::test]
async fn test_decompose_persist_schedule_execute_cycle() {
    let data_dir = tempfile::tempdir().unwrap();
    let prompt_dir = tempfile::tempdir().unwrap();

    let store = Arc::new(EntityStore::new(data_dir.path()));
    store.initialize().await.unwrap();
    let model = scripted_split_model().await;
    let prompts = Arc::new(PromptService::new(prompt_dir.path()));

    let project = Project::new("P001", "demo", "/tmp/demo");
    store.create_project(&project).await.unwrap();

    // Decompose the incoming request into atomic tasks.
    let mut root = AtomicTask::new("T0001", "P001", "E001", "Implement user management system");
    root.estimated_hours = 12.0;
    root.acceptance_criteria = vec!["full user lifecycle supported".into()];
    let context = ProjectContext {
        project_id: "P001".into(),
        languages: vec!["typescript".into()],
        frameworks: vec!["react".into()],
        ..ProjectContext::default()
    };

    let config = EngineConfig::default();
    let rdd = DecompositionEngine::new(model.clone(), prompts.clone(), config.rdd);
    let result = rdd
        .decompose_task(&root, &context, &CancelSignal::none())
        .await
        .unwrap();
    assert!(!result.is_atomic);
    assert_eq!(result.sub_tasks.len(), 2);
    assert_eq!(result.sub_tasks[0].id, "T0001-01");

    // Persist tasks and their dependency edge.
    for task in &result.sub_tasks {
        store.create_task(task).await.unwrap();
        for dep in &task.dependencies {
            let edge = vibe_task_engine::Dependency::new(
                format!("D-{}-{}", dep, task.id),
                dep,
                &task.id,
                DependencyType::Blocks,
            );
            store.create_dependency(&edge).await.unwrap();
        }
    }
    let stored = store.get_task("T0001-01").await.unwrap();
    assert_eq!(stored, result.sub_tasks[0]);

    // Schedule the pending tasks.
    let tasks = store.list_tasks(Some("P001")).await.unwrap();
    let graph = DependencyGraph::from_tasks("P001", &tasks);
    store.save_graph(&graph.to_snapshot()).await.unwrap();
    let scheduler = TaskScheduler::new(config.scheduling.clone());
    let schedule = scheduler
        .generate_schedule(
            &tasks,
            &graph,
            "P001",
            &SchedulingEnvironment::default(),
            &CancelSignal::none(),
        )
        .unwrap();
    assert_eq!(schedule.execution_batches.len(), 2);
    assert_eq!(schedule.execution_batches[0].task_ids, vec!["T0001-01"]);

    // Orchestrate the schedule to completion.
    let mut engine_config = EngineConfig::default();
    engine_config.orchestration.recovery.retry_delay_ms = 0;
    let engine = OrchestrationEngine::new(
        engine_config,
        EngineDeps {
            store: Some(store.clone()),
            model,
            prompts,
        },
    );
    engine.register_agent(worker("w1"));

    let workflow = engine.create_workflow("P001", "session-1", "request-handler");
    for phase in [
        WorkflowPhase::Decomposition,
        WorkflowPhase::Planning,
        WorkflowPhase::Assignment,
    ] {
        engine.update_workflow_phase(&workflow.id, phase).unwrap();
    }
    let enqueued = engine.enqueue_schedule(&schedule, &workflow.id).await.unwrap();
    assert_eq!(enqueued, 2);

    // The unknown epic was replaced by an auto-created one.
    assert!(store.epic_exists("E001").await);

    engine.update_workflow_phase(&workflow.id, WorkflowPhase::Execution).unwrap();

    // First pass assigns only the dependency-free task.
    engine.schedule_tick();
    let first = engine
        .pending_entries()
        .into_iter()
        .find(|e| e.task_id == "T0001-01")
        .unwrap();
    assert_eq!(first.status, ScheduleEntryStatus::Assigned);
    let held_back = engine
        .pending_entries()
        .into_iter()
        .find(|e| e.task_id == "T0001-02")
        .unwrap();
    assert_eq!(held_back.status, ScheduleEntryStatus::Pending);

    let assignment_id = find_assignment(&engine, "T0001-01");
    let execution_id = engine.start_execution(&assignment_id).unwrap();
    engine
        .report_progress(&execution_id, 50, vec!["implementing".into()])
        .unwrap();
    engine.report_completion(&execution_id, true, Some("done".into())).unwrap();

    // The dependent task becomes assignable once its dependency completed.
    engine.schedule_tick();
    let assignment_id = find_assignment(&engine, "T0001-02");
    let execution_id = engine.start_execution(&assignment_id).unwrap();
    engine.report_completion(&execution_id, true, None).unwrap();

    let workflow = engine.get_workflow(&workflow.id).unwrap();
    assert_eq!(workflow.progress.completed, 2);
    assert!((workflow.progress.percentage - 100.0).abs() < 1e-9);

    for phase in [
        WorkflowPhase::Monitoring,
        WorkflowPhase::Validation,
        WorkflowPhase::Completion,
    ] {
        engine.update_workflow_phase(&workflow.id, phase).unwrap();
    }
    let workflow = engine.get_workflow(&workflow.id).unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    // The stored task eventually reflects the outcome.
    let mut persisted = store.get_task("T0001-01").await.unwrap();
    for _ in 0..50 {
        if persisted.status == TaskStatus::Completed {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        persisted = store.get_task("T0001-01").await.unwrap();
    }
    assert_eq!(persisted.status, TaskStatus::Completed);
    assert!(persisted.actual_hours.is_some());

    let metrics = engine.get_metrics();
    assert_eq!(metrics.tasks_completed_total, 2);
    assert!((metrics.success_rate - 1.0).abs() < 1e-9);
}

fn find_assignment(engine: &OrchestrationEngine, task_id: &str) -> String {
    engine
        .list_assignments()
        .into_iter()
        .find(|a| a.task_id == task_id && a.status == AssignmentStatus::Assigned)
        .map(|a| a.id)
        .expect("assignment exists")
}

#[tokio::test]
async fn test_hybrid_assignment_spreads_load() {
    let mut config = EngineConfig::default();
    config.orchestration.recovery.retry_delay_ms = 0;
    let engine = OrchestrationEngine::new(
        config,
        EngineDeps {
            store: None,
            model: Arc::new(ScriptedModel::new()),
            prompts: Arc::new(PromptService::new("prompts")),
        },
    );
    let a1 = engine.register_agent(worker("w1"));
    let a2 = engine.register_agent(worker("w2"));
    let workflow = engine.create_workflow("P1", "S1", "test");

    let schedule = one_shot_schedule(&["T1", "T2"]);
    engine.enqueue_schedule(&schedule, &workflow.id).await.unwrap();
    engine.schedule_tick();

    let load_a1 = engine.get_agent(&a1).unwrap().current_tasks.len();
    let load_a2 = engine.get_agent(&a2).unwrap().current_tasks.len();
    assert_eq!(load_a1 + load_a2, 2);
    assert_eq!(load_a1, 1, "hybrid strategy should spread identical tasks");
    assert_eq!(load_a2, 1);
}

/// Build a single-batch schedule over independent pending tasks.
fn one_shot_schedule(task_ids: &[&str]) -> vibe_task_engine::Schedule {
    let tasks: Vec<AtomicTask> = task_ids
        .iter()
        .map(|id| {
            let mut t = AtomicTask::new(*id, "P1", "E1", format!("work {id}"));
            t.estimated_hours = 0.1;
            t.priority = TaskPriority::Medium;
            t
        })
        .collect();
    let graph = DependencyGraph::from_tasks("P1", &tasks);
    TaskScheduler::new(EngineConfig::default().scheduling)
        .generate_schedule(
            &tasks,
            &graph,
            "P1",
            &SchedulingEnvironment::default(),
            &CancelSignal::none(),
        )
        .unwrap()
}

#[tokio::test]
async fn test_priority_first_scenario_orders_batches() {
    let mut t1 = AtomicTask::new("T001", "P1", "E1", "base work");
    t1.priority = TaskPriority::High;
    t1.estimated_hours = 0.1;
    let mut t2 = AtomicTask::new("T002", "P1", "E1", "urgent follow-up");
    t2.priority = TaskPriority::Critical;
    t2.estimated_hours = 0.1;
    t2.dependencies = vec!["T001".into()];
    let mut t3 = AtomicTask::new("T003", "P1", "E1", "nice to have");
    t3.priority = TaskPriority::Medium;
    t3.estimated_hours = 0.1;
    t3.dependencies = vec!["T001".into()];

    let tasks = vec![t1, t2, t3];
    let graph = DependencyGraph::from_tasks("P1", &tasks);
    let mut scheduling = EngineConfig::default().scheduling;
    scheduling.algorithm = vibe_task_engine::SchedulingAlgorithm::PriorityFirst;
    let schedule = TaskScheduler::new(scheduling)
        .generate_schedule(
            &tasks,
            &graph,
            "P1",
            &SchedulingEnvironment::default(),
            &CancelSignal::none(),
        )
        .unwrap();

    assert_eq!(schedule.execution_batches.len(), 2);
    assert_eq!(schedule.execution_batches[0].task_ids, vec!["T001"]);
    assert_eq!(schedule.execution_batches[1].task_ids, vec!["T002", "T003"]);

    let batched: usize = schedule
        .execution_batches
        .iter()
        .map(|b| b.task_ids.len())
        .sum();
    assert_eq!(batched, schedule.scheduled_tasks.len());
}

#[tokio::test]
async fn test_prompt_files_feed_the_detector() {
    let prompt_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(
        prompt_dir.path().join("atomic_detection.yaml"),
        "system_prompt: generic\nversion: \"2.0\"\ncompatibility: [engine-1]\natomic_detection_prompt: \"judge {{title}}\"\n",
    )
    .await
    .unwrap();
    let prompts = Arc::new(PromptService::new(prompt_dir.path()));
    let vars = HashMap::from([("title".to_string(), "Fix typo".to_string())]);
    assert_eq!(
        prompts.get_prompt_with_variables("atomic_detection", &vars).await,
        "judge Fix typo"
    );
    assert_eq!(
        prompts.get_available_prompt_types().await.unwrap(),
        vec!["atomic_detection".to_string()]
    );
}
