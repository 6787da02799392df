//! Schedule generation
//!
//! Turns a pending task set plus its dependency graph into ordered parallel
//! batches with per-task resource allocations and a projected timeline.
//! Batches never span topological layers, so a task always starts after
//! every hard dependency has finished. Tasks caught in a dependency cycle
//! are flagged and scheduled around, never crashed on.

use crate::agent::{Agent, AgentCapability};
use crate::config::{SchedulingAlgorithm, SchedulingConfig};
use crate::graph::DependencyGraph;
use crate::types::{AtomicTask, TaskStatus, TaskType};
use crate::{CancelSignal, EngineError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Floor applied to zero-hour estimates so ordering survives without
/// collapsing the timeline.
const MIN_TASK_HOURS: f64 = 0.01;

/// Live facts about the machine and agent pool at scheduling time.
#[derive(Debug, Clone, Default)]
pub struct SchedulingEnvironment {
    pub free_memory_mb: Option<usize>,
    pub cpu_utilization: Option<f64>,
    pub agents: Vec<Agent>,
}

/// Score components for one task; `total` depends on the algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub priority_score: f64,
    pub resource_score: f64,
    pub deadline_score: f64,
    pub system_load_score: f64,
    pub complexity_score: f64,
    pub business_impact_score: f64,
    pub agent_availability_score: f64,
    pub dependency_score: f64,
    pub total_score: f64,
}

/// Resources reserved for one scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedResources {
    pub memory_mb: usize,
    pub cpu_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// One task placed on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task: AtomicTask,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub assigned_resources: AssignedResources,
    pub metadata: ScoreBreakdown,
}

/// Tasks safe to run in parallel, ordered by descending score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub batch_id: String,
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_duration_hours: f64,
    pub parallelism_factor: f64,
    pub critical_path: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub peak_memory_mb: usize,
    pub average_cpu_utilization: f64,
    pub agent_utilization: f64,
    pub resource_efficiency: f64,
}

/// Non-fatal findings attached to a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDiagnostics {
    pub blocked_by_cycle: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleMetadata {
    pub created_at: DateTime<Utc>,
    pub task_count: usize,
    pub batch_count: usize,
}

/// Complete schedule for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub project_id: String,
    pub algorithm: SchedulingAlgorithm,
    pub scheduled_tasks: HashMap<String, ScheduledTask>,
    pub execution_batches: Vec<ExecutionBatch>,
    pub timeline: Timeline,
    pub resource_utilization: ResourceUtilization,
    pub diagnostics: ScheduleDiagnostics,
    pub metadata: ScheduleMetadata,
}

/// Multi-algorithm task scheduler.
pub struct TaskScheduler {
    config: SchedulingConfig,
}

impl TaskScheduler {
    pub fn new(config: SchedulingConfig) -> Self {
        Self { config }
    }

    /// Produce a schedule for the pending tasks of one project.
    pub fn generate_schedule(
        &self,
        tasks: &[AtomicTask],
        graph: &DependencyGraph,
        project_id: &str,
        env: &SchedulingEnvironment,
        cancel: &CancelSignal,
    ) -> Result<Schedule, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if tasks.is_empty() {
            return Err(EngineError::Validation("no tasks to schedule".into()));
        }
        for task in tasks {
            task.validate()?;
        }

        let pending: Vec<&AtomicTask> =
            tasks.iter().filter(|t| t.status == TaskStatus::Pending).collect();

        let cyclic = graph.cyclic_tasks();
        let diagnostics = ScheduleDiagnostics {
            blocked_by_cycle: pending
                .iter()
                .filter(|t| cyclic.contains(&t.id))
                .map(|t| t.id.clone())
                .collect(),
        };
        if !diagnostics.blocked_by_cycle.is_empty() {
            tracing::warn!(
                project_id = %project_id,
                blocked = diagnostics.blocked_by_cycle.len(),
                "Scheduling around tasks blocked by a dependency cycle"
            );
        }

        let schedulable: Vec<&AtomicTask> = pending
            .iter()
            .copied()
            .filter(|t| !diagnostics.blocked_by_cycle.contains(&t.id))
            .collect();

        let scores = self.score_tasks(&schedulable, graph, env);
        let layers = self.layered_order(&schedulable, graph);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (batches, scheduled_tasks, peak_memory, cpu_fractions) =
            self.pack_batches(&layers, &scores);

        let timeline = self.build_timeline(&scheduled_tasks, graph);
        let resource_utilization = self.utilization(&batches, peak_memory, &cpu_fractions, &timeline);

        let schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            algorithm: self.config.algorithm,
            metadata: ScheduleMetadata {
                created_at: Utc::now(),
                task_count: scheduled_tasks.len(),
                batch_count: batches.len(),
            },
            scheduled_tasks,
            execution_batches: batches,
            timeline,
            resource_utilization,
            diagnostics,
        };

        tracing::info!(
            project_id = %project_id,
            algorithm = ?schedule.algorithm,
            tasks = schedule.metadata.task_count,
            batches = schedule.metadata.batch_count,
            "Schedule generated"
        );
        Ok(schedule)
    }

    // ---- scoring -------------------------------------------------------

    fn score_tasks(
        &self,
        tasks: &[&AtomicTask],
        graph: &DependencyGraph,
        env: &SchedulingEnvironment,
    ) -> HashMap<String, ScoreBreakdown> {
        let max_downstream = tasks
            .iter()
            .map(|t| graph.downstream_count(&t.id))
            .max()
            .unwrap_or(0)
            .max(1);
        let chains = graph.remaining_chain_hours();
        let max_chain = chains.values().copied().fold(0.0_f64, f64::max).max(MIN_TASK_HOURS);
        let system_load = self.system_load_score(env);

        tasks
            .iter()
            .map(|task| {
                let breakdown = self.score_one(task, graph, env, max_downstream, &chains, max_chain, system_load);
                (task.id.clone(), breakdown)
            })
            .collect()
    }

    fn score_one(
        &self,
        task: &AtomicTask,
        graph: &DependencyGraph,
        env: &SchedulingEnvironment,
        max_downstream: usize,
        chains: &HashMap<String, f64>,
        max_chain: f64,
        system_load_score: f64,
    ) -> ScoreBreakdown {
        let weights = &self.config.priority_weights;
        let max_weight = weights
            .low
            .max(weights.medium)
            .max(weights.high)
            .max(weights.critical)
            .max(f64::EPSILON);
        let priority_score = weights.for_priority(task.priority) / max_weight;

        let dependency_score = graph.downstream_count(&task.id) as f64 / max_downstream as f64;

        // Slack shrinks as the remaining chain approaches the critical path.
        let deadline_score = (chains.get(&task.id).copied().unwrap_or(effective_hours(task))
            / max_chain)
            .min(1.0);

        let profile = self.config.profile_for(task.task_type);
        let memory_fraction =
            (profile.memory_mb as f64 / self.config.max_memory_mb.max(1) as f64).min(1.0);
        let resource_score = 1.0 - memory_fraction;

        let complexity_raw = 0.3 * task.file_paths.len() as f64
            + 0.3 * task.dependencies.len() as f64
            + 0.2 * task.acceptance_criteria.len() as f64
            + 0.2 * task
                .file_paths
                .iter()
                .filter(|p| p.contains("test"))
                .count() as f64;
        let complexity_score = 1.0 / (1.0 + complexity_raw);

        let business_impact_score = business_impact(task, priority_score);

        let required = [AgentCapability::for_task_type(task.task_type)];
        let agent_availability_score = if env.agents.is_empty() {
            0.5
        } else {
            env.agents
                .iter()
                .filter(|a| a.covers(&required))
                .count() as f64
                / env.agents.len() as f64
        };

        let shortest_job_score = 1.0 / (1.0 + effective_hours(task));

        let total_score = match self.config.algorithm {
            SchedulingAlgorithm::PriorityFirst => priority_score,
            SchedulingAlgorithm::EarliestDeadline => deadline_score,
            SchedulingAlgorithm::ShortestJob => shortest_job_score,
            SchedulingAlgorithm::CriticalPath => deadline_score.max(dependency_score),
            SchedulingAlgorithm::ResourceAware => 0.6 * resource_score + 0.4 * system_load_score,
            SchedulingAlgorithm::HybridOptimal => {
                0.35 * dependency_score
                    + 0.25 * deadline_score
                    + 0.20 * system_load_score
                    + 0.10 * complexity_score
                    + 0.05 * business_impact_score
                    + 0.05 * agent_availability_score
            }
        };

        ScoreBreakdown {
            priority_score,
            resource_score,
            deadline_score,
            system_load_score,
            complexity_score,
            business_impact_score,
            agent_availability_score,
            dependency_score,
            total_score,
        }
    }

    fn system_load_score(&self, env: &SchedulingEnvironment) -> f64 {
        let memory_free = env
            .free_memory_mb
            .map(|free| (free as f64 / self.config.max_memory_mb.max(1) as f64).min(1.0))
            .unwrap_or(1.0);
        let cpu_free = env
            .cpu_utilization
            .map(|used| (1.0 - used).clamp(0.0, 1.0))
            .unwrap_or(1.0);
        0.5 * memory_free + 0.5 * cpu_free
    }

    // ---- batching ------------------------------------------------------

    /// Group schedulable tasks by topological layer, keeping input order
    /// for tasks the graph does not know (they act as roots).
    fn layered_order<'a>(
        &self,
        tasks: &[&'a AtomicTask],
        graph: &DependencyGraph,
    ) -> Vec<Vec<&'a AtomicTask>> {
        let mut layer_of: HashMap<&str, usize> = HashMap::new();
        let layers = graph.topological_layers();
        for (i, layer) in layers.iter().enumerate() {
            for id in layer {
                layer_of.insert(id.as_str(), i + 1);
            }
        }

        let mut grouped: Vec<(usize, Vec<&AtomicTask>)> = Vec::new();
        for task in tasks {
            let layer = layer_of.get(task.id.as_str()).copied().unwrap_or(0);
            match grouped.iter_mut().find(|(l, _)| *l == layer) {
                Some((_, bucket)) => bucket.push(task),
                None => grouped.push((layer, vec![task])),
            }
        }
        grouped.sort_by_key(|(layer, _)| *layer);
        grouped.into_iter().map(|(_, bucket)| bucket).collect()
    }

    /// Greedy packing: within a layer, take tasks by descending score into
    /// batches bounded by concurrency and the memory envelope.
    fn pack_batches(
        &self,
        layers: &[Vec<&AtomicTask>],
        scores: &HashMap<String, ScoreBreakdown>,
    ) -> (Vec<ExecutionBatch>, HashMap<String, ScheduledTask>, usize, Vec<f64>) {
        let batch_cap = self.config.max_concurrent_tasks.min(self.config.batch_size).max(1);
        let cpu_budget =
            (self.config.max_cpu_utilization * self.config.available_agents as f64).max(f64::EPSILON);

        let mut batches = Vec::new();
        let mut scheduled = HashMap::new();
        let mut peak_memory = 0usize;
        let mut cpu_fractions = Vec::new();
        let mut cursor = Utc::now();

        for layer in layers {
            let mut ordered: Vec<&AtomicTask> = layer.clone();
            ordered.sort_by(|a, b| {
                let sa = scores[&a.id].total_score;
                let sb = scores[&b.id].total_score;
                sb.partial_cmp(&sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });

            let mut remaining = ordered.as_slice();
            while !remaining.is_empty() {
                let mut batch_ids = Vec::new();
                let mut batch_memory = 0usize;
                let mut batch_cpu = 0.0_f64;
                let mut batch_end = cursor;
                let mut taken = 0usize;

                for task in remaining {
                    if batch_ids.len() >= batch_cap {
                        break;
                    }
                    let profile = self.config.profile_for(task.task_type);
                    let memory = profile.memory_mb.min(self.config.max_memory_mb);
                    if !batch_ids.is_empty()
                        && (batch_memory + memory > self.config.max_memory_mb
                            || batch_cpu + profile.cpu_weight > cpu_budget)
                    {
                        break;
                    }
                    batch_memory += memory;
                    batch_cpu += profile.cpu_weight;
                    taken += 1;

                    let hours = effective_hours(task);
                    let start = cursor;
                    let end = start + Duration::milliseconds((hours * 3_600_000.0) as i64);
                    batch_end = batch_end.max(end);

                    scheduled.insert(
                        task.id.clone(),
                        ScheduledTask {
                            task: (*task).clone(),
                            scheduled_start: start,
                            scheduled_end: end,
                            assigned_resources: AssignedResources {
                                memory_mb: memory,
                                cpu_weight: profile.cpu_weight,
                                agent_id: None,
                            },
                            metadata: scores[&task.id],
                        },
                    );
                    batch_ids.push(task.id.clone());
                }

                remaining = &remaining[taken..];
                peak_memory = peak_memory.max(batch_memory);
                cpu_fractions.push((batch_cpu / cpu_budget).min(1.0));
                batches.push(ExecutionBatch {
                    batch_id: format!("batch-{:03}", batches.len() + 1),
                    task_ids: batch_ids,
                });
                // The next batch starts when everything in this one is done.
                cursor = batch_end;
            }
        }

        (batches, scheduled, peak_memory, cpu_fractions)
    }

    fn build_timeline(
        &self,
        scheduled: &HashMap<String, ScheduledTask>,
        graph: &DependencyGraph,
    ) -> Timeline {
        let start = scheduled
            .values()
            .map(|t| t.scheduled_start)
            .min()
            .unwrap_or_else(Utc::now);
        let end = scheduled
            .values()
            .map(|t| t.scheduled_end)
            .max()
            .unwrap_or(start);
        let total_ms = (end - start).num_milliseconds().max(0) as f64;
        let total_duration_hours = total_ms / 3_600_000.0;
        let work_hours: f64 = scheduled.values().map(|t| effective_hours(&t.task)).sum();
        let parallelism_factor = if total_duration_hours > 0.0 {
            work_hours / total_duration_hours
        } else {
            1.0
        };

        Timeline {
            start,
            end,
            total_duration_hours,
            parallelism_factor,
            critical_path: graph.critical_path().task_ids,
        }
    }

    fn utilization(
        &self,
        batches: &[ExecutionBatch],
        peak_memory: usize,
        cpu_fractions: &[f64],
        timeline: &Timeline,
    ) -> ResourceUtilization {
        let average_cpu_utilization = if cpu_fractions.is_empty() {
            0.0
        } else {
            cpu_fractions.iter().sum::<f64>() / cpu_fractions.len() as f64
        };
        let average_batch_size = if batches.is_empty() {
            0.0
        } else {
            batches.iter().map(|b| b.task_ids.len()).sum::<usize>() as f64 / batches.len() as f64
        };
        let agent_utilization =
            (average_batch_size / self.config.available_agents.max(1) as f64).min(1.0);
        let resource_efficiency =
            (timeline.parallelism_factor / self.config.available_agents.max(1) as f64).min(1.0);

        ResourceUtilization {
            peak_memory_mb: peak_memory,
            average_cpu_utilization,
            agent_utilization,
            resource_efficiency,
        }
    }
}

fn effective_hours(task: &AtomicTask) -> f64 {
    task.estimated_hours.max(MIN_TASK_HOURS)
}

/// Priority, work type, and tag signals blended into one business score.
fn business_impact(task: &AtomicTask, priority_score: f64) -> f64 {
    let type_boost = match task.task_type {
        TaskType::Deployment | TaskType::Development => 1.0,
        TaskType::Testing | TaskType::Review => 0.7,
        TaskType::Research | TaskType::Documentation => 0.4,
    };
    let boosted_tags = ["customer-facing", "revenue-impact", "critical-path", "security"];
    let tag_boost = if task.tags.iter().any(|t| boosted_tags.contains(&t.as_str())) {
        1.0
    } else {
        0.0
    };
    (0.5 * priority_score + 0.2 * type_boost + 0.3 * tag_boost).min(1.0)
}
