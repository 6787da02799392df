//! Atomicity detection
//!
//! A cheap heuristic gate runs before the model: conjunction words, multiple
//! acceptance criteria, or an estimate above the atomic threshold all force
//! a non-atomic verdict. The model is still consulted for reasoning and
//! complexity factors, but it cannot overturn the gate.

use crate::llm::{LanguageModel, OutputFormat};
use crate::prompts::PromptService;
use crate::types::AtomicTask;
use crate::{CancelSignal, EngineError};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum estimate for an atomic task, in hours.
pub const ATOMIC_HOURS_THRESHOLD: f64 = 0.25;

const CONJUNCTIONS: [&str; 3] = ["and", "or", "then"];

/// Project-level facts handed to the detector alongside each task.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub project_id: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub tools: Vec<String>,
    pub existing_tasks: Vec<String>,
    pub codebase_size: String,
    pub team_size: u32,
    pub complexity: String,
}

/// Verdict returned for one task.
#[derive(Debug, Clone)]
pub struct AtomicityAnalysis {
    pub is_atomic: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub estimated_hours: f64,
    pub complexity_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVerdict {
    is_atomic: bool,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    estimated_hours: Option<f64>,
    #[serde(default)]
    complexity_factors: Option<Vec<String>>,
    #[serde(default)]
    recommendations: Option<Vec<String>>,
}

/// Model-backed atomicity detector with a heuristic pre-gate.
pub struct AtomicDetector {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptService>,
}

impl AtomicDetector {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptService>) -> Self {
        Self { model, prompts }
    }

    pub async fn analyze(
        &self,
        task: &AtomicTask,
        context: &ProjectContext,
        cancel: &CancelSignal,
    ) -> Result<AtomicityAnalysis, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let gate_failures = heuristic_failures(task);

        let variables = HashMap::from([
            ("title".to_string(), task.title.clone()),
            ("description".to_string(), task.description.clone()),
            ("estimated_hours".to_string(), task.estimated_hours.to_string()),
            (
                "acceptance_criteria".to_string(),
                task.acceptance_criteria.join("; "),
            ),
            ("languages".to_string(), context.languages.join(", ")),
            ("frameworks".to_string(), context.frameworks.join(", ")),
            ("codebase_size".to_string(), context.codebase_size.clone()),
            ("complexity".to_string(), context.complexity.clone()),
        ]);
        let prompt = self
            .prompts
            .get_prompt_with_variables("atomic_detection", &variables)
            .await;
        let system_prompt = self.prompts.get_prompt("agent_system").await;

        let raw = self
            .model
            .invoke("atomic_detection", &prompt, &system_prompt, 0.1, OutputFormat::Json)
            .await?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let verdict: ModelVerdict = serde_json::from_str(extract_json(&raw))
            .map_err(|e| EngineError::Parse(format!("atomicity verdict for {}: {e}", task.id)))?;

        let mut analysis = AtomicityAnalysis {
            is_atomic: verdict.is_atomic,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reasoning: verdict.reasoning.unwrap_or_default(),
            estimated_hours: verdict.estimated_hours.unwrap_or(task.estimated_hours),
            complexity_factors: verdict.complexity_factors.unwrap_or_default(),
            recommendations: verdict.recommendations.unwrap_or_default(),
        };

        if !gate_failures.is_empty() {
            // The gate fixes the verdict; model output only enriches it.
            analysis.is_atomic = false;
            analysis.confidence = analysis.confidence.max(0.9);
            if analysis.reasoning.is_empty() {
                analysis.reasoning = gate_failures.join("; ");
            }
            for failure in gate_failures {
                if !analysis.complexity_factors.contains(&failure) {
                    analysis.complexity_factors.push(failure);
                }
            }
        }

        tracing::debug!(
            task_id = %task.id,
            is_atomic = analysis.is_atomic,
            confidence = analysis.confidence,
            "Atomicity analyzed"
        );
        Ok(analysis)
    }
}

/// Reasons the heuristic gate rejects a task, empty when it passes.
fn heuristic_failures(task: &AtomicTask) -> Vec<String> {
    let mut failures = Vec::new();
    if task.estimated_hours > ATOMIC_HOURS_THRESHOLD {
        failures.push(format!(
            "estimated {}h exceeds the {}h atomic threshold",
            task.estimated_hours, ATOMIC_HOURS_THRESHOLD
        ));
    }
    if let Some(word) = first_conjunction(&task.title).or_else(|| first_conjunction(&task.description)) {
        failures.push(format!("contains the conjunction \"{word}\""));
    }
    if task.acceptance_criteria.len() != 1 {
        failures.push(format!(
            "{} acceptance criteria instead of exactly one",
            task.acceptance_criteria.len()
        ));
    }
    failures
}

/// Whole-word conjunction scan, case-insensitive.
fn first_conjunction(text: &str) -> Option<&'static str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .find_map(|word| {
            CONJUNCTIONS
                .iter()
                .find(|c| word.eq_ignore_ascii_case(c))
                .copied()
        })
}

/// Trim markdown fences and surrounding prose off a model JSON reply.
pub(crate) fn extract_json(raw: &str) -> &str {
    let start = raw.find(['{', '[']);
    let end = raw.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    }
}
