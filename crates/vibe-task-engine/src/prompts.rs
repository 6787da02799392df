//! Prompt template service
//!
//! Read-through cache over the YAML prompt files shipped with the
//! distribution. Every lookup degrades gracefully: a missing key-specific
//! prompt falls back to the record's system prompt, a missing or malformed
//! file falls back to a built-in string.

use crate::EngineError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Loaded prompt file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub system_prompt: String,
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub compatibility: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl PromptRecord {
    /// The `<key>_prompt` field when present, otherwise the system prompt.
    fn prompt_for(&self, key: &str) -> &str {
        self.extra
            .get(&format!("{key}_prompt"))
            .and_then(|v| v.as_str())
            .unwrap_or(&self.system_prompt)
    }
}

/// Read-through prompt cache keyed by logical prompt name.
pub struct PromptService {
    directory: PathBuf,
    cache: DashMap<String, Arc<PromptRecord>>,
}

impl PromptService {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            cache: DashMap::new(),
        }
    }

    /// Resolve the most specific prompt text for a key.
    pub async fn get_prompt(&self, key: &str) -> String {
        match self.load(key).await {
            Ok(record) => record.prompt_for(key).to_string(),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Falling back to built-in prompt");
                builtin_fallback(key).to_string()
            }
        }
    }

    /// `get_prompt` plus `{{name}}` variable substitution.
    pub async fn get_prompt_with_variables(
        &self,
        key: &str,
        variables: &HashMap<String, String>,
    ) -> String {
        let mut prompt = self.get_prompt(key).await;
        for (name, value) in variables {
            prompt = prompt.replace(&format!("{{{{{name}}}}}"), value);
        }
        prompt
    }

    /// Drop any cached copy and re-read the file.
    pub async fn reload_prompt(&self, key: &str) -> Result<(), EngineError> {
        self.cache.remove(key);
        self.load(key).await.map(|_| ())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Prompt keys available on disk.
    pub async fn get_available_prompt_types(&self) -> Result<Vec<String>, EngineError> {
        let mut types = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| EngineError::System(format!("reading {}: {e}", self.directory.display())))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| EngineError::System(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().map(|e| e == "yaml").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    types.push(stem.to_string());
                }
            }
        }
        types.sort();
        Ok(types)
    }

    /// Check every on-disk prompt for the required fields. Returns a map of
    /// key to problems; an empty map means all prompts validate.
    pub async fn validate_all_prompts(&self) -> Result<HashMap<String, Vec<String>>, EngineError> {
        let mut problems: HashMap<String, Vec<String>> = HashMap::new();
        for key in self.get_available_prompt_types().await? {
            let path = self.directory.join(format!("{key}.yaml"));
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| EngineError::System(format!("reading {}: {e}", path.display())))?;
            let issues = match serde_yaml::from_str::<serde_yaml::Value>(&raw) {
                Ok(value) => {
                    let mut issues = Vec::new();
                    for field in ["system_prompt", "version", "compatibility"] {
                        if value.get(field).is_none() {
                            issues.push(format!("missing {field}"));
                        }
                    }
                    issues
                }
                Err(e) => vec![format!("not parseable: {e}")],
            };
            if !issues.is_empty() {
                problems.insert(key, issues);
            }
        }
        Ok(problems)
    }

    async fn load(&self, key: &str) -> Result<Arc<PromptRecord>, EngineError> {
        if let Some(record) = self.cache.get(key) {
            return Ok(record.clone());
        }
        let path = self.directory.join(format!("{key}.yaml"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::NotFound(format!("prompt {key}: {e}")))?;
        let record: PromptRecord = serde_yaml::from_str(&raw)
            .map_err(|e| EngineError::Parse(format!("prompt {key} is malformed: {e}")))?;
        let record = Arc::new(record);
        self.cache.insert(key.to_string(), record.clone());
        Ok(record)
    }
}

/// Last-resort prompt text when nothing loads from disk.
fn builtin_fallback(key: &str) -> &'static str {
    match key {
        "decomposition" => {
            "Split the given development task into at most {{max_sub_tasks}} smaller sub-tasks. \
             Respond with a JSON array of objects carrying title, description, type, priority, \
             estimatedHours, filePaths, acceptanceCriteria, tags, and dependencies."
        }
        "atomic_detection" => {
            "Judge whether the given development task is atomic: completable by one agent in a \
             single short session, touching one file or component, with one acceptance \
             criterion. Respond with JSON: isAtomic, confidence, reasoning, estimatedHours, \
             complexityFactors, recommendations."
        }
        "context_integration" => {
            "Summarize the project context most relevant to the given task in plain prose."
        }
        "agent_system" => "You are a focused software engineering agent executing one atomic task.",
        "coordination" => "Coordinate the listed agents so tasks complete in dependency order.",
        "escalation" => "Describe the failure and the smallest next step a human should take.",
        "intent_recognition" => "Classify the user request into a development intent.",
        _ => "You are a precise software engineering assistant.",
    }
}
