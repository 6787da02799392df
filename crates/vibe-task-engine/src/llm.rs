//! Language model capability
//!
//! The engine consumes model completions through this interface; it never
//! opens sockets itself. Production deployments hand in a router-backed
//! implementation, tests hand in `ScriptedModel`.

use crate::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Response shape a caller expects back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

/// A single model invocation keyed by the logical task requesting it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(
        &self,
        logical_task: &str,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        format: OutputFormat,
    ) -> Result<String, EngineError>;
}

/// Record of one `invoke` call, kept for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub logical_task: String,
    pub prompt: String,
    pub system_prompt: String,
    pub format: OutputFormat,
}

/// Scripted model that replays canned responses per logical task.
///
/// Responses for a task are consumed in order; the last one repeats once the
/// queue drains. Tasks without a script fail with a parse error so tests
/// notice unexpected invocations.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<HashMap<String, Vec<String>>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, logical_task: &str, response: impl Into<String>) {
        self.responses
            .lock()
            .await
            .entry(logical_task.to_string())
            .or_default()
            .push(response.into());
    }

    /// Make every call for `logical_task` fail with a system error.
    pub async fn fail(&self, logical_task: &str, message: impl Into<String>) {
        self.failures
            .lock()
            .await
            .insert(logical_task.to_string(), message.into());
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(
        &self,
        logical_task: &str,
        prompt: &str,
        system_prompt: &str,
        _temperature: f32,
        format: OutputFormat,
    ) -> Result<String, EngineError> {
        self.calls.lock().await.push(RecordedCall {
            logical_task: logical_task.to_string(),
            prompt: prompt.to_string(),
            system_prompt: system_prompt.to_string(),
            format,
        });

        if let Some(message) = self.failures.lock().await.get(logical_task) {
            return Err(EngineError::System(message.clone()));
        }

        let mut responses = self.responses.lock().await;
        match responses.get_mut(logical_task) {
            Some(queue) if !queue.is_empty() => {
                if queue.len() == 1 {
                    Ok(queue[0].clone())
                } else {
                    Ok(queue.remove(0))
                }
            }
            _ => Err(EngineError::Parse(format!(
                "no scripted response for {logical_task}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_replay_in_order() {
        let model = ScriptedModel::new();
        model.script("decomposition", "first").await;
        model.script("decomposition", "second").await;

        let a = model
            .invoke("decomposition", "p", "s", 0.1, OutputFormat::Json)
            .await
            .unwrap();
        let b = model
            .invoke("decomposition", "p", "s", 0.1, OutputFormat::Json)
            .await
            .unwrap();
        let c = model
            .invoke("decomposition", "p", "s", 0.1, OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("first", "second", "second"));
        assert_eq!(model.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_task_is_an_error() {
        let model = ScriptedModel::new();
        let err = model
            .invoke("atomic_detection", "p", "s", 0.0, OutputFormat::Json)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parsing);
    }
}
