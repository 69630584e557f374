//! Scripted model for tests
//!
//! Returns canned payloads in order, cycling when exhausted. Individual
//! steps may be errors so generation-failure paths are reachable in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{LanguageModel, LlmError};

type Step = Result<serde_json::Value, String>;

pub struct ScriptedModel {
    steps: Vec<Step>,
    cursor: AtomicUsize,
    /// Prompt pairs observed, for asserting repair-prompt content.
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty(), "scripted model needs at least one step");
        Self {
            steps,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same payload for every call.
    pub fn always(payload: serde_json::Value) -> Self {
        Self::new(vec![Ok(payload)])
    }

    /// One payload per call, in order.
    pub fn sequence(payloads: Vec<serde_json::Value>) -> Self {
        Self::new(payloads.into_iter().map(Ok).collect())
    }

    /// Every call fails with the given API error.
    pub fn erroring(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<serde_json::Value, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        match &self.steps[idx % self.steps.len()] {
            Ok(payload) => Ok(payload.clone()),
            Err(message) => Err(LlmError::Api(message.clone())),
        }
    }

    fn identity(&self) -> (String, String) {
        ("mock".to_string(), "scripted".to_string())
    }
}
