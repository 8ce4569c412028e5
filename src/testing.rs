//! Testing utilities including a mock model.
//!
//! Useful for exercising the orchestrator and the CLI pipeline without making
//! real model calls.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ModelError;
use crate::model::ExtractionModel;

#[derive(Debug, Clone)]
enum MockOutcome {
    Reply(Value),
    Unavailable,
    Unparseable(String),
}

/// A mock model returning canned replies.
///
/// Each reply is keyed by a marker; the first marker contained in the user
/// prompt selects the reply. Unmatched prompts get `{}`.
#[derive(Default, Clone)]
pub struct MockModel {
    outcomes: Arc<RwLock<Vec<(String, MockOutcome)>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, marker: impl Into<String>, outcome: MockOutcome) -> Self {
        if let Ok(mut outcomes) = self.outcomes.write() {
            outcomes.push((marker.into(), outcome));
        }
        self
    }

    /// Reply with `value` when the prompt contains `marker`.
    pub fn with_reply(self, marker: impl Into<String>, value: Value) -> Self {
        self.push(marker, MockOutcome::Reply(value))
    }

    /// Fail as if the endpoint were down.
    pub fn with_unavailable(self, marker: impl Into<String>) -> Self {
        self.push(marker, MockOutcome::Unavailable)
    }

    /// Answer with text that is not JSON.
    pub fn with_unparseable(self, marker: impl Into<String>, text: impl Into<String>) -> Self {
        self.push(marker, MockOutcome::Unparseable(text.into()))
    }

    /// User prompts received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ExtractionModel for MockModel {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<Value, ModelError> {
        if let Ok(mut calls) = self.calls.write() {
            calls.push(user_prompt.to_string());
        }

        let outcome = self
            .outcomes
            .read()
            .ok()
            .and_then(|outcomes| {
                outcomes
                    .iter()
                    .find(|(marker, _)| user_prompt.contains(marker.as_str()))
                    .map(|(_, outcome)| outcome.clone())
            })
            .unwrap_or(MockOutcome::Reply(json!({})));

        match outcome {
            MockOutcome::Reply(value) => Ok(value),
            MockOutcome::Unavailable => Err(ModelError::Network("connection refused (mock)".into())),
            MockOutcome::Unparseable(text) => Err(ModelError::Parse(format!("not JSON: {text}"))),
        }
    }
}
