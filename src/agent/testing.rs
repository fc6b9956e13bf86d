//! Test doubles for agent collaborators

use crate::config::AgentClass;
use crate::edit::{EditOperation, EditOutcome};
use crate::phase::WeightSource;
use crate::{CadenceError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Weight source returning the same weight for everyone
pub struct FixedWeight(pub f64);

impl WeightSource for FixedWeight {
    fn effective_weight(&self, _base: f64, _class: AgentClass) -> f64 {
        self.0
    }
}

enum Behavior {
    /// Report every target as changed
    Changing,
    Returning(EditOutcome),
    Failing(String),
    Panicking,
}

/// Scripted edit operation that records its calls
pub struct FakeEditor {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
}

impl FakeEditor {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn changing() -> Self {
        Self::with(Behavior::Changing)
    }

    pub fn returning(outcome: EditOutcome) -> Self {
        Self::with(Behavior::Returning(outcome))
    }

    pub fn failing(message: &str) -> Self {
        Self::with(Behavior::Failing(message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with(Behavior::Panicking)
    }

    /// Take `delay` (tokio time) per call
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EditOperation for FakeEditor {
    async fn apply(&self, prompt: &str, targets: &[PathBuf]) -> Result<EditOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), targets.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Changing => Ok(EditOutcome::changed(targets.to_vec(), "changed")),
            Behavior::Returning(outcome) => Ok(outcome.clone()),
            Behavior::Failing(message) => Err(CadenceError::Edit(message.clone())),
            Behavior::Panicking => panic!("editor blew up"),
        }
    }
}
