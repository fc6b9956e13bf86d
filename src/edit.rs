//! Edit operation seam
//!
//! Agents never touch mission files themselves; each cycle with work hands a
//! prompt and target files to an [`EditOperation`] and waits for it. The
//! operation is opaque and may run for minutes. It is never cancelled once
//! started.

use crate::config::EditorSettings;
use crate::{CadenceError, Result};
use aider::Aider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of one edit run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub success: bool,
    /// Relative to the mission directory
    pub changed_files: Vec<PathBuf>,
    pub diff_summary: String,
}

impl EditOutcome {
    /// Successful run that changed `files`
    pub fn changed(files: Vec<PathBuf>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            changed_files: files,
            diff_summary: summary.into(),
        }
    }

    /// Successful run that left everything as it was
    pub fn unchanged() -> Self {
        Self {
            success: true,
            changed_files: Vec::new(),
            diff_summary: "no changes".to_string(),
        }
    }

    /// Run that reported failure
    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            changed_files: Vec::new(),
            diff_summary: summary.into(),
        }
    }

    /// Succeeded and actually changed content
    pub fn has_diff(&self) -> bool {
        self.success && !self.changed_files.is_empty()
    }
}

/// Performs a prompt-driven edit of a set of files
#[async_trait]
pub trait EditOperation: Send + Sync {
    /// Apply `prompt` to `targets`; blocks the calling agent until done
    async fn apply(&self, prompt: &str, targets: &[PathBuf]) -> Result<EditOutcome>;
}

/// Edit operation backed by the `aider` CLI
#[derive(Debug, Clone)]
pub struct AiderEdit {
    aider: Aider,
}

impl AiderEdit {
    /// Run aider in `mission_dir` with the configured program, model and flags
    pub fn new(mission_dir: &Path, settings: &EditorSettings) -> Self {
        let mut aider = Aider::with_workdir(mission_dir)
            .with_program(&settings.program)
            .with_flags(settings.flags.clone());
        if let Some(ref model) = settings.model {
            aider = aider.with_model(model);
        }
        Self { aider }
    }

    pub fn aider(&self) -> &Aider {
        &self.aider
    }
}

#[async_trait]
impl EditOperation for AiderEdit {
    async fn apply(&self, prompt: &str, targets: &[PathBuf]) -> Result<EditOutcome> {
        let aider = self.aider.clone();
        let prompt = prompt.to_string();
        let targets = targets.to_vec();

        let report = tokio::task::spawn_blocking(move || aider.edit(&prompt, &targets))
            .await
            .map_err(|e| CadenceError::Edit(format!("Edit task failed: {}", e)))??;

        tracing::debug!(
            success = report.success,
            changed = report.changed_files.len(),
            duration_ms = report.duration().num_milliseconds(),
            "aider run finished"
        );

        Ok(EditOutcome {
            success: report.success,
            diff_summary: report.summary(),
            changed_files: report.changed_files,
        })
    }
}
