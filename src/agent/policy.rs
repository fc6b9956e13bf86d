//! Work policies
//!
//! A policy decides, from an agent's watched files, whether a cycle should
//! invoke the edit tool and on which files. Policies are stateless; anything
//! they need about the agent's history arrives through [`CycleContext`].

use crate::config::PolicySpec;
use crate::store::FileStore;
use crate::tokens::TokenCounter;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// A file matched by the agent's watch globs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Inputs to a has-work decision
pub struct CycleContext<'a> {
    pub agent: &'a str,
    /// Sorted, deduplicated
    pub files: &'a [WatchedFile],
    /// Start of the agent's previous cycle; `None` before its first
    pub since: Option<DateTime<Utc>>,
    pub store: &'a dyn FileStore,
}

/// Outcome of a has-work decision
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkDecision {
    pub has_work: bool,
    pub target_files: Vec<PathBuf>,
}

impl WorkDecision {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn work(target_files: Vec<PathBuf>) -> Self {
        Self {
            has_work: true,
            target_files,
        }
    }
}

/// Per-agent-kind work detection and prompt assembly
#[async_trait]
pub trait WorkPolicy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn has_work(&self, ctx: &CycleContext<'_>) -> Result<WorkDecision>;

    /// Prompt handed to the edit tool
    fn build_prompt(&self, base_prompt: &str, targets: &[PathBuf]) -> String {
        if targets.is_empty() {
            return base_prompt.to_string();
        }
        let list: Vec<String> = targets
            .iter()
            .map(|p| format!("- {}", p.display()))
            .collect();
        format!(
            "{}\n\nTarget files:\n{}\n",
            base_prompt.trim_end(),
            list.join("\n")
        )
    }
}

/// Work on every watched file each cycle
pub struct AlwaysPolicy;

#[async_trait]
impl WorkPolicy for AlwaysPolicy {
    fn name(&self) -> &'static str {
        "always"
    }

    async fn has_work(&self, ctx: &CycleContext<'_>) -> Result<WorkDecision> {
        Ok(WorkDecision::work(
            ctx.files.iter().map(|f| f.path.clone()).collect(),
        ))
    }
}

/// Work on files modified since the agent's previous cycle started
pub struct OnChangePolicy;

#[async_trait]
impl WorkPolicy for OnChangePolicy {
    fn name(&self) -> &'static str {
        "on_change"
    }

    async fn has_work(&self, ctx: &CycleContext<'_>) -> Result<WorkDecision> {
        let changed: Vec<PathBuf> = ctx
            .files
            .iter()
            .filter(|f| match (ctx.since, f.modified_at) {
                (None, _) => true,
                (Some(last), Some(modified)) => modified > last,
                (Some(_), None) => false,
            })
            .map(|f| f.path.clone())
            .collect();

        if changed.is_empty() {
            Ok(WorkDecision::idle())
        } else {
            Ok(WorkDecision::work(changed))
        }
    }
}

/// Work only while nothing matches the watch globs
///
/// Targets are empty; the prompt tells the edit tool what to create.
pub struct WhenEmptyPolicy;

#[async_trait]
impl WorkPolicy for WhenEmptyPolicy {
    fn name(&self) -> &'static str {
        "when_empty"
    }

    async fn has_work(&self, ctx: &CycleContext<'_>) -> Result<WorkDecision> {
        if ctx.files.is_empty() {
            Ok(WorkDecision::work(Vec::new()))
        } else {
            Ok(WorkDecision::idle())
        }
    }
}

/// Work on files whose estimated size exceeds a limit
pub struct OversizedPolicy {
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl OversizedPolicy {
    pub fn new(max_tokens: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            max_tokens,
            counter,
        }
    }
}

#[async_trait]
impl WorkPolicy for OversizedPolicy {
    fn name(&self) -> &'static str {
        "oversized"
    }

    async fn has_work(&self, ctx: &CycleContext<'_>) -> Result<WorkDecision> {
        let mut oversized = Vec::new();
        for file in ctx.files {
            let bytes = ctx.store.read_file(&file.path).await?;
            let text = String::from_utf8_lossy(&bytes);
            let tokens = self.counter.count(&text);
            if tokens > self.max_tokens {
                tracing::debug!(
                    agent = %ctx.agent,
                    path = %file.path.display(),
                    tokens,
                    max_tokens = self.max_tokens,
                    "Oversized document"
                );
                oversized.push(file.path.clone());
            }
        }

        if oversized.is_empty() {
            Ok(WorkDecision::idle())
        } else {
            Ok(WorkDecision::work(oversized))
        }
    }
}

impl PolicySpec {
    /// Instantiate the configured policy
    pub fn build(&self, counter: Arc<dyn TokenCounter>) -> Arc<dyn WorkPolicy> {
        match self {
            PolicySpec::Always => Arc::new(AlwaysPolicy),
            PolicySpec::OnChange => Arc::new(OnChangePolicy),
            PolicySpec::WhenEmpty => Arc::new(WhenEmptyPolicy),
            PolicySpec::Oversized { max_tokens } => {
                Arc::new(OversizedPolicy::new(*max_tokens, counter))
            }
        }
    }
}
