//! Agent runtime
//!
//! One [`AgentRuntime`] per running agent. Its loop alternates between a
//! cancellable sleep and a check-and-maybe-edit cycle. The runtime is the only
//! writer of its [`AgentRuntimeState`]; everyone else reads snapshots through
//! a watch channel.
//!
//! Nothing that happens inside a cycle ends the loop. Errors and panics are
//! logged and counted, and enough of them in a row only push the agent out to
//! its maximum interval.

use super::interval::{calculate_dynamic_interval, IntervalBounds};
use super::policy::{CycleContext, WatchedFile, WorkPolicy};
use crate::config::AgentDefinition;
use crate::edit::EditOperation;
use crate::events::{LogSink, Notification, NotificationKind, NotificationSink};
use crate::metrics;
use crate::phase::WeightSource;
use crate::store::FileStore;
use crate::tokens::{HeuristicCounter, TokenCounter};
use crate::{CadenceError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default consecutive-error count after which an agent cools down
pub const DEFAULT_ERROR_CEILING: u32 = 5;

/// Where an agent is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Initialized,
    Sleeping,
    Executing,
    Stopping,
    Stopped,
}

impl std::fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Executing => write!(f, "executing"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Mutable per-agent state, written only by the agent's own loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeState {
    pub name: String,
    pub lifecycle: AgentLifecycle,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Start of the latest cycle; files modified after it are new to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_change_at: Option<DateTime<Utc>>,
    pub consecutive_no_changes: u32,
    pub consecutive_errors: u32,
    /// Phase-adjusted weight used for the last interval
    pub current_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_interval_secs: Option<f64>,
    #[serde(default)]
    pub cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRuntimeState {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            lifecycle: AgentLifecycle::Initialized,
            running: false,
            last_run_at: None,
            last_cycle_started_at: None,
            last_change_at: None,
            consecutive_no_changes: 0,
            consecutive_errors: 0,
            current_weight: weight,
            next_interval_secs: None,
            cycles: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Fold the outcome of a cycle that ran from `started_at` to `finished_at`
    pub fn apply(
        &mut self,
        outcome: &CycleOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        match outcome {
            CycleOutcome::NoWork => {
                self.consecutive_no_changes = self.consecutive_no_changes.saturating_add(1);
            }
            CycleOutcome::NoChange => {
                self.consecutive_no_changes = self.consecutive_no_changes.saturating_add(1);
                self.consecutive_errors = 0;
            }
            CycleOutcome::Changed(_) => {
                self.consecutive_no_changes = 0;
                self.consecutive_errors = 0;
                self.last_change_at = Some(finished_at);
            }
            CycleOutcome::Failed(error) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                self.last_error = Some(error.clone());
            }
        }
        self.last_run_at = Some(finished_at);
        self.last_cycle_started_at = Some(started_at);
        self.cycles += 1;
    }

    /// Write as pretty JSON to `path`, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Snapshot file for `name` under `dir`
    pub fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.json", name))
    }

    /// Read every snapshot in `dir`, sorted by agent name
    ///
    /// Unparseable files are skipped with a warning.
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut states = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(CadenceError::from)
                .and_then(|text| serde_json::from_str::<Self>(&text).map_err(CadenceError::from));
            match parsed {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable agent snapshot");
                }
            }
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Policy found nothing to do
    NoWork,
    /// Edit ran but changed nothing
    NoChange,
    /// Edit changed these files
    Changed(Vec<PathBuf>),
    /// Enumeration, policy or edit failed (or panicked)
    Failed(String),
}

impl CycleOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoWork => "no_work",
            Self::NoChange => "no_change",
            Self::Changed(_) => "changed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Collaborators shared by every agent in a team
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Arc<dyn FileStore>,
    pub editor: Arc<dyn EditOperation>,
    pub weights: Arc<dyn WeightSource>,
    pub sink: Arc<dyn NotificationSink>,
    pub counter: Arc<dyn TokenCounter>,
    pub error_ceiling: u32,
    /// Directory for per-agent JSON snapshots
    pub snapshot_dir: Option<PathBuf>,
}

impl AgentDeps {
    pub fn new(
        store: Arc<dyn FileStore>,
        editor: Arc<dyn EditOperation>,
        weights: Arc<dyn WeightSource>,
    ) -> Self {
        Self {
            store,
            editor,
            weights,
            sink: Arc::new(LogSink),
            counter: Arc::new(HeuristicCounter::default()),
            error_ceiling: DEFAULT_ERROR_CEILING,
            snapshot_dir: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_error_ceiling(mut self, ceiling: u32) -> Self {
        self.error_ceiling = ceiling;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }
}

/// One agent's self-pacing loop
pub struct AgentRuntime {
    definition: AgentDefinition,
    prompt: String,
    policy: Arc<dyn WorkPolicy>,
    deps: AgentDeps,
    state: watch::Sender<AgentRuntimeState>,
}

impl AgentRuntime {
    /// Create a runtime with the policy named in `definition`
    pub fn new(definition: AgentDefinition, prompt: impl Into<String>, deps: AgentDeps) -> Self {
        let policy = definition.policy.build(Arc::clone(&deps.counter));
        Self::with_policy(definition, prompt, deps, policy)
    }

    /// Create a runtime with an explicit policy
    pub fn with_policy(
        definition: AgentDefinition,
        prompt: impl Into<String>,
        deps: AgentDeps,
        policy: Arc<dyn WorkPolicy>,
    ) -> Self {
        let weight = deps
            .weights
            .effective_weight(definition.weight, definition.class);
        let (state, _) = watch::channel(AgentRuntimeState::new(&definition.name, weight));
        Self {
            definition,
            prompt: prompt.into(),
            policy,
            deps,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// Copy of the current state
    pub fn state(&self) -> AgentRuntimeState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<AgentRuntimeState> {
        self.state.subscribe()
    }

    /// Seconds until the next cycle given the current state
    pub fn calculate_dynamic_interval(&self) -> f64 {
        let (no_changes, errors) = {
            let s = self.state.borrow();
            (s.consecutive_no_changes, s.consecutive_errors)
        };
        let bounds: IntervalBounds = self.definition.interval_bounds();
        if errors > self.deps.error_ceiling {
            return bounds.max;
        }
        let weight = self.current_weight();
        calculate_dynamic_interval(self.definition.base_interval(), no_changes, weight, bounds)
    }

    fn current_weight(&self) -> f64 {
        self.deps
            .weights
            .effective_weight(self.definition.weight, self.definition.class)
    }

    /// Run until `cancel` fires
    ///
    /// The first cycle starts immediately. Cancellation is honored before a
    /// cycle and during the sleep, never in the middle of a cycle.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.update(|s| s.running = true);
        tracing::info!(
            agent = %self.name(),
            policy = self.policy.name(),
            base_interval = self.definition.interval_secs,
            "Agent started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.run_cycle().await;

            let weight = self.current_weight();
            let interval = self.calculate_dynamic_interval();
            self.update(|s| {
                s.lifecycle = AgentLifecycle::Sleeping;
                s.current_weight = weight;
                s.next_interval_secs = Some(interval);
            });
            tracing::debug!(agent = %self.name(), interval_secs = interval, weight, "Agent sleeping");

            let sleep = Duration::try_from_secs_f64(interval)
                .unwrap_or(Duration::from_secs(self.definition.max_interval_secs));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.update(|s| s.lifecycle = AgentLifecycle::Stopping);
        self.update(|s| {
            s.lifecycle = AgentLifecycle::Stopped;
            s.running = false;
            s.next_interval_secs = None;
        });
        self.write_snapshot().await;
        tracing::info!(agent = %self.name(), "Agent stopped");
    }

    /// Run one check-and-maybe-edit cycle and fold the result into the state
    ///
    /// Never fails and never panics outward.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle_started = Utc::now();
        self.update(|s| s.lifecycle = AgentLifecycle::Executing);

        let outcome = match AssertUnwindSafe(self.execute_cycle()).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(
                    agent = %self.name(),
                    cycle_started = %cycle_started,
                    transient = e.is_transient(),
                    error = %e,
                    "Agent cycle failed"
                );
                CycleOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    agent = %self.name(),
                    cycle_started = %cycle_started,
                    error = %message,
                    "Agent cycle panicked"
                );
                CycleOutcome::Failed(format!("panic: {}", message))
            }
        };

        let finished = Utc::now();
        self.update(|s| s.apply(&outcome, cycle_started, finished));
        let errors = self.state.borrow().consecutive_errors;

        metrics::record_cycle(self.name(), outcome.label());
        metrics::set_consecutive_errors(self.name(), errors);

        if let CycleOutcome::Failed(ref error) = outcome {
            self.deps.sink.publish(Notification::new(
                NotificationKind::AgentError,
                json!({
                    "agent": self.name(),
                    "error": error,
                    "consecutive_errors": errors,
                }),
            ));
            if errors == self.deps.error_ceiling.saturating_add(1) {
                tracing::warn!(
                    agent = %self.name(),
                    consecutive_errors = errors,
                    "Error ceiling exceeded, cooling down at max interval"
                );
            }
        }

        self.write_snapshot().await;
        outcome
    }

    async fn execute_cycle(&self) -> Result<CycleOutcome> {
        let files = self.watched_files().await?;
        let since = self.state.borrow().last_cycle_started_at;

        let ctx = CycleContext {
            agent: self.name(),
            files: &files,
            since,
            store: self.deps.store.as_ref(),
        };
        let decision = self.policy.has_work(&ctx).await?;
        if !decision.has_work {
            tracing::debug!(agent = %self.name(), files = files.len(), "No work");
            return Ok(CycleOutcome::NoWork);
        }

        let prompt = self.policy.build_prompt(&self.prompt, &decision.target_files);
        tracing::info!(
            agent = %self.name(),
            targets = decision.target_files.len(),
            "Invoking edit tool"
        );

        // Held until the edit tool exits; a contended target fails the cycle
        let lease = self
            .deps
            .store
            .lock_paths(&decision.target_files, self.name())
            .await?;

        let started = Instant::now();
        let result = self.deps.editor.apply(&prompt, &decision.target_files).await;
        metrics::record_edit_duration(self.name(), started.elapsed().as_secs_f64());
        drop(lease);

        let outcome = result?;
        if !outcome.success {
            return Err(CadenceError::Edit(outcome.diff_summary));
        }
        if outcome.changed_files.is_empty() {
            tracing::debug!(agent = %self.name(), "Edit made no changes");
            return Ok(CycleOutcome::NoChange);
        }

        tracing::info!(
            agent = %self.name(),
            changed = outcome.changed_files.len(),
            summary = %outcome.diff_summary,
            "Edit applied"
        );
        Ok(CycleOutcome::Changed(outcome.changed_files))
    }

    async fn watched_files(&self) -> Result<Vec<WatchedFile>> {
        let mut paths = BTreeSet::new();
        for pattern in &self.definition.watch {
            paths.extend(self.deps.store.list_files(pattern).await?);
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let modified_at = self.deps.store.modified_at(&path).await?;
            files.push(WatchedFile { path, modified_at });
        }
        Ok(files)
    }

    fn update(&self, f: impl FnOnce(&mut AgentRuntimeState)) {
        self.state.send_modify(|s| {
            f(s);
            s.updated_at = Utc::now();
        });
    }

    async fn write_snapshot(&self) {
        let Some(ref dir) = self.deps.snapshot_dir else {
            return;
        };
        let state = self.state();
        let path = AgentRuntimeState::snapshot_path(dir, self.name());
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || state.save(&target))
            .await
            .unwrap_or_else(|e| Err(CadenceError::Other(format!("Snapshot task failed: {}", e))));
        if let Err(e) = result {
            tracing::warn!(agent = %self.name(), path = %path.display(), error = %e, "Failed to write agent snapshot");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
