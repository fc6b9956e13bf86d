//! Orchestrator daemon
//!
//! Wires the mapper, phase controller and scheduler to one mission directory
//! and exposes the control surface used by the CLI:
//! - start/stop the active team
//! - per-agent status and phase status
//! - manual phase override
//! - the current project map
//!
//! [`Orchestrator::run`] is the foreground event loop: file change batches
//! rebuild the map, commands arrive on a channel, SIGTERM/SIGINT shut down.

use crate::agent::AgentDeps;
use crate::config::CadenceConfig;
use crate::edit::{AiderEdit, EditOperation};
use crate::events::{LogSink, Notification, NotificationKind, NotificationSink};
use crate::mapper::{MapWatcher, Mapper, ProjectMap};
use crate::metrics;
use crate::phase::{Phase, PhaseController, PhaseStatus, PhaseTransition};
use crate::scheduler::{AgentStatus, Scheduler, StopReport, TeamStartReport};
use crate::store::LocalFileStore;
use crate::tokens::HeuristicCounter;
use crate::{CadenceError, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Persisted phase state, under the state directory
pub const PHASE_FILE_NAME: &str = "phase.json";

/// Rendered project map, under the state directory
pub const MAP_FILE_NAME: &str = "PROJECT_MAP.md";

/// Prometheus textfile, under the state directory
pub const METRICS_FILE_NAME: &str = "metrics.prom";

/// Per-agent snapshots, under the state directory
pub const AGENTS_DIR_NAME: &str = "agents";

/// Commands accepted by a running orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCommand {
    /// Rebuild the project map now
    RefreshMap,
    /// Manual phase override
    ForcePhase(Phase),
    /// Start a team by name
    StartTeam(String),
    /// Stop the active team
    StopTeam,
    /// Stop the team and leave the event loop
    Shutdown,
}

/// Result of handling a command
enum CommandResult {
    Continue,
    Stop,
}

/// Mapper, phase controller and scheduler for one mission
pub struct Orchestrator {
    config: CadenceConfig,
    mission_root: PathBuf,
    state_root: PathBuf,
    store: Arc<LocalFileStore>,
    mapper: Mapper,
    phase: Arc<PhaseController>,
    scheduler: Scheduler,
    sink: Arc<dyn NotificationSink>,
    map: RwLock<Option<Arc<ProjectMap>>>,
}

impl Orchestrator {
    /// Orchestrator editing through the configured aider, logging notifications
    pub fn from_config(config: CadenceConfig) -> Result<Self> {
        let editor = Arc::new(AiderEdit::new(&config.mission_root(), &config.editor));
        Self::new(config, editor, Arc::new(LogSink))
    }

    pub fn new(
        config: CadenceConfig,
        editor: Arc<dyn EditOperation>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let mission_root = config.mission_root();
        let state_root = config.state_root();

        let phase = Arc::new(
            PhaseController::from_settings(&config.phase)
                .with_sink(Arc::clone(&sink))
                .with_persistence(state_root.join(PHASE_FILE_NAME))?,
        );
        metrics::set_current_phase(phase.current_phase());

        let mapper = build_mapper(&config);
        let counter = Arc::new(HeuristicCounter::new(config.mapper.chars_per_token));

        let store = Arc::new(LocalFileStore::new(&mission_root));
        let deps = AgentDeps::new(store.clone(), editor, phase.clone())
            .with_sink(Arc::clone(&sink))
            .with_counter(counter)
            .with_error_ceiling(config.scheduler.error_ceiling)
            .with_snapshot_dir(state_root.join(AGENTS_DIR_NAME));
        let scheduler = Scheduler::new(deps, config.scheduler.clone());

        Ok(Self {
            config,
            mission_root,
            state_root,
            store,
            mapper,
            phase,
            scheduler,
            sink,
            map: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    pub fn mission_root(&self) -> &Path {
        &self.mission_root
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn phase_controller(&self) -> &Arc<PhaseController> {
        &self.phase
    }

    /// Start `team`, or the configured default team
    ///
    /// Team members without a definition are reported as failed alongside
    /// any that fail validation or prompt loading.
    pub async fn start_team(&self, team: Option<&str>) -> Result<TeamStartReport> {
        let name = team
            .map(str::to_string)
            .or_else(|| self.config.default_team.clone())
            .ok_or_else(|| {
                CadenceError::Team("No team given and no default_team configured".to_string())
            })?;

        let (definitions, missing) = self.config.team_agents(&name)?;
        for agent in &missing {
            tracing::warn!(team = %name, agent = %agent, "Team member has no agent definition");
        }

        let mut report = self.scheduler.start_team(&name, definitions).await?;
        report.failed.extend(
            missing
                .into_iter()
                .map(|agent| (agent, "No agent definition".to_string())),
        );
        Ok(report)
    }

    pub async fn stop_team(&self) -> StopReport {
        self.scheduler.stop_team().await
    }

    pub async fn active_team(&self) -> Option<String> {
        self.scheduler.active_team().await
    }

    pub async fn get_status(&self) -> BTreeMap<String, AgentStatus> {
        self.scheduler.get_status().await
    }

    pub fn get_phase_status(&self) -> PhaseStatus {
        self.phase.status()
    }

    /// Manual phase override, persisted off the async worker threads
    pub async fn force_phase(&self, phase: Phase) -> Result<PhaseTransition> {
        let controller = Arc::clone(&self.phase);
        tokio::task::spawn_blocking(move || controller.force_set(phase))
            .await
            .map_err(|e| CadenceError::Other(format!("Phase override task failed: {}", e)))
    }

    /// Last built map, if any
    pub fn get_map(&self) -> Option<Arc<ProjectMap>> {
        self.map.read().ok().and_then(|m| m.clone())
    }

    /// Rebuild the project map and feed the phase controller
    pub async fn refresh_map(&self) -> Result<Arc<ProjectMap>> {
        let mapper = self.mapper.clone();
        let root = self.mission_root.clone();
        let started = Instant::now();

        let map = tokio::task::spawn_blocking(move || mapper.compute_map(&root))
            .await
            .map_err(|e| CadenceError::Other(format!("Map build task failed: {}", e)))??;
        metrics::record_map_build(started.elapsed().as_secs_f64());

        let map = Arc::new(map);
        if let Ok(mut current) = self.map.write() {
            *current = Some(Arc::clone(&map));
        }

        self.sink.publish(Notification::new(
            NotificationKind::MapUpdated,
            json!({
                "documents": map.entries.len(),
                "total_tokens": map.total_tokens,
                "too_long": map.too_long().count(),
            }),
        ));
        for entry in map.too_long() {
            tracing::warn!(
                path = %entry.path.display(),
                tokens = entry.token_count,
                "Document exceeds size threshold"
            );
            self.sink.publish(Notification::new(
                NotificationKind::MapThreshold,
                json!({
                    "path": entry.path,
                    "token_count": entry.token_count,
                    "threshold": self.mapper.config().too_long_threshold,
                }),
            ));
        }

        metrics::set_active_locks(self.store.active_lock_count());
        let phase = Arc::clone(&self.phase);
        let state_root = self.state_root.clone();
        let saved = Arc::clone(&map);
        tokio::task::spawn_blocking(move || persist_refresh(&saved, &phase, &state_root))
            .await
            .map_err(|e| CadenceError::Other(format!("Map persist task failed: {}", e)))?;

        tracing::info!(
            documents = map.entries.len(),
            tokens = map.total_tokens,
            phase = %self.phase.current_phase(),
            "Project map refreshed"
        );
        Ok(map)
    }

    /// Run in the foreground until shutdown
    ///
    /// Builds the map, starts watching, starts `team` (or the default team if
    /// one is configured) and then serves file changes and commands. The active
    /// team is stopped before returning.
    pub async fn run(
        &self,
        team: Option<String>,
        mut commands: mpsc::Receiver<OrchestratorCommand>,
    ) -> Result<()> {
        tracing::info!(mission = %self.mission_root.display(), "Starting orchestrator");
        metrics::set_health_status(true);

        let map = self.refresh_map().await?;

        let mut ignored = vec![PathBuf::from(".git")];
        if let Some(rel) = state_dir_relative(&self.mission_root, &self.state_root) {
            ignored.push(rel);
        }
        let (watcher, mut batches) = MapWatcher::start(
            &self.mission_root,
            Duration::from_millis(self.config.mapper.debounce_ms),
            ignored,
        )?;
        watcher.set_known(map.paths());

        if team.is_some() || self.config.default_team.is_some() {
            match self.start_team(team.as_deref()).await {
                Ok(report) => {
                    for (agent, reason) in &report.failed {
                        tracing::warn!(agent = %agent, reason = %reason, "Agent not started");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to start team"),
            }
        } else {
            tracing::info!("No team configured; only maintaining the project map");
        }

        let signal = shutdown_signal()?;
        tokio::pin!(signal);

        loop {
            tokio::select! {
                Some(batch) = batches.recv() => {
                    tracing::debug!(events = batch.len(), "Mission files changed");
                    self.refresh_tracked(&watcher).await;
                }
                Some(cmd) = commands.recv() => {
                    match self.handle_command(cmd, &watcher).await {
                        CommandResult::Continue => {}
                        CommandResult::Stop => break,
                    }
                }
                name = &mut signal => {
                    tracing::info!(signal = name, "Received signal, initiating graceful shutdown");
                    break;
                }
            }
        }

        tracing::info!("Performing shutdown cleanup");
        self.stop_team().await;
        metrics::set_health_status(false);
        let metrics_path = self.state_root.join(METRICS_FILE_NAME);
        if let Err(e) = tokio::task::spawn_blocking(move || write_metrics_logged(&metrics_path)).await {
            tracing::warn!(error = %e, "Metrics write task failed");
        }
        Ok(())
    }

    async fn refresh_tracked(&self, watcher: &MapWatcher) {
        match self.refresh_map().await {
            Ok(map) => watcher.set_known(map.paths()),
            Err(e) => tracing::warn!(error = %e, "Project map refresh failed"),
        }
    }

    async fn handle_command(&self, cmd: OrchestratorCommand, watcher: &MapWatcher) -> CommandResult {
        tracing::debug!(command = ?cmd, "Handling command");
        match cmd {
            OrchestratorCommand::RefreshMap => {
                self.refresh_tracked(watcher).await;
            }
            OrchestratorCommand::ForcePhase(phase) => {
                if let Err(e) = self.force_phase(phase).await {
                    tracing::error!(phase = %phase, error = %e, "Failed to force phase");
                }
            }
            OrchestratorCommand::StartTeam(name) => {
                if let Err(e) = self.start_team(Some(&name)).await {
                    tracing::error!(team = %name, error = %e, "Failed to start team");
                }
            }
            OrchestratorCommand::StopTeam => {
                self.stop_team().await;
            }
            OrchestratorCommand::Shutdown => return CommandResult::Stop,
        }
        CommandResult::Continue
    }
}

/// Blocking half of a map refresh: rendered map, phase observation, metrics
fn persist_refresh(map: &ProjectMap, phase: &PhaseController, state_root: &Path) {
    let map_path = state_root.join(MAP_FILE_NAME);
    if let Err(e) = map.save_markdown(&map_path) {
        tracing::warn!(path = %map_path.display(), error = %e, "Failed to write project map");
    }
    phase.observe(map.total_tokens);
    write_metrics_logged(&state_root.join(METRICS_FILE_NAME));
}

fn write_metrics_logged(path: &Path) {
    if let Err(e) = metrics::write_metrics(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics");
    }
}

/// Mapper for `config`'s mission directory, excluding the state directory
pub fn build_mapper(config: &CadenceConfig) -> Mapper {
    let mapper = Mapper::from_settings(&config.mapper);
    match state_dir_relative(&config.mission_root(), &config.state_root()) {
        Some(rel) => mapper.ignore(format!("/{}/", rel.display())),
        None => mapper,
    }
}

/// State directory relative to the mission directory, if it lives inside it
fn state_dir_relative(mission_root: &Path, state_root: &Path) -> Option<PathBuf> {
    let rel = state_root.strip_prefix(mission_root).ok()?;
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_path_buf())
    }
}

/// Resolves with the name of the first shutdown signal received
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        CadenceError::Other(format!("Failed to set up SIGTERM handler: {}", e))
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        CadenceError::Other(format!("Failed to set up SIGINT handler: {}", e))
    })?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Resolves with the name of the first shutdown signal received
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    })
}
