//! Team scheduler
//!
//! Holds the active team's agent runtimes. Starting a team launches one tokio
//! task per agent, staggered so the edit tool is not hit by every agent at
//! once. Stopping cancels every agent and waits, up to a timeout, for
//! in-flight cycles to finish. Nothing is aborted.

mod team;

pub use team::{AgentStatus, StopReport, TeamStartReport};

use crate::agent::{AgentDeps, AgentLifecycle, AgentRuntime};
use crate::config::{validate_agent_result, AgentDefinition, SchedulerSettings};
use crate::events::{Notification, NotificationKind};
use crate::metrics;
use crate::{CadenceError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handles of launched agent tasks
type AgentTasks = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// A running team
struct Team {
    name: String,
    runtimes: Vec<Arc<AgentRuntime>>,
    cancel: CancellationToken,
    /// Taken by the stop that awaits it
    launcher: Option<JoinHandle<()>>,
    tasks: AgentTasks,
    started_at: DateTime<Utc>,
    /// Cancelled, still waiting for in-flight cycles
    stopping: bool,
}

/// Starts, stops and reports on the active team
pub struct Scheduler {
    deps: AgentDeps,
    settings: SchedulerSettings,
    active: tokio::sync::Mutex<Option<Team>>,
    /// Held for a whole stop so concurrent stops wait for the same completion
    stop_lock: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(deps: AgentDeps, settings: SchedulerSettings) -> Self {
        Self {
            deps,
            settings,
            active: tokio::sync::Mutex::new(None),
            stop_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Name of the active team
    pub async fn active_team(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|t| t.name.clone())
    }

    /// When the active team was started
    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.lock().await.as_ref().map(|t| t.started_at)
    }

    /// Start `definitions` as team `name`
    ///
    /// Each definition is validated and its prompt loaded on its own; one that
    /// fails is reported and skipped while the rest start. Starting the team
    /// that is already active does nothing. Starting a different team while
    /// one is active, or any team while a stop is in progress, is an error.
    pub async fn start_team(
        &self,
        name: &str,
        definitions: Vec<AgentDefinition>,
    ) -> Result<TeamStartReport> {
        let mut active = self.active.lock().await;

        if let Some(ref team) = *active {
            if team.stopping {
                return Err(CadenceError::Team(format!(
                    "Team '{}' is stopping; wait for it before starting '{}'",
                    team.name, name
                )));
            }
            if team.name == name {
                debug!(team = %name, "Team already running");
                return Ok(TeamStartReport {
                    team: name.to_string(),
                    started: team.runtimes.iter().map(|r| r.name().to_string()).collect(),
                    failed: Vec::new(),
                });
            }
            return Err(CadenceError::Team(format!(
                "Team '{}' is already running; stop it before starting '{}'",
                team.name, name
            )));
        }

        let mut runtimes = Vec::new();
        let mut failed = Vec::new();
        for definition in definitions {
            match self.instantiate(definition.clone()).await {
                Ok(runtime) => runtimes.push(Arc::new(runtime)),
                Err(e) => {
                    warn!(agent = %definition.name, error = %e, "Agent failed to instantiate");
                    failed.push((definition.name.clone(), e.to_string()));
                }
            }
        }

        if runtimes.is_empty() {
            return Err(CadenceError::Team(format!(
                "No agent in team '{}' could be started",
                name
            )));
        }

        let cancel = CancellationToken::new();
        let tasks: AgentTasks = Arc::new(Mutex::new(Vec::new()));
        let launcher = tokio::spawn(launch_staggered(
            runtimes.clone(),
            Duration::from_secs(self.settings.stagger_secs),
            cancel.clone(),
            Arc::clone(&tasks),
        ));

        let report = TeamStartReport {
            team: name.to_string(),
            started: runtimes.iter().map(|r| r.name().to_string()).collect(),
            failed,
        };

        info!(
            team = %name,
            started = report.started.len(),
            failed = report.failed.len(),
            stagger_secs = self.settings.stagger_secs,
            "Team started"
        );
        metrics::set_running_agents(runtimes.len());
        self.deps.sink.publish(Notification::new(
            NotificationKind::TeamStarted,
            json!({
                "team": name,
                "agents": report.started,
                "failed": report.failed,
            }),
        ));

        *active = Some(Team {
            name: name.to_string(),
            runtimes,
            cancel,
            launcher: Some(launcher),
            tasks,
            started_at: Utc::now(),
            stopping: false,
        });

        Ok(report)
    }

    /// Stop the active team; a no-op when none is running
    ///
    /// Returns once every agent has stopped or the stop timeout has elapsed.
    /// Agents still busy at the timeout are reported and left to finish.
    pub async fn stop_team(&self) -> StopReport {
        let _stop = self.stop_lock.lock().await;

        // The team stays active (and blocks starts) until its agents are joined
        let (name, runtimes, launcher, tasks) = {
            let mut active = self.active.lock().await;
            let Some(team) = active.as_mut() else {
                debug!("No active team to stop");
                return StopReport::default();
            };
            team.stopping = true;
            team.cancel.cancel();
            (
                team.name.clone(),
                team.runtimes.clone(),
                team.launcher.take(),
                Arc::clone(&team.tasks),
            )
        };

        info!(team = %name, agents = runtimes.len(), "Stopping team");
        if let Some(launcher) = launcher {
            if let Err(e) = launcher.await {
                warn!(team = %name, error = %e, "Agent launcher task failed");
            }
        }

        let handles = match tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let timeout = Duration::from_secs(self.settings.stop_timeout_secs);
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                team = %name,
                timeout_secs = self.settings.stop_timeout_secs,
                "Timed out waiting for agents to stop"
            );
        }
        self.active.lock().await.take();

        let mut report = StopReport::default();
        for runtime in &runtimes {
            match runtime.state().lifecycle {
                // Never launched counts as stopped
                AgentLifecycle::Stopped | AgentLifecycle::Initialized => {
                    report.stopped.push(runtime.name().to_string())
                }
                _ => report.timed_out.push(runtime.name().to_string()),
            }
        }

        info!(
            team = %name,
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            "Team stopped"
        );
        metrics::set_running_agents(0);
        self.deps.sink.publish(Notification::new(
            NotificationKind::TeamStopped,
            json!({
                "team": name,
                "stopped": report.stopped,
                "timed_out": report.timed_out,
            }),
        ));

        report
    }

    /// Per-agent snapshot of the active team, keyed by agent name
    pub async fn get_status(&self) -> BTreeMap<String, AgentStatus> {
        let active = self.active.lock().await;
        let Some(ref team) = *active else {
            return BTreeMap::new();
        };
        team.runtimes
            .iter()
            .map(|r| (r.name().to_string(), AgentStatus::from(&r.state())))
            .collect()
    }

    async fn instantiate(&self, definition: AgentDefinition) -> Result<AgentRuntime> {
        validate_agent_result(&definition)?;

        let bytes = self.deps.store.read_file(&definition.prompt).await?;
        let prompt = String::from_utf8(bytes).map_err(|_| {
            CadenceError::Config(format!(
                "Prompt {} is not valid UTF-8",
                definition.prompt.display()
            ))
        })?;
        if prompt.trim().is_empty() {
            return Err(CadenceError::Config(format!(
                "Prompt {} is empty",
                definition.prompt.display()
            )));
        }

        Ok(AgentRuntime::new(definition, prompt, self.deps.clone()))
    }
}

async fn launch_staggered(
    runtimes: Vec<Arc<AgentRuntime>>,
    stagger: Duration,
    cancel: CancellationToken,
    tasks: AgentTasks,
) {
    for (i, runtime) in runtimes.into_iter().enumerate() {
        if i > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(stagger) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        debug!(agent = %runtime.name(), "Launching agent");
        let handle = tokio::spawn(runtime.run(cancel.clone()));
        match tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}
