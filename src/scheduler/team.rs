//! Team reports and status snapshots

use crate::agent::{AgentLifecycle, AgentRuntimeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of starting a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStartReport {
    pub team: String,
    /// Agents launched (or being launched), in order
    pub started: Vec<String>,
    /// Agents that could not be instantiated, with the reason
    pub failed: Vec<(String, String)>,
}

/// Result of stopping a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub stopped: Vec<String>,
    /// Agents still mid-cycle when the stop timeout elapsed
    pub timed_out: Vec<String>,
}

/// Read-only view of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub running: bool,
    pub lifecycle: AgentLifecycle,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_change_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub consecutive_no_changes: u32,
    pub current_weight: f64,
    pub next_interval_secs: Option<f64>,
}

impl From<&AgentRuntimeState> for AgentStatus {
    fn from(state: &AgentRuntimeState) -> Self {
        Self {
            running: state.running,
            lifecycle: state.lifecycle,
            last_run_at: state.last_run_at,
            last_change_at: state.last_change_at,
            consecutive_errors: state.consecutive_errors,
            consecutive_no_changes: state.consecutive_no_changes,
            current_weight: state.current_weight,
            next_interval_secs: state.next_interval_secs,
        }
    }
}
