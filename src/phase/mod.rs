//! Expansion/convergence phase state machine
//!
//! The mission is either growing (EXPANSION) or consolidating (CONVERGENCE).
//! Transitions are driven by the project map's total token count with a
//! hysteresis band between the two thresholds: inside the band the phase
//! never changes.

mod controller;

pub use controller::{PhaseController, PhaseStatus, WeightSource};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Default model context size the thresholds are derived from
pub const MODEL_TOKEN_LIMIT: usize = 128_000;

/// Default fraction of the limit above which expansion stops
pub const CONVERGENCE_THRESHOLD_RATIO: f64 = 0.60;

/// Default fraction of the limit below which expansion resumes
pub const EXPANSION_THRESHOLD_RATIO: f64 = 0.50;

/// Global mission phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Expansion,
    Convergence,
}

impl Phase {
    /// Gauge value exported to metrics
    pub fn as_metric(&self) -> f64 {
        match self {
            Self::Expansion => 0.0,
            Self::Convergence => 1.0,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expansion => write!(f, "expansion"),
            Self::Convergence => write!(f, "convergence"),
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "expansion" => Ok(Self::Expansion),
            "convergence" => Ok(Self::Convergence),
            other => Err(format!(
                "unknown phase '{}' (expected expansion or convergence)",
                other
            )),
        }
    }
}

/// What caused a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggeredBy {
    /// Token count crossed a threshold
    Auto,
    /// Operator override
    Manual,
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "AUTO"),
            Self::Manual => write!(f, "MANUAL"),
        }
    }
}

/// One audit entry in the phase history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub timestamp: DateTime<Utc>,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub total_tokens: usize,
    pub triggered_by: TriggeredBy,
}

/// Token thresholds of the hysteresis band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseThresholds {
    /// EXPANSION -> CONVERGENCE when total is strictly above this
    pub convergence_tokens: usize,
    /// CONVERGENCE -> EXPANSION when total is strictly below this
    pub expansion_tokens: usize,
}

impl PhaseThresholds {
    pub fn new(convergence_tokens: usize, expansion_tokens: usize) -> Self {
        Self {
            convergence_tokens,
            expansion_tokens,
        }
    }

    /// Derive thresholds from a model limit and two ratios, rounded to whole tokens
    pub fn from_limit(limit: usize, convergence_ratio: f64, expansion_ratio: f64) -> Self {
        let scale = |ratio: f64| (limit as f64 * ratio).round().max(0.0) as usize;
        Self {
            convergence_tokens: scale(convergence_ratio),
            expansion_tokens: scale(expansion_ratio),
        }
    }
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self::from_limit(
            MODEL_TOKEN_LIMIT,
            CONVERGENCE_THRESHOLD_RATIO,
            EXPANSION_THRESHOLD_RATIO,
        )
    }
}

/// Phase for a new observation, given the current one
pub fn next_phase(current: Phase, total_tokens: usize, thresholds: &PhaseThresholds) -> Phase {
    match current {
        Phase::Expansion if total_tokens > thresholds.convergence_tokens => Phase::Convergence,
        Phase::Convergence if total_tokens < thresholds.expansion_tokens => Phase::Expansion,
        unchanged => unchanged,
    }
}

/// Process-wide phase state, persisted as `phase.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    /// Last observed project total
    pub total_tokens: usize,
    pub last_transition_at: DateTime<Utc>,
    /// Append-only audit trail
    #[serde(default)]
    pub history: Vec<PhaseTransition>,
}

impl PhaseState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Expansion,
            total_tokens: 0,
            last_transition_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Load a persisted state; `None` if the file does not exist
    pub fn load(path: &Path) -> crate::Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist as pretty JSON, replacing the file atomically
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, json.as_bytes())?;
        tmp.persist(path).map_err(|e| crate::CadenceError::Io(e.error))?;
        Ok(())
    }
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}
