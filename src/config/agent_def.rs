//! Agent and team definitions
//!
//! Definitions are static: loaded once from the config file, validated once at
//! team start, and never mutated while agents run.

use crate::agent::interval::IntervalBounds;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role of an agent, used to look up phase weight multipliers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    /// Grows content (writers, generators)
    Production,
    /// Checks and corrects content (reviewers, fact checkers)
    Validation,
    /// Restructures content (splitters, indexers)
    Maintenance,
    /// No phase preference
    #[default]
    General,
}

impl std::fmt::Display for AgentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Validation => write!(f, "validation"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::General => write!(f, "general"),
        }
    }
}

/// How an agent decides whether a cycle has work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    /// Every cycle invokes the edit tool on all watched files
    Always,
    /// Work when a watched file changed since the agent's last run
    #[default]
    OnChange,
    /// Work only while nothing matches the watch patterns yet
    WhenEmpty,
    /// Work on watched files whose estimated size exceeds `max_tokens`
    Oversized { max_tokens: usize },
}

fn default_interval_secs() -> u64 {
    300
}

fn default_min_interval_secs() -> u64 {
    60
}

fn default_max_interval_secs() -> u64 {
    3600
}

fn default_weight() -> f64 {
    0.5
}

/// Static definition of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique name, also used for the agent's state file
    pub name: String,

    /// Prompt file, relative to the mission directory
    pub prompt: PathBuf,

    /// Base check interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Globs (relative to the mission directory) the agent watches and may create
    #[serde(default)]
    pub watch: Vec<String>,

    #[serde(default)]
    pub class: AgentClass,

    /// Base priority in [0, 1]; higher runs more often
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub policy: PolicySpec,
}

impl AgentDefinition {
    /// Create a definition with default pacing
    pub fn new(name: impl Into<String>, prompt: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            interval_secs: default_interval_secs(),
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            watch: Vec::new(),
            class: AgentClass::default(),
            weight: default_weight(),
            policy: PolicySpec::default(),
        }
    }

    /// Set the base interval
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Set the interval clamp
    pub fn with_bounds(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.min_interval_secs = min_secs;
        self.max_interval_secs = max_secs;
        self
    }

    /// Add a watch glob
    pub fn watching(mut self, pattern: impl Into<String>) -> Self {
        self.watch.push(pattern.into());
        self
    }

    /// Set the class
    pub fn with_class(mut self, class: AgentClass) -> Self {
        self.class = class;
        self
    }

    /// Set the base weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the work policy
    pub fn with_policy(mut self, policy: PolicySpec) -> Self {
        self.policy = policy;
        self
    }

    /// Base interval in seconds
    pub fn base_interval(&self) -> f64 {
        self.interval_secs as f64
    }

    /// Interval clamp for this agent
    pub fn interval_bounds(&self) -> IntervalBounds {
        IntervalBounds::new(self.min_interval_secs as f64, self.max_interval_secs as f64)
    }
}

/// A named set of agents started together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Agent names, in launch order
    pub agents: Vec<String>,
}

impl TeamDefinition {
    pub fn new(name: impl Into<String>, agents: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            agents,
        }
    }
}
