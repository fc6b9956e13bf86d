//! Main Cadence configuration structure

use super::agent_def::{AgentClass, AgentDefinition, PolicySpec, TeamDefinition};
use crate::phase::{Phase, PhaseThresholds};
use crate::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when `--config` is not given
pub const CONFIG_FILE_NAME: &str = "cadence.yaml";

/// Phase -> agent class -> weight multiplier
pub type WeightTable = BTreeMap<Phase, BTreeMap<AgentClass, f64>>;

/// Cadence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Mission directory, relative to the config file
    #[serde(default = "default_mission_dir")]
    pub mission_dir: PathBuf,

    /// Runtime state directory, relative to the mission directory
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub mapper: MapperSettings,

    #[serde(default)]
    pub phase: PhaseSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub editor: EditorSettings,

    #[serde(default)]
    pub agents: Vec<AgentDefinition>,

    #[serde(default)]
    pub teams: Vec<TeamDefinition>,

    /// Team started by `cadence run` when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_team: Option<String>,

    /// Directory the config was loaded from
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_mission_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".cadence")
}

/// Project map settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperSettings {
    /// Documents below this many tokens are OK
    #[serde(default = "default_ok_threshold")]
    pub ok_threshold: usize,

    /// Documents at or above this many tokens are TOO_LONG
    #[serde(default = "default_too_long_threshold")]
    pub too_long_threshold: usize,

    /// Gitignore-style patterns excluded from the map
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Quiet period before a burst of file events triggers a rebuild
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Honor .gitignore files in the mission directory
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

fn default_ok_threshold() -> usize {
    6000
}

fn default_too_long_threshold() -> usize {
    12000
}

fn default_ignore() -> Vec<String> {
    vec![
        ".git/".to_string(),
        ".cadence/".to_string(),
        "target/".to_string(),
        "node_modules/".to_string(),
    ]
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_chars_per_token() -> usize {
    crate::tokens::DEFAULT_CHARS_PER_TOKEN
}

fn default_true() -> bool {
    true
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            ok_threshold: default_ok_threshold(),
            too_long_threshold: default_too_long_threshold(),
            ignore: default_ignore(),
            debounce_ms: default_debounce_ms(),
            chars_per_token: default_chars_per_token(),
            respect_gitignore: true,
        }
    }
}

/// Phase controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSettings {
    #[serde(default = "default_model_token_limit")]
    pub model_token_limit: usize,

    /// Fraction of the limit above which expansion turns into convergence
    #[serde(default = "default_convergence_ratio")]
    pub convergence_ratio: f64,

    /// Fraction of the limit below which convergence turns back into expansion
    #[serde(default = "default_expansion_ratio")]
    pub expansion_ratio: f64,

    /// Per-phase class multipliers; classes without an entry keep their base weight
    #[serde(default = "default_weights")]
    pub weights: WeightTable,
}

fn default_model_token_limit() -> usize {
    128_000
}

fn default_convergence_ratio() -> f64 {
    0.60
}

fn default_expansion_ratio() -> f64 {
    0.50
}

fn default_weights() -> WeightTable {
    let mut weights = BTreeMap::new();
    weights.insert(
        Phase::Expansion,
        BTreeMap::from([(AgentClass::Production, 1.0), (AgentClass::Validation, 0.5)]),
    );
    weights.insert(
        Phase::Convergence,
        BTreeMap::from([
            (AgentClass::Production, 0.5),
            (AgentClass::Validation, 1.5),
            (AgentClass::Maintenance, 1.5),
        ]),
    );
    weights
}

impl PhaseSettings {
    /// Token thresholds derived from the limit and ratios
    pub fn thresholds(&self) -> PhaseThresholds {
        PhaseThresholds::from_limit(
            self.model_token_limit,
            self.convergence_ratio,
            self.expansion_ratio,
        )
    }
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            model_token_limit: default_model_token_limit(),
            convergence_ratio: default_convergence_ratio(),
            expansion_ratio: default_expansion_ratio(),
            weights: default_weights(),
        }
    }
}

/// Team scheduling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Delay between consecutive agent launches
    #[serde(default = "default_stagger_secs")]
    pub stagger_secs: u64,

    /// How long `stop` waits for in-flight cycles
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Consecutive errors after which an agent cools down at its max interval
    #[serde(default = "default_error_ceiling")]
    pub error_ceiling: u32,
}

fn default_stagger_secs() -> u64 {
    10
}

fn default_stop_timeout_secs() -> u64 {
    900
}

fn default_error_ceiling() -> u32 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            stagger_secs: default_stagger_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            error_ceiling: default_error_ceiling(),
        }
    }
}

/// External edit tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSettings {
    #[serde(default = "default_editor_program")]
    pub program: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Extra flags passed on every invocation
    #[serde(default)]
    pub flags: Vec<String>,
}

fn default_editor_program() -> String {
    "aider".to_string()
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            program: default_editor_program(),
            model: None,
            flags: Vec::new(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            mission_dir: default_mission_dir(),
            state_dir: default_state_dir(),
            mapper: MapperSettings::default(),
            phase: PhaseSettings::default(),
            scheduler: SchedulerSettings::default(),
            editor: EditorSettings::default(),
            agents: Vec::new(),
            teams: Vec::new(),
            default_team: None,
            base_dir: PathBuf::from("."),
        }
    }
}

impl CadenceConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Starter configuration written by `cadence init`
    pub fn starter() -> Self {
        let agents = vec![
            AgentDefinition::new("seeder", "prompts/seeder.md")
                .with_interval(600)
                .watching("docs/**/*.md")
                .with_class(AgentClass::Production)
                .with_policy(PolicySpec::WhenEmpty),
            AgentDefinition::new("writer", "prompts/writer.md")
                .with_interval(300)
                .watching("docs/**/*.md")
                .with_class(AgentClass::Production)
                .with_weight(0.7)
                .with_policy(PolicySpec::Always),
            AgentDefinition::new("reviewer", "prompts/reviewer.md")
                .with_interval(600)
                .watching("docs/**/*.md")
                .with_class(AgentClass::Validation)
                .with_policy(PolicySpec::OnChange),
            AgentDefinition::new("splitter", "prompts/splitter.md")
                .with_interval(900)
                .watching("docs/**/*.md")
                .with_class(AgentClass::Maintenance)
                .with_policy(PolicySpec::Oversized {
                    max_tokens: default_too_long_threshold(),
                }),
        ];
        let names = agents.iter().map(|a| a.name.clone()).collect();

        Self {
            agents,
            teams: vec![TeamDefinition::new("default", names)],
            default_team: Some("default".to_string()),
            ..Self::default()
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CadenceError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading Cadence configuration");

        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tracing::debug!(
            agents = config.agents.len(),
            teams = config.teams.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving Cadence configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// `./cadence.yaml`
    pub fn default_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE_NAME)
    }

    /// Write a starter config and its prompt files into `dir`
    ///
    /// Refuses to overwrite an existing config. Existing prompt files are kept.
    pub fn init(dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Err(CadenceError::Config(format!(
                "Config already exists: {}",
                path.display()
            )));
        }

        let config = Self::starter();
        config.save(&path)?;

        for agent in &config.agents {
            let prompt = dir.join(&agent.prompt);
            if prompt.exists() {
                continue;
            }
            if let Some(parent) = prompt.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&prompt, starter_prompt(&agent.name, agent.class))?;
        }
        fs::create_dir_all(dir.join("docs"))?;

        Ok(path)
    }

    /// Absolute-or-cwd-relative mission directory
    pub fn mission_root(&self) -> PathBuf {
        if self.mission_dir.is_absolute() {
            self.mission_dir.clone()
        } else {
            self.base_dir.join(&self.mission_dir)
        }
    }

    /// State directory resolved against the mission directory
    pub fn state_root(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.mission_root().join(&self.state_dir)
        }
    }

    /// Get an agent definition by name
    pub fn get_agent(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Get a team by name
    pub fn get_team(&self, name: &str) -> Option<&TeamDefinition> {
        self.teams.iter().find(|t| t.name == name)
    }

    /// Resolve a team's member definitions, in launch order
    ///
    /// Unknown member names are returned separately so the caller can report
    /// them without refusing to start the rest of the team.
    pub fn team_agents(&self, team: &str) -> Result<(Vec<AgentDefinition>, Vec<String>)> {
        let team = self
            .get_team(team)
            .ok_or_else(|| CadenceError::Team(format!("Unknown team: {}", team)))?;

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in &team.agents {
            match self.get_agent(name) {
                Some(def) => found.push(def.clone()),
                None => missing.push(name.clone()),
            }
        }
        Ok((found, missing))
    }

    /// Add an agent definition
    pub fn add_agent(&mut self, agent: AgentDefinition) {
        self.agents.push(agent);
    }

    /// Add a team
    pub fn add_team(&mut self, team: TeamDefinition) {
        self.teams.push(team);
    }
}

fn starter_prompt(name: &str, class: AgentClass) -> String {
    let task = match class {
        AgentClass::Production => "Extend the mission documents with new, well-structured material.",
        AgentClass::Validation => "Review the target documents for errors and inconsistencies and fix them.",
        AgentClass::Maintenance => "Split oversized documents into smaller, linked documents.",
        AgentClass::General => "Improve the target documents.",
    };
    format!("# {}\n\n{}\n", name, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = CadenceConfig::new();
        assert_eq!(config.state_dir, PathBuf::from(".cadence"));
        assert_eq!(config.mapper.ok_threshold, 6000);
        assert_eq!(config.mapper.too_long_threshold, 12000);
        assert_eq!(config.scheduler.stagger_secs, 10);
        assert_eq!(config.scheduler.stop_timeout_secs, 900);
        assert_eq!(config.scheduler.error_ceiling, 5);
        assert_eq!(config.editor.program, "aider");
    }

    #[test]
    fn test_default_thresholds() {
        let t = PhaseSettings::default().thresholds();
        assert_eq!(t.convergence_tokens, 76_800);
        assert_eq!(t.expansion_tokens, 64_000);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: CadenceConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.phase, PhaseSettings::default());
        assert_eq!(config.mapper, MapperSettings::default());
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_weights_yaml() {
        let yaml = r#"
phase:
  weights:
    convergence:
      validation: 2.0
"#;
        let config: CadenceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.phase.weights[&Phase::Convergence][&AgentClass::Validation],
            2.0
        );
        assert!(!config.phase.weights.contains_key(&Phase::Expansion));
    }

    #[test]
    fn test_save_and_load() {
        let config = CadenceConfig::starter();
        let temp = NamedTempFile::new().unwrap();
        config.save(temp.path()).unwrap();

        let loaded = CadenceConfig::load(temp.path()).unwrap();
        assert_eq!(loaded.agents, config.agents);
        assert_eq!(loaded.teams, config.teams);
        assert_eq!(loaded.default_team.as_deref(), Some("default"));
        assert_eq!(loaded.base_dir, temp.path().parent().unwrap());
    }

    #[test]
    fn test_load_missing() {
        let err = CadenceConfig::load("/definitely/not/here/cadence.yaml").unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn test_paths_resolve_against_config_dir() {
        let mut config = CadenceConfig::new();
        config.base_dir = PathBuf::from("/missions/book");
        config.mission_dir = PathBuf::from("content");
        assert_eq!(config.mission_root(), PathBuf::from("/missions/book/content"));
        assert_eq!(
            config.state_root(),
            PathBuf::from("/missions/book/content/.cadence")
        );

        config.state_dir = PathBuf::from("/var/lib/cadence");
        assert_eq!(config.state_root(), PathBuf::from("/var/lib/cadence"));
    }

    #[test]
    fn test_init_writes_config_and_prompts() {
        let dir = TempDir::new().unwrap();
        let path = CadenceConfig::init(dir.path()).unwrap();
        assert!(path.exists());
        assert!(dir.path().join("prompts/writer.md").exists());
        assert!(dir.path().join("docs").is_dir());

        // Second init refuses to clobber
        assert!(CadenceConfig::init(dir.path()).is_err());
    }

    #[test]
    fn test_team_agents() {
        let mut config = CadenceConfig::starter();
        config.teams[0].agents.push("ghost".to_string());

        let (found, missing) = config.team_agents("default").unwrap();
        assert_eq!(found.len(), 4);
        assert_eq!(missing, vec!["ghost".to_string()]);

        assert!(config.team_agents("nope").is_err());
    }
}
