//! Configuration validation
//!
//! Validates Cadence configuration for correctness:
//! - Agent names are present and unique
//! - Intervals, bounds and weights are in range
//! - Phase thresholds leave a hysteresis band
//! - Teams only reference defined agents

use super::agent_def::{AgentDefinition, PolicySpec};
use super::cadence_config::CadenceConfig;
use crate::CadenceError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a Cadence configuration
pub fn validate_config(config: &CadenceConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let mut seen_agents = HashSet::new();
    for agent in &config.agents {
        if !agent.name.is_empty() && !seen_agents.insert(agent.name.as_str()) {
            errors.push(ValidationError::new(
                "agents",
                format!("Duplicate agent name: {}", agent.name),
            ));
        }
        if let Err(mut agent_errors) = validate_agent(agent) {
            errors.append(&mut agent_errors);
        }
    }

    // Mapper thresholds
    if config.mapper.ok_threshold >= config.mapper.too_long_threshold {
        errors.push(ValidationError::new(
            "mapper.ok_threshold",
            format!(
                "Must be below mapper.too_long_threshold ({} >= {})",
                config.mapper.ok_threshold, config.mapper.too_long_threshold
            ),
        ));
    }
    if config.mapper.chars_per_token == 0 {
        errors.push(ValidationError::new(
            "mapper.chars_per_token",
            "Must be greater than 0",
        ));
    }

    // Phase thresholds
    let phase = &config.phase;
    if phase.model_token_limit == 0 {
        errors.push(ValidationError::new(
            "phase.model_token_limit",
            "Must be greater than 0",
        ));
    }
    for (field, ratio) in [
        ("phase.convergence_ratio", phase.convergence_ratio),
        ("phase.expansion_ratio", phase.expansion_ratio),
    ] {
        if !(ratio > 0.0 && ratio <= 1.0) {
            errors.push(ValidationError::new(
                field,
                format!("Ratio {} must be in (0, 1]", ratio),
            ));
        }
    }
    let thresholds = phase.thresholds();
    if thresholds.expansion_tokens >= thresholds.convergence_tokens {
        errors.push(ValidationError::new(
            "phase.expansion_ratio",
            format!(
                "Expansion threshold ({}) must be below convergence threshold ({})",
                thresholds.expansion_tokens, thresholds.convergence_tokens
            ),
        ));
    }
    for (phase_name, table) in &phase.weights {
        for (class, multiplier) in table {
            if !multiplier.is_finite() || *multiplier < 0.0 {
                errors.push(
                    ValidationError::new(
                        format!("phase.weights.{}", class),
                        format!("Multiplier {} must be a non-negative number", multiplier),
                    )
                    .with_context(phase_name.to_string()),
                );
            }
        }
    }

    if config.scheduler.error_ceiling == 0 {
        errors.push(ValidationError::new(
            "scheduler.error_ceiling",
            "Must be greater than 0",
        ));
    }

    if config.editor.program.trim().is_empty() {
        errors.push(ValidationError::new(
            "editor.program",
            "Edit tool program cannot be empty",
        ));
    }

    // Teams
    let mut seen_teams = HashSet::new();
    for team in &config.teams {
        if team.name.is_empty() {
            errors.push(ValidationError::new("teams", "Team name cannot be empty"));
        } else if !seen_teams.insert(team.name.as_str()) {
            errors.push(ValidationError::new(
                "teams",
                format!("Duplicate team name: {}", team.name),
            ));
        }
        for member in &team.agents {
            if !seen_agents.contains(member.as_str()) {
                errors.push(
                    ValidationError::new("agents", format!("Unknown agent: {}", member))
                        .with_context(&team.name),
                );
            }
        }
    }

    if let Some(ref default_team) = config.default_team {
        if !seen_teams.contains(default_team.as_str()) {
            errors.push(ValidationError::new(
                "default_team",
                format!("Unknown team: {}", default_team),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single agent definition
///
/// Used on its own at team start, so that one bad definition only keeps
/// that agent from starting.
pub fn validate_agent(agent: &AgentDefinition) -> ValidationResult {
    let mut errors = Vec::new();
    let ctx = agent.name.as_str();

    if agent.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "Agent name cannot be empty"));
    }

    if agent.prompt.as_os_str().is_empty() {
        errors.push(ValidationError::new("prompt", "Prompt path cannot be empty").with_context(ctx));
    }

    if agent.interval_secs == 0 {
        errors.push(
            ValidationError::new("interval_secs", "Must be greater than 0").with_context(ctx),
        );
    }

    if agent.min_interval_secs == 0 {
        errors.push(
            ValidationError::new("min_interval_secs", "Must be greater than 0").with_context(ctx),
        );
    }

    if agent.min_interval_secs > agent.max_interval_secs {
        errors.push(
            ValidationError::new(
                "min_interval_secs",
                format!(
                    "Must not exceed max_interval_secs ({} > {})",
                    agent.min_interval_secs, agent.max_interval_secs
                ),
            )
            .with_context(ctx),
        );
    }

    if !(0.0..=1.0).contains(&agent.weight) {
        errors.push(
            ValidationError::new("weight", format!("Weight {} must be in [0, 1]", agent.weight))
                .with_context(ctx),
        );
    }

    for pattern in &agent.watch {
        if let Err(e) = glob::Pattern::new(pattern) {
            errors.push(
                ValidationError::new("watch", format!("Invalid glob '{}': {}", pattern, e))
                    .with_context(ctx),
            );
        }
    }

    if let PolicySpec::Oversized { max_tokens: 0 } = agent.policy {
        errors.push(
            ValidationError::new("policy.max_tokens", "Must be greater than 0").with_context(ctx),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    messages.join("\n  - ")
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &CadenceConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        CadenceError::Config(format!(
            "Configuration validation failed:\n  - {}",
            join_errors(&errors)
        ))
    })
}

/// Validate one agent and return a Result
pub fn validate_agent_result(agent: &AgentDefinition) -> crate::Result<()> {
    validate_agent(agent).map_err(|errors| {
        CadenceError::Config(format!(
            "Invalid agent definition:\n  - {}",
            join_errors(&errors)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentClass, TeamDefinition};

    fn agent(name: &str) -> AgentDefinition {
        AgentDefinition::new(name, format!("prompts/{}.md", name)).watching("docs/**/*.md")
    }

    #[test]
    fn test_starter_config_is_valid() {
        assert!(validate_config(&CadenceConfig::starter()).is_ok());
    }

    #[test]
    fn test_duplicate_agent_names() {
        let mut config = CadenceConfig::new();
        config.add_agent(agent("writer"));
        config.add_agent(agent("writer").with_class(AgentClass::Validation));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Duplicate agent name")));
    }

    #[test]
    fn test_bad_agent_fields() {
        let def = agent("writer")
            .with_interval(0)
            .with_bounds(600, 60)
            .with_weight(1.5)
            .watching("docs/[");

        let errors = validate_agent(&def).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"interval_secs"));
        assert!(fields.contains(&"min_interval_secs"));
        assert!(fields.contains(&"weight"));
        assert!(fields.contains(&"watch"));
        assert!(errors.iter().all(|e| e.context.as_deref() == Some("writer")));
    }

    #[test]
    fn test_oversized_needs_limit() {
        let def = agent("splitter").with_policy(PolicySpec::Oversized { max_tokens: 0 });
        assert!(validate_agent(&def).is_err());
    }

    #[test]
    fn test_thresholds_must_leave_band() {
        let mut config = CadenceConfig::new();
        config.phase.expansion_ratio = 0.7;
        config.phase.convergence_ratio = 0.6;
        assert!(validate_config(&config).is_err());

        let mut config = CadenceConfig::new();
        config.mapper.ok_threshold = 20_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_team_references() {
        let mut config = CadenceConfig::new();
        config.add_agent(agent("writer"));
        config.add_team(TeamDefinition::new(
            "core",
            vec!["writer".to_string(), "ghost".to_string()],
        ));
        config.default_team = Some("other".to_string());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Unknown agent: ghost")
                && e.context.as_deref() == Some("core")));
        assert!(errors.iter().any(|e| e.field == "default_team"));
    }

    #[test]
    fn test_result_wrapper() {
        let mut config = CadenceConfig::new();
        config.add_agent(agent(""));
        let err = validate_config_result(&config).unwrap_err();
        assert!(matches!(err, CadenceError::Config(ref m) if m.contains("Agent name cannot be empty")));
    }

    #[test]
    fn test_display() {
        let e = ValidationError::new("weight", "bad").with_context("writer");
        assert_eq!(e.to_string(), "[writer] weight: bad");
        assert_eq!(ValidationError::new("teams", "x").to_string(), "teams: x");
    }
}
