//! Configuration system
//!
//! Loads `cadence.yaml` with:
//! - Agent definitions (prompt, pacing, watched globs, class, work policy)
//! - Teams of agents started together
//! - Mapper, phase, scheduler and edit tool settings

mod agent_def;
mod cadence_config;
pub mod validation;

pub use agent_def::{AgentClass, AgentDefinition, PolicySpec, TeamDefinition};
pub use cadence_config::{
    CadenceConfig, EditorSettings, MapperSettings, PhaseSettings, SchedulerSettings,
    WeightTable, CONFIG_FILE_NAME,
};
pub use validation::{
    validate_agent, validate_agent_result, validate_config, validate_config_result,
    ValidationError,
};
