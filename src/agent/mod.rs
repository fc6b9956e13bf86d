//! Agents
//!
//! An agent is a definition (prompt, watched globs, pacing) run by an
//! [`AgentRuntime`]. What counts as work is decided by a pluggable
//! [`WorkPolicy`]; how often the agent looks is decided by
//! [`calculate_dynamic_interval`].

pub mod interval;
pub mod policy;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use interval::{calculate_dynamic_interval, IntervalBounds};
pub use policy::{CycleContext, WatchedFile, WorkDecision, WorkPolicy};
pub use runtime::{AgentDeps, AgentLifecycle, AgentRuntime, AgentRuntimeState, CycleOutcome};
