//! Cadence - self-pacing agent teams over a shared mission directory
//!
//! Cadence runs a team of agents, each periodically handing a prompt and a set
//! of files to an external code-editing tool. Agents slow down when their runs
//! stop producing changes and back off on errors. A global phase controller
//! watches the total size of the mission directory and shifts weight from
//! content production to review and consolidation once it grows past a budget.
//!
//! # Architecture
//!
//! - **tokens**: Token estimation for documents
//! - **mapper**: Project map (per-document token counts) and file watching
//! - **phase**: EXPANSION/CONVERGENCE state machine with hysteresis
//! - **agent**: Per-agent run loop, adaptive interval, work policies
//! - **scheduler**: Team start/stop with staggered launch
//! - **orchestrator**: Daemon wiring all of the above to one mission
//! - **store**: File store with per-path write locks
//! - **edit**: Edit operation seam, backed by `aider`

pub mod agent;
pub mod config;
pub mod edit;
pub mod error;
pub mod events;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod scheduler;
pub mod store;
pub mod tokens;

// Re-exports
pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use orchestrator::{Orchestrator, OrchestratorCommand};
pub use phase::Phase;
