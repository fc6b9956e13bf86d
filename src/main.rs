//! Cadence - self-pacing agent teams
//!
//! Main entry point for the Cadence CLI.

mod commands;

use cadence::agent::AgentRuntimeState;
use cadence::config::{validate_config, CadenceConfig};
use cadence::orchestrator::{build_mapper, AGENTS_DIR_NAME, PHASE_FILE_NAME};
use cadence::phase::PhaseController;
use cadence::{CadenceError, Orchestrator};
use clap::Parser;
use commands::{Cli, Commands, PhaseCommands};
use std::path::{Path, PathBuf};
use std::process;
use tokio::sync::mpsc;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let logging = if cli.verbose {
        cadence::logging::init_with_level("debug")
    } else {
        cadence::logging::init()
    };
    if let Err(e) = logging {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> cadence::Result<()> {
    // Init creates the config, so it cannot load one
    if let Commands::Init { ref dir } = cli.command {
        return handle_init_command(dir);
    }

    let config_path = cli.config.clone().unwrap_or_else(CadenceConfig::default_path);
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Validate => handle_validate_command(&config, &config_path),
        Commands::Run { team } => handle_run_command(config, team),
        Commands::Map { json } => handle_map_command(&config, json),
        Commands::Phase(cmd) => handle_phase_command(&config, cmd),
        Commands::Status { json } => handle_status_command(&config, json),
    }
}

fn load_config(path: &Path) -> cadence::Result<CadenceConfig> {
    match CadenceConfig::load(path) {
        Err(CadenceError::Config(msg)) if msg.contains("Config file not found") => {
            Err(CadenceError::Config(format!(
                "No configuration found at {}. Run 'cadence init' first to create one.",
                path.display()
            )))
        }
        other => other,
    }
}

fn handle_init_command(dir: &Path) -> cadence::Result<()> {
    let path = CadenceConfig::init(dir)?;
    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  Edit the prompts under {}", dir.join("prompts").display());
    println!("  cadence --config {} run", path.display());
    Ok(())
}

fn handle_validate_command(config: &CadenceConfig, path: &Path) -> cadence::Result<()> {
    match validate_config(config) {
        Ok(()) => {
            println!(
                "{} is valid ({} agents, {} teams)",
                path.display(),
                config.agents.len(),
                config.teams.len()
            );
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("  {}", error);
            }
            Err(CadenceError::Config(format!(
                "{} problem(s) in {}",
                errors.len(),
                path.display()
            )))
        }
    }
}

fn handle_run_command(config: CadenceConfig, team: Option<String>) -> cadence::Result<()> {
    cadence::config::validate_config_result(&config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let orchestrator = Orchestrator::from_config(config)?;
        // Keep the sender alive; nothing else issues commands in foreground mode
        let (_commands_tx, commands_rx) = mpsc::channel(16);
        orchestrator.run(team, commands_rx).await
    })
}

fn handle_map_command(config: &CadenceConfig, json: bool) -> cadence::Result<()> {
    let map = build_mapper(config).compute_map(&config.mission_root())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        print!("{}", map.render());
    }
    Ok(())
}

fn phase_controller(config: &CadenceConfig) -> cadence::Result<PhaseController> {
    PhaseController::from_settings(&config.phase)
        .with_persistence(config.state_root().join(PHASE_FILE_NAME))
}

fn handle_phase_command(config: &CadenceConfig, cmd: PhaseCommands) -> cadence::Result<()> {
    let controller = phase_controller(config)?;
    match cmd {
        PhaseCommands::Status { json } => {
            let status = controller.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Phase:        {}", status.phase);
                println!("Total tokens: {}", status.total_tokens);
                println!(
                    "Thresholds:   convergence > {}, expansion < {}",
                    status.convergence_tokens, status.expansion_tokens
                );
                println!("Headroom:     {}", status.headroom_to_next_transition);
                println!("Transitions:  {}", status.transitions);
            }
        }
        PhaseCommands::Force { phase } => {
            let transition = controller.force_set(phase);
            println!(
                "Phase set to {} (was {})",
                transition.to_phase, transition.from_phase
            );
        }
    }
    Ok(())
}

fn handle_status_command(config: &CadenceConfig, json: bool) -> cadence::Result<()> {
    let dir: PathBuf = config.state_root().join(AGENTS_DIR_NAME);
    let states = AgentRuntimeState::load_all(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("No agent snapshots under {}", dir.display());
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:>7} {:>7} {:>7} {:>10}  {}",
        "AGENT", "STATE", "CYCLES", "IDLE", "ERRORS", "NEXT (s)", "LAST CHANGE"
    );
    for state in &states {
        let next = state
            .next_interval_secs
            .map(|s| format!("{:.0}", s))
            .unwrap_or_else(|| "-".to_string());
        let last_change = state
            .last_change_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<12} {:>7} {:>7} {:>7} {:>10}  {}",
            state.name,
            state.lifecycle.to_string(),
            state.cycles,
            state.consecutive_no_changes,
            state.consecutive_errors,
            next,
            last_change
        );
        if let Some(ref error) = state.last_error {
            println!("{:<20} last error: {}", "", error);
        }
    }
    Ok(())
}
