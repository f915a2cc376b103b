mod adapter;
mod aero;
mod catalog;
mod config;
mod driver;
mod error;
mod expr;
mod history;
mod layout;
mod logging;
mod objective;
mod plot;
mod process;
mod registry;
mod routine;
mod store;
mod value;
mod weight;


use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::catalog::ModuleCatalog;
use crate::history::HistoryTable;
use crate::layout::RoutineLayout;
use crate::registry::Role;
use crate::routine::{Routine, RoutineOutcome};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";
const PROGRAM_ID: &str = "CSTNSystems-AEROROUT";

#[derive(Parser, Debug)]
#[command(name = "aerorout")]
#[command(author = "CSTNSystems")]
#[command(version)]
#[command(about = "CSTNSystems/AEROROUT - Aircraft design routine orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to the routine TOML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (routine working dir, or plot dir for `plot`)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configure and run a routine
    Run {
        /// Also write the JSON summary bundle
        #[arg(long)]
        json: bool,
    },
    /// Validate a routine file and preview its variables
    Validate,
    /// List the module catalog
    Modules,
    /// Re-render plots from an exported history table
    Plot {
        /// Variable_history.csv to read
        #[arg(long)]
        history: PathBuf,
        /// Also draw the design-of-experiments scatter plots
        #[arg(long)]
        doe: bool,
    },
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    program_id: String,
    timestamp_utc: String,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct Summary {
    routine: String,
    routine_type: String,
    driver: String,
    status: String,
    evaluations: usize,
    iterations: usize,
    converged: bool,
    best_design: IndexMap<String, f64>,
    /// First objective at the best design, as written in the routine file
    best_objective: Option<f64>,
    wall_time_ms: f64,
}

#[derive(Serialize)]
struct ResultBundle {
    manifest: Manifest,
    summary: Summary,
    artifacts: Vec<PathBuf>,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: VERSION.to_string(),
        program_id: PROGRAM_ID.to_string(),
        timestamp_utc: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

fn load_config(cfg_path: &Path) -> Result<(config::Root, String)> {
    let cfg_text = fs::read_to_string(cfg_path)
        .with_context(|| format!("failed to read config: {}", cfg_path.display()))?;
    let cfg: config::Root = toml::from_str(&cfg_text)
        .with_context(|| format!("failed to parse config: {}", cfg_path.display()))?;
    cfg.validate()?;
    Ok((cfg, cfg_text))
}

fn print_recap(routine: &Routine, outcome: &RoutineOutcome) {
    eprintln!();
    eprintln!("{:<20} {:>6} {:>14} {:>14} {:>14} {:>14}", "variable", "type", "initial", "final", "min", "max");
    for entry in routine.registry().iter() {
        let initial = entry.initial().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        let last = outcome
            .history
            .row(&entry.name)
            .and_then(|r| r.values.iter().rev().find_map(|v| *v))
            .map(|v| format!("{v:.6}"))
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "{:<20} {:>6} {:>14} {:>14} {:>14} {:>14}",
            entry.name,
            entry.role.tag(),
            initial,
            last,
            entry.bounds.lower_text(),
            entry.bounds.upper_text()
        );
    }
    for row in outcome.history.with_role(Role::Objective) {
        if let Some(best) = row.values.iter().flatten().copied().reduce(f64::min) {
            eprintln!("{:<20} {:>6} lowest value {best:.6}", row.name, "obj");
        }
    }
    eprintln!();
}

// ============================================================================
// Commands
// ============================================================================

fn run_routine(cfg: &config::Root, cfg_text: &str, out: Option<PathBuf>, json_output: bool) -> Result<()> {
    let working_dir = out.unwrap_or_else(|| cfg.routine.working_dir.clone());
    let catalog = ModuleCatalog::with_config(&cfg.modules);
    let layout = RoutineLayout::create(&working_dir, cfg.driver.kind.routine_type())
        .context("failed to create routine directory")?;

    let start = Instant::now();
    let mut routine = Routine::configure(cfg, &catalog, layout).context("routine configuration failed")?;
    let mut driver = crate::driver::from_config(&cfg.driver);
    let outcome = routine
        .run(driver.as_mut())
        .with_context(|| format!("routine '{}' failed", cfg.routine.name))?;
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    eprintln!(
        "[aerorout] {} complete: {} evaluations, converged={} in {:.1}ms",
        cfg.routine.name, outcome.evaluations, outcome.report.converged, wall_time_ms
    );
    print_recap(&routine, &outcome);

    if json_output {
        let sign = match cfg.routine.direction {
            config::Direction::Min => 1.0,
            config::Direction::Max => -1.0,
        };
        let summary = Summary {
            routine: cfg.routine.name.clone(),
            routine_type: cfg.driver.kind.routine_type().to_string(),
            driver: driver.name().to_string(),
            status: format!("{:?}", routine.state()),
            evaluations: outcome.evaluations,
            iterations: outcome.report.iterations,
            converged: outcome.report.converged,
            best_design: routine
                .space()
                .names
                .iter()
                .cloned()
                .zip(outcome.report.best_x.iter().copied())
                .collect(),
            best_objective: outcome.report.best_objective.map(|v| sign * v),
            wall_time_ms,
        };
        let bundle = ResultBundle {
            manifest: create_manifest(cfg, cfg_text),
            summary,
            artifacts: outcome.artifacts.clone(),
        };
        let json_path = routine.layout().summary_json();
        let json = serde_json::to_string_pretty(&bundle)?;
        fs::write(&json_path, json).with_context(|| format!("failed to write {}", json_path.display()))?;
        eprintln!("[aerorout] JSON bundle: {}", json_path.display());
    }

    eprintln!("[aerorout] results: {}", outcome.root.display());
    Ok(())
}

fn validate_config(cfg_path: &Path) -> Result<()> {
    let (cfg, _) = load_config(cfg_path)?;
    let catalog = ModuleCatalog::with_config(&cfg.modules);
    let registry = routine::preview_registry(&cfg, &catalog)?;

    eprintln!("[aerorout] config valid: {}", cfg_path.display());
    eprintln!("  routine: {} ({})", cfg.routine.name, cfg.driver.kind.routine_type());
    eprintln!("  modules: {}", cfg.routine.modules.join(" -> "));
    eprintln!("  objectives: {} ({:?})", cfg.routine.objectives.join(", "), cfg.routine.direction);
    eprintln!(
        "  driver: {:?}, max_iter={}, tol={:.0e}, samples={}, seed={}",
        cfg.driver.kind, cfg.driver.max_iter, cfg.driver.tol, cfg.driver.samples, cfg.driver.seed
    );
    if registry.is_empty() {
        eprintln!("  no variables registered");
    }
    for entry in registry.iter() {
        eprintln!(
            "  {:<6} {:<20} [{}, {}]{}",
            entry.role.tag(),
            entry.name,
            entry.bounds.lower_text(),
            entry.bounds.upper_text(),
            if entry.geometry { " geometry" } else { "" }
        );
    }
    Ok(())
}

fn list_modules(cfg_path: Option<&Path>) -> Result<()> {
    let catalog = match cfg_path {
        Some(path) => ModuleCatalog::with_config(&load_config(path)?.0.modules),
        None => ModuleCatalog::builtin(),
    };
    for spec in catalog.iter() {
        eprintln!("{} - {}", spec.name, spec.description);
        for port in &spec.inputs {
            eprintln!("    in   {:<16} {:<8} {}", port.var_name, port.unit, port.path);
        }
        for port in &spec.outputs {
            eprintln!("    out  {:<16} {:<8} {}", port.var_name, port.unit, port.path);
        }
    }
    Ok(())
}

fn replot(history: &Path, out: &Path, doe: bool) -> Result<()> {
    let table = HistoryTable::read_csv(history)?;
    let written = plot::write_plots(&table, out, doe)?;
    for path in &written {
        eprintln!("[aerorout] plot: {}", path.display());
    }
    Ok(())
}

fn print_version() {
    eprintln!("AEROROUT - CSTNSystems Aircraft Design Routine Orchestrator");
    eprintln!();
    eprintln!("  Program ID:        {}", PROGRAM_ID);
    eprintln!("  Version:           {}", VERSION);
    eprintln!("  Schema Version:    {}", SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("Drivers:");
    eprintln!("  - gradient:        projected finite-difference descent");
    eprintln!("  - uniform:         random sampling");
    eprintln!("  - latin_hypercube: stratified sampling");
    eprintln!("  - full_factorial:  levels^d grid");
    eprintln!();
    eprintln!("Built-in modules:");
    for spec in ModuleCatalog::builtin().iter() {
        eprintln!("  - {}", spec.name);
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Run { json } => {
            let cfg_path = args.config.context("--config required")?;
            let (cfg, cfg_text) = load_config(&cfg_path)?;
            info!(config = %cfg_path.display(), routine = %cfg.routine.name, "starting routine");
            run_routine(&cfg, &cfg_text, args.out, json)
        }
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            validate_config(&cfg_path)
        }
        Commands::Modules => list_modules(args.config.as_deref()),
        Commands::Plot { history, doe } => {
            let out = args.out.context("--out required for plot")?;
            replot(&history, &out, doe)
        }
    }
}
