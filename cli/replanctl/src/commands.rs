//! CLI commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replan_model::VmState;
use replan_solver::{Parameters, ReconfigurationProblem};
use serde::Serialize;
use tabled::{Table, Tabled};
use tracing::info;

use crate::instance::Instance;
use crate::output::{print_json, print_outcome, OutputFormat};

/// Compute reconfiguration plans for a virtualized cluster.
#[derive(Debug, Parser)]
#[command(name = "replan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Solve an instance and print the plan.
    Solve(SolveArgs),

    /// Summarize an instance without solving it.
    Show(ShowArgs),
}

#[derive(Debug, clap::Args)]
struct SolveArgs {
    /// Path to the JSON instance.
    file: PathBuf,

    /// Wall-clock budget in seconds; unlimited when omitted.
    #[arg(long)]
    time_limit: Option<u64>,

    /// Seed for placement tie-breaking.
    #[arg(long, env = "REPLAN_SEED", default_value_t = 0)]
    seed: u64,

    /// Scheduling horizon.
    #[arg(long, default_value_t = 10_000)]
    max_end: i64,
}

#[derive(Debug, clap::Args)]
struct ShowArgs {
    /// Path to the JSON instance.
    file: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Solve(args) => solve(args, self.format),
            Commands::Show(args) => show(args, self.format),
        }
    }
}

fn solve(args: SolveArgs, format: OutputFormat) -> Result<()> {
    let instance = Instance::load(&args.file)?;
    let params = Parameters {
        time_limit: args.time_limit.map(Duration::from_secs),
        seed: args.seed,
        max_end: args.max_end,
        ..Default::default()
    };
    let constraints = instance.constraints();
    let targets = instance.target_states();
    info!(
        nodes = instance.model.mapping.nb_nodes(),
        vms = instance.model.mapping.nb_vms(),
        constraints = constraints.len(),
        "solving"
    );
    let problem = ReconfigurationProblem::new(instance.model, &targets, params)
        .context("cannot build the problem")?;
    let outcome = problem.solve(&constraints)?;
    print_outcome(&outcome, format)
}

#[derive(Tabled, Serialize)]
struct SummaryRow {
    what: String,
    count: usize,
}

fn show(args: ShowArgs, format: OutputFormat) -> Result<()> {
    let instance = Instance::load(&args.file)?;
    let mapping = &instance.model.mapping;
    let count_state = |s: VmState| mapping.vms().filter(|&vm| mapping.vm_state(vm) == Some(s)).count();
    let rows = vec![
        SummaryRow {
            what: "online nodes".into(),
            count: mapping.online_nodes().count(),
        },
        SummaryRow {
            what: "offline nodes".into(),
            count: mapping.offline_nodes().count(),
        },
        SummaryRow {
            what: "running vms".into(),
            count: count_state(VmState::Running),
        },
        SummaryRow {
            what: "sleeping vms".into(),
            count: count_state(VmState::Sleeping),
        },
        SummaryRow {
            what: "ready vms".into(),
            count: count_state(VmState::Ready),
        },
        SummaryRow {
            what: "resources".into(),
            count: instance.model.resources.len(),
        },
        SummaryRow {
            what: "constraints".into(),
            count: instance.constraints.len(),
        },
    ];
    match format {
        OutputFormat::Table => println!("{}", Table::new(&rows)),
        OutputFormat::Json => print_json(&rows),
    }
    Ok(())
}
