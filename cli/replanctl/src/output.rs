//! Output formatting for solve results.

use anyhow::{anyhow, Result};
use colored::Colorize;
use replan_solver::{ReconfigurationPlan, SolveOutcome};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

#[derive(Tabled, Serialize)]
struct PlanRow {
    start: i64,
    end: i64,
    action: String,
}

fn rows(plan: &ReconfigurationPlan) -> Vec<PlanRow> {
    plan.iter()
        .map(|item| PlanRow {
            start: item.start,
            end: item.end,
            action: item.action.to_string(),
        })
        .collect()
}

/// Print the outcome; errors on infeasible or inconclusive solves so the
/// process exits non-zero.
pub fn print_outcome(outcome: &SolveOutcome, format: OutputFormat) -> Result<()> {
    match outcome {
        SolveOutcome::Sat(plan) => {
            print_plan(plan, format);
            Ok(())
        }
        SolveOutcome::Unsat => Err(anyhow!("no plan satisfies the constraints")),
        SolveOutcome::Unknown => Err(anyhow!("time budget exhausted before a conclusion")),
    }
}

fn print_plan(plan: &ReconfigurationPlan, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if plan.is_empty() {
                println!("{}", "Nothing to do.".dimmed());
            } else {
                println!("{}", Table::new(rows(plan)));
                println!(
                    "{} actions, done at t={}",
                    plan.len().to_string().bold(),
                    plan.duration().to_string().bold()
                );
            }
        }
        OutputFormat::Json => {
            // The full plan, not the table rows: consumers want the
            // structured actions
            println!(
                "{}",
                serde_json::to_string_pretty(plan).expect("plan serializes")
            );
        }
    }
}

pub fn print_json<T: Serialize>(data: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(data).expect("value serializes")
    );
}
