//! Experiment commands.
//!
//! Read-side views over stored experiments plus the lifecycle transitions.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};
use linkmetry_engine::experiment::{Experiment, ExperimentId, VariantSequential};
use linkmetry_engine::stats::Recommendation;
use linkmetry_engine::{ExperimentReport, ExperimentStatus};
use tracing::info;

use super::stats::verdict;
use super::{Context, percent, table};

/// Experiment arguments.
#[derive(Args, Debug)]
pub struct ExperimentArgs {
    #[command(subcommand)]
    pub command: ExperimentCommands,
}

/// Experiment subcommands.
#[derive(Subcommand, Debug)]
pub enum ExperimentCommands {
    /// List experiments
    List {
        /// Only experiments of this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show per-variant results, power and sample size
    Results {
        /// Experiment ID
        id: ExperimentId,
    },
    /// Run the sequential test over the recorded history
    Sequential {
        /// Experiment ID
        id: ExperimentId,

        /// Number of interim looks (defaults to the configured maximum)
        #[arg(long)]
        looks: Option<usize>,
    },
    /// Start a draft experiment
    Start {
        /// Experiment ID
        id: ExperimentId,
    },
    /// Pause a running experiment
    Pause {
        /// Experiment ID
        id: ExperimentId,
    },
    /// Resume a paused experiment
    Resume {
        /// Experiment ID
        id: ExperimentId,
    },
    /// Stop an experiment for good
    Stop {
        /// Experiment ID
        id: ExperimentId,
    },
}

/// Lifecycle action requested on the command line.
#[derive(Debug, Clone, Copy)]
enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
}

/// Run experiment command.
pub async fn run(args: ExperimentArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ExperimentCommands::List { owner } => run_list(ctx, owner.as_deref()).await,
        ExperimentCommands::Results { id } => run_results(ctx, id).await,
        ExperimentCommands::Sequential { id, looks } => run_sequential(ctx, id, looks).await,
        ExperimentCommands::Start { id } => run_transition(ctx, id, Transition::Start).await,
        ExperimentCommands::Pause { id } => run_transition(ctx, id, Transition::Pause).await,
        ExperimentCommands::Resume { id } => run_transition(ctx, id, Transition::Resume).await,
        ExperimentCommands::Stop { id } => run_transition(ctx, id, Transition::Stop).await,
    }
}

async fn run_list(ctx: &Context, owner: Option<&str>) -> Result<()> {
    let reporter = ctx.reporter()?;
    let experiments = reporter.experiments().list_experiments(owner).await?;
    if ctx.emit_json(&experiments)? {
        return Ok(());
    }

    if experiments.is_empty() {
        println!("No experiments found.");
        return Ok(());
    }

    let mut table = table(&["ID", "Owner", "Name", "Type", "Status", "Created"]);
    for experiment in &experiments {
        table.add_row(vec![
            Cell::new(experiment.id),
            Cell::new(&experiment.owner),
            Cell::new(&experiment.name),
            Cell::new(experiment.experiment_type.as_str()),
            status_cell(experiment.status),
            Cell::new(experiment.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn run_results(ctx: &Context, id: ExperimentId) -> Result<()> {
    let reporter = ctx.reporter()?;
    let report = reporter.experiment_report(id).await?;
    if ctx.emit_json(&report)? {
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &ExperimentReport) {
    let results = &report.results;
    println!(
        "Experiment {} ({}), {}% confidence",
        results.experiment_id, results.status, results.confidence
    );
    println!();

    let mut table = table(&[
        "Variant",
        "Allocation",
        "Sessions",
        "Conversions",
        "Rate",
        "Revenue",
        "Lift",
        "p-value",
        "Significant",
        "Power",
    ]);
    for variant in &results.variants {
        let name = if variant.is_control {
            format!("{} (control)", variant.name)
        } else {
            variant.name.clone()
        };
        let power = report
            .power
            .iter()
            .find(|p| p.variant_id == variant.variant_id)
            .map_or("-".to_string(), |p| percent(p.power));
        let (lift, p_value, significant) = match &variant.significance {
            Some(s) => (
                s.relative_lift.map_or("-".to_string(), percent),
                format!("{:.4}", s.p_value),
                verdict(s),
            ),
            None => ("-".to_string(), "-".to_string(), Cell::new("-")),
        };
        let mut name_cell = Cell::new(name);
        if results.winner == Some(variant.variant_id) {
            name_cell = name_cell.fg(Color::Green);
        }
        table.add_row(vec![
            name_cell,
            Cell::new(format!("{}%", variant.traffic_allocation)),
            Cell::new(variant.sessions),
            Cell::new(variant.conversions),
            Cell::new(percent(variant.conversion_rate)),
            Cell::new(format!("{:.2}", variant.revenue)),
            Cell::new(lift),
            Cell::new(p_value),
            significant,
            Cell::new(power),
        ]);
    }
    println!("{table}");

    if let Some(sample) = &report.sample_size {
        println!();
        println!(
            "Recommended sample: {} per variant, {} total",
            sample.per_variant_n, sample.total_n
        );
    }
    for note in &report.notes {
        println!("Note: {note}");
    }
}

async fn run_sequential(ctx: &Context, id: ExperimentId, looks: Option<usize>) -> Result<()> {
    if looks == Some(0) {
        bail!("--looks must be at least 1");
    }
    let reporter = ctx.reporter()?;
    let analysis = reporter
        .experiments()
        .sequential_analysis(id, looks)
        .await?;
    if ctx.emit_json(&analysis)? {
        return Ok(());
    }

    for variant in &analysis {
        print_sequential(variant);
    }
    Ok(())
}

fn print_sequential(variant: &VariantSequential) {
    let result = &variant.result;
    println!(
        "{} vs control (planned {} per arm)",
        variant.name, variant.planned_per_arm
    );

    let mut table = table(&["Look", "Information", "z", "Boundary", "Alpha spent", "Crossed"]);
    for look in &result.looks {
        table.add_row(vec![
            Cell::new(look.look),
            Cell::new(percent(look.information_fraction)),
            Cell::new(format!("{:.3}", look.z_score)),
            Cell::new(look.boundary.map_or("-".to_string(), |b| format!("{b:.3}"))),
            Cell::new(format!("{:.5}", look.alpha_spent)),
            if look.crossed {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no")
            },
        ]);
    }
    println!("{table}");

    let action = match result.recommendation {
        Recommendation::StopForEfficacy { winner } => format!("stop, {winner:?} wins"),
        Recommendation::StopAtHorizon => "stop, planned sample reached".to_string(),
        Recommendation::Continue => "continue collecting data".to_string(),
    };
    println!(
        "Recommendation: {action} (current power {})",
        percent(result.current_power)
    );
    println!();
}

async fn run_transition(ctx: &Context, id: ExperimentId, transition: Transition) -> Result<()> {
    let reporter = ctx.reporter()?;
    let engine = reporter.experiments();
    let experiment: Experiment = match transition {
        Transition::Start => engine.start_experiment(id).await?,
        Transition::Pause => engine.pause_experiment(id).await?,
        Transition::Resume => engine.resume_experiment(id).await?,
        Transition::Stop => engine.stop_experiment(id).await?,
    };
    info!(experiment_id = %id, ?transition, status = %experiment.status, "Experiment updated");

    if ctx.emit_json(&experiment)? {
        return Ok(());
    }
    println!("{} is now {}", experiment.name, experiment.status);
    Ok(())
}

fn status_cell(status: ExperimentStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        ExperimentStatus::Running => cell.fg(Color::Green),
        ExperimentStatus::Paused => cell.fg(Color::Yellow),
        ExperimentStatus::Completed => cell.fg(Color::DarkGrey),
        ExperimentStatus::Draft => cell,
    }
}
