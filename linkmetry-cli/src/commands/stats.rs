//! Statistics calculators.
//!
//! These run without a database: sample size planning, power of a planned
//! test, and a one-off significance check from raw counts.

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};
use linkmetry_engine::stats::{
    ArmCounts, SignificanceResult, Winner, calculate_power, evaluate_significance,
    sample_size_recommendation,
};
use serde::Serialize;

use super::{Context, percent, table};

/// Stats arguments.
#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(subcommand)]
    pub command: StatsCommands,
}

/// Stats subcommands.
#[derive(Subcommand, Debug)]
pub enum StatsCommands {
    /// Sessions needed per variant to detect a relative lift
    SampleSize {
        /// Baseline conversion rate, e.g. 0.05
        #[arg(long)]
        baseline: f64,

        /// Minimum relative lift to detect, e.g. 0.1 for +10%
        #[arg(long)]
        effect: f64,

        /// Confidence level in percent
        #[arg(long, default_value_t = 95.0)]
        confidence: f64,

        /// Statistical power in percent
        #[arg(long, default_value_t = 80.0)]
        power: f64,

        /// Number of variants including the control
        #[arg(long, default_value_t = 2)]
        variants: usize,
    },
    /// Power of a two-proportion test
    Power {
        /// Control conversion rate
        #[arg(long)]
        p1: f64,

        /// Variant conversion rate
        #[arg(long)]
        p2: f64,

        /// Control sessions
        #[arg(long)]
        n1: u64,

        /// Variant sessions
        #[arg(long)]
        n2: u64,

        /// Confidence level in percent
        #[arg(long, default_value_t = 95.0)]
        confidence: f64,
    },
    /// Two-proportion z-test from raw counts
    Significance {
        #[arg(long)]
        control_sessions: u64,

        #[arg(long)]
        control_conversions: u64,

        #[arg(long)]
        variant_sessions: u64,

        #[arg(long)]
        variant_conversions: u64,

        /// Confidence level in percent
        #[arg(long, default_value_t = 95.0)]
        confidence: f64,
    },
}

#[derive(Serialize)]
struct PowerOutput {
    p1: f64,
    p2: f64,
    n1: u64,
    n2: u64,
    confidence: f64,
    power: f64,
}

/// Run stats command.
pub fn run(args: StatsArgs, ctx: &Context) -> Result<()> {
    match args.command {
        StatsCommands::SampleSize {
            baseline,
            effect,
            confidence,
            power,
            variants,
        } => run_sample_size(ctx, baseline, effect, confidence, power, variants),
        StatsCommands::Power {
            p1,
            p2,
            n1,
            n2,
            confidence,
        } => run_power(
            ctx,
            PowerOutput {
                p1,
                p2,
                n1,
                n2,
                confidence,
                power: calculate_power(p1, p2, n1, n2, confidence),
            },
        ),
        StatsCommands::Significance {
            control_sessions,
            control_conversions,
            variant_sessions,
            variant_conversions,
            confidence,
        } => {
            let result = evaluate_significance(
                ArmCounts::new(control_sessions, control_conversions),
                ArmCounts::new(variant_sessions, variant_conversions),
                confidence,
            );
            run_significance(ctx, &result)
        }
    }
}

fn run_sample_size(
    ctx: &Context,
    baseline: f64,
    effect: f64,
    confidence: f64,
    power: f64,
    variants: usize,
) -> Result<()> {
    let recommendation = sample_size_recommendation(baseline, effect, confidence, power, variants)?;
    if ctx.emit_json(&recommendation)? {
        return Ok(());
    }

    let a = &recommendation.assumptions;
    println!(
        "Detecting {} -> {} at {}% confidence, {}% power",
        percent(a.baseline_rate),
        percent(a.expected_rate),
        a.confidence,
        a.power
    );
    println!();
    println!("Per variant: {}", recommendation.per_variant_n);
    println!(
        "Total:       {} ({} variants)",
        recommendation.total_n, recommendation.variants
    );
    Ok(())
}

fn run_power(ctx: &Context, output: PowerOutput) -> Result<()> {
    if ctx.emit_json(&output)? {
        return Ok(());
    }

    println!(
        "Control {} over {} sessions vs variant {} over {} sessions",
        percent(output.p1),
        output.n1,
        percent(output.p2),
        output.n2
    );
    println!(
        "Power at {}% confidence: {}",
        output.confidence,
        percent(output.power)
    );
    if output.power < 0.8 {
        println!("Underpowered: collect more sessions before trusting a null result.");
    }
    Ok(())
}

fn run_significance(ctx: &Context, result: &SignificanceResult) -> Result<()> {
    if ctx.emit_json(result)? {
        return Ok(());
    }

    let mut table = table(&["Metric", "Value"]);
    table.add_row(vec![Cell::new("z-score"), Cell::new(format!("{:.4}", result.z_score))]);
    table.add_row(vec![Cell::new("p-value"), Cell::new(format!("{:.4}", result.p_value))]);
    table.add_row(vec![
        Cell::new("Difference"),
        Cell::new(percent(result.absolute_difference)),
    ]);
    table.add_row(vec![
        Cell::new("Relative lift"),
        Cell::new(result.relative_lift.map_or("-".to_string(), percent)),
    ]);
    table.add_row(vec![
        Cell::new(format!("{}% interval", result.confidence)),
        Cell::new(format!(
            "[{}, {}]",
            percent(result.confidence_interval.0),
            percent(result.confidence_interval.1)
        )),
    ]);
    table.add_row(vec![Cell::new("Significant"), verdict(result)]);
    println!("{table}");
    Ok(())
}

pub(crate) fn verdict(result: &SignificanceResult) -> Cell {
    match result.winner {
        Some(Winner::Variant) => Cell::new("yes, variant wins").fg(Color::Green),
        Some(Winner::Control) => Cell::new("yes, control wins").fg(Color::Red),
        None => Cell::new("no"),
    }
}
