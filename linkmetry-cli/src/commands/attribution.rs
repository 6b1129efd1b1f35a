//! Attribution commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::Cell;
use linkmetry_engine::{AttributionModel, AttributionReport, ChannelAttributionReport, LookbackDays};

use super::{Context, percent, table};

/// Attribution arguments.
#[derive(Args, Debug)]
pub struct AttributionArgs {
    #[command(subcommand)]
    pub command: AttributionCommands,
}

/// Attribution subcommands.
#[derive(Subcommand, Debug)]
pub enum AttributionCommands {
    /// Journey of a conversion with the credit under every model
    Report {
        /// External conversion ID
        conversion_id: String,
    },
    /// Credit per source and medium for a short code
    Channels {
        /// Short code of the link
        short_code: String,

        /// Look-back range in days (1-365)
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// first_touch, last_touch, linear, time_decay, position_based or data_driven
        #[arg(long, default_value = "linear")]
        model: AttributionModel,
    },
}

/// Run attribution command.
pub async fn run(args: AttributionArgs, ctx: &Context) -> Result<()> {
    match args.command {
        AttributionCommands::Report { conversion_id } => run_report(ctx, &conversion_id).await,
        AttributionCommands::Channels {
            short_code,
            days,
            model,
        } => run_channels(ctx, &short_code, days, model).await,
    }
}

async fn run_report(ctx: &Context, conversion_id: &str) -> Result<()> {
    let reporter = ctx.reporter()?;
    let report = reporter.attribution_report(conversion_id).await?;
    if ctx.emit_json(&report)? {
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &AttributionReport) {
    let conversion = &report.conversion;
    println!(
        "Conversion {} on {} worth {:.2} at {}",
        conversion.conversion_id,
        conversion.short_code,
        conversion.value,
        conversion.conversion_time.format("%Y-%m-%d %H:%M:%S")
    );
    if report.journey.is_empty() {
        println!("No touchpoints inside the attribution window.");
        return;
    }
    println!();

    let mut headers = vec!["#", "Time", "Source", "Medium"];
    headers.extend(AttributionModel::ALL.iter().map(|m| m.as_str()));
    let mut table = table(&headers);

    for (index, touchpoint) in report.journey.iter().enumerate() {
        let (source, medium) = touchpoint.channel();
        let mut row = vec![
            Cell::new(touchpoint.touchpoint_order),
            Cell::new(touchpoint.touchpoint_time.format("%Y-%m-%d %H:%M")),
            Cell::new(source),
            Cell::new(medium),
        ];
        for model in AttributionModel::ALL {
            let credit = report
                .model(model)
                .and_then(|r| r.touchpoints.get(index))
                .map_or("-".to_string(), |t| format!("{:.2}", t.attribution_value));
            row.push(Cell::new(credit));
        }
        table.add_row(row);
    }
    println!("{table}");

    if report.models.iter().any(|r| r.fallback) {
        println!("data_driven has no trained model; linear weights were used.");
    }
}

async fn run_channels(
    ctx: &Context,
    short_code: &str,
    days: u32,
    model: AttributionModel,
) -> Result<()> {
    let days = LookbackDays::new(days)?;
    let reporter = ctx.reporter()?;
    let report = reporter.channel_report(short_code, days, model).await?;
    if ctx.emit_json(&report)? {
        return Ok(());
    }
    print_channels(&report);
    Ok(())
}

fn print_channels(report: &ChannelAttributionReport) {
    println!(
        "{} over the last {} days ({}), {} conversions",
        report.short_code,
        report.days.get(),
        report.model,
        report.conversions_considered
    );

    if report.channels.is_empty() {
        println!("No attributed conversions.");
    } else {
        let total: f64 = report.channels.iter().map(|c| c.attributed_value).sum();
        let mut table = table(&["Source", "Medium", "Value", "Share", "Conversions", "Touchpoints"]);
        for channel in &report.channels {
            let share = if total > 0.0 {
                channel.attributed_value / total
            } else {
                0.0
            };
            table.add_row(vec![
                Cell::new(&channel.source),
                Cell::new(&channel.medium),
                Cell::new(format!("{:.2}", channel.attributed_value)),
                Cell::new(percent(share)),
                Cell::new(channel.conversions),
                Cell::new(channel.touchpoints),
            ]);
        }
        println!("{table}");
    }

    if report.unattributed_value > 0.0 {
        println!(
            "Unattributed value (no touchpoints): {:.2}",
            report.unattributed_value
        );
    }
    for warning in &report.warnings {
        eprintln!("Skipped {}: {}", warning.conversion_id, warning.message);
    }
}
