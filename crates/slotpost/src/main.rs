use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use assembly::{
    parse_override, DispatchOutcome, DispatchReport, DispatchRequest, Dispatcher, Pipeline,
    RoutineRegistry,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use slotpost::{clients, AppConfig};
use tracing::info;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to slotpost.toml (falls back to SLOTPOST_CONFIG, then ./slotpost.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs and reports as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the current slot and publish its post
    Run {
        /// Override text, e.g. "Slot 6: Obscure" or "rivalry"
        #[arg(long)]
        slot: Option<String>,

        /// Run today's first scheduled slot
        #[arg(long, default_value_t = false)]
        manual: bool,

        /// Resolve as if it were this instant (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Assemble everything but neither publish nor save history
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print the resolved weekly schedule
    Schedule,
    /// Show which slot an override resolves to
    ParseSlot { text: String },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Run {
            slot,
            manual,
            at,
            dry_run,
        } => run(config, slot, manual, at, dry_run, cli.json).await,
        Command::Schedule => print_schedule(&config),
        Command::ParseSlot { text } => {
            let registry = RoutineRegistry::default();
            match parse_override(&text, &registry) {
                Some(slot) => match registry.get(slot) {
                    Some(routine) => println!("{text:?} -> slot {slot} ({routine})"),
                    None => println!("{text:?} -> slot {slot} (no routine registered)"),
                },
                None => println!("{text:?} -> nothing (no number or routine keyword)"),
            }
            Ok(())
        }
    }
}

async fn run(
    config: AppConfig,
    slot: Option<String>,
    manual: bool,
    at: Option<DateTime<Utc>>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    config
        .validate(!dry_run)
        .context("Configuration check failed")?;

    let now = at.unwrap_or_else(Utc::now);
    let manual = manual || config.trigger.manual;
    let mut request = DispatchRequest::at(now).with_manual(manual);
    if let Some(text) = slot.or_else(|| config.trigger.forced_slot.clone()) {
        request = request.with_override(text);
    }
    info!(
        at = %now,
        weekday = request.weekday,
        hour = request.hour,
        override_text = ?request.override_text,
        manual = request.manual,
        dry_run,
        "Slot run starting"
    );

    let collaborators = clients::build(&config)?;
    let dispatcher = Dispatcher::new(config.schedule_table()?, RoutineRegistry::default());
    let pipeline = Pipeline::new(config.assembly, collaborators, &config.history_path);
    let mut pipeline = pipeline.dry_run(dry_run);

    let report = dispatcher.dispatch(request, &mut pipeline).await;
    print_report(&report, json)?;

    if let DispatchOutcome::Failed { slot, kind, message } = &report.outcome {
        bail!("slot {slot} failed ({kind}): {message}");
    }
    Ok(())
}

fn print_report(report: &DispatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    match &report.outcome {
        DispatchOutcome::NoRoutine => println!("No routine for this slot."),
        DispatchOutcome::UnknownSlot { slot } => println!("Slot {slot} has no routine."),
        DispatchOutcome::Completed { slot, run } => {
            let status = match (&run.receipt, run.dry_run) {
                (_, true) => "dry run".to_string(),
                (Some(receipt), false) => format!("posted {}", receipt.uri),
                (None, false) => "not posted".to_string(),
            };
            println!("Slot {slot} ({}): {status}", run.routine);
            println!("---\n{}\n---", run.text);
            if !run.dry_run && !run.history_persisted {
                println!("warning: history was not saved");
            }
        }
        DispatchOutcome::Failed { slot, message, .. } => println!("Slot {slot} failed: {message}"),
    }
    Ok(())
}

fn print_schedule(config: &AppConfig) -> Result<()> {
    let table = config.schedule_table()?;
    let registry = RoutineRegistry::default();
    for entry in table.entries() {
        let day = WEEKDAYS
            .get(entry.weekday as usize)
            .copied()
            .unwrap_or("?");
        let routine = registry
            .get(entry.slot)
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unregistered".to_string());
        println!(
            "{day} {:02}:00 UTC  slot {:>2}  {routine}",
            entry.hour, entry.slot
        );

    }
    Ok(())
}
