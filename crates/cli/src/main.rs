use agenda_core::calendar::{self, CalendarDate};
use agenda_core::config::Settings;
use agenda_core::orchestrator::{Backfill, Context, RangeReport};
use agenda_core::region::{Region, Registry};
use agenda_core::schema::AgendaEvent;
use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use schemars::schema_for;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cansino")]
#[command(about = "Collects the public agendas of Spanish regional presidents", long_about = None)]
struct Cli {
    /// Config file (default: ./cansino.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill from each region's first published agenda through today
    Chase {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Backfill from a given day (or just today) through today
    Get {
        /// First day to fetch, yyyy-MM-dd or "today"
        #[arg(long, default_value = "today")]
        since: String,

        /// Fetch only this day, yyyy-MM-dd
        #[arg(long, conflicts_with = "since")]
        date: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// List supported regions
    Regions,
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Region name or slug, or "all"
    #[arg(long, default_value = "all")]
    region: String,

    /// Print events as JSON lines instead of indexing them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

/// Which days a run covers.
enum Span {
    Backfill(Option<CalendarDate>),
    Day(CalendarDate),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Chase { run } => execute(cli.config, run, Span::Backfill(None)),
        Commands::Get { since, date, run } => {
            let span = match date {
                Some(date) => Span::Day(CalendarDate::parse(&date)?),
                None => Span::Backfill(Some(parse_since(&since)?)),
            };
            execute(cli.config, run, span)
        }
        Commands::Regions => list_regions(),
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn parse_since(value: &str) -> Result<CalendarDate> {
    if value.trim().eq_ignore_ascii_case("today") {
        Ok(calendar::today())
    } else {
        Ok(CalendarDate::parse(value)?)
    }
}

fn execute(config: Option<PathBuf>, run: RunArgs, span: Span) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("loading configuration")?;
    let ctx = if run.dry_run {
        // Nothing gets indexed, so index credentials are not required.
        Context::new(Registry::builtin(), settings.build_fetcher()?, None)
    } else {
        settings.build_context().context("building context")?
    };
    let regions = ctx.registry.select(&run.region)?;

    let stop = ctx.stop.clone();
    ctrlc::set_handler(move || {
        warn!("stop requested, finishing the units in flight");
        stop.stop();
    })
    .context("installing Ctrl-C handler")?;

    if !run.dry_run && ctx.indexer.is_none() {
        warn!("indexing is disabled; events are parsed and counted only");
    }

    let print = |event: &AgendaEvent| match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => error!(event_id = %event.id, error = %e, "could not serialize event"),
    };
    let backfill = if run.dry_run {
        Backfill::new(&ctx).dry_run(&print)
    } else {
        Backfill::new(&ctx)
    };

    match span {
        Span::Day(date) => run_day(&backfill, &regions, date),
        Span::Backfill(since) => {
            let reports = backfill.run_regions(&regions, since);
            summarize(&reports);
        }
    }
    Ok(())
}

fn run_day(backfill: &Backfill<'_>, regions: &[&Region], date: CalendarDate) {
    for region in regions {
        let report = backfill.run_unit(region, date);
        info!(
            agenda = %report.agenda_id,
            state = %report.state,
            events = report.events,
            indexed = report.indexed,
            "single day finished"
        );
    }
}

fn summarize(reports: &[RangeReport]) {
    for report in reports {
        for (date, reason) in &report.failed {
            warn!(region = %report.region, date = %date, reason = %reason, "failed unit");
        }
        if let Some(date) = report.stopped_at {
            info!(region = %report.region, resume_from = %date, "stopped before finishing");
        }
        info!(
            region = %report.region,
            units = report.units(),
            failed = report.failed.len(),
            events = report.events,
            indexed = report.indexed,
            index_failures = report.index_failures,
            "summary"
        );
    }
}

fn list_regions() -> Result<()> {
    for region in Registry::builtin().iter() {
        let method = if region.requires_form_post { "POST" } else { "GET" };
        println!(
            "{:<12} {:<20} {:<5} since {}",
            region.slug, region.name, method, region.historical_start_date
        );
    }
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let event_schema = schema_for!(agenda_core::schema::AgendaEvent);
    let event_json = serde_json::to_string_pretty(&event_schema)?;
    fs::write(out_dir.join("AgendaEvent.schema.json"), event_json)?;

    let document_schema = schema_for!(agenda_core::schema::IndexedDocument);
    let document_json = serde_json::to_string_pretty(&document_schema)?;
    fs::write(out_dir.join("IndexedDocument.schema.json"), document_json)?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
