//! Dataflow - market-data ingestion runner
//!
//! Selects series from the catalog, then runs them through the orchestrator for one gate window.
//!
//! # Usage
//! ```sh
//! dataflow realtime --data-source databento --schema mbp-1 --end-time "22:00:00"
//! dataflow historical --data-source onyx --start-range 2025-01-02 --end-range 2025-01-02 \
//!     --end-time "23:59:00"
//! ```

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate, SecondsFormat};
use clap::{Args, Parser, Subcommand};
use dataflow::application::extractor::ExtractorParams;
use dataflow::application::gate::parse_clock_time;
use dataflow::application::orchestrator::ServiceOrchestrator;
use dataflow::config::DataflowConfig;
use dataflow::domain::series::{DataSchema, DataSource, ExtractorKind, SeriesQuery, SeriesType};
use dataflow::infrastructure::observability::Metrics;
use dataflow::infrastructure::{SeriesCatalog, ServiceFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Market-data ingestion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream realtime series until the end time
    Realtime {
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Pull a bounded date range for historical series
    Historical {
        #[command(flatten)]
        select: SelectArgs,

        /// First day to request (YYYY-MM-DD, default: prior business day)
        #[arg(long)]
        start_range: Option<NaiveDate>,

        /// Last day to request (YYYY-MM-DD, default: start range)
        #[arg(long)]
        end_range: Option<NaiveDate>,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// Series catalog CSV
    #[arg(long, default_value = "config/time_series.csv")]
    series_file: PathBuf,

    /// Gate start: ISO-8601 or "HH:MM:SS [delta_days]" (default: now)
    #[arg(long)]
    start_time: Option<String>,

    /// Gate end: ISO-8601 or "HH:MM:SS [delta_days]" (default: EXTRACT_END_TIME)
    #[arg(long)]
    end_time: Option<String>,

    /// Vendor filter (databento, onyx, ...)
    #[arg(long)]
    data_source: Option<String>,

    /// Asset type filter (fut, fx, index, ...)
    #[arg(long)]
    asset_type: Option<String>,

    /// Schema filter (mbp-1, ohlcv-1d, ...)
    #[arg(long)]
    schema: Option<String>,

    /// Root id filter, repeatable
    #[arg(long = "root-id")]
    root_ids: Vec<String>,

    /// Print the selected series and exit
    #[arg(long)]
    dry_run: bool,
}

impl SelectArgs {
    fn select(&self, kind: ExtractorKind) -> Result<SeriesQuery> {
        let catalog = SeriesCatalog::load_csv(&self.series_file, true)?;
        let mut query = match kind {
            ExtractorKind::Realtime => catalog.realtime(),
            ExtractorKind::Historical => catalog.historical(),
        };
        if let Some(source) = &self.data_source {
            query = query.by_source(source.parse::<DataSource>()?);
        }
        if let Some(asset_type) = &self.asset_type {
            query = query.by_series_type(asset_type.parse::<SeriesType>()?);
        }
        if let Some(schema) = &self.schema {
            query = query.by_schema(schema.parse::<DataSchema>()?);
        }
        Ok(query.by_root_ids(&self.root_ids))
    }

    /// CLI times take precedence over `EXTRACT_START_TIME` / `EXTRACT_END_TIME`
    fn apply_window(&self, config: &mut DataflowConfig) -> Result<()> {
        if let Some(value) = &self.end_time {
            config.extract.end_time = Some(parse_clock_time(value)?);
        }
        let Some(end) = config.extract.end_time.as_deref() else {
            bail!("No end time: pass --end-time or set EXTRACT_END_TIME");
        };
        if let Some(value) = &self.start_time {
            config.extract.start_time = Some(parse_clock_time(value)?);
        }
        if config.extract.start_time.is_none() {
            // Default start takes the end's form: naive and offset-aware instants don't compare
            let now = Local::now();
            let start = if has_offset(end) {
                now.to_rfc3339_opts(SecondsFormat::Secs, false)
            } else {
                now.format("%Y-%m-%dT%H:%M:%S").to_string()
            };
            config.extract.start_time = Some(start);
        }
        Ok(())
    }
}

fn has_offset(value: &str) -> bool {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z").is_ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let mut config = DataflowConfig::from_env();

    let (kind, select, range) = match cli.command {
        Commands::Realtime { select } => (ExtractorKind::Realtime, select, (None, None)),
        Commands::Historical {
            select,
            start_range,
            end_range,
        } => (ExtractorKind::Historical, select, (start_range, end_range)),
    };

    if let (Some(start), Some(end)) = range
        && end < start
    {
        bail!("--end-range {} is before --start-range {}", end, start);
    }

    let series = select.select(kind)?;
    if select.dry_run {
        for s in series.iter() {
            println!("{}", s.description());
        }
        println!("{} series selected", series.len());
        return Ok(());
    }
    if series.is_empty() {
        warn!("Dataflow: No {} series match the filters, nothing to do", kind);
        return Ok(());
    }

    select.apply_window(&mut config)?;
    let params = ExtractorParams::from_config(&config.extract)?.with_range(range.0, range.1);
    let window = params.window;
    info!(
        "Dataflow {} starting {} run: {} series, window {} -> {}",
        env!("CARGO_PKG_VERSION"),
        kind,
        series.len(),
        window.start(),
        window.end()
    );

    let metrics = Metrics::new()?;
    let router = Arc::new(ServiceFactory::create_router(
        &config.sinks,
        Some(metrics.clone()),
    ));

    let shutdown = CancellationToken::new();
    let orchestrator = ServiceOrchestrator::builder()
        .registry(ServiceFactory::default_registry())
        .params(params)
        .router(router)
        .vendors(config.vendors.clone())
        .metrics(metrics.clone())
        .shutdown_token(shutdown.clone())
        .concurrent(kind == ExtractorKind::Realtime)
        .build()?;

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Dataflow: Shutdown signal received, stopping extractors...");
            ctrl_c.cancel();
        }
    });

    let summary = orchestrator.run(series.into_vec()).await?;
    for group in &summary.groups {
        match &group.outcome {
            Ok(outcome) => info!(
                "Dataflow: {} ({} series): {:?}, {} jobs",
                group.extractor, group.series, outcome.status, outcome.jobs_done
            ),
            Err(e) => error!("Dataflow: {} ({} series) failed: {}", group.extractor, group.series, e),
        }
    }
    info!(
        "Dataflow: Run finished, {} jobs done, {} failed groups",
        summary.jobs_done(),
        summary.failed()
    );
    info!("Dataflow: Metrics\n{}", metrics.render());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::application::gate::GateWindow;

    #[test]
    fn test_historical_args_parse() {
        let cli = Cli::try_parse_from([
            "dataflow",
            "historical",
            "--data-source",
            "onyx",
            "--root-id",
            "NAPEW",
            "--root-id",
            "EBOB",
            "--start-range",
            "2025-01-02",
            "--end-time",
            "23:59:00",
        ])
        .unwrap();

        let Commands::Historical {
            select,
            start_range,
            end_range,
        } = cli.command
        else {
            panic!("expected historical command");
        };
        assert_eq!(select.root_ids, vec!["NAPEW", "EBOB"]);
        assert_eq!(select.data_source.as_deref(), Some("onyx"));
        assert_eq!(start_range, NaiveDate::from_ymd_opt(2025, 1, 2));
        assert_eq!(end_range, None);
        assert_eq!(select.series_file, PathBuf::from("config/time_series.csv"));
        assert!(!select.dry_run);
    }

    #[test]
    fn test_cli_window_overrides_env() {
        let cli = Cli::try_parse_from([
            "dataflow",
            "realtime",
            "--start-time",
            "2025-01-02T09:00:00",
            "--end-time",
            "2025-01-02T17:00:00",
        ])
        .unwrap();
        let Commands::Realtime { select } = cli.command else {
            panic!("expected realtime command");
        };

        let mut config = DataflowConfig::default();
        config.extract.end_time = Some("2030-01-01T00:00:00".to_string());
        select.apply_window(&mut config).unwrap();
        assert_eq!(config.extract.start_time.as_deref(), Some("2025-01-02T09:00:00"));
        assert_eq!(config.extract.end_time.as_deref(), Some("2025-01-02T17:00:00"));
    }

    #[test]
    fn test_missing_end_time_is_an_error() {
        let cli = Cli::try_parse_from(["dataflow", "realtime"]).unwrap();
        let Commands::Realtime { select } = cli.command else {
            panic!("expected realtime command");
        };
        assert!(select.apply_window(&mut DataflowConfig::default()).is_err());
    }

    #[test]
    fn test_default_start_follows_offset_aware_end() {
        let cli = Cli::try_parse_from(["dataflow", "realtime", "--end-time", "2030-01-01T00:00:00Z"]).unwrap();
        let Commands::Realtime { select } = cli.command else {
            panic!("expected realtime command");
        };

        let mut config = DataflowConfig::default();
        select.apply_window(&mut config).unwrap();
        let start = config.extract.start_time.clone().unwrap();
        assert!(has_offset(&start));
        assert!(GateWindow::parse(&start, "2030-01-01T00:00:00Z").is_ok());
    }

    #[test]
    fn test_default_start_follows_naive_end() {
        let mut config = DataflowConfig::default();
        config.extract.end_time = Some("2030-01-01T00:00:00".to_string());
        let cli = Cli::try_parse_from(["dataflow", "realtime"]).unwrap();
        let Commands::Realtime { select } = cli.command else {
            panic!("expected realtime command");
        };

        select.apply_window(&mut config).unwrap();
        let start = config.extract.start_time.clone().unwrap();
        assert!(!has_offset(&start));
        assert!(GateWindow::parse(&start, "2030-01-01T00:00:00").is_ok());
    }
}
