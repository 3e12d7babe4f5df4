use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod calendar;
mod config;
mod error;
mod io;
mod melt;
mod models;
mod normalize;
mod pipeline;
mod report;
mod timeline;
mod window;

use config::Config;
use error::EngineError;
use pipeline::ReportStatus;
use report::ReportKind;

#[derive(Parser)]
#[command(name = "engagement-timeline")]
#[command(about = "Student engagement timelines and follow-up reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the timeline and write the requested reports
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_enum, value_delimiter = ',', default_value = "timeline")]
        reports: Vec<ReportArg>,
        /// Override the configured start of the date range (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Override the configured end of the date range (YYYY-MM-DD)
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Validate the configuration against the current exports
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ReportArg {
    Timeline,
    Cldc,
    Com1100,
    Fds,
}

impl From<ReportArg> for ReportKind {
    fn from(arg: ReportArg) -> Self {
        match arg {
            ReportArg::Timeline => ReportKind::Timeline,
            ReportArg::Cldc => ReportKind::Cldc,
            ReportArg::Com1100 => ReportKind::Com1100,
            ReportArg::Fds => ReportKind::Fds,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            reports,
            since,
            until,
            out,
            log_file,
        } => {
            init_logging(log_file.as_deref())?;
            let mut config = Config::load(&config)
                .with_context(|| format!("failed to load configuration {}", config.display()))?;
            if let Some(since) = since {
                config.date_range.start = since;
            }
            if until.is_some() {
                config.date_range.end = until;
            }
            config.validate().context("invalid configuration")?;

            let mut kinds: Vec<ReportKind> = Vec::new();
            for kind in reports.into_iter().map(ReportKind::from) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }

            let summary = pipeline::run(&config, &kinds, &out);
            if summary.descriptive_conflicts > 0 {
                println!(
                    "Resolved {} conflicting descriptive values by source priority.",
                    summary.descriptive_conflicts
                );
            }

            let mut failed = 0usize;
            for report in &summary.reports {
                match &report.status {
                    ReportStatus::Written(paths) => {
                        println!(
                            "- {}: {} tables written, {} rows skipped, {} students excluded",
                            report.kind,
                            paths.len(),
                            report.rows_skipped,
                            report.students_excluded
                        );
                        for path in paths {
                            println!("    {}", path.display());
                        }
                    }
                    ReportStatus::Failed(reason) => {
                        failed += 1;
                        println!("- {}: not produced ({reason})", report.kind);
                    }
                }
            }

            if !summary.all_succeeded() {
                anyhow::bail!("{failed} requested report(s) could not be produced");
            }
        }
        Commands::CheckConfig { config } => {
            init_logging(None)?;
            let config = Config::load(&config)
                .with_context(|| format!("failed to load configuration {}", config.display()))?;

            let mut failed = 0usize;
            for (source, result) in pipeline::check_sources(&config) {
                match result {
                    Ok(path) => println!("- {source}: ok ({})", path.display()),
                    Err(err) => {
                        failed += 1;
                        println!("- {source}: {err}");
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{failed} source(s) do not match the configuration");
            }
            println!("Configuration ready.");
        }
    }

    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|err| EngineError::Logging(err.to_string()))?;
    Ok(())
}
