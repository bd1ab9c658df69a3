use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use camkeep_core::config::{CameraSpec, Config};
use camkeep_core::layout;
use camkeep_core::recorder::local_now;
use camkeep_core::{CameraIdentity, RetentionSweeper, SweepReport};
use clap::{Parser, Subcommand, ValueEnum};
use prettytable::{Table, row};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "camkeep=info";

#[derive(Parser)]
#[command(name = "camkeep", version)]
#[command(about = "Rotating RTSP recorder with date-based retention")]
struct Cli {
    /// Config file to read instead of `CAMKEEP_CONFIG` or the per-user default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record every camera until Ctrl-C, rotating segments and sweeping old ones.
    Record {
        /// Camera as NAME=URL; replaces the configured list when given.
        #[arg(long = "camera", value_name = "NAME=URL")]
        cameras: Vec<String>,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Run one retention sweep now
    Sweep {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        days: Option<u32>,
        /// Report what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// List configured cameras and where today's segments go
    Cameras {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective config (redacts camera credentials)
    Doctor,
    /// Write the effective config to the config file
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[derive(Serialize)]
struct CameraRow {
    name: CameraIdentity,
    url_redacted: String,
    destination: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(Some(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Record { cameras, root } => {
            let mut config = config;
            if let Some(root) = root {
                config.recordings_root = root;
            }
            if !cameras.is_empty() {
                let specs = cameras
                    .iter()
                    .map(|raw| CameraSpec::parse(raw))
                    .collect::<camkeep_core::Result<Vec<_>>>()?;
                config = config.with_cameras(specs)?;
            }
            record(config)?;
        }
        Commands::Sweep {
            root,
            days,
            dry_run,
            format,
        } => {
            let root = root.unwrap_or_else(|| config.recordings_root.clone());
            let days = days.unwrap_or(config.retention_days);
            let sweeper = RetentionSweeper::new(root, days)?.dry_run(dry_run);
            let report = sweeper.sweep(local_now(), &HashSet::new())?;
            emit_json_or_table(format, &report, sweep_table);
            if report.has_problems() {
                warn!(
                    unparsable = report.unparsable.len(),
                    failed = report.failed.len(),
                    "some recordings could not be processed"
                );
            }
        }
        Commands::Cameras { format } => {
            let today = local_now();
            let rows: Vec<CameraRow> = config
                .cameras
                .iter()
                .map(|camera| CameraRow {
                    name: camera.name.clone(),
                    url_redacted: camkeep_core::camera::redact_url(&camera.url),
                    destination: layout::destination(&config.recordings_root, &camera.name, today),
                })
                .collect();
            emit_json_or_table(format, &rows, |rows| {
                let mut table = Table::new();
                table.add_row(row!["name", "url", "destination"]);
                for r in rows {
                    table.add_row(row![r.name, r.url_redacted, r.destination.display()]);
                }
                table
            });
        }
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Doctor => {
                let report = config.doctor();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serializing doctor report")?
                );
            }
            ConfigCommands::Init => {
                let path = config.save(cli.config.as_deref().or(config.file.as_deref()))?;
                println!("wrote {}", path.display());
            }
        },
    }
    Ok(())
}

#[cfg(feature = "opencv")]
fn record(config: Config) -> Result<()> {
    use camkeep_core::Recorder;
    use camkeep_core::backend::opencv::{OpenCvBackend, configure_rtsp_transport};
    use tokio_util::sync::CancellationToken;

    // Safety: no other thread exists yet; the runtime is built below.
    unsafe { configure_rtsp_transport(&config.rtsp_transport) };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        if config.cameras.is_empty() {
            warn!("no cameras configured; pass --camera NAME=URL or set CAMKEEP_CAMERAS");
        }
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("stop requested; closing segments");
                stop.cancel();
            }
        });

        let statuses = tokio::task::spawn_blocking(move || -> Result<_> {
            let now = local_now();
            let mut recorder = Recorder::new(OpenCvBackend, &config, now)?;
            let started = recorder.start_cameras(&config.cameras, now);
            info!(
                started,
                configured = config.cameras.len(),
                root = %config.recordings_root.display(),
                "cameras started"
            );
            Ok(recorder.run(cancel))
        })
        .await
        .context("recorder thread panicked")??;

        for status in statuses {
            info!(
                camera = %status.session.camera,
                files_saved = status.session.files_saved,
                frames_written = status.session.frames_written,
                "camera closed"
            );
        }
        Ok(())
    })
}

#[cfg(not(feature = "opencv"))]
fn record(_config: Config) -> Result<()> {
    anyhow::bail!("camkeep was built without video support; rebuild with `--features opencv`")
}

/// `RUST_LOG` when it parses, otherwise `camkeep=info`.
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn emit_json_or_table<T: Serialize>(
    format: OutputFormat,
    value: &T,
    table_builder: impl FnOnce(&T) -> Table,
) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(err) => warn!(error = %err, "failed to serialize output"),
        },
        OutputFormat::Table => {
            let table = table_builder(value);
            table.printstd();
        }
    }
}

fn sweep_table(report: &SweepReport) -> Table {
    let mut table = Table::new();
    table.add_row(row!["threshold", report.threshold]);
    table.add_row(row!["dry_run", report.dry_run]);
    table.add_row(row!["scanned", report.scanned]);
    table.add_row(row!["kept", report.kept]);
    table.add_row(row!["deleted", report.deleted.len()]);
    table.add_row(row!["bytes_freed", report.bytes_freed]);
    for path in &report.deleted {
        table.add_row(row!["  removed", path.display()]);
    }
    for path in &report.unparsable {
        table.add_row(row!["  unparsable", path.display()]);
    }
    for entry in &report.failed {
        table.add_row(row!["  failed", format!("{}: {}", entry.path.display(), entry.error)]);
    }
    for entry in &report.skipped {
        table.add_row(row![
            "  skipped",
            format!("{} ({:?})", entry.path.display(), entry.reason)
        ]);
    }
    table
}
