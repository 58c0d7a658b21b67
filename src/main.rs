//! CLI entry point for the bulk-downloader tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bulk_downloader_core::{
    BeginDownload, Database, DatabaseOptions, DownloadManager, DownloadProgress, FileProgress,
    HttpTransferEngine, ManagerSettings, Store, Translator, event_channel,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::{Args, Command, ItemArgs};

/// How often the driver loop checks whether transfers are still running.
const DRIVE_TICK: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = app_config::load_file_config_from(args.config.as_deref())?;
    let file_config = loaded.config.unwrap_or_default();
    init_tracing(&args, &file_config);
    debug!(?args, config_path = ?loaded.path, "CLI arguments parsed");

    let manager = open_manager(&args, &file_config).await?;
    let quiet = args.quiet;
    let result = execute(&manager, args.command, &file_config, quiet).await;
    manager.store().database().close().await;
    debug!("state database closed");
    result
}

/// Installs the stderr subscriber.
///
/// Priority: explicit -v/-q flags > `RUST_LOG` > config verbosity > info.
fn init_tracing(args: &Args, config: &FileConfig) {
    let flag_level = if args.quiet {
        Some("error")
    } else {
        match args.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    };
    let filter = match flag_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(
                config.verbosity.map_or("info", app_config::VerbositySetting::filter),
            )
        }),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_manager(args: &Args, config: &FileConfig) -> Result<Arc<DownloadManager>> {
    let db_path = args
        .db
        .clone()
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(app_config::resolve_default_db_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }

    let defaults = DatabaseOptions::default();
    let options = DatabaseOptions {
        max_connections: config.db_max_connections.unwrap_or(defaults.max_connections),
        busy_timeout_ms: config.db_busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
    };
    let db = Database::new_with_options(&db_path, &options)
        .await
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;
    let store = Store::new(db);

    if let Some(limit) = config.concurrent_downloads {
        let mut preferences = store.preferences().await?;
        preferences.concurrent_downloads = i64::from(limit);
        store.save_preferences(&preferences).await?;
    }

    let mut settings = ManagerSettings::default();
    if let Some(hosts) = &config.trusted_hosts {
        settings.trusted_hosts.clone_from(hosts);
    }
    if let Some(secs) = config.undo_grace_secs {
        settings.undo_grace = Duration::from_secs(secs);
    }
    if let Some(secs) = config.links_connect_timeout_secs {
        settings.links_connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = config.links_read_timeout_secs {
        settings.links_read_timeout = Duration::from_secs(secs);
    }

    let (events, receiver) = event_channel();
    let engine = Arc::new(HttpTransferEngine::new(events)?);
    let manager = Arc::new(DownloadManager::new(store, engine, settings)?);
    tokio::spawn(Translator::new(Arc::clone(&manager)).run(receiver));
    info!(db = %db_path.display(), "state database opened");
    Ok(manager)
}

async fn execute(
    manager: &Arc<DownloadManager>,
    command: Command,
    config: &FileConfig,
    quiet: bool,
) -> Result<()> {
    match command {
        Command::Begin {
            links_url,
            label,
            dest,
        } => {
            let dest = match dest.or_else(|| config.download_location.clone()) {
                Some(dest) => dest,
                None => fallback_location(manager).await?,
            };
            let (download_id, report) = manager
                .begin_download(BeginDownload {
                    label,
                    links_url,
                    download_location: dest.display().to_string(),
                    client_id: None,
                })
                .await?;
            println!(
                "{download_id}: {} files added, {} duplicates, {} skipped, {} untrusted",
                report.added, report.duplicates, report.skipped, report.untrusted
            );
            drive_until_idle(manager, quiet).await?;
        }
        Command::Run => {
            let dispatched = manager.recover_on_startup().await?;
            info!(dispatched, "session recovered");
            drive_until_idle(manager, quiet).await?;
        }
        Command::Serve => serve(manager, quiet).await?,
        Command::Pause { download_id, file } => {
            let touched = manager.pause(download_id.as_deref(), file.as_deref()).await?;
            println!("paused {touched} download(s)");
        }
        Command::Resume { download_id, file } => {
            let touched = manager
                .resume(download_id.as_deref(), file.as_deref())
                .await?;
            println!("resumed {touched} download(s)");
            drive_until_idle(manager, quiet).await?;
        }
        Command::Cancel(ItemArgs { download_id, file }) => {
            let marker = manager.cancel(&download_id, file.as_deref()).await?;
            println!("cancelled; undo with: bulk-downloader undo {marker}");
        }
        Command::Retry(ItemArgs { download_id, file }) => {
            let files = manager.retry(&download_id, file.as_deref()).await?;
            println!("requeued {files} file(s)");
            drive_until_idle(manager, quiet).await?;
        }
        Command::Restart(ItemArgs { download_id, file }) => {
            let marker = manager.restart(&download_id, file.as_deref()).await?;
            println!("restarted; undo with: bulk-downloader undo {marker}");
            drive_until_idle(manager, quiet).await?;
        }
        Command::Status { json } => {
            let reports = manager.downloads_progress(None).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_downloads(&reports);
            }
        }
        Command::Files { item, json } => {
            let files = manager
                .files_progress(&item.download_id, item.file.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                print_files(&files);
            }
        }
        Command::Undo { marker } => {
            let outcome = manager.undo(&marker).await?;
            println!(
                "undid {} of {} ({} file(s) restored)",
                outcome.operation.as_str(),
                outcome.download_id,
                outcome.restored_files
            );
            drive_until_idle(manager, quiet).await?;
        }
        Command::Delete { download_id } => {
            let marker = manager.delete_download(&download_id).await?;
            println!("deleted; undo with: bulk-downloader undo {marker}");
        }
        Command::Clear { download_id } => {
            manager.clear_download(&download_id).await?;
            println!("cleared {download_id}");
        }
        Command::Auth { download_id, token } => {
            let files = manager.auth_callback(&download_id, &token).await?;
            println!("released {files} file(s)");
            drive_until_idle(manager, quiet).await?;
        }
        Command::Eula {
            download_id,
            accept,
            reject,
        } => {
            if accept == reject {
                bail!("pass exactly one of --accept or --reject");
            }
            let files = manager.eula_callback(&download_id, accept).await?;
            println!("{} {files} file(s)", if accept { "released" } else { "cancelled" });
            drive_until_idle(manager, quiet).await?;
        }
        Command::Prefs {
            concurrent_downloads,
            default_location,
            allow_metrics,
        } => {
            let mut preferences = manager.store().preferences().await?;
            if let Some(limit) = concurrent_downloads {
                preferences.concurrent_downloads = limit;
            }
            if let Some(location) = default_location {
                preferences.default_download_location = Some(location.display().to_string());
            }
            if let Some(allow) = allow_metrics {
                preferences.allow_metrics = allow;
            }
            manager.store().save_preferences(&preferences).await?;
            println!("{}", serde_json::to_string_pretty(&preferences)?);
        }
    }
    Ok(())
}

async fn fallback_location(manager: &DownloadManager) -> Result<PathBuf> {
    let preferences = manager.store().preferences().await?;
    let location = preferences
        .default_download_location
        .or(preferences.last_download_location)
        .map_or_else(std::env::current_dir, |location| Ok(PathBuf::from(location)))
        .context("Failed to resolve a download location")?;
    Ok(location)
}

/// Waits until nothing is transferring, or suspends everything on Ctrl-C.
///
/// Two consecutive idle ticks end the wait; the translator reschedules within
/// a tick of every finished transfer.
async fn drive_until_idle(manager: &DownloadManager, quiet: bool) -> Result<()> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner
    };
    spinner.enable_steady_tick(Duration::from_millis(120));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut idle_ticks = 0;
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(error) = signal {
                    warn!(error = %error, "failed to listen for Ctrl-C");
                }
                let suspended = manager.app_quitting().await?;
                spinner.finish_with_message(format!("suspended {suspended} download(s)"));
                return Ok(());
            }
            () = tokio::time::sleep(DRIVE_TICK) => {}
        }

        if manager.is_idle() {
            idle_ticks += 1;
            if idle_ticks >= 2 {
                break;
            }
        } else {
            idle_ticks = 0;
        }
        spinner.set_message(format!(
            "{} transferring, {} starting",
            manager.registry().len(),
            manager.correlation().len()
        ));
    }
    spinner.finish_and_clear();
    Ok(())
}

/// Answers JSON control requests from stdin until it closes.
async fn serve(manager: &Arc<DownloadManager>, quiet: bool) -> Result<()> {
    manager.recover_on_startup().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(error) = signal {
                    warn!(error = %error, "failed to listen for Ctrl-C");
                }
                manager.app_quitting().await?;
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read control request")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                println!("{}", manager.dispatch_json(&line).await);
            }
        }
    }
    drive_until_idle(manager, quiet).await
}

fn print_downloads(reports: &[DownloadProgress]) {
    if reports.is_empty() {
        println!("no downloads");
        return;
    }
    for report in reports {
        println!(
            "{}\t{}\t{}%\t{}/{} files\t{}",
            report.id,
            report.state,
            report.progress.percent,
            report.progress.finished_files,
            report.progress.total_files,
            format_duration(report.progress.total_time),
        );
        for error in &report.errors {
            println!("  ! {}", error.message);
        }
    }
}

fn print_files(files: &[FileProgress]) {
    for file in files {
        println!(
            "{}\t{}\t{}%\t{}/{} bytes",
            file.filename, file.state, file.percent, file.received_bytes, file.total_bytes
        );
    }
}

fn format_duration(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
