//! Binary entry point: wires CLI parsing, settings resolution, logging,
//! the local drive/sheets backends, the tracker and the orchestrator
//! together, then dispatches to one of the run modes spec §6 defines.

mod cli;
mod local_drive;
mod local_sheets;
mod logging;
mod orchestrator;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use local_drive::LocalDirectoryDriveClient;
use local_sheets::CsvSheetsClient;
use metacam_drive::DriveClient;
use metacam_sheets::SheetsClient;
use metacam_tracker::Tracker;
use orchestrator::Orchestrator;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let (cli_args, cli_sources) = cli::parse_cli();

    let settings = match settings::resolve_settings(&cli_args, &cli_sources) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&settings.log_level, settings.log_file.as_deref());

    let tracker_path = settings.processed_path.join("tracker.json");
    let tracker = match Tracker::open(tracker_path.clone(), settings.tracker_retain_days).await {
        Ok(tracker) => Arc::new(tracker),
        Err(err) => {
            error!(path = %tracker_path.display(), error = %err, "failed to open tracker store");
            return ExitCode::FAILURE;
        }
    };

    let drive_client = Arc::new(LocalDirectoryDriveClient::new(settings.incoming_path.clone()));
    let sheets_path = settings.processed_path.join("tracking.csv");
    let sheets_client = Arc::new(CsvSheetsClient::new(sheets_path));

    if cli_args.test_connection {
        return test_connection(drive_client, sheets_client, &settings).await;
    }

    let orchestrator = Arc::new(
        Orchestrator::new(settings.clone(), drive_client, sheets_client, tracker).await,
    );

    if let Some(path) = cli_args.file.clone() {
        return match orchestrator.run_file(path).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "processing the requested file failed");
                ExitCode::FAILURE
            }
        };
    }

    if cli_args.once {
        orchestrator.run_once().await;
        return ExitCode::SUCCESS;
    }

    info!(
        check_interval_secs = settings.check_interval.as_secs(),
        "starting continuous drive poll loop"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal_task = tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    orchestrator.run_forever(shutdown_rx).await;
    signal_task.abort();

    ExitCode::SUCCESS
}

/// Verifies both the drive folder and the sheets backend are reachable,
/// then exits 0/1 for the `--test-connection` CLI mode without touching
/// the tracker (spec §6).
async fn test_connection(
    drive_client: Arc<LocalDirectoryDriveClient>,
    sheets_client: Arc<CsvSheetsClient>,
    settings: &settings::EffectiveSettings,
) -> ExitCode {
    let drive_ok = match drive_client.list_folder(&settings.drive_folder_id).await {
        Ok(descriptors) => {
            info!(count = descriptors.len(), "drive folder is reachable");
            true
        }
        Err(err) => {
            error!(error = %err, "drive folder is not reachable");
            false
        }
    };

    let sheets_ok = match sheets_client.append_rows(&settings.sheet_name, &[]).await {
        Ok(()) => {
            info!("sheets backend is reachable");
            true
        }
        Err(err) => {
            error!(error = %err, "sheets backend is not reachable");
            false
        }
    };

    if drive_ok && sheets_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Waits for SIGTERM (or Ctrl-C) and flips the shutdown watch so
/// `Orchestrator::run_forever` drains in-flight packages instead of
/// being killed mid-download (spec §4.17, §5 "graceful shutdown").
async fn wait_for_shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    }

    let _ = shutdown_tx.send(true);
}
