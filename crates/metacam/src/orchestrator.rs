//! L17 — Orchestrator: the long-running loop gluing the Drive Monitor,
//! Downloader, Archive Inspector, Validation Manager, Processing
//! Driver, Sheets Writer and Tracker together (spec §4.17, §5).
//!
//! Per-package stages run strictly sequentially; the supervisor runs
//! packages concurrently up to `max_concurrent_downloads`, releasing
//! the download slot before blocking on the (much longer) processing
//! subprocesses, the way spec §5 requires.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use metacam_archive::{ArchiveInspectorConfig, SizeStatus};
use metacam_drive::{DownloadError, Downloader, DownloaderConfig, DriveClient, DriveMonitor, DriveMonitorConfig, RemoteFile};
use metacam_processing::{ProcessingDriver, ProcessingDriverConfig, SceneHint};
use metacam_sheets::{CellStatus, SheetRow, SheetsClient, SheetsWriter, SheetsWriterConfig};
use metacam_tracker::{Tracker, TrackerRecord};
use metacam_types::{PackageDescriptor, PackageStage, ValidationLevel};
use metacam_validate::{DetectorConfig, ManagerOutcome, MetaCamValidator, ScenePreset, TransientValidator, ValidationManager};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::settings::EffectiveSettings;

/// Lets the orchestrator turn a `PackageDescriptor` from a given
/// `DriveClient` into something the Downloader can read, without
/// coupling the orchestrator to a single concrete SDK (design note §9,
/// detector-facade-style polymorphism applied to the drive client).
pub trait RemoteFileSource: DriveClient {
    type Remote: RemoteFile + Send + Sync;

    fn remote_file(&self, descriptor: &PackageDescriptor) -> Self::Remote;
}

pub struct Orchestrator<D, S>
where
    D: RemoteFileSource,
    S: SheetsClient,
{
    settings: EffectiveSettings,
    drive_client: Arc<D>,
    monitor: Arc<DriveMonitor<D>>,
    downloader: Arc<Downloader>,
    validation: Arc<ValidationManager>,
    driver: Arc<ProcessingDriver>,
    sheets: Arc<SheetsWriter<S>>,
    tracker: Arc<Tracker>,
    download_slots: Arc<Semaphore>,
}

impl<D, S> Orchestrator<D, S>
where
    D: RemoteFileSource + 'static,
    S: SheetsClient + 'static,
{
    pub async fn new(
        settings: EffectiveSettings,
        drive_client: Arc<D>,
        sheets_client: Arc<S>,
        tracker: Arc<Tracker>,
    ) -> Self {
        let monitor_config = DriveMonitorConfig {
            folder_id: settings.drive_folder_id.clone(),
            check_interval: settings.check_interval,
            allowed_extensions: settings.allowed_extensions.clone(),
            max_file_size_mb: settings.max_file_size_mb,
        };
        let monitor = Arc::new(DriveMonitor::new(drive_client.clone(), monitor_config));

        let downloader = Arc::new(Downloader::new(DownloaderConfig {
            chunk_size_bytes: settings.download_chunk_size_mb * 1024 * 1024,
            retries: settings.download_retries,
            overall_timeout: settings.download_timeout,
        }));

        let mut validation = ValidationManager::new();
        validation.register(Arc::new(MetaCamValidator::new()));
        validation.register_transient(Arc::new(TransientValidator::new(
            DetectorConfig::default(),
            ScenePreset::Default,
        )));

        let driver = Arc::new(ProcessingDriver::new(ProcessingDriverConfig {
            generator_binary: settings.generator_exe_path.clone(),
            cli_binary: settings.cli_exe_path.clone(),
            binary_dir: settings.processors_exe_path.clone(),
            configured_out_dir: settings.processing_output_path.clone(),
            generator_timeout: settings.processing_timeout,
            cli_timeout: settings.metacam_cli_timeout,
            retry_attempts: settings.processing_retry_attempts,
            indoor_scale_threshold_m: settings.indoor_scale_threshold_m,
            cli_mode: settings.metacam_cli_mode,
            cli_color: settings.metacam_cli_color,
        }));

        let sheets = Arc::new(SheetsWriter::new(
            sheets_client,
            SheetsWriterConfig {
                sheet_name: settings.sheet_name.clone(),
                batch_write_size: settings.batch_write_size,
                retries: 3,
                dead_letter_path: settings.processed_path.join("sheets_dead_letter.ndjson"),
            },
        ));

        let download_slots = Arc::new(Semaphore::new(settings.max_concurrent_downloads));

        Self {
            settings,
            drive_client,
            monitor,
            downloader,
            validation: Arc::new(validation),
            driver,
            sheets,
            tracker,
            download_slots,
        }
    }

    /// Processes one local archive directly, skipping the drive monitor
    /// and downloader entirely (the `--file` CLI mode, spec §6).
    pub async fn run_file(&self, path: PathBuf) -> Result<(), String> {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| format!("failed to stat {}: {err}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let descriptor = PackageDescriptor {
            remote_id: format!("local:{}", path.display()),
            name,
            size_bytes: metadata.len(),
            remote_mtime: metadata.modified().unwrap_or(SystemTime::now()),
            mime: "application/octet-stream".to_string(),
        };

        let worker = PackageWorker {
            settings: self.settings.clone(),
            drive_client: self.drive_client.clone(),
            downloader: self.downloader.clone(),
            validation: self.validation.clone(),
            driver: self.driver.clone(),
            sheets: self.sheets.clone(),
            tracker: self.tracker.clone(),
            download_slots: self.download_slots.clone(),
        };

        let outcome = worker.drive_package_from_local(&descriptor, path).await;
        let row_label = outcome.row.file_id.clone();
        if let Err(err) = self.sheets.write_row(outcome.row).await {
            error!(package_id = %row_label, error = %err, "failed to enqueue sheet row");
        }
        self.sheets.flush().await.map_err(|err| err.to_string())?;

        if let Some(scratch_root) = outcome.scratch_root {
            if !self.settings.keep_original_data {
                let _ = tokio::fs::remove_dir_all(&scratch_root).await;
            }
        }
        Ok(())
    }

    /// One poll pass over the drive folder, draining every newly-seen
    /// descriptor before returning (the `--once` CLI mode, spec §6).
    pub async fn run_once(&self) {
        let (tx, rx) = mpsc::channel(64);
        if let Err(err) = self.monitor.poll_once(&tx).await {
            warn!(error = %err, "drive poll failed during --once run");
        }
        drop(tx);

        let mut stream = ReceiverStream::new(rx);
        let mut handles = Vec::new();
        while let Some(descriptor) = stream.next().await {
            handles.push(self.spawn_package(descriptor));
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.sheets.flush().await.ok();
    }

    /// The long-running loop (spec §4.17): polls on `check_interval`
    /// until `shutdown` fires, processing every descriptor concurrently
    /// up to `max_concurrent_downloads`.
    pub async fn run_forever(self: Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel(256);

        let monitor = self.monitor.clone();
        let monitor_shutdown = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run(tx, monitor_shutdown).await;
        });

        let mut in_flight = Vec::new();
        let mut drain_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                descriptor = rx.recv() => {
                    match descriptor {
                        Some(descriptor) => in_flight.push(self.spawn_package(descriptor)),
                        None => break,
                    }
                }
                _ = drain_shutdown.changed() => {
                    if *drain_shutdown.borrow() {
                        info!("orchestrator draining in-flight packages before shutdown");
                        break;
                    }
                }
            }
            in_flight.retain(|h| !h.is_finished());
        }

        let drain_timeout = Duration::from_secs(120);
        let drain = async {
            for handle in in_flight {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            warn!("shutdown drain timeout elapsed with packages still in flight");
        }

        let _ = monitor_handle.await;
        self.sheets.flush().await.ok();
    }

    fn spawn_package(&self, descriptor: PackageDescriptor) -> tokio::task::JoinHandle<()>
    where
        D: 'static,
        S: 'static,
    {
        let this = PackageWorker {
            settings: self.settings.clone(),
            drive_client: self.drive_client.clone(),
            downloader: self.downloader.clone(),
            validation: self.validation.clone(),
            driver: self.driver.clone(),
            sheets: self.sheets.clone(),
            tracker: self.tracker.clone(),
            download_slots: self.download_slots.clone(),
        };
        tokio::spawn(this.run(descriptor))
    }
}

/// Per-package state, moved into its own spawned task so the
/// orchestrator's supervisor never blocks on one package's work.
struct PackageWorker<D, S>
where
    D: RemoteFileSource,
    S: SheetsClient,
{
    settings: EffectiveSettings,
    drive_client: Arc<D>,
    downloader: Arc<Downloader>,
    validation: Arc<ValidationManager>,
    driver: Arc<ProcessingDriver>,
    sheets: Arc<SheetsWriter<S>>,
    tracker: Arc<Tracker>,
    download_slots: Arc<Semaphore>,
}

impl<D, S> PackageWorker<D, S>
where
    D: RemoteFileSource,
    S: SheetsClient,
{
    #[instrument(skip(self), fields(package_id = %descriptor.remote_id))]
    async fn run(self, descriptor: PackageDescriptor) {
        if self.tracker.seen(&descriptor.remote_id).await {
            return;
        }

        let outcome = self.drive_package(&descriptor).await;

        let row_label = outcome.row.file_id.clone();
        if let Err(err) = self.sheets.write_row(outcome.row).await {
            error!(package_id = %row_label, error = %err, "failed to enqueue sheet row");
        }

        let record = TrackerRecord::new(
            descriptor.remote_id.clone(),
            descriptor.name.clone(),
            outcome.final_stage.as_str(),
        );
        if let Err(err) = self.tracker.mark(record).await {
            metacam_tracker::warn_on_persist_failure(&descriptor.remote_id, &err);
        }

        if let Some(scratch_root) = outcome.scratch_root {
            if !self.settings.keep_original_data {
                let _ = tokio::fs::remove_dir_all(&scratch_root).await;
            }
        }
    }

    async fn drive_package(&self, descriptor: &PackageDescriptor) -> PackageOutcome {
        let mut row = SheetRow::new(descriptor.remote_id.clone(), descriptor.name.clone());
        row.upload_time = Some(format_unix(descriptor.remote_mtime));
        row.file_size_mib = Some(descriptor.size_bytes as f64 / (1024.0 * 1024.0));

        let started = Instant::now();

        let local_path = match self.download(descriptor, &mut row).await {
            Ok(path) => path,
            Err(stage) => return PackageOutcome::failed(row, stage, None),
        };

        self.drive_package_inner(descriptor, local_path, row, started).await
    }

    /// Entry point for `--file`: identical to [`Self::drive_package`] from
    /// the extraction stage onward, skipping the download stage entirely.
    async fn drive_package_from_local(&self, descriptor: &PackageDescriptor, local_path: PathBuf) -> PackageOutcome {
        let mut row = SheetRow::new(descriptor.remote_id.clone(), descriptor.name.clone());
        row.upload_time = Some(format_unix(descriptor.remote_mtime));
        row.file_size_mib = Some(descriptor.size_bytes as f64 / (1024.0 * 1024.0));
        let started = Instant::now();
        self.drive_package_inner(descriptor, local_path, row, started).await
    }

    async fn drive_package_inner(
        &self,
        descriptor: &PackageDescriptor,
        local_path: PathBuf,
        mut row: SheetRow,
        started: Instant,
    ) -> PackageOutcome {
        let (extracted, scratch_root) = match self.extract(&local_path, &mut row).await {
            Ok(pair) => pair,
            Err(stage) => return PackageOutcome::failed(row, stage, None),
        };

        let outcome_metadata = match self.validate(&extracted.root_path, &mut row).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                row.process_time = Some(format!("{:.1}s", started.elapsed().as_secs_f64()));
                return PackageOutcome::done(row, PackageStage::Done, Some(scratch_root));
            }
            Err(stage) => return PackageOutcome::failed(row, stage, Some(scratch_root)),
        };

        self.process(&extracted.root_path, descriptor, &outcome_metadata, &mut row)
            .await;

        row.process_time = Some(format!("{:.1}s", started.elapsed().as_secs_f64()));
        PackageOutcome::done(row, PackageStage::Done, Some(scratch_root))
    }

    async fn download(&self, descriptor: &PackageDescriptor, row: &mut SheetRow) -> Result<PathBuf, PackageStage> {
        let _permit = self.download_slots.acquire().await.expect("semaphore never closed");

        tokio::fs::create_dir_all(&self.settings.download_path).await.ok();
        let dest = self.settings.download_path.join(&descriptor.name);
        let remote = self.drive_client.remote_file(descriptor);

        let bar = ProgressBar::new(descriptor.size_bytes);
        bar.set_style(
            ProgressStyle::with_template("{msg} {wide_bar} {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(descriptor.name.clone());

        let result = self
            .downloader
            .download(&remote, &dest, |progress| bar.set_position(progress.bytes_done))
            .await;
        bar.finish_and_clear();

        match result {
            Ok(()) => Ok(dest),
            Err(err) => {
                warn!(error = %err, "download failed");
                row.error_message = Some(download_error_message(&err));
                Err(PackageStage::Downloading)
            }
        }
    }

    async fn extract(
        &self,
        local_path: &PathBuf,
        row: &mut SheetRow,
    ) -> Result<(metacam_types::ExtractedPackage, PathBuf), PackageStage> {
        let config = ArchiveInspectorConfig {
            scratch_root: self.settings.temp_dir.join("metacam-scratch"),
            max_file_size_mb: self.settings.max_file_size_mb,
            default_passwords: self.settings.default_passwords.clone(),
            ..ArchiveInspectorConfig::default()
        };

        match metacam_archive::inspect(local_path, &config).await {
            Ok((extracted, status)) => {
                row.file_type = Some(extracted.format.as_str().to_string());
                row.file_count = Some(extracted.files.len() as u64);
                row.extract_status = Some(match status {
                    SizeStatus::Optimal => CellStatus::Optimal,
                    SizeStatus::Warning => CellStatus::Warning,
                    SizeStatus::Error => CellStatus::Error,
                });
                let root = extracted.root_path.clone();
                Ok((extracted, root))
            }
            Err(err) => {
                warn!(error = %err, "archive extraction failed");
                row.extract_status = Some(CellStatus::Error);
                row.error_message = Some(err.to_string());
                Err(PackageStage::Extracting)
            }
        }
    }

    /// Runs the validation pipeline and fills in every sheet column it
    /// can answer. Returns `Ok(Some(metadata))` when validation passed
    /// and processing should run, `Ok(None)` when it failed validation
    /// (a terminal, non-fatal outcome per spec §7), or `Err` on an
    /// internal validator error.
    async fn validate(
        &self,
        root: &std::path::Path,
        row: &mut SheetRow,
    ) -> Result<Option<serde_json::Value>, PackageStage> {
        let outcome = match self.validation.validate(root, ValidationLevel::Standard, Some("metacam")).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "no validator registered for package format");
                row.error_message = Some(err.to_string());
                return Err(PackageStage::Validating);
            }
        };

        row.validation_score = Some(outcome.score());
        populate_from_metadata(row, outcome.metadata());

        let (errors, warnings) = match &outcome {
            ManagerOutcome::Single(r) => (&r.errors, &r.warnings),
            ManagerOutcome::Pipeline(r) => (&r.errors, &r.warnings),
        };
        if !errors.is_empty() {
            row.error_message = Some(join_issues(errors));
        }
        if !warnings.is_empty() {
            row.warning_message = Some(join_issues(warnings));
        }

        if !outcome.is_valid() {
            row.notes = Some("validation failed; package not processed".to_string());
            return Ok(None);
        }

        let metadata_json = metadata_to_json(outcome.metadata());
        Ok(Some(metadata_json))
    }

    async fn process(
        &self,
        root: &std::path::Path,
        descriptor: &PackageDescriptor,
        metadata: &serde_json::Value,
        row: &mut SheetRow,
    ) {
        let hint = scene_hint_from_metadata(metadata);

        let package_name = descriptor
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| descriptor.name.clone());

        let outcome = self.driver.run(root, &package_name, hint).await;
        row.scene_type = Some(outcome.scene_type.as_str().to_string());
        if outcome.success {
            if let Some(path) = &outcome.final_archive_path {
                row.notes = Some(format!("processed archive: {}", path.display()));
            }
        } else {
            let existing = row.error_message.take();
            let joined = match existing {
                Some(existing) => format!("{existing}; processing incomplete: missing {:?}", outcome.missing_outputs),
                None => format!("processing incomplete: missing {:?}", outcome.missing_outputs),
            };
            row.error_message = Some(joined);
        }
    }
}

/// `metacam_processing::SceneHint` plus the `Debug` impl the sheet row
/// needs; built from the MetaCam Validator's extracted metadata (spec
/// §4.13: "read off the MetaCam Validator's extracted_metadata").
fn scene_hint_from_metadata(metadata: &serde_json::Value) -> SceneHint {
    let location = metadata.get("extracted_metadata").and_then(|m| m.get("location"));
    let has_gps_fix = location
        .and_then(|loc| loc.get("lat"))
        .and_then(|v| v.as_f64())
        .map(|lat| lat != 0.0)
        .unwrap_or(false);

    let pcd = metadata.get("pcd_scale");
    let width = pcd.and_then(|p| p.get("width_m")).and_then(|v| v.as_f64());
    let height = pcd.and_then(|p| p.get("height_m")).and_then(|v| v.as_f64());
    let max_dim = match (width, height) {
        (Some(w), Some(h)) => Some(w.max(h)),
        (Some(w), None) => Some(w),
        (None, Some(h)) => Some(h),
        (None, None) => None,
    };

    SceneHint {
        is_outdoor: has_gps_fix,
        max_pcd_dimension_m: max_dim,
    }
}

fn populate_from_metadata(row: &mut SheetRow, metadata: &metacam_types::MetadataMap) {
    if let Some(extracted) = metadata.get("extracted_metadata").map(|v| v.as_json().clone()) {
        row.start_time = extracted.get("start_time").and_then(|v| v.as_str()).map(str::to_string);
        if let Some(duration) = extracted.get("duration_seconds").and_then(|v| v.as_u64()) {
            row.duration_hhmmss = Some(metacam_sheets::format_duration_hhmmss(duration));
        }
        if let Some(location) = extracted.get("location") {
            let lat = location.get("lat").and_then(|v| v.as_f64());
            let lon = location.get("lon").and_then(|v| v.as_f64());
            if let (Some(lat), Some(lon)) = (lat, lon) {
                row.location = Some(format!("{lat:.5},{lon:.5}"));
            }
        }
        if let Some(device) = extracted.get("device") {
            row.device_id = device.get("id").and_then(|v| v.as_str()).map(str::to_string);
        }
    }

    if let Some(pcd) = metadata.get("pcd_scale").map(|v| v.as_json().clone()) {
        let status = pcd.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        row.size_status = Some(CellStatus::from_status_str(status));
        row.pcd_scale = Some(status.to_string());
    }

    if let Some(transient) = metadata.get("transient_validation").map(|v| v.as_json().clone()) {
        row.transient_decision = transient
            .get("specific_data")
            .and_then(|d| d.get("decision"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(metrics) = transient.get("specific_data").and_then(|d| d.get("metrics")) {
            row.wdd = metrics.get("WDD").and_then(|v| v.as_f64());
            row.wpo = metrics.get("WPO").and_then(|v| v.as_f64());
            row.sai = metrics.get("SAI").and_then(|v| v.as_f64());
        }
    }
}

fn metadata_to_json(metadata: &metacam_types::MetadataMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in metadata.iter() {
        map.insert(key.to_string(), value.as_json().clone());
    }
    serde_json::Value::Object(map)
}

fn join_issues(issues: &[metacam_types::Issue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_unix(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn download_error_message(err: &DownloadError) -> String {
    err.to_string()
}

struct PackageOutcome {
    row: SheetRow,
    final_stage: PackageStage,
    scratch_root: Option<PathBuf>,
}

impl PackageOutcome {
    fn done(row: SheetRow, stage: PackageStage, scratch_root: Option<PathBuf>) -> Self {
        Self {
            row,
            final_stage: stage,
            scratch_root,
        }
    }

    fn failed(mut row: SheetRow, stage: PackageStage, scratch_root: Option<PathBuf>) -> Self {
        if row.notes.is_none() {
            row.notes = Some(format!("failed at stage {}", stage.as_str()));
        }
        Self {
            row,
            final_stage: stage,
            scratch_root,
        }
    }
}
