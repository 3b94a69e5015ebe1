//! Shared domain model for the MetaCam orchestrator workspace.
//!
//! Centralizes the value types exchanged between the tracker, archive
//! inspector, validation pipeline, and processing driver crates. Kept
//! free of I/O and async runtime dependencies so every other crate in
//! the workspace can depend on it without pulling in tokio or any
//! particular SDK.

mod metadata;
mod result;

pub use metadata::{MetadataMap, MetadataValue};
pub use result::{Issue, IssueSeverity, PipelineResult, ValidationLevel, ValidationResult};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a remote artifact as seen by the Drive Monitor. Immutable
/// once read from the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub remote_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub remote_mtime: SystemTime,
    pub mime: String,
}

/// Archive container format recognized by the Archive Inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    Rar,
    SevenZip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

/// Post-decompression handle to a package's scratch directory.
///
/// The root must satisfy the MetaCam layout invariants (directories
/// `images/`, `data/`, `info/` plus the root files enumerated in
/// spec §3) before validation runs; the Archive Inspector does not
/// itself enforce this, only the MetaCam Validator does.
#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    pub root_path: PathBuf,
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
    pub format: ArchiveFormat,
    pub password_used: Option<String>,
}

impl ExtractedPackage {
    pub fn relative_exists(&self, relative: impl AsRef<std::path::Path>) -> bool {
        self.files.iter().any(|f| f == relative.as_ref())
    }
}

/// Produced by the Transient Metrics Engine (L8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientAssessment {
    pub decision: TransientDecision,
    pub metrics: TransientMetrics,
    pub frames_sampled: u64,
    pub frames_total: u64,
    pub sampling_rate_detection: u32,
    pub sampling_rate_segmentation: u32,
    pub early_terminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransientDecision {
    Pass,
    NeedReview,
    Reject,
}

impl TransientDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            TransientDecision::Pass => "PASS",
            TransientDecision::NeedReview => "NEED_REVIEW",
            TransientDecision::Reject => "REJECT",
        }
    }

    /// Ordering used to check the monotonicity law: REJECT is never
    /// "better" than NEED_REVIEW, which is never "better" than PASS.
    pub fn rank(self) -> u8 {
        match self {
            TransientDecision::Pass => 0,
            TransientDecision::NeedReview => 1,
            TransientDecision::Reject => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransientMetrics {
    pub wdd: f64,
    pub wpo: f64,
    pub sai: f64,
}

/// Produced once per package by the Processing Driver (L13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub success: bool,
    pub scene_type: SceneType,
    pub stage_durations: StageDurations,
    pub final_archive_path: Option<PathBuf>,
    pub missing_outputs: Vec<String>,
    pub exit_codes: ExitCodes,
    pub log_tail: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageDurations {
    pub generator: Duration,
    pub cli: Duration,
    pub postprocess: Duration,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExitCodes {
    pub generator: Option<i32>,
    pub cli: Option<i32>,
}

/// Scene type controlling the reconstruction CLI's internal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneType {
    #[default]
    Balance,
    Open,
    Narrow,
}

impl SceneType {
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            SceneType::Balance => "0",
            SceneType::Open => "1",
            SceneType::Narrow => "2",
        }
    }

    /// Plain classification string for the tracking sheet's "Scene Type"
    /// column (spec §6) — never a `Debug` dump of the driver's raw input.
    pub fn as_str(self) -> &'static str {
        match self {
            SceneType::Balance => "Balance",
            SceneType::Open => "Open",
            SceneType::Narrow => "Narrow",
        }
    }
}

/// Per-package state machine stages (L17, §4.17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageStage {
    New,
    Downloading,
    Extracting,
    Validating,
    Processing,
    Recording,
    Done,
}

impl PackageStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageStage::New => "NEW",
            PackageStage::Downloading => "DOWNLOADING",
            PackageStage::Extracting => "EXTRACTING",
            PackageStage::Validating => "VALIDATING",
            PackageStage::Processing => "PROCESSING",
            PackageStage::Recording => "RECORDING",
            PackageStage::Done => "DONE",
        }
    }
}

/// Crate-wide error type for failures that must cross a component
/// boundary as a typed value rather than a bare string. Individual
/// crates define their own richer error enums and convert into this
/// one at the orchestrator's edge.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("package {remote_id} failed at stage {stage}: {reason}")]
    StageFailed {
        remote_id: String,
        stage: &'static str,
        reason: String,
    },
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn stage_failed(
        remote_id: impl Into<String>,
        stage: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::StageFailed {
            remote_id: remote_id.into(),
            stage,
            reason: reason.into(),
        }
    }
}

/// A reusable exponential backoff schedule shared by the downloader,
/// sheets writer, and drive monitor (spec §4.14, §4.15, §4.16 each call
/// for independent backoff; this avoids three divergent reimplementations).
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            max,
        }
    }

    /// Returns the delay for the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let scaled = self.base.saturating_mul(1u32 << exp);
        scaled.min(self.max)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Ordered key/value rows destined for the tracking sheet (L16). Kept
/// here so the processing driver, validation manager, and orchestrator
/// can all populate it without depending on the sheets crate.
pub type RowFields = BTreeMap<&'static str, String>;
