//! Configuration resolution (spec §6): CLI > environment > TOML config
//! file > built-in default, with the config file's own path resolved
//! through `directories`' platform-appropriate config dir the way the
//! teacher workspace's `settings.rs` resolves its own `config.toml`.
//!
//! Every field here is independently overridable; an invalid value at
//! any layer fails fast at startup (spec §7 "Configuration invalid").

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::{CliArgs, CliSources};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    drive_folder_id: Option<String>,
    incoming_path: Option<String>,
    spreadsheet_id: Option<String>,
    service_account_file: Option<String>,
    check_interval_secs: Option<u64>,
    max_concurrent_downloads: Option<usize>,
    download_path: Option<String>,
    processed_path: Option<String>,
    temp_dir: Option<String>,
    max_file_size_mb: Option<u64>,
    allowed_extensions: Option<Vec<String>>,
    default_passwords: Option<Vec<String>>,
    download_chunk_size_mb: Option<u64>,
    download_timeout_secs: Option<u64>,
    download_retries: Option<u32>,
    log_level: Option<String>,
    log_file: Option<String>,
    generator_exe_path: Option<String>,
    cli_exe_path: Option<String>,
    processors_exe_path: Option<String>,
    processing_timeout_secs: Option<u64>,
    metacam_cli_timeout_secs: Option<u64>,
    processing_output_path: Option<String>,
    auto_start_processing: Option<bool>,
    processing_retry_attempts: Option<u32>,
    keep_original_data: Option<bool>,
    metacam_cli_mode: Option<u8>,
    metacam_cli_color: Option<u8>,
    indoor_scale_threshold_m: Option<f64>,
    sheet_name: Option<String>,
    batch_write_size: Option<usize>,
    enable_email_notifications: Option<bool>,
    tracker_retain_days: Option<u32>,
}

/// Fully resolved configuration, grouped by the component that
/// consumes it (spec §2's L14-L17 + ambient stack).
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub drive_folder_id: String,
    /// Local directory the bundled `LocalDirectoryDriveClient` polls in
    /// place of a real Drive folder (spec §1's external-SDK boundary).
    pub incoming_path: PathBuf,
    pub spreadsheet_id: String,
    pub service_account_file: Option<PathBuf>,
    pub check_interval: Duration,
    pub max_concurrent_downloads: usize,
    pub download_path: PathBuf,
    pub processed_path: PathBuf,
    pub temp_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub allowed_extensions: HashSet<String>,
    pub default_passwords: Vec<String>,
    pub download_chunk_size_mb: u64,
    pub download_timeout: Duration,
    pub download_retries: u32,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub generator_exe_path: PathBuf,
    pub cli_exe_path: PathBuf,
    pub processors_exe_path: PathBuf,
    pub processing_timeout: Duration,
    pub metacam_cli_timeout: Duration,
    pub processing_output_path: PathBuf,
    pub auto_start_processing: bool,
    pub processing_retry_attempts: u32,
    pub keep_original_data: bool,
    pub metacam_cli_mode: u8,
    pub metacam_cli_color: u8,
    pub indoor_scale_threshold_m: f64,
    pub sheet_name: String,
    pub batch_write_size: usize,
    pub enable_email_notifications: bool,
    pub tracker_retain_days: u32,
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    InvalidValue { field: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue { field, value } => {
                write!(f, "invalid value '{value}' for '{field}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// CLI > environment > config file > built-in default (spec §6,
/// SPEC_FULL.md §B "Configuration").
pub fn resolve_settings(cli: &CliArgs, sources: &CliSources) -> Result<EffectiveSettings, ConfigError> {
    let file = load_config(cli.config.as_deref())?;
    merge(cli, sources, file)
}

fn load_config(path_override: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let candidate = match path_override {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let Some(path) = candidate else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        if path_override.is_some() {
            return Err(ConfigError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            });
        }
        return Ok(FileConfig::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "metacam", "metacam").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge(cli: &CliArgs, sources: &CliSources, file: FileConfig) -> Result<EffectiveSettings, ConfigError> {
    let check_interval_secs = if sources.interval_from_cli {
        cli.interval.unwrap()
    } else {
        env_u64("CHECK_INTERVAL").or(file.check_interval_secs).unwrap_or(30)
    };

    let log_level = if sources.log_level_from_cli {
        cli.log_level.clone().unwrap()
    } else {
        env_string("LOG_LEVEL").or(file.log_level).unwrap_or_else(|| "info".to_string())
    };

    let allowed_extensions = env_csv("ALLOWED_EXTENSIONS")
        .or(file.allowed_extensions)
        .unwrap_or_else(|| {
            ["zip", "rar", "7z", "tar", "gz"]
                .into_iter()
                .map(str::to_string)
                .collect()
        })
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<HashSet<_>>();

    let default_passwords = env_csv("DEFAULT_PASSWORDS").or(file.default_passwords).unwrap_or_default();

    let max_concurrent_downloads = env_usize("MAX_CONCURRENT_DOWNLOADS")
        .or(file.max_concurrent_downloads)
        .unwrap_or(3);
    if max_concurrent_downloads == 0 {
        return Err(ConfigError::InvalidValue {
            field: "MAX_CONCURRENT_DOWNLOADS",
            value: "0".to_string(),
        });
    }

    let batch_write_size = env_usize("BATCH_WRITE_SIZE").or(file.batch_write_size).unwrap_or(20);
    if batch_write_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "BATCH_WRITE_SIZE",
            value: "0".to_string(),
        });
    }

    let metacam_cli_mode = env_u8("METACAM_CLI_MODE").or(file.metacam_cli_mode).unwrap_or(0);
    if metacam_cli_mode > 2 {
        return Err(ConfigError::InvalidValue {
            field: "METACAM_CLI_MODE",
            value: metacam_cli_mode.to_string(),
        });
    }
    let metacam_cli_color = env_u8("METACAM_CLI_COLOR").or(file.metacam_cli_color).unwrap_or(1);

    Ok(EffectiveSettings {
        drive_folder_id: env_string("DRIVE_FOLDER_ID").or(file.drive_folder_id).unwrap_or_default(),
        incoming_path: env_string("INCOMING_PATH")
            .or(file.incoming_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./incoming")),
        spreadsheet_id: env_string("SPREADSHEET_ID").or(file.spreadsheet_id).unwrap_or_default(),
        service_account_file: env_string("SERVICE_ACCOUNT_FILE")
            .or(file.service_account_file)
            .map(PathBuf::from),
        check_interval: Duration::from_secs(check_interval_secs),
        max_concurrent_downloads,
        download_path: env_string("DOWNLOAD_PATH")
            .or(file.download_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./downloads")),
        processed_path: env_string("PROCESSED_PATH")
            .or(file.processed_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./processed")),
        temp_dir: env_string("TEMP_DIR")
            .or(file.temp_dir)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir),
        max_file_size_mb: env_u64("MAX_FILE_SIZE_MB").or(file.max_file_size_mb).unwrap_or(8192),
        allowed_extensions,
        default_passwords,
        download_chunk_size_mb: env_u64("DOWNLOAD_CHUNK_SIZE_MB")
            .or(file.download_chunk_size_mb)
            .unwrap_or(32),
        download_timeout: Duration::from_secs(
            env_u64("DOWNLOAD_TIMEOUT").or(file.download_timeout_secs).unwrap_or(300),
        ),
        download_retries: env_u32("DOWNLOAD_RETRIES").or(file.download_retries).unwrap_or(3),
        log_level,
        log_file: env_string("LOG_FILE").or(file.log_file).map(PathBuf::from),
        generator_exe_path: env_string("GENERATOR_EXE_PATH")
            .or(file.generator_exe_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("generator")),
        cli_exe_path: env_string("CLI_EXE_PATH")
            .or(file.cli_exe_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("metacam-cli")),
        processors_exe_path: env_string("PROCESSORS_EXE_PATH")
            .or(file.processors_exe_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        processing_timeout: Duration::from_secs(
            env_u64("PROCESSING_TIMEOUT_SECONDS").or(file.processing_timeout_secs).unwrap_or(600),
        ),
        metacam_cli_timeout: Duration::from_secs(
            env_u64("METACAM_CLI_TIMEOUT_SECONDS")
                .or(file.metacam_cli_timeout_secs)
                .unwrap_or(3600),
        ),
        processing_output_path: env_string("PROCESSING_OUTPUT_PATH")
            .or(file.processing_output_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output")),
        auto_start_processing: env_bool("AUTO_START_PROCESSING")
            .or(file.auto_start_processing)
            .unwrap_or(true),
        processing_retry_attempts: env_u32("PROCESSING_RETRY_ATTEMPTS")
            .or(file.processing_retry_attempts)
            .unwrap_or(3),
        keep_original_data: env_bool("KEEP_ORIGINAL_DATA").or(file.keep_original_data).unwrap_or(false),
        metacam_cli_mode,
        metacam_cli_color,
        indoor_scale_threshold_m: env_f64("INDOOR_SCALE_THRESHOLD_M")
            .or(file.indoor_scale_threshold_m)
            .unwrap_or(30.0),
        sheet_name: env_string("SHEET_NAME").or(file.sheet_name).unwrap_or_else(|| "Sheet1".to_string()),
        batch_write_size,
        enable_email_notifications: env_bool("ENABLE_EMAIL_NOTIFICATIONS")
            .or(file.enable_email_notifications)
            .unwrap_or(false),
        tracker_retain_days: env_u32("TRACKER_RETAIN_DAYS").or(file.tracker_retain_days).unwrap_or(90),
    })
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_csv(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|v| match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_u8(key: &str) -> Option<u8> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliArgs;
    use clap::Parser;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = CliArgs::parse_from(["metacam"]);
        let sources = CliSources::default();
        let settings = merge(&cli, &sources, FileConfig::default()).unwrap();
        assert_eq!(settings.max_concurrent_downloads, 3);
        assert_eq!(settings.check_interval, Duration::from_secs(30));
        assert!(settings.allowed_extensions.contains("zip"));
    }

    #[test]
    fn cli_interval_overrides_default() {
        let cli = CliArgs::parse_from(["metacam", "--interval", "5"]);
        let sources = CliSources {
            interval_from_cli: true,
            log_level_from_cli: false,
        };
        let settings = merge(&cli, &sources, FileConfig::default()).unwrap();
        assert_eq!(settings.check_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_batch_write_size_is_rejected() {
        let cli = CliArgs::parse_from(["metacam"]);
        let sources = CliSources::default();
        let file = FileConfig {
            batch_write_size: Some(0),
            ..FileConfig::default()
        };
        let err = merge(&cli, &sources, file).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "BATCH_WRITE_SIZE", .. }));
    }
}
