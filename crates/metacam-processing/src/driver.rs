//! L13 — Processing Driver: standardizes the package layout, selects a
//! scene type, runs the two native binaries in sequence, searches for
//! their outputs, and assembles the final archive (spec §4.13).

use std::path::{Path, PathBuf};
use std::time::Duration;

use metacam_types::{Backoff, ExitCodes, ProcessingOutcome, SceneType, StageDurations};
use tracing::{info, instrument, warn};

use crate::output_search::{self, OutputLocation};
use crate::scene::{select_scene_type, DEFAULT_INDOOR_SCALE_THRESHOLD_M};
use crate::standardize::standardize;
use crate::subprocess::run_with_timeout;

#[derive(Debug, Clone)]
pub struct ProcessingDriverConfig {
    pub generator_binary: PathBuf,
    pub cli_binary: PathBuf,
    /// Directory the native binaries treat as their own working
    /// directory; `output_search` walks locations relative to it.
    pub binary_dir: PathBuf,
    pub configured_out_dir: PathBuf,
    pub generator_timeout: Duration,
    pub cli_timeout: Duration,
    pub retry_attempts: u32,
    pub indoor_scale_threshold_m: f64,
    pub cli_mode: u8,
    pub cli_color: u8,
}

impl Default for ProcessingDriverConfig {
    fn default() -> Self {
        Self {
            generator_binary: PathBuf::from("generator"),
            cli_binary: PathBuf::from("metacam-cli"),
            binary_dir: PathBuf::from("."),
            configured_out_dir: PathBuf::from("./output"),
            generator_timeout: Duration::from_secs(600),
            cli_timeout: Duration::from_secs(3600),
            retry_attempts: 3,
            indoor_scale_threshold_m: DEFAULT_INDOOR_SCALE_THRESHOLD_M,
            cli_mode: 0,
            cli_color: 1,
        }
    }
}

/// Inputs the driver needs from the validation stage: whether the scene
/// was detected outdoor, and the point-cloud's max planar dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneHint {
    pub is_outdoor: bool,
    pub max_pcd_dimension_m: Option<f64>,
}

pub struct ProcessingDriver {
    config: ProcessingDriverConfig,
}

impl ProcessingDriver {
    pub fn new(config: ProcessingDriverConfig) -> Self {
        Self { config }
    }

    /// Runs the full driver pipeline for one package, retrying fatal
    /// driver failures (missing binary, standardization failure, output
    /// search failure on an otherwise-clean run) with exponential
    /// backoff starting at 5 s. Timeouts and non-zero exits are never
    /// retried (spec §4.13, §7).
    #[instrument(skip(self), fields(package_name))]
    pub async fn run(&self, package_root: &Path, package_name: &str, hint: SceneHint) -> ProcessingOutcome {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(120));
        let mut attempt = 0;

        loop {
            match self.attempt(package_root, package_name, hint).await {
                AttemptOutcome::Done(outcome) => return outcome,
                AttemptOutcome::RetryableFailure(reason) => {
                    attempt += 1;
                    if attempt > self.config.retry_attempts {
                        warn!(reason, attempts = attempt, "processing driver exhausted retries");
                        return ProcessingOutcome {
                            success: false,
                            scene_type: select_scene_type(
                                hint.is_outdoor,
                                hint.max_pcd_dimension_m,
                                self.config.indoor_scale_threshold_m,
                            ),
                            stage_durations: StageDurations::default(),
                            final_archive_path: None,
                            missing_outputs: vec![reason],
                            exit_codes: ExitCodes::default(),
                            log_tail: String::new(),
                        };
                    }
                    let delay = backoff.next_delay();
                    warn!(reason, attempt, delay_secs = delay.as_secs(), "retrying processing driver");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, package_root: &Path, package_name: &str, hint: SceneHint) -> AttemptOutcome {
        let standardized_root = match standardize(package_root).await {
            Ok(root) => root,
            Err(err) => return AttemptOutcome::RetryableFailure(err.to_string()),
        };

        let scene = select_scene_type(
            hint.is_outdoor,
            hint.max_pcd_dimension_m,
            self.config.indoor_scale_threshold_m,
        );
        info!(scene = ?scene, "selected scene type");

        let generator = match run_with_timeout(
            &self.config.generator_binary,
            &[standardized_root.display().to_string()],
            &standardized_root,
            self.config.generator_timeout,
            "generator",
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => return AttemptOutcome::RetryableFailure(err.to_string()),
        };

        let cli_args = cli_argv(&standardized_root, &self.config.configured_out_dir, scene, &self.config);
        let cli = match run_with_timeout(
            &self.config.cli_binary,
            &cli_args,
            &standardized_root,
            self.config.cli_timeout,
            "cli",
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => return AttemptOutcome::RetryableFailure(err.to_string()),
        };

        let durations = StageDurations {
            generator: generator.duration,
            cli: cli.duration,
            postprocess: Duration::ZERO,
        };
        let exit_codes = ExitCodes {
            generator: generator.exit_code,
            cli: cli.exit_code,
        };
        let mut log_tail = generator.log_tail.clone();
        log_tail.push_str(&cli.log_tail);

        let postprocess_started = std::time::Instant::now();
        let search_result = output_search::search(&self.config.configured_out_dir, &self.config.binary_dir, package_name).await;

        let ran_cleanly = !generator.timed_out
            && !cli.timed_out
            && matches!(generator.exit_code, Some(0))
            && matches!(cli.exit_code, Some(0));

        match search_result {
            Ok(location) => {
                self.finish_success(package_root, package_name, scene, &location, durations, exit_codes, log_tail, postprocess_started)
                    .await
            }
            Err(missing) if ran_cleanly => {
                AttemptOutcome::RetryableFailure(format!("output search failed: missing {missing:?}"))
            }
            Err(missing) => AttemptOutcome::Done(ProcessingOutcome {
                success: false,
                scene_type: scene,
                stage_durations: StageDurations {
                    postprocess: postprocess_started.elapsed(),
                    ..durations
                },
                final_archive_path: None,
                missing_outputs: missing,
                exit_codes,
                log_tail,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_success(
        &self,
        package_root: &Path,
        package_name: &str,
        scene: SceneType,
        location: &OutputLocation,
        mut durations: StageDurations,
        exit_codes: ExitCodes,
        log_tail: String,
        postprocess_started: std::time::Instant,
    ) -> AttemptOutcome {
        let archive = crate::assemble::assemble(
            &self.config.configured_out_dir,
            package_name,
            package_root,
            location,
        )
        .await;

        durations.postprocess = postprocess_started.elapsed();

        match archive {
            Ok(path) => AttemptOutcome::Done(ProcessingOutcome {
                success: true,
                scene_type: scene,
                stage_durations: durations,
                final_archive_path: Some(path),
                missing_outputs: Vec::new(),
                exit_codes,
                log_tail,
            }),
            Err(err) => AttemptOutcome::RetryableFailure(err.to_string()),
        }
    }
}

fn cli_argv(
    root: &Path,
    out_dir: &Path,
    scene: SceneType,
    config: &ProcessingDriverConfig,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        root.display().to_string(),
        "-o".to_string(),
        out_dir.display().to_string(),
        "-s".to_string(),
        scene.as_cli_arg().to_string(),
        "-color".to_string(),
        config.cli_color.to_string(),
        "-mode".to_string(),
        config.cli_mode.to_string(),
    ]
}

enum AttemptOutcome {
    Done(ProcessingOutcome),
    RetryableFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripts_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    async fn write_executable(path: &Path, body: &str) {
        tokio::fs::write(path, body).await.unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(path).await.unwrap().permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(path, perms).await.unwrap();
        }
    }

    #[tokio::test]
    async fn end_to_end_success_assembles_archive() {
        let scripts = scripts_dir();
        let generator = scripts.path().join("generator.sh");
        let cli = scripts.path().join("cli.sh");
        write_executable(&generator, "#!/bin/sh\nexit 0\n").await;

        let package_dir = tempfile::tempdir().unwrap();
        let root = package_dir.path();
        tokio::fs::create_dir_all(root.join("images")).await.unwrap();
        tokio::fs::create_dir_all(root.join("data")).await.unwrap();
        tokio::fs::create_dir_all(root.join("info")).await.unwrap();
        tokio::fs::create_dir_all(root.join("camera/left")).await.unwrap();
        tokio::fs::write(root.join("metadata.yaml"), b"record:\n").await.unwrap();
        tokio::fs::write(root.join("Preview.jpg"), b"jpeg").await.unwrap();
        tokio::fs::write(root.join("camera/left/f1.jpg"), b"frame").await.unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let configured_out_dir = out_dir.path().join("out");
        let output_target = configured_out_dir.join("pkg1_output");

        let cli_script = format!(
            "#!/bin/sh\nmkdir -p {target}\necho las > {target}/colorized.las\necho '{{}}' > {target}/transforms.json\nexit 0\n",
            target = output_target.display()
        );
        write_executable(&cli, &cli_script).await;

        let config = ProcessingDriverConfig {
            generator_binary: generator,
            cli_binary: cli,
            binary_dir: scripts.path().to_path_buf(),
            configured_out_dir,
            generator_timeout: Duration::from_secs(5),
            cli_timeout: Duration::from_secs(5),
            retry_attempts: 0,
            ..ProcessingDriverConfig::default()
        };

        let driver = ProcessingDriver::new(config);
        let outcome = driver.run(root, "pkg1", SceneHint::default()).await;

        assert!(outcome.success);
        assert!(outcome.final_archive_path.is_some());
        assert!(outcome.missing_outputs.is_empty());
    }

    #[tokio::test]
    async fn non_zero_cli_exit_with_outputs_still_succeeds() {
        let scripts = scripts_dir();
        let generator = scripts.path().join("generator.sh");
        let cli = scripts.path().join("cli.sh");
        write_executable(&generator, "#!/bin/sh\nexit 0\n").await;

        let package_dir = tempfile::tempdir().unwrap();
        let root = package_dir.path();
        tokio::fs::create_dir_all(root.join("images")).await.unwrap();
        tokio::fs::create_dir_all(root.join("data")).await.unwrap();
        tokio::fs::create_dir_all(root.join("info")).await.unwrap();
        tokio::fs::write(root.join("metadata.yaml"), b"record:\n").await.unwrap();
        tokio::fs::write(root.join("Preview.jpg"), b"jpeg").await.unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let configured_out_dir = out_dir.path().join("out");
        let output_target = configured_out_dir.join("pkg2_output");

        let cli_script = format!(
            "#!/bin/sh\nmkdir -p {target}\necho las > {target}/colorized.las\necho '{{}}' > {target}/transforms.json\nexit 7\n",
            target = output_target.display()
        );
        write_executable(&cli, &cli_script).await;

        let config = ProcessingDriverConfig {
            generator_binary: generator,
            cli_binary: cli,
            binary_dir: scripts.path().to_path_buf(),
            configured_out_dir,
            generator_timeout: Duration::from_secs(5),
            cli_timeout: Duration::from_secs(5),
            retry_attempts: 0,
            ..ProcessingDriverConfig::default()
        };

        let driver = ProcessingDriver::new(config);
        let outcome = driver.run(root, "pkg2", SceneHint::default()).await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_codes.cli, Some(7));
    }

    #[tokio::test]
    async fn missing_output_with_clean_exit_reports_failure_after_retries() {
        let scripts = scripts_dir();
        let generator = scripts.path().join("generator.sh");
        let cli = scripts.path().join("cli.sh");
        write_executable(&generator, "#!/bin/sh\nexit 0\n").await;
        write_executable(&cli, "#!/bin/sh\nexit 0\n").await;

        let package_dir = tempfile::tempdir().unwrap();
        let root = package_dir.path();
        tokio::fs::create_dir_all(root.join("images")).await.unwrap();
        tokio::fs::create_dir_all(root.join("data")).await.unwrap();
        tokio::fs::create_dir_all(root.join("info")).await.unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let config = ProcessingDriverConfig {
            generator_binary: generator,
            cli_binary: cli,
            binary_dir: scripts.path().to_path_buf(),
            configured_out_dir: out_dir.path().join("out"),
            generator_timeout: Duration::from_secs(5),
            cli_timeout: Duration::from_secs(5),
            retry_attempts: 1,
            ..ProcessingDriverConfig::default()
        };

        let driver = ProcessingDriver::new(config);
        let outcome = driver.run(root, "pkg3", SceneHint::default()).await;

        assert!(!outcome.success);
    }
}
