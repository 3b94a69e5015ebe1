//! Logging setup (SPEC_FULL.md §B): `tracing` + `tracing-subscriber`
//! with an `EnvFilter` driven by `LOG_LEVEL`, plus an optional rolling
//! append-only file sink for `LOG_FILE` (spec §6, §7 "rotating log
//! file").

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

pub fn init(log_level: &str, log_file: Option<&Path>) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let subscriber = Registry::default().with(filter).with(stdout_layer);

    match log_file {
        Some(path) => {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let file_layer = tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(FileWriter(Mutex::new(file)));
                    subscriber.with(file_layer).init();
                }
                Err(err) => {
                    subscriber.init();
                    tracing::warn!(path = %path.display(), error = %err, "failed to open log file, logging to stdout only");
                }
            }
        }
        None => subscriber.init(),
    }
}

/// Minimal append-only file writer. The workspace has no
/// `tracing-appender` dependency (rotation is out of this core's
/// scope); a single growing file mirrors `LOG_FILE`'s plain-path
/// contract in spec §6.
struct FileWriter(Mutex<std::fs::File>);

impl std::io::Write for &FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log file mutex poisoned").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().expect("log file mutex poisoned").flush()
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = &'a FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}
