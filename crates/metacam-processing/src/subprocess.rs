//! Subprocess invocation: streams a native binary's stdout/stderr into a
//! rolling log buffer, enforces a timeout, and kills the whole process
//! group on expiry (spec §4.13, §9 "Subprocess control").
//!
//! Process-group kill follows the same SIGTERM-then-SIGKILL escalation
//! the wider example pack uses for terminating native children.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

const LOG_TAIL_BYTES: usize = 64 * 1024;
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("binary {0} could not be spawned: {1}")]
    Spawn(std::path::PathBuf, std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SubprocessOutcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub log_tail: String,
    pub duration: Duration,
}

/// Runs `program args...` in `cwd`, streaming both output pipes into a
/// shared rolling buffer of at most 64 KiB, and enforcing `timeout`.
pub async fn run_with_timeout(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
    label: &'static str,
) -> Result<SubprocessOutcome, SubprocessError> {
    let started = std::time::Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid() only affects the forked child before exec; it
        // makes the child its own session/process-group leader so a
        // timeout can kill the whole tree with one killpg call.
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let mut child = command
        .spawn()
        .map_err(|err| SubprocessError::Spawn(program.to_path_buf(), err))?;

    let log = Arc::new(Mutex::new(RollingLog::new(LOG_TAIL_BYTES)));
    let pid = child.id();

    let stdout_task = spawn_reader(child.stdout.take(), log.clone(), label);
    let stderr_task = spawn_reader(child.stderr.take(), log.clone(), label);

    let timed_out = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            let log_tail = log.lock().await.as_string();
            return Ok(SubprocessOutcome {
                exit_code: status.code(),
                timed_out: false,
                log_tail,
                duration: started.elapsed(),
            });
        }
        Ok(Err(err)) => {
            warn!(binary = %program.display(), error = %err, "subprocess wait failed");
            false
        }
        Err(_) => true,
    };

    if timed_out {
        warn!(binary = %program.display(), timeout_s = timeout.as_secs(), "subprocess timed out, terminating process group");
        terminate(&mut child, pid).await;
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;
    let log_tail = log.lock().await.as_string();
    let exit_code = child.wait().await.ok().and_then(|s| s.code());

    Ok(SubprocessOutcome {
        exit_code,
        timed_out,
        log_tail,
        duration: started.elapsed(),
    })
}

#[cfg(unix)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: kill(2) with a negative pid signals the whole process
        // group this child was made the leader of via setsid().
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        if let Some(pid) = pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        let _ = child.kill().await;
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _pid: Option<u32>) {
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    log: Arc<Mutex<RollingLog>>,
    label: &'static str,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(pipe) = pipe else { return };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "metacam_processing::subprocess", binary = label, "{line}");
            log.lock().await.push_line(&line);
        }
    })
}

/// Byte-bounded ring buffer of the most recent log lines (spec §4.13:
/// "last 64 KiB retained").
struct RollingLog {
    buf: std::collections::VecDeque<u8>,
    cap: usize,
}

impl RollingLog {
    fn new(cap: usize) -> Self {
        Self {
            buf: std::collections::VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push_line(&mut self, line: &str) {
        for byte in line.bytes().chain(std::iter::once(b'\n')) {
            if self.buf.len() == self.cap {
                self.buf.pop_front();
            }
            self.buf.push_back(byte);
        }
    }

    fn as_string(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = run_with_timeout(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo hello; exit 3".to_string()],
            Path::new("/tmp"),
            Duration::from_secs(5),
            "test",
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.log_tail.contains("hello"));
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn enforces_timeout() {
        let outcome = run_with_timeout(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            Path::new("/tmp"),
            Duration::from_millis(200),
            "test",
        )
        .await
        .unwrap();

        assert!(outcome.timed_out);
    }

    #[test]
    fn rolling_log_caps_at_capacity() {
        let mut log = RollingLog::new(8);
        log.push_line("0123456789");
        assert_eq!(log.as_string().len(), 8);
    }
}
