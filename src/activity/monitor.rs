//! Camera/microphone activity monitor using the macOS unified log
//!
//! Follows `log stream` for sensor-indicator changes (the same events that
//! drive the menu bar recording dots) and forwards de-duplicated activity
//! values over a channel.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::parse::{latest_activity, parse_ndjson_line, AvActivity, LOG_PREDICATE};

const LOG_BINARY: &str = "/usr/bin/log";
const SNAPSHOT_WINDOW: &str = "60s";
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur reading the activity log
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("failed to spawn log process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("log process has no stdout")]
    NoStdout,

    #[error("failed to read log output: {0}")]
    Read(#[from] std::io::Error),

    #[error("log process exited with {0}")]
    ExitStatus(ExitStatus),

    #[error("log show did not finish within {0:?}")]
    Timeout(Duration),
}

/// Reads camera/microphone attribution changes from the unified log
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    log_binary: PathBuf,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::with_binary(LOG_BINARY)
    }

    /// Use a different `log` executable
    pub fn with_binary(log_binary: impl Into<PathBuf>) -> Self {
        Self {
            log_binary: log_binary.into(),
        }
    }

    /// Activity according to the most recent event of the last minute.
    ///
    /// Any failure reads as inactive.
    pub async fn snapshot(&self) -> AvActivity {
        match self.try_snapshot().await {
            Ok(activity) => activity,
            Err(e) => {
                warn!(error = %e, "could not read initial camera/mic state");
                AvActivity::default()
            }
        }
    }

    async fn try_snapshot(&self) -> Result<AvActivity, ActivityError> {
        let mut command = Command::new(&self.log_binary);
        command
            .args(["show", "--last", SNAPSHOT_WINDOW, "--style", "ndjson"])
            .args(["--predicate", LOG_PREDICATE])
            .kill_on_drop(true);

        let output = tokio::time::timeout(SNAPSHOT_TIMEOUT, command.output())
            .await
            .map_err(|_| ActivityError::Timeout(SNAPSHOT_TIMEOUT))?
            .map_err(ActivityError::Spawn)?;

        if !output.status.success() {
            return Err(ActivityError::ExitStatus(output.status));
        }

        Ok(latest_activity(&String::from_utf8_lossy(&output.stdout)).unwrap_or_default())
    }

    /// Follow the log, sending each change in activity to `tx`.
    ///
    /// Returns when the log process exits or the receiver is dropped. The
    /// child process is killed when this future is dropped.
    pub async fn stream(self, tx: mpsc::Sender<AvActivity>) -> Result<(), ActivityError> {
        let mut child = Command::new(&self.log_binary)
            .args(["stream", "--style", "ndjson"])
            .args(["--predicate", LOG_PREDICATE])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ActivityError::Spawn)?;

        let stdout = child.stdout.take().ok_or(ActivityError::NoStdout)?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut last: Option<AvActivity> = None;

        info!("activity log stream started");

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                warn!("activity log stream ended");
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let Some(activity) = parse_ndjson_line(&line) else {
                continue;
            };
            if last == Some(activity) {
                continue;
            }
            last = Some(activity);

            debug!(
                camera = activity.camera,
                microphone = activity.microphone,
                "activity changed"
            );
            if tx.send(activity).await.is_err() {
                debug!("activity receiver closed");
                break;
            }
        }

        if let Err(e) = child.start_kill() {
            debug!(?e, "log process already gone");
        }
        Ok(())
    }
}
