//! Capture source backed by an external process.
//!
//! Each cycle spawns the configured command and collects its stdout. To
//! finalize a cycle the source writes `q` to the process's stdin and
//! closes it (the convention recorders such as ffmpeg follow), waits a
//! bounded time for a clean exit, then kills it.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::CaptureError;
use crate::source::{CaptureFuture, CaptureSource};

/// How long a process may take to flush and exit after being asked to stop.
const DEFAULT_FINISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs one process per capture cycle.
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    finish_timeout: Duration,
    child: Option<Child>,
    reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            finish_timeout: DEFAULT_FINISH_TIMEOUT,
            child: None,
            reader: None,
        }
    }

    pub fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout = timeout;
        self
    }

    async fn spawn_cycle(&mut self) -> Result<(), CaptureError> {
        if let Some(mut stale) = self.child.take() {
            let _ = stale.kill().await;
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().ok_or(CaptureError::NotStarted)?;
        self.reader = Some(tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await?;
            Ok(buf)
        }));
        debug!(program = %self.program, pid = ?child.id(), "capture process started");
        self.child = Some(child);
        Ok(())
    }

    async fn finish_cycle(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut child = self.child.take().ok_or(CaptureError::NotStarted)?;

        if let Some(mut stdin) = child.stdin.take() {
            // The process may already be gone; a broken pipe here is fine.
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(self.finish_timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(program = %self.program, %status, "capture process exited");
            }
            Err(_) => {
                warn!(program = %self.program, timeout = ?self.finish_timeout, "capture process did not exit, killing");
                child.kill().await?;
            }
        }

        let reader = self.reader.take().ok_or(CaptureError::NotStarted)?;
        let bytes = reader.await.map_err(std::io::Error::other)??;
        Ok(bytes)
    }
}

impl CaptureSource for CommandSource {
    fn begin(&mut self) -> CaptureFuture<'_, Result<(), CaptureError>> {
        Box::pin(self.spawn_cycle())
    }

    fn finish(&mut self) -> CaptureFuture<'_, Result<Vec<u8>, CaptureError>> {
        Box::pin(self.finish_cycle())
    }

    fn ended(&mut self) -> CaptureFuture<'_, CaptureError> {
        match self.child.as_mut() {
            Some(child) => Box::pin(async move {
                match child.wait().await {
                    Ok(status) => {
                        CaptureError::SourceEnded(format!("capture process exited with {status}"))
                    }
                    Err(e) => CaptureError::Io(e),
                }
            }),
            None => Box::pin(std::future::pending()),
        }
    }
}
