//! Exclusive background model downloads.
//!
//! A download wraps one external command (normally `ollama pull <model>`).
//! The command runs under a worker task that owns the child process and
//! publishes the latest stdout line into a shared status cell, so callers
//! poll without ever blocking on the process. [`DownloadManager`] owns the
//! single download slot: at most one task is `Running` at a time.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

pub const STARTING_LINE: &str = "Starting download...";
pub const COMPLETED_MESSAGE: &str = "Download completed successfully!";
pub const STOPPED_MESSAGE: &str = "Download stopped.";
pub const NO_DOWNLOAD_MESSAGE: &str = "No download in progress.";

/// Only the end of stderr is kept for the failure message.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long a stopped download gets to exit after SIGTERM.
#[cfg(unix)]
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Succeeded | DownloadStatus::Failed | DownloadStatus::Stopped
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            DownloadStatus::Idle => "idle",
            DownloadStatus::Running => "running",
            DownloadStatus::Succeeded => "done",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Stopped => "stopped",
        }
    }
}

/// Point-in-time view of a download, cheap to take on every UI tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSnapshot {
    pub status: DownloadStatus,
    pub command: String,
    /// Most recent progress line printed by the command.
    pub last_line: String,
    /// Final message once the task is terminal.
    pub outcome: Option<String>,
}

impl DownloadSnapshot {
    fn idle() -> Self {
        Self {
            status: DownloadStatus::Idle,
            command: String::new(),
            last_line: String::new(),
            outcome: None,
        }
    }

    /// The single line shown in the download panel.
    pub fn status_line(&self) -> String {
        match self.status {
            DownloadStatus::Idle => String::new(),
            DownloadStatus::Running => self.last_line.clone(),
            _ => self
                .outcome
                .clone()
                .unwrap_or_else(|| self.last_line.clone()),
        }
    }
}

struct DownloadState {
    status: DownloadStatus,
    last_line: String,
    outcome: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    // Own process group, so stop reaches everything the shell starts
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn failure_message(detail: &str) -> String {
    format!("Error: Download failed. Details: {}", detail.trim())
}

/// One external acquisition command. Never restarts once terminal.
pub struct DownloadTask {
    command: String,
    state: Arc<Mutex<DownloadState>>,
    cancel: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DownloadTask {
    /// Spawn `command` through the shell and start monitoring it.
    ///
    /// Must be called from within a tokio runtime.
    fn spawn(command: &str) -> std::io::Result<Self> {
        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let state = Arc::new(Mutex::new(DownloadState {
            status: DownloadStatus::Running,
            last_line: STARTING_LINE.to_string(),
            outcome: None,
        }));
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(monitor(
            child,
            stdout,
            stderr,
            Arc::clone(&state),
            cancel.clone(),
        ));

        tracing::info!(command, "download started");

        Ok(Self {
            command: command.to_string(),
            state,
            cancel,
            worker: tokio::sync::Mutex::new(Some(worker)),
        })
    }

    /// A task whose process never started.
    fn failed(command: &str, err: &std::io::Error) -> Self {
        Self {
            command: command.to_string(),
            state: Arc::new(Mutex::new(DownloadState {
                status: DownloadStatus::Failed,
                last_line: String::new(),
                outcome: Some(failure_message(&err.to_string())),
            })),
            cancel: CancellationToken::new(),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> DownloadStatus {
        lock(&self.state).status
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        let state = lock(&self.state);
        DownloadSnapshot {
            status: state.status,
            command: self.command.clone(),
            last_line: state.last_line.clone(),
            outcome: state.outcome.clone(),
        }
    }

    /// Wait for the worker to finish. Concurrent callers all wait.
    pub async fn join(&self) -> DownloadSnapshot {
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "download monitor panicked");
                let mut state = lock(&self.state);
                if !state.status.is_terminal() {
                    state.status = DownloadStatus::Failed;
                    state.outcome = Some(failure_message(&e.to_string()));
                }
            }
        }
        drop(worker);
        self.snapshot()
    }

    /// Terminate the process if still running and wait for it to exit.
    pub async fn stop(&self) -> DownloadSnapshot {
        self.cancel.cancel();
        self.join().await
    }
}

/// Read stdout line by line until EOF, then reap the process.
async fn drive(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    state: &Mutex<DownloadState>,
) -> std::io::Result<ExitStatus> {
    if let Some(stdout) = stdout {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            // Progress output is not guaranteed to be UTF-8
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!(line, "download progress");
            lock(state).last_line = line.to_string();
        }
    }
    child.wait().await
}

/// Drain stderr to EOF, keeping the last [`STDERR_TAIL_BYTES`].
async fn capture_stderr_tail(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };

    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not read download stderr");
                break;
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// SIGTERM the download's process group, then SIGKILL whatever is left.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let group = -(pid as libc::pid_t);
            // SAFETY: `group` is the process group created for this child.
            unsafe {
                libc::kill(group, libc::SIGTERM);
            }
            let exited = tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok();
            // Grandchildren may outlive the shell or ignore SIGTERM
            unsafe {
                libc::kill(group, libc::SIGKILL);
            }
            if exited {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill download process");
    }
}

async fn monitor(
    mut child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    state: Arc<Mutex<DownloadState>>,
    cancel: CancellationToken,
) {
    // Drained concurrently so a chatty stderr cannot fill its pipe and stall
    // the child.
    let stderr_task = tokio::spawn(capture_stderr_tail(stderr));

    let exit = tokio::select! {
        _ = cancel.cancelled() => None,
        status = drive(&mut child, stdout, &state) => Some(status),
    };

    let (status, outcome) = match exit {
        None => {
            terminate(&mut child).await;
            stderr_task.abort();
            (DownloadStatus::Stopped, STOPPED_MESSAGE.to_string())
        }
        Some(Ok(exit_status)) if exit_status.success() => {
            (DownloadStatus::Succeeded, COMPLETED_MESSAGE.to_string())
        }
        Some(Ok(exit_status)) => {
            let captured = stderr_task.await.unwrap_or_default();
            let detail = if captured.trim().is_empty() {
                format!("command exited with {}", exit_status)
            } else {
                captured
            };
            (DownloadStatus::Failed, failure_message(&detail))
        }
        Some(Err(e)) => {
            terminate(&mut child).await;
            stderr_task.abort();
            (DownloadStatus::Failed, failure_message(&e.to_string()))
        }
    };

    tracing::info!(status = status.label(), "download finished");

    let mut state = lock(&state);
    state.status = status;
    state.outcome = Some(outcome);
}

/// Owner of the single download slot.
#[derive(Default)]
pub struct DownloadManager {
    current: Mutex<Option<Arc<DownloadTask>>>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `command` in the background and return immediately.
    ///
    /// Fails with [`DownloadError::AlreadyRunning`] without touching the
    /// running task when another download is in progress.
    pub fn start(&self, command: &str) -> Result<(), DownloadError> {
        let command = command.trim();

        // Held across the check and the spawn so concurrent starts serialize.
        let mut slot = lock(&self.current);

        if let Some(task) = slot.as_ref() {
            if task.status() == DownloadStatus::Running {
                tracing::warn!(running = task.command(), "download already in progress");
                return Err(DownloadError::AlreadyRunning);
            }
        }

        if command.is_empty() {
            return Err(DownloadError::EmptyCommand);
        }

        match DownloadTask::spawn(command) {
            Ok(task) => {
                *slot = Some(Arc::new(task));
                Ok(())
            }
            Err(e) => {
                tracing::error!(command, error = %e, "failed to spawn download");
                *slot = Some(Arc::new(DownloadTask::failed(command, &e)));
                Err(DownloadError::Spawn(e))
            }
        }
    }

    fn current(&self) -> Option<Arc<DownloadTask>> {
        lock(&self.current).clone()
    }

    pub fn poll(&self) -> DownloadSnapshot {
        self.current()
            .map(|task| task.snapshot())
            .unwrap_or_else(DownloadSnapshot::idle)
    }

    pub fn status_line(&self) -> String {
        self.poll().status_line()
    }

    pub fn is_running(&self) -> bool {
        self.poll().status == DownloadStatus::Running
    }

    /// Stop the running download, if any. Safe to call at any time.
    pub async fn stop(&self) -> String {
        let Some(task) = self.current() else {
            return NO_DOWNLOAD_MESSAGE.to_string();
        };
        if task.status() != DownloadStatus::Running {
            return NO_DOWNLOAD_MESSAGE.to_string();
        }

        let snapshot = task.stop().await;
        if snapshot.status == DownloadStatus::Stopped {
            STOPPED_MESSAGE.to_string()
        } else {
            // Finished on its own before the stop landed.
            NO_DOWNLOAD_MESSAGE.to_string()
        }
    }

    /// Wait for the current download to reach a terminal state.
    pub async fn wait(&self) -> Option<DownloadSnapshot> {
        let task = self.current()?;
        Some(task.join().await)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_manager_reports_nothing() {
        let manager = DownloadManager::new();
        let snapshot = manager.poll();
        assert_eq!(snapshot.status, DownloadStatus::Idle);
        assert_eq!(manager.status_line(), "");
        assert!(manager.wait().await.is_none());
    }

    #[tokio::test]
    async fn successful_command_succeeds() {
        let manager = DownloadManager::new();
        manager.start("echo pulling manifest; echo success").unwrap();

        let snapshot = manager.wait().await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Succeeded);
        assert_eq!(snapshot.last_line, "success");
        let line = snapshot.status_line();
        assert_eq!(line, COMPLETED_MESSAGE);
        assert!(!line.contains("Error"));
    }

    #[tokio::test]
    async fn failing_command_captures_stderr() {
        let manager = DownloadManager::new();
        manager
            .start("echo 'pull model manifest: file does not exist' >&2; exit 1")
            .unwrap();

        let snapshot = manager.wait().await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Failed);
        let outcome = snapshot.outcome.unwrap();
        assert!(outcome.starts_with("Error: Download failed."));
        assert!(outcome.contains("file does not exist"));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let manager = DownloadManager::new();
        manager.start("sleep 5").unwrap();

        let err = manager.start("echo other").unwrap_err();
        assert!(matches!(err, DownloadError::AlreadyRunning));
        assert_eq!(manager.poll().command, "sleep 5");
        assert_eq!(manager.poll().status, DownloadStatus::Running);

        assert_eq!(manager.stop().await, STOPPED_MESSAGE);
    }

    #[tokio::test]
    async fn stop_terminates_running_download() {
        let manager = DownloadManager::new();
        manager.start("echo started; sleep 30").unwrap();

        // let the first line land
        tokio::time::sleep(Duration::from_millis(200)).await;
        let running = manager.poll();
        assert_eq!(running.status, DownloadStatus::Running);
        assert_eq!(running.last_line, "started");
        assert_eq!(running.status_line(), "started");

        let message = tokio::time::timeout(Duration::from_secs(5), manager.stop())
            .await
            .expect("stop should not hang");
        assert_eq!(message, STOPPED_MESSAGE);
        assert_eq!(manager.poll().status, DownloadStatus::Stopped);
        assert_eq!(manager.status_line(), STOPPED_MESSAGE);
    }

    #[tokio::test]
    async fn progress_line_tracks_latest_output() {
        let manager = DownloadManager::new();
        manager
            .start("echo 'pulling manifest'; sleep 0.3; echo 'verifying sha256 digest'; sleep 30")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.poll().last_line, "pulling manifest");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.status_line(), "verifying sha256 digest");

        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let manager = DownloadManager::new();
        manager
            .start(&format!("(sleep 1; touch '{}'); echo after", marker.display()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.stop().await, STOPPED_MESSAGE);
        assert_eq!(manager.poll().status, DownloadStatus::Stopped);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "stopped download kept running");
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_fail_download() {
        let manager = DownloadManager::new();
        manager.start("printf 'caf\\351\\n'; echo done").unwrap();

        let snapshot = manager.wait().await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Succeeded);
        assert_eq!(snapshot.last_line, "done");
    }

    #[tokio::test]
    async fn non_utf8_stderr_is_kept_lossily() {
        let manager = DownloadManager::new();
        manager
            .start("printf 'bad \\377 manifest\\n' >&2; exit 1")
            .unwrap();

        let outcome = manager.wait().await.unwrap().outcome.unwrap();
        assert!(outcome.contains("bad"));
        assert!(outcome.contains("manifest"));
    }

    #[tokio::test]
    async fn failure_message_keeps_only_stderr_tail() {
        let manager = DownloadManager::new();
        manager
            .start("i=0; while [ $i -lt 2000 ]; do echo 'retrying layer download' >&2; i=$((i+1)); done; echo 'final: manifest missing' >&2; exit 1")
            .unwrap();

        let outcome = manager.wait().await.unwrap().outcome.unwrap();
        assert!(outcome.contains("final: manifest missing"));
        assert!(outcome.len() < STDERR_TAIL_BYTES + 100);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_nothing_runs() {
        let manager = DownloadManager::new();
        assert_eq!(manager.stop().await, NO_DOWNLOAD_MESSAGE);
        assert_eq!(manager.stop().await, NO_DOWNLOAD_MESSAGE);

        manager.start("true").unwrap();
        manager.wait().await;
        assert_eq!(manager.stop().await, NO_DOWNLOAD_MESSAGE);
        assert_eq!(manager.poll().status, DownloadStatus::Succeeded);
    }

    #[tokio::test]
    async fn terminal_task_is_replaced_by_next_start() {
        let manager = DownloadManager::new();
        manager.start("exit 2").unwrap();
        assert_eq!(manager.wait().await.unwrap().status, DownloadStatus::Failed);

        manager.start("echo again").unwrap();
        let snapshot = manager.wait().await.unwrap();
        assert_eq!(snapshot.command, "echo again");
        assert_eq!(snapshot.status, DownloadStatus::Succeeded);
    }

    #[tokio::test]
    async fn failure_without_stderr_reports_exit_status() {
        let manager = DownloadManager::new();
        manager.start("exit 3").unwrap();
        let outcome = manager.wait().await.unwrap().outcome.unwrap();
        assert!(outcome.contains("exit"));
    }

    #[tokio::test]
    async fn blank_command_is_rejected() {
        let manager = DownloadManager::new();
        assert!(matches!(
            manager.start("   "),
            Err(DownloadError::EmptyCommand)
        ));
        assert_eq!(manager.poll().status, DownloadStatus::Idle);
    }

    #[test]
    fn terminal_states() {
        assert!(!DownloadStatus::Idle.is_terminal());
        assert!(!DownloadStatus::Running.is_terminal());
        assert!(DownloadStatus::Succeeded.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Stopped.is_terminal());
    }
}
