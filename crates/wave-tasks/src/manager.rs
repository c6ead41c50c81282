// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::output::{OutputBuffer, TaskOutputReport};

/// Poll interval for the blocking output query.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default and maximum wait budgets for the blocking output query.
const DEFAULT_WAIT_SECS: u64 = 30;
const MAX_WAIT_SECS: u64 = 600;
/// Grace period between SIGTERM and SIGKILL when stopping a shell task.
const KILL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Killed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Shell,
    SubAgent,
}

/// Read-only listing entry for `get_all_tasks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: String,
    pub kind: TaskKind,
    pub command: String,
    pub status: TaskStatus,
}

/// Result of the blocking output query.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The task left `Running` within the budget.
    Ready(TaskOutputReport),
    /// Still running when the budget expired; the report shows the buffers
    /// so far.
    TimedOut(TaskOutputReport),
    /// The caller's abort signal fired.
    Aborted,
    /// No task with that id.
    Unknown,
}

struct TaskEntry {
    kind: TaskKind,
    command: String,
    status: TaskStatus,
    stdout: Arc<Mutex<OutputBuffer>>,
    stderr: Arc<Mutex<OutputBuffer>>,
    exit_code: Option<i32>,
    /// Process-group id of a shell task (unix), for signal delivery.
    pgid: Option<i32>,
    /// Set by `stop_task` so the waiter records `Killed` instead of `Failed`.
    stopping: bool,
    /// Abort handle for sub-agent tasks.
    cancel: Option<CancellationToken>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, TaskEntry>,
    /// Most recent last: `background_current` pops from the back.
    foreground: Vec<(String, oneshot::Sender<()>)>,
    next_id: u64,
}

/// Tracks running foreground and background tasks for one `Agent`.
///
/// State sits behind a single mutex; output append from child processes is
/// serialized through short lock sections on the per-stream buffers.  Tasks
/// survive across turns until explicitly stopped or the manager is dropped.
pub struct TaskManager {
    inner: Arc<Mutex<Inner>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn alloc_id(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        format!("task_{}", inner.next_id)
    }

    // ── Foreground registry ───────────────────────────────────────────────────

    /// Register an in-flight tool call as backgroundable.  The returned
    /// receiver fires when the host requests backgrounding; the tool then
    /// adopts its child and resolves with `is_manually_backgrounded`.
    pub fn register_foreground(&self, id: impl Into<String>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().foreground.push((id.into(), tx));
        rx
    }

    /// Remove a foreground registration (normal tool completion).
    pub fn unregister_foreground(&self, id: &str) {
        self.inner
            .lock()
            .unwrap()
            .foreground
            .retain(|(fid, _)| fid != id);
    }

    /// Fire the most recent foreground task's background handler.
    /// Returns `false` when nothing is registered.
    pub fn background_current(&self) -> bool {
        let entry = self.inner.lock().unwrap().foreground.pop();
        match entry {
            Some((id, tx)) => {
                debug!(task = %id, "backgrounding current foreground task");
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    // ── Background shell tasks ────────────────────────────────────────────────

    /// Spawn a detached shell command and start buffering its output.
    pub fn start_shell(
        &self,
        command: &str,
        workdir: Option<&std::path::Path>,
        env: &[(String, String)],
        timeout_secs: Option<u64>,
    ) -> std::io::Result<String> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }
        // New session: the child has no controlling terminal and becomes its
        // own process group, so stop_task can signal the whole group.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let id = self.alloc_id();
        debug!(task = %id, cmd = %command, "started background shell");
        self.track_child(
            id.clone(),
            command.to_string(),
            child,
            Arc::new(Mutex::new(OutputBuffer::new())),
            Arc::new(Mutex::new(OutputBuffer::new())),
            timeout_secs,
        );
        Ok(id)
    }

    /// Adopt a live child spawned elsewhere (backgrounding a foreground
    /// shell).  The caller passes the buffers its readers already write to;
    /// the child keeps streaming into them without a restart.  When the
    /// child's pipes have not been taken yet, readers are attached here.
    pub fn adopt_process(
        &self,
        child: Child,
        command: &str,
        stdout_buf: Arc<Mutex<OutputBuffer>>,
        stderr_buf: Arc<Mutex<OutputBuffer>>,
    ) -> String {
        let id = self.alloc_id();
        debug!(task = %id, cmd = %command, "adopted foreground process");
        self.track_child(id.clone(), command.to_string(), child, stdout_buf, stderr_buf, None);
        id
    }

    fn track_child(
        &self,
        id: String,
        command: String,
        mut child: Child,
        stdout_buf: Arc<Mutex<OutputBuffer>>,
        stderr_buf: Arc<Mutex<OutputBuffer>>,
        timeout_secs: Option<u64>,
    ) {
        let pgid = child.id().map(|pid| pid as i32);

        {
            let mut inner = self.inner.lock().unwrap();
            inner.tasks.insert(
                id.clone(),
                TaskEntry {
                    kind: TaskKind::Shell,
                    command,
                    status: TaskStatus::Running,
                    stdout: Arc::clone(&stdout_buf),
                    stderr: Arc::clone(&stderr_buf),
                    exit_code: None,
                    pgid,
                    stopping: false,
                    cancel: None,
                },
            );
        }

        if let Some(out) = child.stdout.take() {
            spawn_reader(out, Arc::clone(&stdout_buf));
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, Arc::clone(&stderr_buf));
        }

        // Waiter: owns the child until it exits; records the final status.
        let inner = Arc::clone(&self.inner);
        let task_id = id;
        tokio::spawn(async move {
            let waited = match timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                        Ok(r) => r,
                        Err(_) => {
                            warn!(task = %task_id, "background task timed out; killing");
                            let _ = child.start_kill();
                            let mut inner = inner.lock().unwrap();
                            if let Some(e) = inner.tasks.get_mut(&task_id) {
                                e.status = TaskStatus::Killed;
                            }
                            return;
                        }
                    }
                }
                None => child.wait().await,
            };
            let mut inner = inner.lock().unwrap();
            if let Some(e) = inner.tasks.get_mut(&task_id) {
                match waited {
                    Ok(status) => {
                        e.exit_code = status.code();
                        e.status = if e.stopping {
                            TaskStatus::Killed
                        } else if status.success() {
                            TaskStatus::Completed
                        } else {
                            TaskStatus::Failed
                        };
                    }
                    Err(err) => {
                        warn!(task = %task_id, error = %err, "wait failed for background task");
                        e.status = TaskStatus::Failed;
                    }
                }
            }
        });
    }

    // ── Sub-agent tasks ───────────────────────────────────────────────────────

    /// Register a backgrounded sub-agent run.  `cancel` aborts it on stop.
    pub fn register_subagent(&self, name: &str, cancel: CancellationToken) -> String {
        let id = self.alloc_id();
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.insert(
            id.clone(),
            TaskEntry {
                kind: TaskKind::SubAgent,
                command: format!("subagent: {name}"),
                status: TaskStatus::Running,
                stdout: Arc::new(Mutex::new(OutputBuffer::new())),
                stderr: Arc::new(Mutex::new(OutputBuffer::new())),
                exit_code: None,
                pgid: None,
                stopping: false,
                cancel: Some(cancel),
            },
        );
        id
    }

    /// Record a sub-agent's final assistant text as the task output.
    pub fn complete_subagent(&self, id: &str, final_text: &str, failed: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.tasks.get_mut(id) {
            e.stdout.lock().unwrap().append(final_text);
            e.status = if e.stopping {
                TaskStatus::Killed
            } else if failed {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Current buffers and status.  `filter` keeps only matching lines.
    pub fn get_output(
        &self,
        task_id: &str,
        filter: Option<&str>,
    ) -> Result<TaskOutputReport, String> {
        let re = match filter {
            Some(f) => Some(Regex::new(f).map_err(|e| format!("invalid filter regex: {e}"))?),
            None => None,
        };
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| format!("unknown task: {task_id}"))?;
        let report = TaskOutputReport {
            task_id: task_id.to_string(),
            status: entry.status,
            stdout: entry.stdout.lock().unwrap().filtered(re.as_ref()),
            stderr: entry.stderr.lock().unwrap().filtered(re.as_ref()),
            exit_code: entry.exit_code,
        };
        Ok(report)
    }

    /// Blocking variant: poll every 500 ms until the task leaves `Running`,
    /// the budget (default 30 s, max 600 s) expires, or `cancel` fires.
    pub async fn wait_output(
        &self,
        task_id: &str,
        filter: Option<&str>,
        timeout_secs: Option<u64>,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let budget = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_WAIT_SECS).min(MAX_WAIT_SECS));
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Aborted;
            }
            let report = match self.get_output(task_id, filter) {
                Ok(r) => r,
                Err(_) => return WaitOutcome::Unknown,
            };
            if report.status != TaskStatus::Running {
                return WaitOutcome::Ready(report);
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitOutcome::TimedOut(report);
            }
            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Aborted,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    pub fn get_all_tasks(&self) -> Vec<TaskSnapshot> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<TaskSnapshot> = inner
            .tasks
            .iter()
            .map(|(id, e)| TaskSnapshot {
                id: id.clone(),
                kind: e.kind,
                command: e.command.clone(),
                status: e.status,
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    // ── Stopping ──────────────────────────────────────────────────────────────

    /// Stop a background task: SIGTERM, one second of grace, then SIGKILL
    /// for shell tasks; abort for sub-agent tasks.  Returns `false` for an
    /// unknown id.
    pub fn stop_task(&self, task_id: &str) -> bool {
        let (kind, pgid, cancel) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(entry) = inner.tasks.get_mut(task_id) else {
                return false;
            };
            if entry.status != TaskStatus::Running {
                return true;
            }
            entry.stopping = true;
            (entry.kind, entry.pgid, entry.cancel.clone())
        };
        match kind {
            TaskKind::Shell => {
                #[cfg(unix)]
                if let Some(pgid) = pgid {
                    debug!(task = %task_id, pgid, "stopping shell task");
                    unsafe {
                        libc::kill(-pgid, libc::SIGTERM);
                    }
                    match tokio::runtime::Handle::try_current() {
                        Ok(handle) => {
                            handle.spawn(async move {
                                tokio::time::sleep(KILL_GRACE).await;
                                unsafe {
                                    libc::kill(-pgid, libc::SIGKILL);
                                }
                            });
                        }
                        // No runtime (agent dropped after shutdown): skip the
                        // grace period and kill immediately.
                        Err(_) => unsafe {
                            libc::kill(-pgid, libc::SIGKILL);
                        },
                    }
                }
                #[cfg(not(unix))]
                let _ = pgid;
            }
            TaskKind::SubAgent => {
                if let Some(token) = cancel {
                    token.cancel();
                }
                let mut inner = self.inner.lock().unwrap();
                if let Some(entry) = inner.tasks.get_mut(task_id) {
                    entry.status = TaskStatus::Killed;
                }
            }
        }
        true
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a child stream to EOF, appending into a shared buffer.  Used by the
/// manager for its own children and by tools that pre-wire buffers so a
/// later adoption keeps streaming into the same storage.
pub fn spawn_reader<R>(mut reader: R, buf: Arc<Mutex<OutputBuffer>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    buf.lock().unwrap().append(&text);
                }
            }
        }
    });
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_task_completes_and_captures_stdout() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("echo done in bg", None, &[], None).unwrap();
        let cancel = CancellationToken::new();
        match mgr.wait_output(&id, None, Some(10), &cancel).await {
            WaitOutcome::Ready(report) => {
                assert_eq!(report.status, TaskStatus::Completed);
                assert!(report.stdout.contains("done in bg"));
                assert_eq!(report.exit_code, Some(0));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_shell_task_is_failed_with_exit_code() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("exit 3", None, &[], None).unwrap();
        let cancel = CancellationToken::new();
        match mgr.wait_output(&id, None, Some(10), &cancel).await {
            WaitOutcome::Ready(report) => {
                assert_eq!(report.status, TaskStatus::Failed);
                assert_eq!(report.exit_code, Some(3));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_output_applies_line_filter() {
        let mgr = TaskManager::new();
        let id = mgr
            .start_shell("printf 'keep this\\ndrop that\\n'", None, &[], None)
            .unwrap();
        let cancel = CancellationToken::new();
        let _ = mgr.wait_output(&id, None, Some(10), &cancel).await;
        let report = mgr.get_output(&id, Some("^keep")).unwrap();
        assert_eq!(report.stdout.trim(), "keep this");
    }

    #[tokio::test]
    async fn invalid_filter_regex_is_an_error() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("true", None, &[], None).unwrap();
        let err = mgr.get_output(&id, Some("(unclosed")).unwrap_err();
        assert!(err.contains("invalid filter regex"));
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let mgr = TaskManager::new();
        assert!(mgr.get_output("task_999", None).is_err());
    }

    #[tokio::test]
    async fn stop_task_kills_long_running_shell() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("sleep 60", None, &[], None).unwrap();
        assert!(mgr.stop_task(&id));
        let cancel = CancellationToken::new();
        match mgr.wait_output(&id, None, Some(15), &cancel).await {
            WaitOutcome::Ready(report) => assert_eq!(report.status, TaskStatus::Killed),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_output_aborts_immediately_on_cancel() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("sleep 30", None, &[], None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            mgr.wait_output(&id, None, Some(30), &cancel).await,
            WaitOutcome::Aborted
        ));
        mgr.stop_task(&id);
    }

    #[tokio::test]
    async fn get_all_tasks_lists_running_task() {
        let mgr = TaskManager::new();
        let id = mgr.start_shell("sleep 5", None, &[], None).unwrap();
        let tasks = mgr.get_all_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].kind, TaskKind::Shell);
        assert_eq!(tasks[0].status, TaskStatus::Running);
        mgr.stop_task(&id);
    }

    #[tokio::test]
    async fn background_current_fires_most_recent_handler() {
        let mgr = TaskManager::new();
        let mut first = mgr.register_foreground("a");
        let second = mgr.register_foreground("b");
        assert!(mgr.background_current());
        // Most recent ("b") fired; "a" still pending.
        assert!(second.await.is_ok());
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_foreground_removes_entry() {
        let mgr = TaskManager::new();
        let _rx = mgr.register_foreground("a");
        mgr.unregister_foreground("a");
        assert!(!mgr.background_current());
    }

    #[tokio::test]
    async fn adopt_process_seeds_buffers_and_tracks_exit() {
        let mgr = TaskManager::new();
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg("echo adopted");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = cmd.spawn().unwrap();
        let id = mgr.adopt_process(
            child,
            "echo adopted",
            Arc::new(Mutex::new(OutputBuffer::with_seed("prior out\n".into()))),
            Arc::new(Mutex::new(OutputBuffer::new())),
        );
        let cancel = CancellationToken::new();
        match mgr.wait_output(&id, None, Some(10), &cancel).await {
            WaitOutcome::Ready(report) => {
                assert!(report.stdout.contains("prior out"));
                assert!(report.stdout.contains("adopted"));
                assert_eq!(report.status, TaskStatus::Completed);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subagent_lifecycle_records_final_text() {
        let mgr = TaskManager::new();
        let cancel = CancellationToken::new();
        let id = mgr.register_subagent("researcher", cancel.clone());
        assert_eq!(mgr.get_output(&id, None).unwrap().status, TaskStatus::Running);
        mgr.complete_subagent(&id, "final answer", false);
        let report = mgr.get_output(&id, None).unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.stdout, "final answer");
    }

    #[tokio::test]
    async fn stop_subagent_cancels_its_token() {
        let mgr = TaskManager::new();
        let cancel = CancellationToken::new();
        let id = mgr.register_subagent("worker", cancel.clone());
        assert!(mgr.stop_task(&id));
        assert!(cancel.is_cancelled());
        assert_eq!(mgr.get_output(&id, None).unwrap().status, TaskStatus::Killed);
    }
}
