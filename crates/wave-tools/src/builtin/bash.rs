// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use wave_tasks::{spawn_reader, OutputBuffer};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in shell tool.
///
/// Foreground runs are capped by the configured timeout (default 120 s) and
/// register with the task manager as backgroundable: when the host signals
/// `background_current_task`, the live child is adopted into the background
/// registry — output keeps streaming into the same buffers — and the call
/// resolves immediately with `is_manually_backgrounded`.  With
/// `run_in_background` the command detaches at once and the result carries
/// the assigned task id.
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. Use \
         run_in_background for long-running commands; the result then carries \
         a task id for TaskOutput / TaskStop. Do NOT use shell commands for \
         file operations: prefer Read over cat, Grep over grep, Glob over \
         find, and Edit over sed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Foreground timeout in seconds (default 120)"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Detach immediately and return a task id"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'command'");
        };
        let run_in_background = args
            .get("run_in_background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if run_in_background {
            return match ctx.tasks.start_shell(command, Some(&ctx.workdir), &ctx.bash_env, None) {
                Ok(id) => ToolResult::ok(format!(
                    "Command running in background with task id: {id}\n\
                     Use TaskOutput to read its output and TaskStop to stop it."
                ))
                .with_short(format!("background {id}")),
                Err(e) => ToolResult::err(format!("spawn error: {e}")),
            };
        }

        let timeout = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(ctx.bash_timeout_secs);
        debug!(cmd = %command, timeout, "Bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.current_dir(&ctx.workdir);
        // Detach from any controlling terminal: stdin at /dev/null defeats
        // isatty probes, setsid puts the child in its own process group so
        // adoption and group-wide signals work.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (k, v) in &ctx.bash_env {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut spawned = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("spawn error: {e}")),
        };

        let stdout_buf = Arc::new(Mutex::new(OutputBuffer::new()));
        let stderr_buf = Arc::new(Mutex::new(OutputBuffer::new()));
        if let Some(out) = spawned.stdout.take() {
            spawn_reader(out, Arc::clone(&stdout_buf));
        }
        if let Some(err) = spawned.stderr.take() {
            spawn_reader(err, Arc::clone(&stderr_buf));
        }

        let mut bg_rx = ctx.tasks.register_foreground(&ctx.call_id);
        let mut child = Some(spawned);

        enum Outcome {
            Exited(std::io::Result<std::process::ExitStatus>),
            Backgrounded,
            TimedOut,
            Aborted,
        }

        let outcome = {
            let running = child.as_mut().expect("child present");
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Outcome::Aborted,
                _ = &mut bg_rx => Outcome::Backgrounded,
                _ = tokio::time::sleep(Duration::from_secs(timeout)) => Outcome::TimedOut,
                status = running.wait() => Outcome::Exited(status),
            }
        };

        match outcome {
            Outcome::Exited(status) => {
                ctx.tasks.unregister_foreground(&ctx.call_id);
                // Readers may still be mid-flush; give the pipes a moment.
                tokio::time::sleep(Duration::from_millis(20)).await;
                let stdout = stdout_buf.lock().unwrap().contents().to_string();
                let stderr = stderr_buf.lock().unwrap().contents().to_string();
                match status {
                    Ok(status) => compose_result(&stdout, &stderr, status.code()),
                    Err(e) => ToolResult::err(format!("wait error: {e}")),
                }
            }
            Outcome::Backgrounded => {
                let taken = child.take().expect("child present");
                let id = ctx
                    .tasks
                    .adopt_process(taken, command, stdout_buf, stderr_buf);
                ToolResult {
                    is_manually_backgrounded: true,
                    ..ToolResult::ok(format!(
                        "Command moved to background with task id: {id}\n\
                         It continues running; use TaskOutput to read its output."
                    ))
                    .with_short(format!("backgrounded as {id}"))
                }
            }
            Outcome::TimedOut => {
                ctx.tasks.unregister_foreground(&ctx.call_id);
                if let Some(mut c) = child.take() {
                    let _ = c.start_kill();
                }
                ToolResult::err(format!("timeout after {timeout}s"))
            }
            Outcome::Aborted => {
                ctx.tasks.unregister_foreground(&ctx.call_id);
                if let Some(mut c) = child.take() {
                    let _ = c.start_kill();
                }
                ToolResult::err("aborted")
            }
        }
    }
}

/// Merge captured streams into the model-facing result, stderr sectioned
/// off, exit code surfaced on failure.
fn compose_result(stdout: &str, stderr: &str, code: Option<i32>) -> ToolResult {
    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("[stderr]\n");
        content.push_str(stderr);
    }
    let code = code.unwrap_or(-1);
    if content.is_empty() {
        content = format!("[exit {code}]");
    }
    if code == 0 {
        ToolResult::ok(content)
    } else {
        ToolResult::err(format!("[exit {code}]\n{content}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::builtin::testutil::ctx;
    use wave_tasks::{TaskStatus, WaitOutcome};

    #[tokio::test]
    async fn echo_returns_stdout() {
        let tmp = TempDir::new().unwrap();
        let out = BashTool
            .execute(json!({"command": "echo ok"}), &ctx(tmp.path()))
            .await;
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.content, "ok\n");
    }

    #[tokio::test]
    async fn stderr_is_sectioned() {
        let tmp = TempDir::new().unwrap();
        let out = BashTool
            .execute(json!({"command": "echo out && echo err >&2"}), &ctx(tmp.path()))
            .await;
        assert!(out.content.contains("out"));
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_with_code() {
        let tmp = TempDir::new().unwrap();
        let out = BashTool
            .execute(json!({"command": "exit 3"}), &ctx(tmp.path()))
            .await;
        assert!(!out.success);
        assert!(out.content.contains("[exit 3]"));
    }

    #[tokio::test]
    async fn timeout_kills_and_errors() {
        let tmp = TempDir::new().unwrap();
        let out = BashTool
            .execute(
                json!({"command": "sleep 30", "timeout_secs": 1}),
                &ctx(tmp.path()),
            )
            .await;
        assert!(!out.success);
        assert!(out.content.contains("timeout after 1s"));
    }

    #[tokio::test]
    async fn abort_signal_stops_the_command() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        context.cancel.cancel();
        let out = BashTool
            .execute(json!({"command": "sleep 30"}), &context)
            .await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("aborted"));
    }

    #[tokio::test]
    async fn run_in_background_returns_task_id() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        let out = BashTool
            .execute(
                json!({"command": "sleep 0.2 && echo done in bg", "run_in_background": true}),
                &context,
            )
            .await;
        assert!(out.success);
        assert!(out.content.contains("task_"), "{}", out.content);

        let tasks = context.tasks.get_all_tasks();
        assert_eq!(tasks.len(), 1);
        let id = tasks[0].id.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        match context.tasks.wait_output(&id, None, Some(10), &cancel).await {
            WaitOutcome::Ready(report) => {
                assert_eq!(report.status, TaskStatus::Completed);
                assert!(report.stdout.contains("done in bg"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backgrounding_a_foreground_command_adopts_it() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        let tasks = Arc::clone(&context.tasks);

        // Fire the background signal once the foreground registration lands.
        tokio::spawn(async move {
            for _ in 0..100 {
                if tasks.background_current() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let out = BashTool
            .execute(
                json!({"command": "echo early && sleep 0.5 && echo late"}),
                &context,
            )
            .await;
        assert!(out.success);
        assert!(out.is_manually_backgrounded);
        assert!(out.content.contains("task_"));

        // The adopted child keeps writing into the same buffers.
        let id = context.tasks.get_all_tasks()[0].id.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        match context.tasks.wait_output(&id, None, Some(10), &cancel).await {
            WaitOutcome::Ready(report) => {
                assert!(report.stdout.contains("early"));
                assert!(report.stdout.contains("late"));
                assert_eq!(report.status, TaskStatus::Completed);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn settings_env_reaches_the_subprocess() {
        let tmp = TempDir::new().unwrap();
        let mut context = ctx(tmp.path());
        context.bash_env = vec![("WAVE_TEST_VAR".into(), "marker-42".into())];
        let out = BashTool
            .execute(json!({"command": "echo $WAVE_TEST_VAR"}), &context)
            .await;
        assert!(out.content.contains("marker-42"));
    }

    #[test]
    fn compact_params_show_the_command() {
        assert_eq!(
            BashTool.format_compact_params(&json!({"command": "cargo test"})),
            "cargo test"
        );
    }
}
