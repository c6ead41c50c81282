// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use wave_tasks::{TaskStatus, WaitOutcome};

use crate::tool::{Tool, ToolContext, ToolResult};

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Killed => "killed",
        TaskStatus::Failed => "failed",
    }
}

/// Built-in query for background-task output.
pub struct TaskOutputTool;

#[async_trait]
impl Tool for TaskOutputTool {
    fn name(&self) -> &str {
        "TaskOutput"
    }

    fn description(&self) -> &str {
        "Read the buffered output of a background task. Blocks up to \
         timeout_secs (default 30, max 600), polling until the task leaves \
         the running state; returns whatever is buffered on timeout. \
         filter keeps only lines matching a regex."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Id returned when the task started"
                },
                "filter": {
                    "type": "string",
                    "description": "Regex; only matching output lines are returned"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "How long to wait for completion (default 30, max 600)"
                }
            },
            "required": ["task_id"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("task_id")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(task_id) = args.get("task_id").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'task_id'");
        };
        let filter = args.get("filter").and_then(|v| v.as_str());
        let timeout_secs = args.get("timeout_secs").and_then(|v| v.as_u64());

        let outcome = ctx
            .tasks
            .wait_output(task_id, filter, timeout_secs, &ctx.cancel)
            .await;
        let (report, note) = match outcome {
            WaitOutcome::Ready(r) => (r, None),
            WaitOutcome::TimedOut(r) => (r, Some("still running; returning buffered output")),
            WaitOutcome::Aborted => return ToolResult::err("aborted"),
            WaitOutcome::Unknown => {
                return ToolResult::err(format!("unknown task: {task_id}"))
            }
        };

        let mut content = format!("status: {}", status_str(report.status));
        if let Some(code) = report.exit_code {
            content.push_str(&format!(" (exit {code})"));
        }
        if let Some(note) = note {
            content.push_str(&format!("\n[{note}]"));
        }
        if !report.stdout.is_empty() {
            content.push_str("\n[stdout]\n");
            content.push_str(&report.stdout);
        }
        if !report.stderr.is_empty() {
            content.push_str("\n[stderr]\n");
            content.push_str(&report.stderr);
        }
        ToolResult::ok(content).with_short(format!("{task_id}: {}", status_str(report.status)))
    }
}

/// Built-in background-task termination.
pub struct TaskStopTool;

#[async_trait]
impl Tool for TaskStopTool {
    fn name(&self) -> &str {
        "TaskStop"
    }

    fn description(&self) -> &str {
        "Stop a background task. Shell tasks get SIGTERM, then SIGKILL \
         after one second; backgrounded sub-agents are aborted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Id of the task to stop"
                }
            },
            "required": ["task_id"],
            "additionalProperties": false
        })
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("task_id")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(task_id) = args.get("task_id").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'task_id'");
        };
        if ctx.tasks.stop_task(task_id) {
            ToolResult::ok(format!("Stopping {task_id}")).with_short(format!("stopped {task_id}"))
        } else {
            ToolResult::err(format!("unknown task: {task_id}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::builtin::testutil::ctx;

    #[tokio::test]
    async fn task_output_waits_for_completion() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        let id = context
            .tasks
            .start_shell("echo finished", None, &[], None)
            .unwrap();
        let out = TaskOutputTool
            .execute(json!({"task_id": id, "timeout_secs": 10}), &context)
            .await;
        assert!(out.success, "{:?}", out.error);
        assert!(out.content.contains("status: completed"));
        assert!(out.content.contains("finished"));
    }

    #[tokio::test]
    async fn task_output_unknown_id_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = TaskOutputTool
            .execute(json!({"task_id": "task_404"}), &ctx(tmp.path()))
            .await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn task_stop_kills_running_task() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        let id = context
            .tasks
            .start_shell("sleep 60", None, &[], None)
            .unwrap();
        let out = TaskStopTool
            .execute(json!({"task_id": id.clone()}), &context)
            .await;
        assert!(out.success);
        let report = TaskOutputTool
            .execute(json!({"task_id": id, "timeout_secs": 15}), &context)
            .await;
        assert!(report.content.contains("status: killed"));
    }

    #[tokio::test]
    async fn task_stop_unknown_id_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = TaskStopTool
            .execute(json!({"task_id": "task_404"}), &ctx(tmp.path()))
            .await;
        assert!(!out.success);
    }
}
