// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

/// Built-in todo tracker.  The list lives in shared session state so the
/// host can render it; each call replaces the whole list.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "TodoWrite"
    }

    fn description(&self) -> &str {
        "Replace the session todo list. Use for multi-step work so progress \
         stays visible; mark items in_progress before starting them and \
         completed immediately after finishing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            }
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        // Mutates only in-memory session state, never the workspace.
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        let n = args
            .get("todos")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        format!("{n} items")
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let Some(raw) = args.get("todos") else {
            return ToolResult::err("missing 'todos'");
        };
        let todos: Vec<TodoItem> = match serde_json::from_value(raw.clone()) {
            Ok(t) => t,
            Err(e) => return ToolResult::err(format!("invalid todos: {e}")),
        };
        let done = todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count();
        let total = todos.len();
        *self.todos.lock().unwrap() = todos;
        ToolResult::ok(format!("Todo list updated: {done}/{total} completed"))
            .with_short(format!("{done}/{total} done"))
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
    async fn replaces_list_and_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let todos = Arc::new(Mutex::new(vec![]));
        let tool = TodoWriteTool::new(Arc::clone(&todos));
        let out = tool
            .execute(
                json!({"todos": [
                    {"content": "write tests", "status": "completed"},
                    {"content": "fix bug", "status": "in_progress"}
                ]}),
                &ctx(tmp.path()),
            )
            .await;
        assert!(out.success);
        assert!(out.content.contains("1/2"));
        assert_eq!(todos.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_status_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tool = TodoWriteTool::new(Arc::new(Mutex::new(vec![])));
        let out = tool
            .execute(
                json!({"todos": [{"content": "x", "status": "later"}]}),
                &ctx(tmp.path()),
            )
            .await;
        assert!(!out.success);
    }
}
