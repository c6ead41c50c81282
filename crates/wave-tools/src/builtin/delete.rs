// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in single-file deletion.
pub struct DeleteTool;

#[async_trait]
impl Tool for DeleteTool {
    fn name(&self) -> &str {
        "Delete"
    }

    fn description(&self) -> &str {
        "Delete a single file. Refuses directories; remove those explicitly \
         through Bash if really needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute or workdir-relative path to delete"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    fn is_file_edit(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("file_path")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'file_path'");
        };
        let resolved = ctx.resolve_path(path);
        debug!(path = %resolved.display(), "Delete tool");

        if resolved.is_dir() {
            return ToolResult::err(format!("{path} is a directory"));
        }
        if !resolved.exists() {
            return ToolResult::err(format!("{path} does not exist"));
        }
        ctx.record_snapshot(&resolved);
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => ToolResult::ok(format!("Deleted {path}"))
                .with_short(format!("deleted {path}"))
                .with_file(resolved),
            Err(e) => ToolResult::err(format!("cannot delete {path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
