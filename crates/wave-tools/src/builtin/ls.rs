// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in directory listing.
pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "LS"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, directories suffixed with '/'. \
         For recursive file discovery use Glob."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: workdir)"
                }
            },
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.workdir.clone());

        let read = match std::fs::read_dir(&root) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("cannot list {}: {e}", root.display())),
        };

        let mut entries: Vec<String> = read
            .filter_map(Result::ok)
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        entries.sort();

        if entries.is_empty() {
            return ToolResult::ok("(empty directory)").with_short("0 entries");
        }
        let count = entries.len();
        ToolResult::ok(entries.join("\n")).with_short(format!("{count} entries"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
