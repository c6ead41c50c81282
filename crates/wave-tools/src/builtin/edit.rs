// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use wave_transcript::DiffBlock;

use crate::builtin::write::diff_lines;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in exact-string file editor.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Perform an exact string replacement in a file. old_string must match \
         the file contents exactly, including whitespace, and must be unique \
         unless replace_all is set. Prefer this over sed/awk shell commands."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute or workdir-relative path to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default false)"
                }
            },
            "required": ["file_path", "old_string", "new_string"],
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
        let Some(old_string) = args.get("old_string").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'old_string'");
        };
        let Some(new_string) = args.get("new_string").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'new_string'");
        };
        if old_string == new_string {
            return ToolResult::err("old_string and new_string are identical");
        }
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let resolved = ctx.resolve_path(path);
        debug!(path = %resolved.display(), replace_all, "Edit tool");

        let old = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolResult::err(format!("cannot read {path}: {e}")),
        };

        let occurrences = old.matches(old_string).count();
        if occurrences == 0 {
            return ToolResult::err(format!("old_string not found in {path}"));
        }
        if occurrences > 1 && !replace_all {
            return ToolResult::err(format!(
                "old_string occurs {occurrences} times in {path}; \
                 make it unique or set replace_all"
            ));
        }

        let new = if replace_all {
            old.replace(old_string, new_string)
        } else {
            old.replacen(old_string, new_string, 1)
        };

        ctx.record_snapshot(&resolved);
        if let Err(e) = tokio::fs::write(&resolved, &new).await {
            return ToolResult::err(format!("cannot write {path}: {e}"));
        }

        ctx.add_diff_block(DiffBlock {
            file_path: resolved.display().to_string(),
            lines: diff_lines(&old, &new),
        });

        let replaced = if replace_all { occurrences } else { 1 };
        ToolResult::ok(format!(
            "Replaced {replaced} occurrence{} in {path}",
            if replaced == 1 { "" } else { "s" }
        ))
        .with_short(format!("edited {path}"))
        .with_file(resolved)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
