// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use wave_transcript::{DiffBlock, DiffLine, DiffLineKind};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in file writer (create or overwrite).
pub struct WriteTool;

/// Line-level diff between two file states, for the transcript's diff block.
pub(crate) fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .map(|change| DiffLine {
            kind: match change.tag() {
                ChangeTag::Equal => DiffLineKind::Context,
                ChangeTag::Insert => DiffLineKind::Added,
                ChangeTag::Delete => DiffLineKind::Removed,
            },
            content: change.value().trim_end_matches('\n').to_string(),
        })
        .collect()
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if \
         needed and overwriting it otherwise. For partial changes prefer the \
         Edit tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute or workdir-relative path to write"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content"
                }
            },
            "required": ["file_path", "content"],
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
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'content'");
        };
        let resolved = ctx.resolve_path(path);
        debug!(path = %resolved.display(), bytes = content.len(), "Write tool");

        let old = tokio::fs::read_to_string(&resolved).await.unwrap_or_default();
        ctx.record_snapshot(&resolved);

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("cannot create {}: {e}", parent.display()));
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return ToolResult::err(format!("cannot write {path}: {e}"));
        }

        ctx.add_diff_block(DiffBlock {
            file_path: resolved.display().to_string(),
            lines: diff_lines(&old, content),
        });

        let lines = content.lines().count();
        ToolResult::ok(format!("Wrote {lines} lines to {path}"))
            .with_short(format!("wrote {path}"))
            .with_file(resolved)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
