// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Maximum lines returned without an explicit limit.
const DEFAULT_LIMIT: usize = 2000;
/// Long lines are clipped so one minified file cannot flood the context.
const MAX_LINE_CHARS: usize = 2000;

/// Built-in file reader.
pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Read a file from the filesystem. Returns up to 2000 lines by default, \
         numbered in cat -n format. Use offset/limit for long files. \
         Prefer this over shell commands like cat, head, or tail."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute or workdir-relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line to start reading from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
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
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let resolved = ctx.resolve_path(path);
        debug!(path = %resolved.display(), "Read tool");

        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolResult::err(format!("cannot read {path}: {e}")),
        };

        let total = text.lines().count();
        let mut out = String::new();
        for (i, line) in text.lines().enumerate().skip(offset - 1).take(limit) {
            let clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
            out.push_str(&format!("{:6}\t{}\n", i + 1, clipped));
        }
        if out.is_empty() {
            out = "(empty file)".to_string();
        }

        let shown = total.min(offset.saturating_sub(1) + limit) - (offset - 1).min(total);
        ToolResult::ok(out)
            .with_short(format!("{shown} of {total} lines"))
            .with_file(resolved)
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
    async fn reads_file_with_line_numbers() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "first\nsecond\n").unwrap();
        let out = ReadTool
            .execute(json!({"file_path": "a.txt"}), &ctx(tmp.path()))
            .await;
        assert!(out.success, "{:?}", out.error);
        assert!(out.content.contains("1\tfirst"));
        assert!(out.content.contains("2\tsecond"));
    }

    #[tokio::test]
    async fn offset_and_limit_window_the_file() {
        let tmp = TempDir::new().unwrap();
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(tmp.path().join("b.txt"), body).unwrap();
        let out = ReadTool
            .execute(
                json!({"file_path": "b.txt", "offset": 4, "limit": 2}),
                &ctx(tmp.path()),
            )
            .await;
        assert!(out.content.contains("line4"));
        assert!(out.content.contains("line5"));
        assert!(!out.content.contains("line3"));
        assert!(!out.content.contains("line6"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = ReadTool
            .execute(json!({"file_path": "nope.txt"}), &ctx(tmp.path()))
            .await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("nope.txt"));
    }

    #[tokio::test]
    async fn missing_argument_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = ReadTool.execute(json!({}), &ctx(tmp.path())).await;
        assert!(!out.success);
        assert!(out.content.contains("file_path"));
    }

    #[test]
    fn compact_params_show_the_path() {
        assert_eq!(
            ReadTool.format_compact_params(&json!({"file_path": "src/lib.rs"})),
            "src/lib.rs"
        );
    }
}
