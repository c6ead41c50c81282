// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 200;
/// Files larger than this are skipped (likely binaries or artifacts).
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Built-in content search.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns \
         path:line:text matches, capped at 200. Use `path` to narrow the \
         search root and `glob` to filter file names. Prefer this over shell \
         grep/rg."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: workdir)"
                },
                "glob": {
                    "type": "string",
                    "description": "Filename glob filter, e.g. '*.rs'"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case-insensitive matching"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("pattern")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'pattern'");
        };
        let case_insensitive = args
            .get("case_insensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let source = if case_insensitive {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        let re = match Regex::new(&source) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid pattern: {e}")),
        };
        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.workdir.clone());
        let name_glob = args.get("glob").and_then(|v| v.as_str());

        debug!(pattern = %pattern, root = %root.display(), "Grep tool");

        let mut matches = Vec::new();
        'outer: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_ignored(e))
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(glob) = name_glob {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if !wave_runtime::rules::path_glob_match(glob, name) {
                    continue;
                }
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(path) else {
                continue;
            };
            let display = path
                .strip_prefix(&ctx.workdir)
                .unwrap_or(path)
                .display()
                .to_string();
            for (i, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{display}:{}:{}", i + 1, line.trim_end()));
                    if matches.len() >= MAX_MATCHES {
                        break 'outer;
                    }
                }
            }
        }

        if matches.is_empty() {
            return ToolResult::ok("no matches").with_short("0 matches");
        }
        let count = matches.len();
        let suffix = if count >= MAX_MATCHES {
            format!("\n(capped at {MAX_MATCHES} matches)")
        } else {
            String::new()
        };
        ToolResult::ok(format!("{}{suffix}", matches.join("\n")))
            .with_short(format!("{count} matches"))
    }
}

fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|n| n == ".git" || n == "target" || n == "node_modules")
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
