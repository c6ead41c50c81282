// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use wave_runtime::rules::path_glob_match;

use crate::tool::{Tool, ToolContext, ToolResult};

const MAX_RESULTS: usize = 200;

/// Built-in file-name search.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, newest first, capped at 200. \
         `**` crosses directories: src/**/*.rs matches nested sources. \
         .git/, target/, and node_modules/ are excluded. For content search \
         use Grep; for directory listings use LS."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to the search root, e.g. '**/*.rs'"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: workdir)"
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
        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve_path(p))
            .unwrap_or_else(|| ctx.workdir.clone());
        debug!(pattern = %pattern, root = %root.display(), "Glob tool");

        let mut found: Vec<(std::time::SystemTime, String)> = Vec::new();
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_ignored(e))
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(&root)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            if !path_glob_match(pattern, &rel) {
                continue;
            }
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            found.push((mtime, rel));
        }

        // Newest first.
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        found.truncate(MAX_RESULTS);

        if found.is_empty() {
            return ToolResult::ok("no files matched").with_short("0 files");
        }
        let count = found.len();
        let listing: Vec<String> = found.into_iter().map(|(_, p)| p).collect();
        ToolResult::ok(listing.join("\n")).with_short(format!("{count} files"))
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

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::builtin::testutil::ctx;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/deep")).unwrap();
        std::fs::write(tmp.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(tmp.path().join("src/deep/inner.rs"), "").unwrap();
        std::fs::write(tmp.path().join("README.md"), "").unwrap();
        tmp
    }

    #[tokio::test]
    async fn double_star_matches_nested_files() {
        let tmp = fixture();
        let out = GlobTool
            .execute(json!({"pattern": "src/**/*.rs"}), &ctx(tmp.path()))
            .await;
        assert!(out.success);
        assert!(out.content.contains("src/lib.rs"));
        assert!(out.content.contains("src/deep/inner.rs"));
        assert!(!out.content.contains("README.md"));
    }

    #[tokio::test]
    async fn no_match_is_success_with_note() {
        let tmp = fixture();
        let out = GlobTool
            .execute(json!({"pattern": "*.py"}), &ctx(tmp.path()))
            .await;
        assert!(out.success);
        assert_eq!(out.content, "no files matched");
    }

    #[tokio::test]
    async fn path_argument_scopes_the_search() {
        let tmp = fixture();
        let out = GlobTool
            .execute(json!({"pattern": "*.rs", "path": "src"}), &ctx(tmp.path()))
            .await;
        assert!(out.content.contains("lib.rs"));
        assert!(!out.content.contains("inner.rs"), "single star stays shallow");
    }

    #[tokio::test]
    async fn missing_pattern_is_an_error() {
        let tmp = fixture();
        let out = GlobTool.execute(json!({}), &ctx(tmp.path())).await;
        assert!(!out.success);
    }
}
