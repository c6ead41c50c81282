// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use wave_transcript::{MemoryBlock, MemoryScope};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in rule persistence.
///
/// Writes a markdown rule under `.wave/rules/` (project scope) or
/// `~/.wave/rules/` (user scope) so it joins the system prompt from the
/// next session on, and records the write as a `memory` block.
pub struct MemoryWriteTool;

fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "rule".to_string()
    } else {
        trimmed
    }
}

#[async_trait]
impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "MemoryWrite"
    }

    fn description(&self) -> &str {
        "Persist a rule the user asked you to remember. Project scope lands \
         in .wave/rules/ of the workspace; user scope in ~/.wave/rules/. \
         Only store durable guidance, never session chatter."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short rule title; becomes the file name"
                },
                "content": {
                    "type": "string",
                    "description": "The rule body (markdown)"
                },
                "scope": {
                    "type": "string",
                    "enum": ["project", "user"],
                    "description": "Where the rule applies (default project)"
                }
            },
            "required": ["title", "content"],
            "additionalProperties": false
        })
    }

    fn is_file_edit(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("title").and_then(|v| v.as_str()).unwrap_or("?").to_string()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(title) = args.get("title").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'title'");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'content'");
        };
        let scope = match args.get("scope").and_then(|v| v.as_str()).unwrap_or("project") {
            "project" => MemoryScope::Project,
            "user" => MemoryScope::User,
            other => return ToolResult::err(format!("unknown scope: {other}")),
        };

        let rules_dir = match scope {
            MemoryScope::Project => ctx.workdir.join(".wave").join("rules"),
            MemoryScope::User => match dirs::home_dir() {
                Some(home) => home.join(".wave").join("rules"),
                None => return ToolResult::err("cannot resolve home directory"),
            },
        };
        let path = rules_dir.join(format!("{}.md", slugify(title)));
        debug!(path = %path.display(), "MemoryWrite tool");

        if let Err(e) = tokio::fs::create_dir_all(&rules_dir).await {
            return ToolResult::err(format!("cannot create {}: {e}", rules_dir.display()));
        }
        let body = format!("# {title}\n\n{content}\n");
        let success = tokio::fs::write(&path, body).await.is_ok();

        ctx.add_memory_block(MemoryBlock {
            path: path.display().to_string(),
            scope,
            success,
        });

        if success {
            ToolResult::ok(format!("Saved rule to {}", path.display()))
                .with_short(format!("remembered: {title}"))
                .with_file(path)
        } else {
            ToolResult::err(format!("cannot write {}", path.display()))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::builtin::testutil::ctx;

    #[tokio::test]
    async fn writes_project_rule_and_records_memory_block() {
        let tmp = TempDir::new().unwrap();
        let captured: Arc<Mutex<Vec<MemoryBlock>>> = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&captured);
        let mut context = ctx(tmp.path());
        context.memory_sink = Some(Arc::new(move |m| sink.lock().unwrap().push(m)));

        let out = MemoryWriteTool
            .execute(
                json!({"title": "Lint First", "content": "Run the linter before commits."}),
                &context,
            )
            .await;
        assert!(out.success, "{:?}", out.error);

        let rule = tmp.path().join(".wave/rules/lint-first.md");
        let body = std::fs::read_to_string(&rule).unwrap();
        assert!(body.contains("Run the linter"));

        let blocks = captured.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].scope, MemoryScope::Project);
        assert!(blocks[0].success);
        assert!(blocks[0].path.ends_with("lint-first.md"));
    }

    #[tokio::test]
    async fn unknown_scope_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = MemoryWriteTool
            .execute(
                json!({"title": "t", "content": "c", "scope": "galaxy"}),
                &ctx(tmp.path()),
            )
            .await;
        assert!(!out.success);
    }

    #[test]
    fn slugify_flattens_punctuation() {
        assert_eq!(slugify("Lint First!"), "lint-first");
        assert_eq!(slugify("  "), "rule");
    }
}
