// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::gate::ToolPermissionContext;
use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in question channel to the human.
///
/// The questions ride through the permission gate's host callback: an
/// `allow` decision carries the answers as a JSON object in its `message`,
/// which becomes the tool's success content.  An unparsable answer is a
/// failed call, not a crash.
pub struct AskUserQuestionTool;

#[async_trait]
impl Tool for AskUserQuestionTool {
    fn name(&self) -> &str {
        "AskUserQuestion"
    }

    fn description(&self) -> &str {
        "Ask the user one or more questions and wait for their answers. Use \
         when a decision genuinely needs human input; otherwise proceed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": { "type": "string" },
                            "options": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Suggested answers (optional)"
                            }
                        },
                        "required": ["question"]
                    }
                }
            },
            "required": ["questions"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        // The gate's ask IS this tool's execution; a second gate pass would
        // prompt the user twice for one question.
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        let n = args
            .get("questions")
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        format!("{n} question{}", if n == 1 { "" } else { "s" })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        if args.get("questions").and_then(|v| v.as_array()).is_none() {
            return ToolResult::err("missing 'questions'");
        }
        let decision = ctx
            .gate
            .ask(ToolPermissionContext {
                tool_name: self.name().to_string(),
                tool_input: args,
                mode: ctx.permission_mode,
                session_id: ctx.session_id.clone(),
            })
            .await;

        if !decision.is_allow() {
            return ToolResult::err(
                decision
                    .message
                    .unwrap_or_else(|| "user declined to answer".into()),
            );
        }
        match decision.parsed_answers() {
            Some(answers) => {
                let content = serde_json::to_string(&answers).unwrap_or_default();
                ToolResult::ok(content).with_short(format!("{} answers", answers.len()))
            }
            None => ToolResult::err("answers were not a valid JSON object"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
