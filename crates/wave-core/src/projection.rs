// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Transcript → wire projection.
//!
//! The rich block transcript flattens into provider messages before every
//! completion call.  Compression markers cut the projection: everything up
//! to the most recent `compress` block is replaced by its summary, and the
//! messages from `insert_index` on are projected verbatim.

use std::collections::HashMap;

use wave_model::{ContentPart, FunctionCall, Message as WireMessage, MessageContent};
use wave_transcript::{BlockPayload, Message, MessageRole, ToolStage};

/// Project transcript messages into the wire conversation.
///
/// `amendments` carries PostToolUse-hook amendments keyed by tool call id;
/// they prefix the result the model sees without rewriting the transcript.
pub fn project(messages: &[Message], amendments: &HashMap<String, String>) -> Vec<WireMessage> {
    let mut out = Vec::new();

    // The most recent compression marker wins.
    let mut start = 0usize;
    for message in messages {
        for block in &message.blocks {
            if let BlockPayload::Compress(c) = &block.payload {
                start = c.insert_index.min(messages.len());
                out.clear();
                out.push(WireMessage::user(format!(
                    "[Summary of the earlier conversation]\n{}",
                    c.summary
                )));
            }
        }
    }

    for message in &messages[start..] {
        project_message(message, amendments, &mut out);
    }
    out
}

fn project_message(
    message: &Message,
    amendments: &HashMap<String, String>,
    out: &mut Vec<WireMessage>,
) {
    match message.role {
        MessageRole::User => {
            let text = message.text();
            if message.attachments.is_empty() {
                out.push(WireMessage::user(text));
            } else {
                let mut parts = vec![ContentPart::text(text)];
                for image in &message.attachments {
                    parts.push(ContentPart::image_base64(&image.media_type, &image.data));
                }
                out.push(WireMessage::user_with_parts(parts));
            }
        }
        MessageRole::Assistant | MessageRole::SubAgent => {
            for block in &message.blocks {
                match &block.payload {
                    BlockPayload::Text { content, .. } => {
                        if !content.is_empty() {
                            out.push(WireMessage::assistant(content.clone()));
                        }
                    }
                    BlockPayload::Tool(tool) => {
                        if tool.stage != ToolStage::End {
                            continue;
                        }
                        out.push(WireMessage {
                            role: wave_model::Role::Assistant,
                            content: MessageContent::ToolCall {
                                tool_call_id: tool.call_id.clone(),
                                function: FunctionCall {
                                    name: tool.name.clone(),
                                    arguments: if tool.parameters.is_empty() {
                                        "{}".to_string()
                                    } else {
                                        tool.parameters.clone()
                                    },
                                },
                            },
                        });
                        let mut result = if tool.success == Some(true) {
                            tool.result.clone()
                        } else {
                            tool.error
                                .clone()
                                .unwrap_or_else(|| tool.result.clone())
                        };
                        if let Some(amendment) = amendments.get(&tool.call_id) {
                            result = format!("{amendment}\n{result}");
                        }
                        if result.is_empty() {
                            result = "(no output)".to_string();
                        }
                        out.push(WireMessage::tool_result(tool.call_id.clone(), result));
                    }
                    // Diffs, memory records, sub-agent containers, custom
                    // command markers, and surfaced errors are host-facing;
                    // the model sees their effects through tool results.
                    _ => {}
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
