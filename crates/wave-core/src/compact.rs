// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context compaction.
//!
//! When the projected conversation approaches the token budget, the oldest
//! unpinned span of the transcript is summarized through a single
//! tool-free call to the fast model and replaced — in projection only — by
//! a `compress` block carrying the summary.  The transcript itself keeps
//! every message; the marker just moves the projection window.
//!
//! Pinning: the current user message, the last assistant message, and any
//! message holding `memory` or `custom_command` blocks are never
//! summarized away.
//!
//! The pass is split into three phases — [`plan`], [`summarize`],
//! [`apply`] — so the caller never holds the store lock across the model
//! call.

use std::collections::HashMap;

use futures::StreamExt;
use tracing::{debug, warn};

use wave_model::{
    CompletionRequest, Message as WireMessage, MessageContent, ModelProvider, StreamEvent,
};
use wave_transcript::{BlockPayload, CompressBlock, Message, MessageId, MessageRole, TranscriptStore};

use crate::projection::project;

/// Fraction of the token budget that triggers compaction.
pub const TRIGGER_FRACTION: f32 = 0.85;
/// Recent messages kept verbatim regardless of pinning.
const KEEP_RECENT: usize = 4;

const SUMMARY_PROMPT: &str = "\
Summarize the earlier part of this coding session for a continuation \
context. Keep: the user's goals, decisions made, files touched and how, \
commands run with their relevant outcomes, and anything explicitly agreed. \
Drop pleasantries and dead ends. Write tight prose, no preamble.";

/// Approximate token count of a projected conversation.
pub fn approx_tokens(wire: &[WireMessage]) -> usize {
    wire.iter().map(WireMessage::approx_tokens).sum()
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compacted {
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Everything [`apply`] needs, computed without a model call.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    /// Index of the first kept message.
    boundary: usize,
    /// Message the `compress` marker lands on (last summarized).
    marker_message: MessageId,
    /// Rendered prefix for the summary call.
    pub prefix_text: String,
    tokens_before: usize,
}

/// Index of the first message that must stay out of the summary.
fn pin_boundary(messages: &[Message]) -> usize {
    let mut boundary = messages.len().saturating_sub(KEEP_RECENT);
    let last_assistant = messages
        .iter()
        .rposition(|m| m.role == MessageRole::Assistant);
    let last_user = messages.iter().rposition(|m| m.role == MessageRole::User);
    for idx in [last_assistant, last_user].into_iter().flatten() {
        boundary = boundary.min(idx);
    }
    for (i, message) in messages.iter().enumerate() {
        let pinned = message.blocks.iter().any(|b| {
            matches!(
                b.payload,
                BlockPayload::Memory(_) | BlockPayload::CustomCommand(_)
            )
        });
        if pinned {
            boundary = boundary.min(i);
        }
    }
    boundary
}

/// Render a projected prefix as plain text for the summarization call.
fn render(wire: &[WireMessage]) -> String {
    let mut out = String::new();
    for m in wire {
        match &m.content {
            MessageContent::Text(t) => {
                let role = match m.role {
                    wave_model::Role::User => "user",
                    wave_model::Role::Assistant => "assistant",
                    wave_model::Role::System => "system",
                    wave_model::Role::Tool => "tool",
                };
                out.push_str(&format!("{role}: {t}\n"));
            }
            MessageContent::ToolCall { function, .. } => {
                out.push_str(&format!(
                    "assistant called {}({})\n",
                    function.name, function.arguments
                ));
            }
            MessageContent::ToolResult { content, .. } => {
                out.push_str(&format!("tool result: {}\n", content.as_text()));
            }
            MessageContent::Parts(_) => {
                out.push_str("user: [message with attachments]\n");
            }
        }
    }
    out
}

/// Decide whether (and what) to compact.  Returns `None` below the trigger
/// (unless forced) or when everything is pinned.
pub fn plan(
    messages: &[Message],
    token_limit: usize,
    force: bool,
    amendments: &HashMap<String, String>,
) -> Option<CompactionPlan> {
    if token_limit == 0 {
        return None;
    }
    let tokens_before = approx_tokens(&project(messages, amendments));
    let threshold = (token_limit as f32 * TRIGGER_FRACTION) as usize;
    if !force && tokens_before < threshold {
        return None;
    }
    let boundary = pin_boundary(messages);
    if boundary == 0 {
        debug!("compaction requested but everything is pinned");
        return None;
    }
    Some(CompactionPlan {
        boundary,
        marker_message: messages[boundary - 1].id,
        prefix_text: render(&project(&messages[..boundary], amendments)),
        tokens_before,
    })
}

/// Produce the summary through a single tool-free fast-model call.
/// `None` on any failure — the session continues uncompacted rather than
/// corrupted.
pub async fn summarize(
    provider: &dyn ModelProvider,
    fast_model: &str,
    plan: &CompactionPlan,
) -> Option<String> {
    let request = CompletionRequest {
        model: fast_model.to_string(),
        messages: vec![
            WireMessage::system(SUMMARY_PROMPT),
            WireMessage::user(plan.prefix_text.clone()),
        ],
        tools: vec![],
        stream: true,
    };
    let mut stream = match provider.complete(request).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "compaction summary call failed; continuing uncompacted");
            return None;
        }
    };
    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::TextDelta(d)) => summary.push_str(&d),
            Ok(StreamEvent::Done) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "compaction summary stream failed; continuing uncompacted");
                return None;
            }
        }
    }
    if summary.trim().is_empty() {
        warn!("compaction summary was empty; continuing uncompacted");
        return None;
    }
    Some(summary)
}

/// Insert the `compress` marker and report the shrinkage.
pub fn apply(
    store: &mut TranscriptStore,
    plan: CompactionPlan,
    summary: String,
    amendments: &HashMap<String, String>,
) -> Compacted {
    store
        .add_compress_block(
            plan.marker_message,
            CompressBlock {
                summary,
                insert_index: plan.boundary,
            },
        )
        .expect("transcript invariant violated while compacting");
    let tokens_after = approx_tokens(&project(store.messages(), amendments));
    debug!(
        tokens_before = plan.tokens_before,
        tokens_after, "compacted context"
    );
    Compacted {
        tokens_before: plan.tokens_before,
        tokens_after,
    }
}

/// One-shot convenience composing the three phases.
pub async fn maybe_compact(
    store: &mut TranscriptStore,
    provider: &dyn ModelProvider,
    fast_model: &str,
    token_limit: usize,
    force: bool,
    amendments: &HashMap<String, String>,
) -> Option<Compacted> {
    let plan = plan(store.messages(), token_limit, force, amendments)?;
    let summary = summarize(provider, fast_model, &plan).await?;
    Some(apply(store, plan, summary, amendments))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
