// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible streaming driver for the AI gateway.
//!
//! One driver covers every endpoint that speaks the standard
//! `/chat/completions` SSE wire format, which is what the `AIGW_URL`
//! gateway exposes.  Auth is always `Authorization: Bearer <key>`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::ResponseStream, CompletionRequest, ContentPart, Message, MessageContent, Role,
    StreamEvent, Usage,
};

pub struct GatewayProvider {
    chat_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GatewayProvider {
    /// `base_url` ends before `/chat/completions`, e.g. `https://gw.example/v1`.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for GatewayProvider {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": req.stream,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %req.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let resp = self
            .client
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("gateway request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("gateway error {status}: {text}");
        }

        // SSE events can split across TCP packets: keep a line buffer across
        // chunks and emit events only for complete lines.
        let event_stream = resp
            .bytes_stream()
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<StreamEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Serialize wire messages into the OpenAI chat-completions shape.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(t) => json!({ "role": role_str(m.role), "content": t }),
            MessageContent::Parts(parts) => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => json!({
                            "type": "image_url",
                            "image_url": { "url": image_url },
                        }),
                    })
                    .collect();
                json!({ "role": role_str(m.role), "content": content })
            }
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "arguments": function.arguments,
                    }
                }]
            }),
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content.as_text(),
            }),
        })
        .collect()
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line stays in `buf` to be extended by the next
/// chunk — a single SSE event may span multiple TCP packets.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<StreamEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line; `None` for blanks and comments.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<StreamEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_chunk(&v)
}

/// Translate one parsed SSE chunk into a [`StreamEvent`].
fn parse_chunk(v: &Value) -> Option<anyhow::Result<StreamEvent>> {
    // Usage-only chunk (choices empty or absent).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let cached = usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0) as u32;
        return Some(Ok(StreamEvent::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cache_read_input_tokens: cached,
            cache_creation_input_tokens: usage["cache_creation_input_tokens"]
                .as_u64()
                .unwrap_or(0) as u32,
        })));
    }

    let delta = &v["choices"][0]["delta"];
    if let Some(tcs) = delta["tool_calls"].as_array() {
        // One chunk carries at most one fragment per index in practice, but
        // the format permits several; only the first is returned here and the
        // rest arrive in following chunks.
        let tc = tcs.first()?;
        return Some(Ok(StreamEvent::ToolCallDelta {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        }));
    }
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            return Some(Ok(StreamEvent::TextDelta(text.to_string())));
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FunctionCall;

    #[test]
    fn drain_holds_back_incomplete_line() {
        let mut buf = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\ndata: {\"cho");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::TextDelta(t) if t == "hi"
        ));
        assert_eq!(buf, "data: {\"cho");
    }

    #[test]
    fn done_marker_produces_done_event() {
        let mut buf = String::from("data: [DONE]\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done));
    }

    #[test]
    fn tool_call_fragments_parse_with_index() {
        let chunk: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c1","function":{"name":"Bash","arguments":"{\"com"}}]}}]}"#,
        )
        .unwrap();
        match parse_chunk(&chunk).unwrap().unwrap() {
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(index, 1);
                assert_eq!(id, "c1");
                assert_eq!(name, "Bash");
                assert_eq!(arguments, "{\"com");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn usage_chunk_parses_cache_fields() {
        let chunk: Value = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":7,"prompt_tokens_details":{"cached_tokens":64},"cache_creation_input_tokens":12}}"#,
        )
        .unwrap();
        match parse_chunk(&chunk).unwrap().unwrap() {
            StreamEvent::Usage(u) => {
                assert_eq!(u.input_tokens, 100);
                assert_eq!(u.output_tokens, 7);
                assert_eq!(u.cache_read_input_tokens, 64);
                assert_eq!(u.cache_creation_input_tokens, 12);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn tool_call_message_serializes_to_openai_shape() {
        let msgs = vec![Message {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: "c1".into(),
                function: FunctionCall {
                    name: "Read".into(),
                    arguments: "{\"file_path\":\"a\"}".into(),
                },
            },
        }];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "c1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "Read");
    }

    #[test]
    fn image_part_serializes_as_image_url() {
        let msgs = vec![Message::user_with_parts(vec![
            ContentPart::text("see"),
            ContentPart::image_base64("image/png", "QUJD"),
        ])];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["content"][1]["type"], "image_url");
        assert_eq!(
            wire[0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }
}
