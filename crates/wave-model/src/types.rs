// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A single message in the wire-format conversation sent to a provider.
///
/// This is the *projection* of the transcript that providers understand —
/// the richer block model lives in `wave-transcript`; the turn engine
/// flattens it into this shape before every completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: ToolResultContent::Text(content.into()),
            },
        }
    }

    /// Construct a user message from mixed text + image parts.
    ///
    /// A single text part collapses to `MessageContent::Text` for cleaner
    /// serialization; an empty list becomes empty text.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageContent::Text(text.clone())
            } else {
                MessageContent::Parts(parts)
            }
        } else {
            MessageContent::Parts(parts)
        };
        Self {
            role: Role::User,
            content,
        }
    }

    /// Plain text of this message when it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Approximate token count (4-chars-per-token heuristic; images use a
    /// conservative fixed estimate).  Used for the compaction trigger only.
    pub fn approx_tokens(&self) -> usize {
        let chars = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 765 * 4,
                })
                .sum(),
            MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
            MessageContent::ToolResult { content, .. } => match content {
                ToolResultContent::Text(t) => t.len(),
            },
        };
        (chars / 4).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: ToolResultContent,
    },
}

/// A single content part in a multimodal message.
///
/// Images travel as data URLs (`data:<mime>;base64,<b64>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image_url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image {
            image_url: image_url.into(),
        }
    }

    /// Build an image part from raw base64 data and its mime type.
    pub fn image_base64(media_type: &str, data: &str) -> Self {
        Self::Image {
            image_url: format!("data:{media_type};base64,{data}"),
        }
    }
}

/// Content of a tool-result message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
}

impl ToolResultContent {
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(t) => t,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, forwarded verbatim.
    pub arguments: String,
}

/// A tool schema offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Model identifier; providers that are bound to one model may ignore it.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta.
    TextDelta(String),
    /// A tool-call fragment.  The provider interleaves fragments for
    /// parallel calls by `index`; `id` and `name` arrive once (empty on
    /// later fragments) while `arguments` accumulates across fragments and
    /// may split inside JSON escapes — callers must buffer, never parse
    /// eagerly.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics for this response.
    Usage(Usage),
    /// The stream finished normally.
    Done,
    /// A recoverable in-stream error.
    Error(String),
}

/// Token usage from one LLM response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Tokens served from the provider's prompt cache.
    pub cache_read_input_tokens: u32,
    /// Tokens written into the provider's prompt cache.
    pub cache_creation_input_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_tool_result_carries_call_id() {
        let m = Message::tool_result("call-1", "output");
        match &m.content {
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "call-1");
                assert_eq!(content.as_text(), "output");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn user_with_single_text_part_collapses() {
        let m = Message::user_with_parts(vec![ContentPart::text("only")]);
        assert_eq!(m.as_text(), Some("only"));
    }

    #[test]
    fn user_with_image_part_stays_multipart() {
        let m = Message::user_with_parts(vec![
            ContentPart::text("look"),
            ContentPart::image_base64("image/png", "QUJD"),
        ]);
        assert!(m.as_text().is_none());
        match &m.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::image("data:image/png;base64,QUJD")
                );
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn approx_tokens_divides_by_four_with_floor_of_one() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
        assert_eq!(Message::user("hi").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_tool_call_uses_name_plus_args() {
        let m = Message {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: "id".into(),
                function: FunctionCall {
                    name: "aaaa".into(),
                    arguments: "bbbbbbbb".into(),
                },
            },
        };
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn message_round_trips_through_json() {
        let original = Message::user("payload");
        let json = serde_json::to_string(&original).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.as_text(), Some("payload"));
    }

    #[test]
    fn usage_defaults_to_zero() {
        let u = Usage::default();
        assert_eq!(u.input_tokens, 0);
        assert_eq!(u.cache_read_input_tokens, 0);
    }
}
