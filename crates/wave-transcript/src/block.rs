// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

pub type MessageId = u64;
pub type BlockId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageRole {
    User,
    Assistant,
    SubAgent,
}

/// Lifecycle of a tool block.  Transitions are `Pending → Running → End`;
/// `Running` may be skipped when the call never executes (permission deny,
/// argument parse failure), and nothing ever moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStage {
    Pending,
    Running,
    End,
}

/// An image attachment, stored as base64 with its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub media_type: String,
    pub data: String,
}

/// One requested tool invocation.
///
/// `parameters` accumulates as a raw string during streaming — LLM streams
/// may split inside JSON escapes, so the JSON is parsed exactly once when the
/// block leaves the `Pending` stage.  A parse failure closes the block as a
/// failed call, never as a transcript error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBlock {
    /// Provider-supplied call id, unique within the session.
    pub call_id: String,
    pub name: String,
    /// Raw streamed argument text.
    pub parameters: String,
    /// Parsed argument object, set once on successful parse.
    pub parsed_args: Option<serde_json::Value>,
    pub stage: ToolStage,
    /// Only meaningful when `stage == End`.
    pub success: Option<bool>,
    pub result: String,
    /// ≤ 1-line summary for compact UIs.
    pub short_result: Option<String>,
    pub error: Option<String>,
    pub images: Vec<ImageAttachment>,
}

impl ToolBlock {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            parameters: String::new(),
            parsed_args: None,
            stage: ToolStage::Pending,
            success: None,
            result: String::new(),
            short_result: None,
            error: None,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
}

/// Structured line-level diff emitted by file-editing tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBlock {
    pub file_path: String,
    pub lines: Vec<DiffLine>,
}

/// Marker that earlier turns were summarized away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressBlock {
    pub summary: String,
    /// Index of the first message the summary replaces.
    pub insert_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Project,
    User,
}

/// Record of a persisted rule write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub path: String,
    pub scope: MemoryScope,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
    Backgrounded,
}

/// Container block holding the mirrored transcript of a sub-agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentBlock {
    pub subagent_id: String,
    pub subagent_name: String,
    pub status: SubAgentStatus,
    pub messages: Vec<Message>,
}

/// A user-typed slash-command expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCommandBlock {
    pub command_name: String,
    pub prompt: String,
}

/// The tagged union of everything a message can contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    Text {
        content: String,
        /// Set when the owning turn terminates; frozen text never grows.
        frozen: bool,
    },
    Tool(ToolBlock),
    Diff(DiffBlock),
    Error {
        message: String,
    },
    Compress(CompressBlock),
    Memory(MemoryBlock),
    SubAgent(SubAgentBlock),
    CustomCommand(CustomCommandBlock),
}

impl BlockPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            frozen: false,
        }
    }

    /// Short discriminant name for events and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Tool(_) => "tool",
            Self::Diff(_) => "diff",
            Self::Error { .. } => "error",
            Self::Compress(_) => "compress",
            Self::Memory(_) => "memory",
            Self::SubAgent(_) => "subagent",
            Self::CustomCommand(_) => "custom_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub payload: BlockPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub blocks: Vec<Block>,
    /// Image attachments on a user submission (base64 + mime).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ImageAttachment>,
}

impl Message {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for b in &self.blocks {
            if let BlockPayload::Text { content, .. } = &b.payload {
                out.push_str(content);
            }
        }
        out
    }

    /// Find a block by id.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_block_starts_pending_with_empty_parameters() {
        let t = ToolBlock::new("c1", "Bash");
        assert_eq!(t.stage, ToolStage::Pending);
        assert!(t.parameters.is_empty());
        assert!(t.parsed_args.is_none());
        assert!(t.success.is_none());
    }

    #[test]
    fn payload_kind_names_match_wire_names() {
        assert_eq!(BlockPayload::text("x").kind(), "text");
        assert_eq!(BlockPayload::Tool(ToolBlock::new("c", "n")).kind(), "tool");
        assert_eq!(
            BlockPayload::CustomCommand(CustomCommandBlock {
                command_name: "deploy".into(),
                prompt: "p".into(),
            })
            .kind(),
            "custom_command"
        );
    }

    #[test]
    fn message_text_concatenates_text_blocks_only() {
        let m = Message {
            id: 1,
            role: MessageRole::Assistant,
            blocks: vec![
                Block {
                    id: 1,
                    payload: BlockPayload::text("a"),
                },
                Block {
                    id: 2,
                    payload: BlockPayload::Tool(ToolBlock::new("c", "Read")),
                },
                Block {
                    id: 3,
                    payload: BlockPayload::text("b"),
                },
            ],
            attachments: vec![],
        };
        assert_eq!(m.text(), "ab");
    }

    #[test]
    fn block_payload_round_trips_through_json() {
        let payload = BlockPayload::Compress(CompressBlock {
            summary: "earlier turns".into(),
            insert_index: 2,
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"compress\""));
        let back: BlockPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
