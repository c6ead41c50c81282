// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::block::{
    Block, BlockId, BlockPayload, CompressBlock, CustomCommandBlock, DiffBlock, ImageAttachment,
    MemoryBlock, Message, MessageId, MessageRole, SubAgentStatus, ToolBlock, ToolStage,
};

/// Errors from transcript operations.  Every variant is a programmer error —
/// the engine treats them as fatal and lets the process crash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("unknown message id {0}")]
    UnknownMessage(MessageId),
    #[error("unknown block id {block} in message {message}")]
    UnknownBlock { message: MessageId, block: BlockId },
    #[error("invalid block state: {0}")]
    InvalidBlockState(String),
}

/// One entry of the per-turn usage ledger.  Not part of the transcript; the
/// host observes it through the usage callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_input_tokens: u32,
    pub cache_creation_input_tokens: u32,
}

/// Incremental notifications queued by store mutations.
///
/// The store owner drains these after each operation and feeds them to the
/// event dispatcher, which guarantees incremental callbacks fire before the
/// aggregate one and that no host callback runs while the store is borrowed.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    UserMessageAdded { message: Message },
    AssistantMessageAdded { message_id: MessageId },
    BlockAdded { message_id: MessageId, block: Block },
    BlockUpdated { message_id: MessageId, block: Block },
    TextAppended {
        message_id: MessageId,
        block_id: BlockId,
        delta: String,
    },
    Truncated,
    UsageAdded { entry: UsageEntry },
}

/// Append-only delta applied to an open block.
#[derive(Debug, Clone)]
pub enum BlockDelta {
    /// Grow a tail text block.
    AppendText(String),
    /// Grow a pending tool block's raw parameter buffer.
    AppendParameters(String),
    /// Advance a tool block from `Pending` to `Running`, recording the
    /// parsed arguments the executor observed.
    StartTool { parsed_args: serde_json::Value },
    /// Replace the mirrored messages of a sub-agent container.
    SetSubAgentMessages(Vec<Message>),
    /// Update a sub-agent container's status.
    SetSubAgentStatus(SubAgentStatus),
}

/// Terminal fields for closing a tool block.
#[derive(Debug, Clone, Default)]
pub struct ToolTerminal {
    pub success: bool,
    pub result: String,
    pub short_result: Option<String>,
    pub error: Option<String>,
    pub images: Vec<ImageAttachment>,
}

/// Owner of the ordered message list and the only component that mutates it.
#[derive(Debug)]
pub struct TranscriptStore {
    pub session_id: String,
    messages: Vec<Message>,
    usages: Vec<UsageEntry>,
    next_message_id: MessageId,
    next_block_id: BlockId,
    pending_events: Vec<TranscriptEvent>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            usages: Vec::new(),
            next_message_id: 1,
            next_block_id: 1,
            pending_events: Vec::new(),
        }
    }

    /// Seed the store with an existing message list (e.g. a host-restored
    /// session).  Ids continue monotonically after the seed.
    pub fn with_seed(messages: Vec<Message>) -> Self {
        let mut store = Self::new();
        store.next_message_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        store.next_block_id = messages
            .iter()
            .flat_map(|m| m.blocks.iter().map(|b| b.id))
            .max()
            .unwrap_or(0)
            + 1;
        store.messages = messages;
        store
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Immutable deep copy for hook payloads and host reads.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn usages(&self) -> &[UsageEntry] {
        &self.usages
    }

    pub fn last_message_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }

    /// Drain events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<TranscriptEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // ── Message creation ──────────────────────────────────────────────────────

    pub fn append_user_message(
        &mut self,
        text: &str,
        images: Vec<ImageAttachment>,
    ) -> MessageId {
        let id = self.alloc_message_id();
        let block = Block {
            id: self.alloc_block_id(),
            payload: BlockPayload::text(text),
        };
        let message = Message {
            id,
            role: MessageRole::User,
            blocks: vec![block],
            attachments: images,
        };
        self.pending_events.push(TranscriptEvent::UserMessageAdded {
            message: message.clone(),
        });
        self.messages.push(message);
        id
    }

    pub fn append_assistant_message(&mut self) -> MessageId {
        let id = self.alloc_message_id();
        self.messages.push(Message {
            id,
            role: MessageRole::Assistant,
            blocks: Vec::new(),
            attachments: Vec::new(),
        });
        self.pending_events
            .push(TranscriptEvent::AssistantMessageAdded { message_id: id });
        id
    }

    /// Remove the most recent message if it matches `id`.
    ///
    /// Used to roll back a user submission a `UserPromptSubmit` hook
    /// rejected; the rolled-back message never reaches the aggregate
    /// callback because its events are dropped with it.
    pub fn rollback_message(&mut self, id: MessageId) -> Result<(), TranscriptError> {
        match self.messages.last() {
            Some(m) if m.id == id => {
                self.messages.pop();
                self.pending_events
                    .retain(|ev| !event_touches_message(ev, id));
                Ok(())
            }
            _ => Err(TranscriptError::UnknownMessage(id)),
        }
    }

    // ── Block mutation ────────────────────────────────────────────────────────

    /// Open a block at the tail of `message_id`.
    ///
    /// Tool blocks must open in `Pending` and their call id must be unique
    /// across the session; text blocks open unfrozen.
    pub fn open_block(
        &mut self,
        message_id: MessageId,
        payload: BlockPayload,
    ) -> Result<BlockId, TranscriptError> {
        if let BlockPayload::Tool(t) = &payload {
            if t.stage != ToolStage::Pending {
                return Err(TranscriptError::InvalidBlockState(format!(
                    "tool block {} must open in pending stage",
                    t.call_id
                )));
            }
            let duplicate = self.messages.iter().any(|m| {
                m.blocks.iter().any(|b| {
                    matches!(&b.payload, BlockPayload::Tool(existing) if existing.call_id == t.call_id)
                })
            });
            if duplicate {
                return Err(TranscriptError::InvalidBlockState(format!(
                    "duplicate tool call id {}",
                    t.call_id
                )));
            }
        }
        if let BlockPayload::Text { frozen: true, .. } = &payload {
            return Err(TranscriptError::InvalidBlockState(
                "text block cannot open frozen".into(),
            ));
        }

        let block_id = self.alloc_block_id();
        let block = Block {
            id: block_id,
            payload,
        };
        let message = self.message_mut(message_id)?;
        message.blocks.push(block.clone());
        self.pending_events
            .push(TranscriptEvent::BlockAdded { message_id, block });
        Ok(block_id)
    }

    /// Apply an incremental delta to an open block.
    pub fn update_block(
        &mut self,
        message_id: MessageId,
        block_id: BlockId,
        delta: BlockDelta,
    ) -> Result<(), TranscriptError> {
        let block = self.block_mut(message_id, block_id)?;
        match (&mut block.payload, delta) {
            (BlockPayload::Text { content, frozen }, BlockDelta::AppendText(d)) => {
                if *frozen {
                    return Err(TranscriptError::InvalidBlockState(
                        "append to frozen text block".into(),
                    ));
                }
                content.push_str(&d);
                let event = TranscriptEvent::TextAppended {
                    message_id,
                    block_id,
                    delta: d,
                };
                self.pending_events.push(event);
                return Ok(());
            }
            (BlockPayload::Tool(t), BlockDelta::AppendParameters(d)) => {
                if t.stage != ToolStage::Pending {
                    return Err(TranscriptError::InvalidBlockState(format!(
                        "parameters of {} grew after streaming ended",
                        t.call_id
                    )));
                }
                t.parameters.push_str(&d);
            }
            (BlockPayload::Tool(t), BlockDelta::StartTool { parsed_args }) => {
                if t.stage != ToolStage::Pending {
                    return Err(TranscriptError::InvalidBlockState(format!(
                        "tool {} started twice",
                        t.call_id
                    )));
                }
                t.parsed_args = Some(parsed_args);
                t.stage = ToolStage::Running;
            }
            (BlockPayload::SubAgent(s), BlockDelta::SetSubAgentMessages(msgs)) => {
                s.messages = msgs;
            }
            (BlockPayload::SubAgent(s), BlockDelta::SetSubAgentStatus(status)) => {
                s.status = status;
            }
            (payload, delta) => {
                return Err(TranscriptError::InvalidBlockState(format!(
                    "delta {:?} does not apply to {} block",
                    delta,
                    payload.kind()
                )));
            }
        }
        let block = self.block_mut(message_id, block_id)?.clone();
        self.pending_events
            .push(TranscriptEvent::BlockUpdated { message_id, block });
        Ok(())
    }

    /// Close a tool block: set terminal fields and `stage = End`.
    pub fn close_tool_block(
        &mut self,
        message_id: MessageId,
        block_id: BlockId,
        terminal: ToolTerminal,
    ) -> Result<(), TranscriptError> {
        let block = self.block_mut(message_id, block_id)?;
        match &mut block.payload {
            BlockPayload::Tool(t) => {
                if t.stage == ToolStage::End {
                    return Err(TranscriptError::InvalidBlockState(format!(
                        "tool {} closed twice",
                        t.call_id
                    )));
                }
                t.stage = ToolStage::End;
                t.success = Some(terminal.success);
                t.result = terminal.result;
                t.short_result = terminal.short_result;
                t.error = terminal.error;
                t.images = terminal.images;
            }
            other => {
                return Err(TranscriptError::InvalidBlockState(format!(
                    "close_tool_block on {} block",
                    other.kind()
                )));
            }
        }
        let block = self.block_mut(message_id, block_id)?.clone();
        self.pending_events
            .push(TranscriptEvent::BlockUpdated { message_id, block });
        Ok(())
    }

    /// Freeze a text block; its content is immutable afterwards.
    pub fn freeze_text_block(
        &mut self,
        message_id: MessageId,
        block_id: BlockId,
    ) -> Result<(), TranscriptError> {
        let block = self.block_mut(message_id, block_id)?;
        match &mut block.payload {
            BlockPayload::Text { frozen, .. } => *frozen = true,
            other => {
                return Err(TranscriptError::InvalidBlockState(format!(
                    "freeze_text_block on {} block",
                    other.kind()
                )));
            }
        }
        let block = self.block_mut(message_id, block_id)?.clone();
        self.pending_events
            .push(TranscriptEvent::BlockUpdated { message_id, block });
        Ok(())
    }

    // ── Convenience block constructors ────────────────────────────────────────

    pub fn add_error_block(
        &mut self,
        message_id: MessageId,
        message: impl Into<String>,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(
            message_id,
            BlockPayload::Error {
                message: message.into(),
            },
        )
    }

    pub fn add_diff_block(
        &mut self,
        message_id: MessageId,
        diff: DiffBlock,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(message_id, BlockPayload::Diff(diff))
    }

    pub fn add_memory_block(
        &mut self,
        message_id: MessageId,
        memory: MemoryBlock,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(message_id, BlockPayload::Memory(memory))
    }

    pub fn add_compress_block(
        &mut self,
        message_id: MessageId,
        compress: CompressBlock,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(message_id, BlockPayload::Compress(compress))
    }

    pub fn add_custom_command_block(
        &mut self,
        message_id: MessageId,
        command: CustomCommandBlock,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(message_id, BlockPayload::CustomCommand(command))
    }

    pub fn add_subagent_block(
        &mut self,
        message_id: MessageId,
        subagent_id: impl Into<String>,
        subagent_name: impl Into<String>,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(
            message_id,
            BlockPayload::SubAgent(crate::block::SubAgentBlock {
                subagent_id: subagent_id.into(),
                subagent_name: subagent_name.into(),
                status: SubAgentStatus::Running,
                messages: Vec::new(),
            }),
        )
    }

    pub fn add_tool_block(
        &mut self,
        message_id: MessageId,
        call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<BlockId, TranscriptError> {
        self.open_block(
            message_id,
            BlockPayload::Tool(ToolBlock::new(call_id, name)),
        )
    }

    // ── Truncation ────────────────────────────────────────────────────────────

    /// Delete every message strictly after the `index`-th user message
    /// (0-based).  Returns the id of the kept user message.
    pub fn truncate(&mut self, user_message_index: usize) -> Result<MessageId, TranscriptError> {
        let position = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == MessageRole::User)
            .nth(user_message_index)
            .map(|(i, m)| (i, m.id));
        match position {
            Some((i, id)) => {
                self.messages.truncate(i + 1);
                self.pending_events.push(TranscriptEvent::Truncated);
                Ok(id)
            }
            None => Err(TranscriptError::UnknownMessage(user_message_index as u64)),
        }
    }

    // ── Usage ledger ──────────────────────────────────────────────────────────

    pub fn add_usage(&mut self, entry: UsageEntry) {
        self.pending_events.push(TranscriptEvent::UsageAdded {
            entry: entry.clone(),
        });
        self.usages.push(entry);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn alloc_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    fn alloc_block_id(&mut self) -> BlockId {
        let id = self.next_block_id;
        self.next_block_id += 1;
        id
    }

    fn message_mut(&mut self, id: MessageId) -> Result<&mut Message, TranscriptError> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(TranscriptError::UnknownMessage(id))
    }

    fn block_mut(
        &mut self,
        message_id: MessageId,
        block_id: BlockId,
    ) -> Result<&mut Block, TranscriptError> {
        let message = self.message_mut(message_id)?;
        message
            .blocks
            .iter_mut()
            .find(|b| b.id == block_id)
            .ok_or(TranscriptError::UnknownBlock {
                message: message_id,
                block: block_id,
            })
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

fn event_touches_message(ev: &TranscriptEvent, id: MessageId) -> bool {
    match ev {
        TranscriptEvent::UserMessageAdded { message } => message.id == id,
        TranscriptEvent::AssistantMessageAdded { message_id }
        | TranscriptEvent::BlockAdded { message_id, .. }
        | TranscriptEvent::BlockUpdated { message_id, .. }
        | TranscriptEvent::TextAppended { message_id, .. } => *message_id == id,
        TranscriptEvent::Truncated | TranscriptEvent::UsageAdded { .. } => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
