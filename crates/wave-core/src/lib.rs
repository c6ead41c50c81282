// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The wave agent runtime: a library that drives multi-turn conversations
//! between a human and one or more models, interleaving streamed text with
//! tool execution under a permission policy.
//!
//! Hosts create a long-lived [`Agent`], submit user messages with
//! [`Agent::send_message`], and observe typed callbacks
//! ([`AgentCallbacks`]).  The turn engine, transcript store, tool registry,
//! permission gate, hook pipeline, and task manager live in the sibling
//! `wave-*` crates; this crate wires them together.

pub mod agent;
pub mod compact;
pub mod dispatcher;
pub mod engine;
pub mod projection;
pub mod prompts;
pub mod slash;
pub mod subagent;

pub use agent::{Agent, AgentHandles};
pub use compact::Compacted;
pub use dispatcher::{AgentCallbacks, EventDispatcher};
pub use engine::{TurnInput, MAX_STOP_RESTARTS};
pub use slash::SlashCommandInfo;
pub use subagent::TaskTool;

// The surface hosts need, re-exported so one dependency suffices.
pub use wave_config::{AgentConfig, ConfigError, HookEvent, PermissionMode};
pub use wave_model::{ModelProvider, ScriptedProvider};
pub use wave_tools::{
    CanUseTool, PendingPermission, PermissionBehavior, PermissionDecision, ToolPermissionContext,
};
pub use wave_transcript::{
    Block, BlockPayload, ImageAttachment, Message, MessageRole, ToolStage, UsageEntry,
};
