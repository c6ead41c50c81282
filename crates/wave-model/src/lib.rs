// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM interface consumed by the turn engine.
//!
//! The concrete wire protocol is an external concern; this crate defines the
//! streaming surface the engine drives ([`ModelProvider`], [`StreamEvent`])
//! plus two implementations: a deterministic scripted mock for tests and a
//! single OpenAI-compatible HTTP driver for the `AIGW_URL` gateway.

pub mod gateway;
pub mod mock;
pub mod provider;
pub mod types;

pub use gateway::GatewayProvider;
pub use mock::ScriptedProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, Role, StreamEvent,
    ToolResultContent, ToolSchema, Usage,
};
