// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Foreground and background task tracking.
//!
//! Two registries live here:
//!
//! - **Foreground tasks**: in-progress tool calls the user may background
//!   with an out-of-band signal.  Each registers a handler; backgrounding
//!   fires the most recent one and the tool is expected to adopt its child
//!   into the background registry and resolve shortly after.
//! - **Background tasks**: detached shell processes and sub-agent runs,
//!   addressable by a stable task id, queryable for buffered output until
//!   explicitly stopped or the owning `Agent` is dropped.

pub mod manager;
pub mod output;

pub use manager::{spawn_reader, TaskKind, TaskManager, TaskSnapshot, TaskStatus, WaitOutcome};
pub use output::{strip_ansi, OutputBuffer, TaskOutputReport, OUTPUT_CAP_CHARS};
