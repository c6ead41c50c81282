// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! External hook pipeline.
//!
//! Hooks are host-configured shell commands run at fixed lifecycle points
//! (`UserPromptSubmit`, `PreToolUse`, `PostToolUse`, `Stop`).  Each receives
//! a JSON document on stdin describing the event and answers through either
//! a JSON object on stdout or its exit code: `0` success, `2` blocking
//! error, anything else a non-blocking warning.  Hooks at the same point run
//! sequentially in configuration order; the first block stops the chain.

pub mod output;
pub mod runner;

pub use output::{extract_json_object, HookJson, HookSpecificOutput, PermissionDirective};
pub use runner::{HookBlock, HookInput, HookRunResult, HookRunner};
