// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration for the wave agent runtime.
//!
//! Three layers feed the final [`AgentConfig`]:
//!
//! 1. The host-supplied config object passed to `Agent::create`.
//! 2. Project settings files: `.wave/settings.json`, overlaid by
//!    `.wave/settings.local.json` (the local file wins on conflicts).
//! 3. Environment fallbacks for credentials and model selection
//!    (`AIGW_TOKEN`, `AIGW_URL`, `AIGW_MODEL`, `AIGW_FAST_MODEL`,
//!    `TOKEN_LIMIT`).
//!
//! Validation happens once, in [`AgentConfig::resolve`]; a missing credential
//! after all fallbacks is a [`ConfigError`] naming both the config key and
//! the environment variable.

pub mod schema;
pub mod settings;

pub use schema::{
    AgentConfig, HookCommand, HookEvent, HookMatcher, HooksConfig, McpServerSpec, PermissionMode,
    PluginSpec,
};
pub use settings::{load_settings, merge_json, Settings};

use thiserror::Error;

/// Errors thrown synchronously from `Agent::create`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential was absent from both the config object and the
    /// environment.
    #[error("missing credential: set config `{key}` or environment variable `{env}`")]
    MissingCredential {
        key: &'static str,
        env: &'static str,
    },
    /// A config field held a value that cannot be used.
    #[error("invalid config field `{key}`: {reason}")]
    InvalidField { key: &'static str, reason: String },
    /// A settings file existed but could not be read or parsed.
    #[error("settings file {path}: {reason}")]
    Settings { path: String, reason: String },
}
