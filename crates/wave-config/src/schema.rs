// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

fn default_token_limit() -> usize {
    200_000
}
fn default_hook_timeout_secs() -> u64 {
    60
}
fn default_bash_timeout_secs() -> u64 {
    120
}

/// Permission posture for the current session.
///
/// Serialized in camelCase because the on-disk settings files and the host
/// API use the JavaScript-style names (`"acceptEdits"`, `"bypassPermissions"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle points at which external hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Stop,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::Stop => "Stop",
        }
    }
}

/// One external command to run at a lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommand {
    /// Shell command line, executed with the project directory as cwd.
    pub command: String,
    /// Wall-clock budget for the hook process.  On expiry the hook is
    /// reported as a non-blocking warning and the chain continues.
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
}

/// A set of hook commands gated by a tool-name matcher.
///
/// The matcher is a shell-style glob (`*` and `?`); an empty or absent
/// matcher matches every tool.  For `UserPromptSubmit` and `Stop` the
/// matcher is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookMatcher {
    #[serde(default)]
    pub matcher: String,
    pub hooks: Vec<HookCommand>,
}

/// Hook configuration: lifecycle event → ordered matcher groups.
///
/// Accepted from the inline config, `.wave/settings.json#hooks`, and
/// `.wave/hooks.json` — all three share this schema and are merged in that
/// order (later sources append).
pub type HooksConfig = HashMap<HookEvent, Vec<HookMatcher>>;

/// Specification of one MCP server, from inline config or `.mcp.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A plugin root directory contributing commands, agents, skills, and hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginSpec {
    Local { path: PathBuf },
}

/// The recognized host configuration for one `Agent` instance.
///
/// Every field has a sensible default except the credential pair, which must
/// come from either the config object or the environment (see
/// [`AgentConfig::resolve`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Gateway API key.  Falls back to `AIGW_TOKEN`.
    pub api_key: Option<String>,
    /// Gateway base URL.  Falls back to `AIGW_URL`.
    pub base_url: Option<String>,
    /// Primary model for agent turns.  Falls back to `AIGW_MODEL`.
    pub agent_model: Option<String>,
    /// Cheaper model for utility calls (compaction summaries).  Falls back
    /// to `AIGW_FAST_MODEL`, then to `agent_model`.
    pub fast_model: Option<String>,
    /// Context-token budget that triggers compaction.  Falls back to
    /// `TOKEN_LIMIT`.
    pub token_limit: usize,
    /// Project directory; tool calls and hooks run relative to it.
    pub workdir: PathBuf,
    /// Override for the base system prompt.
    pub system_prompt: Option<String>,
    /// Initial permission posture.
    pub permission_mode: PermissionMode,
    /// Inline hook configuration, merged before the on-disk sources.
    pub hooks: HooksConfig,
    /// Inline MCP server specs, merged with `.mcp.json`.
    pub mcp_servers: HashMap<String, McpServerSpec>,
    /// Plugin roots.
    pub plugins: Vec<PluginSpec>,
    /// Where hook payloads claim the durable transcript lives.  Opaque to
    /// the engine; defaults to `.wave/sessions/<session_id>.json` under the
    /// workdir when absent.
    pub transcript_path: Option<PathBuf>,
    /// Foreground Bash timeout.  Background commands have none.
    pub bash_timeout_secs: u64,
    /// Maximum sub-agent nesting depth for the `Task` tool.
    pub max_subagent_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            agent_model: None,
            fast_model: None,
            token_limit: default_token_limit(),
            workdir: PathBuf::from("."),
            system_prompt: None,
            permission_mode: PermissionMode::Default,
            hooks: HooksConfig::default(),
            mcp_servers: HashMap::new(),
            plugins: Vec::new(),
            transcript_path: None,
            bash_timeout_secs: default_bash_timeout_secs(),
            max_subagent_depth: 3,
        }
    }
}

impl AgentConfig {
    /// Apply environment fallbacks and validate.
    ///
    /// Called once by `Agent::create`.  Order per field: explicit config
    /// value, then environment variable, then (where one exists) a static
    /// default.  A credential missing from both sources is a
    /// [`ConfigError::MissingCredential`] naming the key and the variable.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        if self.api_key.is_none() {
            self.api_key = std::env::var("AIGW_TOKEN").ok().filter(|s| !s.is_empty());
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("AIGW_URL").ok().filter(|s| !s.is_empty());
        }
        if self.agent_model.is_none() {
            self.agent_model = std::env::var("AIGW_MODEL").ok().filter(|s| !s.is_empty());
        }
        if self.fast_model.is_none() {
            self.fast_model = std::env::var("AIGW_FAST_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .or_else(|| self.agent_model.clone());
        }
        if let Ok(raw) = std::env::var("TOKEN_LIMIT") {
            if !raw.is_empty() {
                self.token_limit = raw.parse().map_err(|_| ConfigError::InvalidField {
                    key: "token_limit",
                    reason: format!("TOKEN_LIMIT is not a number: {raw:?}"),
                })?;
            }
        }

        if self.api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                key: "api_key",
                env: "AIGW_TOKEN",
            });
        }
        if self.base_url.is_none() {
            return Err(ConfigError::MissingCredential {
                key: "base_url",
                env: "AIGW_URL",
            });
        }
        if self.agent_model.is_none() {
            return Err(ConfigError::MissingCredential {
                key: "agent_model",
                env: "AIGW_MODEL",
            });
        }

        // Expand `~` in the workdir so tools and hooks receive an absolute
        // base they can pass straight to the OS.
        if let Some(s) = self.workdir.to_str() {
            let expanded = shellexpand::tilde(s);
            self.workdir = PathBuf::from(expanded.as_ref());
        }

        Ok(self)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> AgentConfig {
        AgentConfig {
            api_key: Some("k".into()),
            base_url: Some("http://gw".into()),
            agent_model: Some("big".into()),
            ..AgentConfig::default()
        }
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    #[test]
    fn resolve_accepts_explicit_credentials() {
        let cfg = full_config().resolve().unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.base_url.as_deref(), Some("http://gw"));
    }

    #[test]
    fn resolve_fast_model_falls_back_to_agent_model() {
        let cfg = full_config().resolve().unwrap();
        assert_eq!(cfg.fast_model.as_deref(), Some("big"));
    }

    #[test]
    fn resolve_missing_api_key_names_key_and_env() {
        // Only meaningful when the environment does not provide the token.
        if std::env::var("AIGW_TOKEN").is_ok() {
            return;
        }
        let cfg = AgentConfig {
            base_url: Some("http://gw".into()),
            agent_model: Some("m".into()),
            ..AgentConfig::default()
        };
        let err = cfg.resolve().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("api_key"), "{msg}");
        assert!(msg.contains("AIGW_TOKEN"), "{msg}");
    }

    #[test]
    fn resolve_missing_model_names_key_and_env() {
        if std::env::var("AIGW_MODEL").is_ok() {
            return;
        }
        let cfg = AgentConfig {
            api_key: Some("k".into()),
            base_url: Some("http://gw".into()),
            ..AgentConfig::default()
        };
        let err = cfg.resolve().unwrap_err();
        assert!(err.to_string().contains("AIGW_MODEL"));
    }

    // ── Serde surface ─────────────────────────────────────────────────────────

    #[test]
    fn permission_mode_serializes_camel_case() {
        let json = serde_json::to_string(&PermissionMode::AcceptEdits).unwrap();
        assert_eq!(json, "\"acceptEdits\"");
        let back: PermissionMode = serde_json::from_str("\"bypassPermissions\"").unwrap();
        assert_eq!(back, PermissionMode::BypassPermissions);
    }

    #[test]
    fn hook_command_default_timeout_is_60s() {
        let hc: HookCommand = serde_json::from_str(r#"{"command":"echo hi"}"#).unwrap();
        assert_eq!(hc.timeout_secs, 60);
    }

    #[test]
    fn hook_matcher_defaults_to_match_all() {
        let hm: HookMatcher =
            serde_json::from_str(r#"{"hooks":[{"command":"true"}]}"#).unwrap();
        assert!(hm.matcher.is_empty());
    }

    #[test]
    fn mcp_server_spec_round_trips() {
        let spec = McpServerSpec {
            command: "node".into(),
            args: vec!["server.js".into()],
            env: HashMap::new(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: McpServerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn plugin_spec_local_parses_from_tagged_json() {
        let p: PluginSpec =
            serde_json::from_str(r#"{"type":"local","path":"/opt/plug"}"#).unwrap();
        match p {
            PluginSpec::Local { path } => assert_eq!(path, PathBuf::from("/opt/plug")),
        }
    }

    #[test]
    fn agent_config_default_bash_timeout_is_120s() {
        assert_eq!(AgentConfig::default().bash_timeout_secs, 120);
    }
}
