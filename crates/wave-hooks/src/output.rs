// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Hook stdout interpretation.
//!
//! Hooks often print human-readable noise around their JSON answer, so the
//! parser scans for the first *balanced* JSON object (string- and
//! escape-aware) instead of requiring the whole stream to be JSON.  A
//! balanced-but-invalid object degrades to a warning, never a crash.

use serde::Deserialize;

/// Permission directive a `PreToolUse` hook may issue, short-circuiting the
/// permission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDirective {
    Allow,
    Deny,
    Ask,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub permission_decision: Option<PermissionDirective>,
    #[serde(default)]
    pub permission_decision_reason: Option<String>,
    /// Replacement tool arguments.
    #[serde(default)]
    pub updated_input: Option<serde_json::Value>,
    /// Context injected into the next LLM request only.
    #[serde(default)]
    pub additional_context: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Structured hook answer.  When present, its directives override the exit
/// code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookJson {
    #[serde(default, rename = "continue")]
    pub continue_: Option<bool>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookJson {
    /// A parsed object only counts as a directive when it carries at least
    /// one recognized key; arbitrary JSON a hook happens to print falls back
    /// to exit-code semantics.
    pub fn is_meaningful(&self) -> bool {
        self.continue_.is_some()
            || self.stop_reason.is_some()
            || self.system_message.is_some()
            || self.hook_specific_output.is_some()
    }
}

/// Outcome of scanning stdout for a JSON directive.
#[derive(Debug)]
pub enum JsonScan {
    /// A balanced object parsed into recognized directives.
    Directives(HookJson),
    /// No JSON object in the output.
    None,
    /// A balanced or partial object that did not parse; carries the detail
    /// for a non-blocking warning.
    Invalid(String),
}

/// Scan `stdout` for the first balanced JSON object and parse it.
pub fn extract_json_object(stdout: &str) -> JsonScan {
    let Some(start) = stdout.find('{') else {
        return JsonScan::None;
    };
    let Some(candidate) = balanced_object(&stdout[start..]) else {
        return JsonScan::Invalid("unterminated JSON object in hook output".into());
    };
    match serde_json::from_str::<HookJson>(candidate) {
        Ok(parsed) if parsed.is_meaningful() => JsonScan::Directives(parsed),
        Ok(_) => JsonScan::None,
        Err(e) => JsonScan::Invalid(format!("invalid JSON in hook output: {e}")),
    }
}

/// Return the slice of `s` spanning the first balanced `{...}` object,
/// respecting string literals and escapes.  `s` must start at a `{`.
fn balanced_object(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else {
                match c {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
