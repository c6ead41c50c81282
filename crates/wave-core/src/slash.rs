// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Slash-command parsing and the built-in command table.
//!
//! Built-ins short-circuit inside the agent and never reach the model;
//! custom commands expand into a prompt via `wave-runtime`.

/// A command the host can offer in its completion UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommandInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
}

/// Built-in commands dispatched internally.
pub const BUILTINS: &[(&str, &str)] = &[
    ("compact", "Summarize older turns to free context"),
    ("rewind", "Truncate history to a user message: /rewind <index>"),
];

/// Split `"/name rest of args"` into `(name, args)`.
///
/// Returns `None` for non-commands; a lone `/` or a name with no letters is
/// treated as plain text, not a command.
pub fn parse(text: &str) -> Option<(String, String)> {
    let rest = text.trim().strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':'))
    {
        return None;
    }
    Some((name.to_string(), args.to_string()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parse("hello world").is_none());
        assert!(parse("  leading spaces").is_none());
    }

    #[test]
    fn bare_command_has_empty_args() {
        assert_eq!(parse("/compact"), Some(("compact".into(), String::new())));
    }

    #[test]
    fn args_are_split_and_trimmed() {
        assert_eq!(
            parse("/rewind  2 "),
            Some(("rewind".into(), "2".into()))
        );
    }

    #[test]
    fn plugin_namespaced_names_parse() {
        assert_eq!(
            parse("/myplug:deploy prod"),
            Some(("myplug:deploy".into(), "prod".into()))
        );
    }

    #[test]
    fn lone_slash_and_paths_are_plain_text() {
        assert!(parse("/").is_none());
        assert!(parse("/usr/bin/env").is_none(), "path-like input is not a command");
    }
}
