// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly.
//!
//! The prompt is composed per request: base instructions (or the host
//! override), fragments contributed by enabled tools, always-active memory
//! rules, and a mode-specific suffix.

use wave_config::PermissionMode;
use wave_runtime::Rule;

const BASE_PROMPT: &str = "\
You are an interactive coding agent. You help the user with software \
engineering tasks: analyzing code, fixing bugs, implementing features, \
running commands, and answering questions about the project.

Work through the provided tools; never fabricate file contents or command \
output. Keep answers concise and grounded in what the tools returned. When \
a task needs several steps, do them rather than describing them.";

const PLAN_SUFFIX: &str = "\
Plan mode is active. Investigate with read-only tools and write your \
proposal into the plan file; every other mutation is denied. Present the \
plan with ExitPlanMode when it is ready for review.";

/// Build the system prompt for one completion request.
pub fn system_prompt(
    mode: PermissionMode,
    custom_base: Option<&str>,
    tool_fragments: &[String],
    rules: &[Rule],
) -> String {
    let mut prompt = custom_base.unwrap_or(BASE_PROMPT).to_string();

    for fragment in tool_fragments {
        prompt.push_str("\n\n");
        prompt.push_str(fragment);
    }

    let active: Vec<&Rule> = rules.iter().filter(|r| r.paths.is_empty()).collect();
    if !active.is_empty() {
        prompt.push_str("\n\n# Project rules\n");
        for rule in active {
            prompt.push_str("\n");
            prompt.push_str(rule.body.trim());
            prompt.push('\n');
        }
    }

    if mode == PermissionMode::Plan {
        prompt.push_str("\n\n");
        prompt.push_str(PLAN_SUFFIX);
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rule(body: &str, paths: Vec<String>) -> Rule {
        Rule {
            path: PathBuf::from("/r.md"),
            paths,
            body: body.into(),
        }
    }

    #[test]
    fn base_prompt_is_used_without_override() {
        let p = system_prompt(PermissionMode::Default, None, &[], &[]);
        assert!(p.contains("interactive coding agent"));
    }

    #[test]
    fn custom_base_replaces_default() {
        let p = system_prompt(PermissionMode::Default, Some("You are a bot."), &[], &[]);
        assert!(p.starts_with("You are a bot."));
        assert!(!p.contains("interactive coding agent"));
    }

    #[test]
    fn tool_fragments_are_appended() {
        let p = system_prompt(
            PermissionMode::Default,
            None,
            &["Use Skill before skilled work.".to_string()],
            &[],
        );
        assert!(p.contains("Use Skill before skilled work."));
    }

    #[test]
    fn unrestricted_rules_join_the_prompt() {
        let rules = vec![
            rule("Always run the linter.", vec![]),
            rule("TS only.", vec!["web/**".into()]),
        ];
        let p = system_prompt(PermissionMode::Default, None, &[], &rules);
        assert!(p.contains("Always run the linter."));
        assert!(!p.contains("TS only."), "path-restricted rules stay out");
    }

    #[test]
    fn plan_mode_appends_suffix() {
        let p = system_prompt(PermissionMode::Plan, None, &[], &[]);
        assert!(p.contains("Plan mode is active"));
        let q = system_prompt(PermissionMode::Default, None, &[], &[]);
        assert!(!q.contains("Plan mode is active"));
    }
}
