// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::de::DeserializeOwned;
use tracing::warn;

/// Split optional YAML frontmatter from a markdown file.
///
/// Frontmatter is delimited by `---` fences starting at the first line.
/// Returns `(parsed, body)`; a file without frontmatter yields
/// `(None, whole_input)`, and unparsable YAML is logged and treated the
/// same so a typo never hides a whole file.
pub fn split_frontmatter<T: DeserializeOwned>(raw: &str, origin: &str) -> (Option<T>, String) {
    let rest = raw.trim_start_matches('\n');
    let Some(after_open) = rest.strip_prefix("---") else {
        return (None, rest.to_string());
    };
    let Some(close) = after_open.find("\n---") else {
        return (None, rest.to_string());
    };
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    match serde_yaml::from_str::<T>(yaml_block) {
        Ok(fm) => (Some(fm), body),
        Err(e) => {
            warn!(origin, error = %e, "failed to parse frontmatter; treating file as plain body");
            (None, rest.to_string())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
