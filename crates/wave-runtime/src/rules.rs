// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Memory rules.
//!
//! Rules are markdown files under `.wave/rules/` whose bodies join the
//! system prompt.  Optional frontmatter `paths:` globs restrict a rule to
//! turns that touch matching files; a rule without `paths` is always
//! active.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::frontmatter::split_frontmatter;

#[derive(Debug, Clone)]
pub struct Rule {
    pub path: PathBuf,
    /// Activation globs relative to the project root; empty = always on.
    pub paths: Vec<String>,
    pub body: String,
}

impl Rule {
    /// Whether this rule activates for a file touched this turn.
    pub fn applies_to(&self, file: &str) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|g| path_glob_match(g, file))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleFrontmatter {
    paths: Vec<String>,
}

/// Discover rules under `.wave/rules/`, sorted by file path.
pub fn discover_rules(project_dir: &Path) -> Vec<Rule> {
    let dir = project_dir.join(".wave").join("rules");
    let mut rules = Vec::new();
    if !dir.is_dir() {
        return rules;
    }
    for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read rule");
                continue;
            }
        };
        if raw.trim().is_empty() {
            continue;
        }
        let origin = path.display().to_string();
        let (fm, body) = split_frontmatter::<RuleFrontmatter>(&raw, &origin);
        rules.push(Rule {
            path: path.to_path_buf(),
            paths: fm.unwrap_or_default().paths,
            body,
        });
    }
    rules.sort_by(|a, b| a.path.cmp(&b.path));
    rules
}

/// Path-aware glob match: `**` crosses directory separators, `*` and `?`
/// do not.
pub fn path_glob_match(pattern: &str, path: &str) -> bool {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Collapse `**/` so `src/**/x` also matches `src/x`.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
        .map(|r| r.is_match(path))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_rule(dir: &Path, name: &str, content: &str) {
        let rules = dir.join(".wave").join("rules");
        fs::create_dir_all(&rules).unwrap();
        fs::write(rules.join(name), content).unwrap();
    }

    #[test]
    fn rule_without_paths_always_applies() {
        let tmp = TempDir::new().unwrap();
        write_rule(tmp.path(), "style.md", "Prefer explicit names.");
        let rules = discover_rules(tmp.path());
        assert_eq!(rules.len(), 1);
        assert!(rules[0].applies_to("anything/at/all.rs"));
    }

    #[test]
    fn paths_restrict_activation() {
        let tmp = TempDir::new().unwrap();
        write_rule(
            tmp.path(),
            "frontend.md",
            "---\npaths:\n  - \"web/**/*.ts\"\n---\nUse strict mode.",
        );
        let rules = discover_rules(tmp.path());
        assert!(rules[0].applies_to("web/app/main.ts"));
        assert!(!rules[0].applies_to("src/lib.rs"));
    }

    #[test]
    fn glob_star_does_not_cross_directories() {
        assert!(path_glob_match("src/*.rs", "src/lib.rs"));
        assert!(!path_glob_match("src/*.rs", "src/nested/lib.rs"));
    }

    #[test]
    fn glob_double_star_crosses_directories() {
        assert!(path_glob_match("src/**/*.rs", "src/a/b/c.rs"));
        assert!(path_glob_match("src/**/*.rs", "src/top.rs"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        assert!(path_glob_match("a?.md", "ab.md"));
        assert!(!path_glob_match("a?.md", "abc.md"));
    }
}
