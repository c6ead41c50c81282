// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reusable skill templates.
//!
//! A skill lives at `.wave/skills/<name>/SKILL.md` (project) or
//! `<plugin>/skills/<name>/SKILL.md`, with sibling resource files the skill
//! body may reference.  The `Skill` tool loads the body on demand; only the
//! name and description travel in the system prompt.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::frontmatter::split_frontmatter;
use crate::plugins::Plugin;

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Skill body (markdown instructions).
    pub body: String,
    /// The skill directory; sibling resources resolve against it.
    pub dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SkillFrontmatter {
    name: Option<String>,
    description: Option<String>,
}

/// Discover skills from the project and plugins, sorted by name.
pub fn discover_skills(project_dir: &Path, plugins: &[Plugin]) -> Vec<Skill> {
    let mut skills = scan_dir(&project_dir.join(".wave").join("skills"));
    for plugin in plugins {
        skills.extend(scan_dir(&plugin.root.join("skills")));
    }
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

fn scan_dir(dir: &Path) -> Vec<Skill> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.filter_map(Result::ok) {
        let skill_dir = entry.path();
        if !skill_dir.is_dir() {
            continue;
        }
        let skill_md = skill_dir.join("SKILL.md");
        if !skill_md.is_file() {
            continue;
        }
        let raw = match std::fs::read_to_string(&skill_md) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %skill_md.display(), error = %e, "failed to read skill");
                continue;
            }
        };
        let stem = skill_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("skill")
            .to_string();
        let origin = skill_md.display().to_string();
        let (fm, body) = split_frontmatter::<SkillFrontmatter>(&raw, &origin);
        let fm = fm.unwrap_or_default();
        out.push(Skill {
            name: fm.name.filter(|n| !n.trim().is_empty()).unwrap_or(stem),
            description: fm
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| {
                    body.lines()
                        .find(|l| !l.trim().is_empty())
                        .unwrap_or("")
                        .trim_start_matches('#')
                        .trim()
                        .to_string()
                }),
            body,
            dir: skill_dir,
        });
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_skill(dir: &Path, name: &str, content: &str) {
        let skill_dir = dir.join(".wave").join("skills").join(name);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn discovers_skill_with_frontmatter() {
        let tmp = TempDir::new().unwrap();
        write_skill(
            tmp.path(),
            "release",
            "---\ndescription: Cut a release.\n---\nSteps here.",
        );
        let skills = discover_skills(tmp.path(), &[]);
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "release");
        assert_eq!(skills[0].description, "Cut a release.");
        assert_eq!(skills[0].body, "Steps here.");
    }

    #[test]
    fn directory_without_skill_md_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".wave/skills/empty")).unwrap();
        assert!(discover_skills(tmp.path(), &[]).is_empty());
    }

    #[test]
    fn skill_dir_is_recorded_for_resources() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "charts", "Draw charts.");
        let skills = discover_skills(tmp.path(), &[]);
        assert!(skills[0].dir.ends_with("charts"));
    }
}
