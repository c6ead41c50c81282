// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent configurations.
//!
//! A sub-agent is a markdown file under `.wave/agents/` (or a plugin's
//! `agents/` directory) whose frontmatter names it, describes when to
//! delegate to it, restricts its tool set, and optionally overrides the
//! model.  The body is its system prompt.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::frontmatter::split_frontmatter;
use crate::plugins::Plugin;

/// A discovered sub-agent configuration.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    pub name: String,
    /// Guides the model's delegation choice; surfaced in the `Task` tool
    /// schema.
    pub description: String,
    /// Tool whitelist; empty means the full parent tool set.
    pub tools: Vec<String>,
    /// Model override; `None` inherits the session model.
    pub model: Option<String>,
    /// System prompt body.
    pub system_prompt: String,
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentFrontmatter {
    name: Option<String>,
    description: Option<String>,
    tools: Vec<String>,
    model: Option<String>,
}

/// Discover sub-agents from the project and plugins, sorted by name.
/// Later sources win on name collision (plugins override project files).
pub fn discover_subagents(project_dir: &Path, plugins: &[Plugin]) -> Vec<SubAgentConfig> {
    let mut map = std::collections::HashMap::new();
    for agent in scan_dir(&project_dir.join(".wave").join("agents")) {
        map.insert(agent.name.clone(), agent);
    }
    for plugin in plugins {
        for agent in scan_dir(&plugin.root.join("agents")) {
            map.insert(agent.name.clone(), agent);
        }
    }
    let mut agents: Vec<SubAgentConfig> = map.into_values().collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    agents
}

fn scan_dir(dir: &Path) -> Vec<SubAgentConfig> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return out;
    }
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read agent file");
                continue;
            }
        };
        if raw.trim().is_empty() {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("agent")
            .to_string();
        let origin = path.display().to_string();
        let (fm, body) = split_frontmatter::<AgentFrontmatter>(&raw, &origin);
        let fm = fm.unwrap_or_default();

        let description = fm
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| {
                body.lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or(&stem)
                    .trim_start_matches('#')
                    .trim()
                    .to_string()
            });
        if description.is_empty() {
            continue;
        }

        out.push(SubAgentConfig {
            name: fm.name.filter(|n| !n.trim().is_empty()).unwrap_or(stem),
            description,
            tools: fm.tools,
            model: fm.model.filter(|m| m.trim() != "inherit"),
            system_prompt: body,
            path: path.to_path_buf(),
        });
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
