// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use wave_runtime::{Shared, Skill};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Built-in skill loader.
///
/// Only names and descriptions travel in the system prompt; the body of a
/// skill is loaded on demand through this tool so unused skills cost no
/// context.
pub struct SkillTool {
    skills: Shared<Skill>,
}

impl SkillTool {
    pub fn new(skills: Shared<Skill>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        "Skill"
    }

    fn description(&self) -> &str {
        "Load a skill's full instructions by name. Invoke before doing any \
         task a listed skill covers."
    }

    fn prompt(&self) -> Option<String> {
        let skills = self.skills.get();
        if skills.is_empty() {
            return None;
        }
        let listing: Vec<String> = skills
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect();
        Some(format!(
            "Available skills (load with the Skill tool before use):\n{}",
            listing.join("\n")
        ))
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the skill to load"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("name").and_then(|v| v.as_str()).unwrap_or("?").to_string()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let Some(name) = args.get("name").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'name'");
        };
        let skills = self.skills.get();
        match skills.iter().find(|s| s.name == name) {
            Some(skill) => ToolResult::ok(format!(
                "# Skill: {}\n(resources in {})\n\n{}",
                skill.name,
                skill.dir.display(),
                skill.body
            ))
            .with_short(format!("loaded {name}")),
            None => {
                let known: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
                ToolResult::err(format!(
                    "unknown skill: {name} (available: {})",
                    known.join(", ")
                ))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
