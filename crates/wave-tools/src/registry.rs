// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::tool::Tool;

/// A tool schema as offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool names are case-sensitive and must be unique; a collision at
    /// startup is fatal.
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
}

/// Central registry holding all available tools.
///
/// MCP-provided tools register under `mcp__<server>__<tool>`; plugin slash
/// commands surface as `<plugin>:<command>` and never enter this registry.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas for every registered tool, name-sorted for a stable prompt.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.schemas_filtered(None)
    }

    /// Schemas filtered to an allowed set (sub-agent or slash-command
    /// whitelist); `None` means everything.
    pub fn schemas_filtered(&self, allowed: Option<&[String]>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| match allowed {
                Some(names) => names.iter().any(|n| n == t.name()),
                None => true,
            })
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// System-prompt fragments contributed by enabled tools, name-sorted.
    pub fn prompt_fragments(&self, allowed: Option<&[String]>) -> Vec<String> {
        let mut tools: Vec<&Arc<dyn Tool>> = self
            .tools
            .values()
            .filter(|t| match allowed {
                Some(names) => names.iter().any(|n| n == t.name()),
                None => true,
            })
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools.iter().filter_map(|t| t.prompt()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{ToolContext, ToolResult};

    struct EchoTool {
        name: &'static str,
        with_prompt: bool,
    }

    #[async_trait]
    impl crate::tool::Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn prompt(&self) -> Option<String> {
            self.with_prompt.then(|| format!("Use {} wisely.", self.name))
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok(format!("echo:{args}"))
        }
    }

    fn echo(name: &'static str) -> EchoTool {
        EchoTool {
            name,
            with_prompt: false,
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("echo")).unwrap();
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("Read")).unwrap();
        assert!(reg.get("read").is_none());
        assert!(reg.get("Read").is_some());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("t")).unwrap();
        let err = reg.register(echo("t")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("t".into()));
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("zeta")).unwrap();
        reg.register(echo("alpha")).unwrap();
        let schemas = reg.schemas();
        assert_eq!(schemas[0].name, "alpha");
        assert_eq!(schemas[1].name, "zeta");
    }

    #[test]
    fn schemas_filtered_respects_whitelist() {
        let mut reg = ToolRegistry::new();
        reg.register(echo("a")).unwrap();
        reg.register(echo("b")).unwrap();
        let allowed = vec!["b".to_string()];
        let schemas = reg.schemas_filtered(Some(&allowed));
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "b");
    }

    #[test]
    fn prompt_fragments_come_from_enabled_tools_only() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool {
            name: "a",
            with_prompt: true,
        })
        .unwrap();
        reg.register(echo("b")).unwrap();
        let fragments = reg.prompt_fragments(None);
        assert_eq!(fragments, vec!["Use a wisely."]);
        let none = reg.prompt_fragments(Some(&["b".to_string()]));
        assert!(none.is_empty());
    }
}
