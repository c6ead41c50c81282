// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP server specs from `.mcp.json`.
//!
//! The client implementation is an external collaborator; this module only
//! reads the on-disk spec and owns the wire namespacing rule for tools that
//! MCP servers contribute.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use wave_config::McpServerSpec;

/// Load `.mcp.json` from the project root.  Absent file → empty map;
/// invalid JSON is logged and also yields an empty map (a broken spec must
/// not block agent startup).
pub fn load_mcp_servers(project_dir: &Path) -> HashMap<String, McpServerSpec> {
    let path = project_dir.join(".mcp.json");
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring invalid .mcp.json");
            HashMap::new()
        }
    }
}

/// Wire name of an MCP-provided tool: `mcp__<server>__<tool>`.
pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_server_specs() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(".mcp.json"),
            r#"{"files": {"command": "mcp-files", "args": ["--root", "."]}}"#,
        )
        .unwrap();
        let servers = load_mcp_servers(tmp.path());
        assert_eq!(servers["files"].command, "mcp-files");
        assert_eq!(servers["files"].args, vec!["--root", "."]);
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_mcp_servers(tmp.path()).is_empty());
    }

    #[test]
    fn invalid_json_is_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".mcp.json"), "{oops").unwrap();
        assert!(load_mcp_servers(tmp.path()).is_empty());
    }

    #[test]
    fn tool_names_are_namespaced() {
        assert_eq!(mcp_tool_name("files", "read"), "mcp__files__read");
    }
}
