// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Plugin contributions.
//!
//! A plugin root contains `.wave-plugin/plugin.json` naming it, plus
//! optional sibling `commands/`, `agents/`, `skills/`, and `hooks/`
//! directories whose contents merge into the project-level discovery.
//! `$WAVE_PLUGIN_ROOT` inside contributed command bodies and hook commands
//! is replaced with the plugin's absolute path.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use wave_config::{HooksConfig, PluginSpec};

/// Substitution variable available to plugin-contributed bash snippets.
pub const PLUGIN_ROOT_VAR: &str = "$WAVE_PLUGIN_ROOT";

#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    /// Absolute plugin root (the directory holding `.wave-plugin/`).
    pub root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: String,
    #[serde(default)]
    description: String,
}

/// Load the plugins named in the config; unreadable manifests are skipped
/// with a warning so one broken plugin does not take down agent startup.
pub fn discover_plugins(specs: &[PluginSpec]) -> Vec<Plugin> {
    let mut out = Vec::new();
    for spec in specs {
        let PluginSpec::Local { path } = spec;
        let manifest_path = path.join(".wave-plugin").join("plugin.json");
        let raw = match std::fs::read_to_string(&manifest_path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "skipping plugin: manifest unreadable");
                continue;
            }
        };
        let manifest: PluginManifest = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "skipping plugin: manifest invalid");
                continue;
            }
        };
        out.push(Plugin {
            name: manifest.name,
            description: manifest.description,
            root: path.clone(),
        });
    }
    out
}

/// Load a plugin's `hooks/hooks.json` (if any) with `$WAVE_PLUGIN_ROOT`
/// substituted into each hook command.
pub fn plugin_hooks(plugin: &Plugin) -> HooksConfig {
    let path = plugin.root.join("hooks").join("hooks.json");
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return HooksConfig::default();
    };
    let mut hooks: HooksConfig = match serde_json::from_str(&raw) {
        Ok(h) => h,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping plugin hooks: invalid JSON");
            return HooksConfig::default();
        }
    };
    let root = plugin.root.display().to_string();
    for matchers in hooks.values_mut() {
        for matcher in matchers {
            for hook in &mut matcher.hooks {
                hook.command = hook.command.replace(PLUGIN_ROOT_VAR, &root);
            }
        }
    }
    hooks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use wave_config::HookEvent;

    fn make_plugin(dir: &Path, name: &str) -> PathBuf {
        let root = dir.join(name);
        fs::create_dir_all(root.join(".wave-plugin")).unwrap();
        fs::write(
            root.join(".wave-plugin/plugin.json"),
            format!(r#"{{"name":"{name}","description":"a test plugin"}}"#),
        )
        .unwrap();
        root
    }

    #[test]
    fn discovers_valid_plugin() {
        let tmp = TempDir::new().unwrap();
        let root = make_plugin(tmp.path(), "tools");
        let plugins = discover_plugins(&[PluginSpec::Local { path: root.clone() }]);
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "tools");
        assert_eq!(plugins[0].root, root);
    }

    #[test]
    fn missing_manifest_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let plugins = discover_plugins(&[PluginSpec::Local {
            path: tmp.path().join("nope"),
        }]);
        assert!(plugins.is_empty());
    }

    #[test]
    fn plugin_hooks_substitute_root_variable() {
        let tmp = TempDir::new().unwrap();
        let root = make_plugin(tmp.path(), "hooky");
        fs::create_dir_all(root.join("hooks")).unwrap();
        fs::write(
            root.join("hooks/hooks.json"),
            r#"{"PreToolUse":[{"matcher":"*","hooks":[{"command":"$WAVE_PLUGIN_ROOT/check.sh"}]}]}"#,
        )
        .unwrap();
        let plugin = &discover_plugins(&[PluginSpec::Local { path: root.clone() }])[0];
        let hooks = plugin_hooks(plugin);
        let cmd = &hooks[&HookEvent::PreToolUse][0].hooks[0].command;
        assert_eq!(*cmd, format!("{}/check.sh", root.display()));
    }

    #[test]
    fn plugin_without_hooks_yields_empty_config() {
        let tmp = TempDir::new().unwrap();
        let root = make_plugin(tmp.path(), "plain");
        let plugin = &discover_plugins(&[PluginSpec::Local { path: root }])[0];
        assert!(plugin_hooks(plugin).is_empty());
    }
}
