// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Project settings files.
//!
//! `.wave/settings.json` holds shared project configuration;
//! `.wave/settings.local.json` overlays it for per-developer overrides and
//! wins on conflicts.  Hooks may additionally live in `.wave/hooks.json`
//! (same schema as the `hooks` key); both locations are accepted and merged.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::{ConfigError, HooksConfig};

/// Parsed contents of the settings layers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hook configuration (same schema as the inline config `hooks` field).
    pub hooks: HooksConfig,
    /// Environment entries exposed to Bash tool subprocesses.  Applied to
    /// child processes only, never to the host process environment, so
    /// nothing has to be restored on `Agent` drop.
    pub env: HashMap<String, String>,
}

/// Load and merge the settings layers for a project directory.
///
/// Missing files are fine (empty settings); present-but-invalid files are a
/// [`ConfigError::Settings`] so a typo does not silently disable hooks.
pub fn load_settings(project_dir: &Path) -> Result<Settings, ConfigError> {
    let mut merged = serde_json::Value::Object(serde_json::Map::new());

    for name in ["settings.json", "settings.local.json"] {
        let path = project_dir.join(".wave").join(name);
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "loading settings layer");
        let layer = read_json(&path)?;
        merge_json(&mut merged, layer);
    }

    let mut settings: Settings = serde_json::from_value(merged).map_err(|e| {
        ConfigError::Settings {
            path: project_dir.join(".wave/settings.json").display().to_string(),
            reason: e.to_string(),
        }
    })?;

    // `.wave/hooks.json` holds a bare hooks table; append after the
    // settings-provided hooks so settings-declared hooks run first.
    let hooks_path = project_dir.join(".wave").join("hooks.json");
    if hooks_path.is_file() {
        debug!(path = %hooks_path.display(), "loading hooks file");
        let value = read_json(&hooks_path)?;
        let extra: HooksConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Settings {
                path: hooks_path.display().to_string(),
                reason: e.to_string(),
            })?;
        for (event, matchers) in extra {
            settings.hooks.entry(event).or_default().extend(matchers);
        }
    }

    Ok(settings)
}

fn read_json(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Settings {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Settings {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Deep-merge `src` into `dst`; `src` wins on scalar and array conflicts.
pub fn merge_json(dst: &mut serde_json::Value, src: serde_json::Value) {
    match (dst, src) {
        (serde_json::Value::Object(d), serde_json::Value::Object(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_json::Value::Object(serde_json::Map::new()));
                merge_json(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
