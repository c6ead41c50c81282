// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Custom slash-commands.
//!
//! A command is a markdown file under `.wave/commands/` (or a plugin's
//! `commands/` directory) with optional YAML frontmatter:
//!
//! ```markdown
//! ---
//! name: fix-issue
//! description: Fix a numbered issue
//! allowed-tools:
//!   - Bash
//!   - Edit
//! model: small-model
//! ---
//!
//! Context: !`git status --short`
//! Fix issue $1 with priority $2. Full invocation: $ARGUMENTS
//! ```
//!
//! Expansion substitutes `$1`…`$9` and `$ARGUMENTS` from the user's
//! arguments (shell-like quoting) and executes `` !`cmd` `` escapes before
//! the prompt is sent to the model.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::frontmatter::split_frontmatter;
use crate::plugins::{Plugin, PLUGIN_ROOT_VAR};

/// A discovered custom slash-command.
#[derive(Debug, Clone)]
pub struct CustomCommand {
    /// Invocation name (`/name`).  Plugin commands are `<plugin>:<name>`.
    pub name: String,
    pub description: String,
    /// Tools whitelisted for the turn this command starts.
    pub allowed_tools: Vec<String>,
    /// Model override for the turn.
    pub model: Option<String>,
    /// Raw markdown body before substitution.
    pub body: String,
    pub path: PathBuf,
    /// Plugin root for `$WAVE_PLUGIN_ROOT` substitution.
    pub plugin_root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "allowed-tools")]
    allowed_tools: Vec<String>,
    model: Option<String>,
}

/// Discover commands from the project and every plugin, sorted by name.
pub fn discover_commands(project_dir: &Path, plugins: &[Plugin]) -> Vec<CustomCommand> {
    let mut commands = scan_dir(&project_dir.join(".wave").join("commands"), None, None);
    for plugin in plugins {
        commands.extend(scan_dir(
            &plugin.root.join("commands"),
            Some(&plugin.name),
            Some(&plugin.root),
        ));
    }
    commands.sort_by(|a, b| a.name.cmp(&b.name));
    commands
}

fn scan_dir(dir: &Path, plugin: Option<&str>, plugin_root: Option<&Path>) -> Vec<CustomCommand> {
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
                warn!(path = %path.display(), error = %e, "failed to read command file");
                continue;
            }
        };
        let origin = path.display().to_string();
        let (fm, body) = split_frontmatter::<CommandFrontmatter>(&raw, &origin);
        let fm = fm.unwrap_or_default();

        let stem = relative_stem(dir, path);
        let base_name = fm.name.filter(|n| !n.trim().is_empty()).unwrap_or(stem);
        let name = match plugin {
            Some(p) => format!("{p}:{base_name}"),
            None => base_name,
        };
        let description = fm
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| {
                body.lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or(&name)
                    .trim_start_matches('#')
                    .trim()
                    .to_string()
            });

        out.push(CustomCommand {
            name,
            description,
            allowed_tools: fm.allowed_tools,
            model: fm.model,
            body,
            path: path.to_path_buf(),
            plugin_root: plugin_root.map(Path::to_path_buf),
        });
    }
    out
}

/// Relative path without extension, segments joined by `:`.
fn relative_stem(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path).with_extension("");
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Expand a command body into the prompt sent to the model.
///
/// Substitution order: `$WAVE_PLUGIN_ROOT`, positional `$1`…`$9` and
/// `$ARGUMENTS`, then `` !`cmd` `` escapes executed through `bash -c` in the
/// project directory.  A failing escape leaves its error inline rather than
/// aborting the expansion.
pub async fn expand_command(command: &CustomCommand, args: &str, workdir: &Path) -> String {
    let mut body = command.body.clone();

    if let Some(root) = &command.plugin_root {
        body = body.replace(PLUGIN_ROOT_VAR, &root.display().to_string());
    }

    let words = split_args(args);
    for i in (1..=9).rev() {
        let value = words.get(i - 1).map(String::as_str).unwrap_or("");
        body = body.replace(&format!("${i}"), value);
    }
    body = body.replace("$ARGUMENTS", args.trim());

    expand_escapes(&body, workdir).await
}

/// Execute every `` !`cmd` `` span and splice its stdout in place.
async fn expand_escapes(body: &str, workdir: &Path) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("!`") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('`') else {
            break;
        };
        out.push_str(&rest[..start]);
        let cmd = &after[..end];
        debug!(cmd, "expanding command escape");
        out.push_str(&run_escape(cmd, workdir).await);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

async fn run_escape(cmd: &str, workdir: &Path) -> String {
    let result = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim_end().to_string()
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            format!("[command `{cmd}` failed: {}]", stderr.trim())
        }
        Err(e) => format!("[command `{cmd}` failed to start: {e}]"),
    }
}

/// Split an argument string with shell-like quoting: whitespace separates,
/// single and double quotes group, backslash escapes inside double quotes
/// and bare words.
pub fn split_args(args: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = args.chars().peekable();
    let mut in_word = false;

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(e) = chars.next() {
                                current.push(e);
                            }
                        }
                        _ => current.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(e) = chars.next() {
                    current.push(e);
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_command(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(".wave").join("commands").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // ── split_args ────────────────────────────────────────────────────────────

    #[test]
    fn split_args_plain_words() {
        assert_eq!(split_args("a b  c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn split_args_single_quotes_group() {
        assert_eq!(split_args("'hello world' x"), vec!["hello world", "x"]);
    }

    #[test]
    fn split_args_double_quotes_with_escape() {
        assert_eq!(split_args(r#""say \"hi\"" y"#), vec![r#"say "hi""#, "y"]);
    }

    #[test]
    fn split_args_empty_is_empty() {
        assert!(split_args("   ").is_empty());
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    #[test]
    fn discover_reads_frontmatter_and_body() {
        let tmp = TempDir::new().unwrap();
        write_command(
            tmp.path(),
            "fix.md",
            "---\ndescription: Fix an issue\nallowed-tools:\n  - Bash\n---\n\nFix $1.",
        );
        let cmds = discover_commands(tmp.path(), &[]);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "fix");
        assert_eq!(cmds[0].description, "Fix an issue");
        assert_eq!(cmds[0].allowed_tools, vec!["Bash"]);
        assert_eq!(cmds[0].body, "Fix $1.");
    }

    #[test]
    fn nested_dirs_join_with_colon() {
        let tmp = TempDir::new().unwrap();
        write_command(tmp.path(), "git/commit.md", "Commit body.");
        let cmds = discover_commands(tmp.path(), &[]);
        assert_eq!(cmds[0].name, "git:commit");
    }

    #[test]
    fn frontmatter_name_overrides_stem() {
        let tmp = TempDir::new().unwrap();
        write_command(tmp.path(), "x.md", "---\nname: deploy\n---\nGo.");
        let cmds = discover_commands(tmp.path(), &[]);
        assert_eq!(cmds[0].name, "deploy");
    }

    #[test]
    fn description_falls_back_to_first_body_line() {
        let tmp = TempDir::new().unwrap();
        write_command(tmp.path(), "terse.md", "# Run the thing\nDetails.");
        let cmds = discover_commands(tmp.path(), &[]);
        assert_eq!(cmds[0].description, "Run the thing");
    }

    #[test]
    fn plugin_commands_are_namespaced() {
        let tmp = TempDir::new().unwrap();
        let plug_root = tmp.path().join("myplug");
        fs::create_dir_all(plug_root.join("commands")).unwrap();
        fs::write(plug_root.join("commands/hello.md"), "Hi from plugin.").unwrap();
        let plugins = vec![Plugin {
            name: "myplug".into(),
            root: plug_root,
            description: String::new(),
        }];
        let cmds = discover_commands(tmp.path(), &plugins);
        assert_eq!(cmds[0].name, "myplug:hello");
        assert!(cmds[0].plugin_root.is_some());
    }

    // ── Expansion ─────────────────────────────────────────────────────────────

    fn command_with_body(body: &str) -> CustomCommand {
        CustomCommand {
            name: "t".into(),
            description: String::new(),
            allowed_tools: vec![],
            model: None,
            body: body.into(),
            path: PathBuf::from("/dev/null"),
            plugin_root: None,
        }
    }

    #[tokio::test]
    async fn positional_and_arguments_substitution() {
        let cmd = command_with_body("Fix $1 at priority $2. All: $ARGUMENTS");
        let out = expand_command(&cmd, "123 'high prio'", Path::new(".")).await;
        assert_eq!(out, "Fix 123 at priority high prio. All: 123 'high prio'");
    }

    #[tokio::test]
    async fn missing_positionals_become_empty() {
        let cmd = command_with_body("a=$1 b=$2");
        let out = expand_command(&cmd, "only", Path::new(".")).await;
        assert_eq!(out, "a=only b=");
    }

    #[tokio::test]
    async fn escape_runs_command_and_splices_stdout() {
        let cmd = command_with_body("Branch: !`echo main` done");
        let out = expand_command(&cmd, "", Path::new(".")).await;
        assert_eq!(out, "Branch: main done");
    }

    #[tokio::test]
    async fn failed_escape_leaves_error_inline() {
        let cmd = command_with_body("x !`exit 3` y");
        let out = expand_command(&cmd, "", Path::new(".")).await;
        assert!(out.contains("failed"));
        assert!(out.starts_with("x "));
        assert!(out.ends_with(" y"));
    }

    #[tokio::test]
    async fn plugin_root_is_substituted() {
        let mut cmd = command_with_body("run $WAVE_PLUGIN_ROOT/bin/tool");
        cmd.plugin_root = Some(PathBuf::from("/opt/plug"));
        let out = expand_command(&cmd, "", Path::new(".")).await;
        assert_eq!(out, "run /opt/plug/bin/tool");
    }
}
