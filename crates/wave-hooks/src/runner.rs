// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wave_config::{HookEvent, HooksConfig};

use crate::output::{extract_json_object, JsonScan, PermissionDirective};

/// The event-specific half of a hook invocation.
#[derive(Debug, Clone, Copy)]
pub enum HookInput<'a> {
    UserPromptSubmit {
        user_prompt: &'a str,
    },
    PreToolUse {
        tool_name: &'a str,
        tool_input: &'a Value,
    },
    PostToolUse {
        tool_name: &'a str,
        tool_input: &'a Value,
        tool_response: &'a Value,
    },
    Stop,
}

impl HookInput<'_> {
    pub fn event(&self) -> HookEvent {
        match self {
            Self::UserPromptSubmit { .. } => HookEvent::UserPromptSubmit,
            Self::PreToolUse { .. } => HookEvent::PreToolUse,
            Self::PostToolUse { .. } => HookEvent::PostToolUse,
            Self::Stop => HookEvent::Stop,
        }
    }

    /// Tool name used for matcher filtering; `None` matches everything.
    fn matcher_key(&self) -> Option<&str> {
        match self {
            Self::PreToolUse { tool_name, .. } | Self::PostToolUse { tool_name, .. } => {
                Some(tool_name)
            }
            _ => None,
        }
    }

    fn extend_payload(&self, payload: &mut serde_json::Map<String, Value>) {
        match self {
            Self::UserPromptSubmit { user_prompt } => {
                payload.insert("user_prompt".into(), json!(user_prompt));
            }
            Self::PreToolUse {
                tool_name,
                tool_input,
            } => {
                payload.insert("tool_name".into(), json!(tool_name));
                payload.insert("tool_input".into(), (*tool_input).clone());
            }
            Self::PostToolUse {
                tool_name,
                tool_input,
                tool_response,
            } => {
                payload.insert("tool_name".into(), json!(tool_name));
                payload.insert("tool_input".into(), (*tool_input).clone());
                payload.insert("tool_response".into(), (*tool_response).clone());
            }
            Self::Stop => {}
        }
    }
}

/// A blocking hook answer.
#[derive(Debug, Clone)]
pub struct HookBlock {
    /// The hook's stderr (or `stopReason` for JSON directives); the engine
    /// routes it per lifecycle point.
    pub stderr: String,
    pub stop_reason: Option<String>,
}

/// Aggregated outcome of one hook chain.
#[derive(Debug, Default)]
pub struct HookRunResult {
    /// Set when a hook blocked; the chain stopped there.
    pub block: Option<HookBlock>,
    /// Non-blocking warnings surfaced to the user.
    pub warnings: Vec<String>,
    /// `systemMessage` directives.
    pub system_messages: Vec<String>,
    /// Context for the next LLM request only (stdout on `UserPromptSubmit`
    /// success, `additionalContext` directives).
    pub added_context: Vec<String>,
    /// First `permissionDecision` issued by a `PreToolUse` hook.
    pub permission_decision: Option<(PermissionDirective, Option<String>)>,
    /// First `updatedInput` replacement.
    pub updated_input: Option<Value>,
    /// The turn was aborted while a hook ran.
    pub aborted: bool,
}

/// Runs configured hook chains for one session.
pub struct HookRunner {
    hooks: HooksConfig,
    cwd: PathBuf,
    session_id: String,
    transcript_path: PathBuf,
}

impl HookRunner {
    pub fn new(
        hooks: HooksConfig,
        cwd: PathBuf,
        session_id: impl Into<String>,
        transcript_path: PathBuf,
    ) -> Self {
        Self {
            hooks,
            cwd,
            session_id: session_id.into(),
            transcript_path,
        }
    }

    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.hooks.get(&event).map_or(false, |m| !m.is_empty())
    }

    /// Run all hooks matching `input`, sequentially in configuration order.
    /// The first blocking answer stops the chain.
    pub async fn run(&self, input: HookInput<'_>, cancel: &CancellationToken) -> HookRunResult {
        let mut result = HookRunResult::default();
        let event = input.event();
        let Some(matchers) = self.hooks.get(&event) else {
            return result;
        };

        let payload = self.build_payload(&input);
        let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();

        for matcher in matchers {
            if let Some(key) = input.matcher_key() {
                if !matcher.matcher.is_empty() && !glob_match(&matcher.matcher, key) {
                    continue;
                }
            }
            for hook in &matcher.hooks {
                debug!(event = event.as_str(), cmd = %hook.command, "running hook");
                let run = self
                    .run_one(&hook.command, hook.timeout_secs, &payload_bytes, cancel)
                    .await;
                match run {
                    RunOutcome::Aborted => {
                        result.aborted = true;
                        return result;
                    }
                    RunOutcome::TimedOut => {
                        result.warnings.push(format!(
                            "hook `{}` timed out after {}s",
                            hook.command, hook.timeout_secs
                        ));
                    }
                    RunOutcome::SpawnError(e) => {
                        result
                            .warnings
                            .push(format!("hook `{}` failed to start: {e}", hook.command));
                    }
                    RunOutcome::Finished {
                        code,
                        stdout,
                        stderr,
                    } => {
                        let blocked = interpret(
                            event,
                            &hook.command,
                            code,
                            &stdout,
                            &stderr,
                            &mut result,
                        );
                        if blocked {
                            return result;
                        }
                    }
                }
            }
        }
        result
    }

    fn build_payload(&self, input: &HookInput<'_>) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert("event".into(), json!(input.event().as_str()));
        payload.insert("sessionId".into(), json!(self.session_id));
        payload.insert(
            "transcriptPath".into(),
            json!(self.transcript_path.display().to_string()),
        );
        payload.insert("cwd".into(), json!(self.cwd.display().to_string()));
        payload.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        input.extend_payload(&mut payload);
        Value::Object(payload)
    }

    async fn run_one(
        &self,
        command: &str,
        timeout_secs: u64,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.current_dir(&self.cwd);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return RunOutcome::SpawnError(e.to_string()),
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(payload).await;
            // Closing stdin lets hooks that read to EOF proceed.
            drop(stdin);
        }

        #[cfg(unix)]
        let pid = child.id().map(|p| p as i32);

        let wait = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Graceful first: the subprocess gets SIGTERM, the kill_on_drop
                // guard cleans up if it ignores the signal.
                #[cfg(unix)]
                if let Some(pid) = pid {
                    unsafe { libc::kill(pid, libc::SIGTERM); }
                }
                RunOutcome::Aborted
            }
            outcome = wait => match outcome {
                Err(_) => RunOutcome::TimedOut,
                Ok(Err(e)) => RunOutcome::SpawnError(e.to_string()),
                Ok(Ok(output)) => RunOutcome::Finished {
                    code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
            }
        }
    }
}

enum RunOutcome {
    Finished {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Aborted,
    SpawnError(String),
}

/// Fold one finished hook into `result`.  Returns `true` when it blocked.
fn interpret(
    event: HookEvent,
    command: &str,
    code: i32,
    stdout: &str,
    stderr: &str,
    result: &mut HookRunResult,
) -> bool {
    match extract_json_object(stdout) {
        JsonScan::Directives(directives) => {
            if let Some(msg) = directives.system_message {
                result.system_messages.push(msg);
            }
            if let Some(hso) = directives.hook_specific_output {
                if let Some(decision) = hso.permission_decision {
                    if result.permission_decision.is_none() {
                        result.permission_decision =
                            Some((decision, hso.permission_decision_reason));
                    }
                }
                if let Some(updated) = hso.updated_input {
                    if result.updated_input.is_none() {
                        result.updated_input = Some(updated);
                    }
                }
                if let Some(ctx) = hso.additional_context {
                    result.added_context.push(ctx);
                }
            }
            if directives.continue_ == Some(false) {
                let reason = directives.stop_reason.clone();
                result.block = Some(HookBlock {
                    stderr: reason
                        .clone()
                        .unwrap_or_else(|| stderr.trim().to_string()),
                    stop_reason: reason,
                });
                return true;
            }
            false
        }
        scan => {
            if let JsonScan::Invalid(detail) = scan {
                warn!(cmd = %command, %detail, "hook produced unparsable JSON");
                result.warnings.push(format!("hook `{command}`: {detail}"));
            }
            match code {
                0 => {
                    if event == HookEvent::UserPromptSubmit && !stdout.trim().is_empty() {
                        result.added_context.push(stdout.trim().to_string());
                    }
                    false
                }
                2 => {
                    result.block = Some(HookBlock {
                        stderr: stderr.trim().to_string(),
                        stop_reason: None,
                    });
                    true
                }
                other => {
                    result.warnings.push(format!(
                        "hook `{command}` exited with {other}: {}",
                        stderr.trim()
                    ));
                    false
                }
            }
        }
    }
}

/// Shell-style glob match supporting `*` and `?`.
fn glob_match(pattern: &str, name: &str) -> bool {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
        .map(|r| r.is_match(name))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
