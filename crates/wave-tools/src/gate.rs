// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The permission gate.
//!
//! Every side-effecting tool call resolves through [`PermissionGate`]
//! before execution.  The synchronous half ([`pre_decision`]) applies the
//! mode-driven rules; calls it cannot settle go to the host through the
//! async `canUseTool` callback, with an id-addressable pending table so
//! hosts can also list and resolve requests out of band.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use wave_config::PermissionMode;

use crate::tool::Tool;

/// Read-only tools that always pass the gate.
const SAFE_TOOLS: &[&str] = &[
    "Read",
    "Grep",
    "Glob",
    "LS",
    "TaskList",
    "TaskGet",
    "TaskOutput",
];

/// Standard denial in plan mode.
pub const PLAN_DENY_MESSAGE: &str =
    "Plan mode is active: only reads and edits to the plan file are allowed. \
     Present the plan with ExitPlanMode before making changes.";

/// What the host's decision callback receives.
#[derive(Debug, Clone, Serialize)]
pub struct ToolPermissionContext {
    pub tool_name: String,
    pub tool_input: Value,
    pub mode: PermissionMode,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    Allow,
    Deny,
}

/// The host's final ruling on a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub behavior: PermissionBehavior,
    /// Deny reason, or — for `AskUserQuestion` — the user's answers as a
    /// JSON object string.
    pub message: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self {
            behavior: PermissionBehavior::Allow,
            message: None,
        }
    }

    pub fn allow_with_message(message: impl Into<String>) -> Self {
        Self {
            behavior: PermissionBehavior::Allow,
            message: Some(message.into()),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            behavior: PermissionBehavior::Deny,
            message: Some(message.into()),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.behavior == PermissionBehavior::Allow
    }

    /// Typed view of the `message` field for `AskUserQuestion` answers.
    /// `None` when the message is absent or not a JSON object.
    pub fn parsed_answers(&self) -> Option<serde_json::Map<String, Value>> {
        match serde_json::from_str::<Value>(self.message.as_deref()?) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Host-supplied async decision callback.
pub type CanUseTool =
    Arc<dyn Fn(ToolPermissionContext) -> BoxFuture<'static, PermissionDecision> + Send + Sync>;

/// Outcome of the synchronous decision procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(String),
    /// Settle through the host callback.
    Ask,
}

/// A request currently waiting on the host.
#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub id: String,
    pub context: ToolPermissionContext,
}

struct PendingEntry {
    context: ToolPermissionContext,
    tx: oneshot::Sender<PermissionDecision>,
}

pub struct PermissionGate {
    can_use_tool: Option<CanUseTool>,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl PermissionGate {
    pub fn new(can_use_tool: Option<CanUseTool>) -> Self {
        Self {
            can_use_tool,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The mode-driven decision procedure, in order.  `whitelist` is the
    /// current slash-command's `allowed-tools` set; `plan_dir` is where
    /// plan-mode writes are permitted.
    pub fn pre_decision(
        &self,
        tool: &dyn Tool,
        args: &Value,
        mode: PermissionMode,
        whitelist: &[String],
        plan_dir: &Path,
    ) -> GateDecision {
        let name = tool.name();
        if mode == PermissionMode::BypassPermissions {
            return GateDecision::Allow;
        }
        if whitelist.iter().any(|t| t == name) {
            return GateDecision::Allow;
        }
        if SAFE_TOOLS.contains(&name) || tool.is_read_only() {
            return GateDecision::Allow;
        }
        if mode == PermissionMode::Plan {
            if tool.is_file_edit() && arg_path_is_under(args, plan_dir) {
                return GateDecision::Allow;
            }
            return GateDecision::Deny(PLAN_DENY_MESSAGE.to_string());
        }
        if mode == PermissionMode::AcceptEdits && tool.is_file_edit() {
            return GateDecision::Allow;
        }
        GateDecision::Ask
    }

    /// Route a call to the host.  The request is registered in the pending
    /// table for the duration, so hosts may answer either by returning from
    /// `canUseTool` or by calling [`resolve`][Self::resolve]; the first
    /// answer wins.  Without a callback the gate denies with "no handler".
    pub async fn ask(&self, context: ToolPermissionContext) -> PermissionDecision {
        let Some(callback) = self.can_use_tool.clone() else {
            return PermissionDecision::deny("no handler");
        };
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            id.clone(),
            PendingEntry {
                context: context.clone(),
                tx,
            },
        );
        debug!(tool = %context.tool_name, request = %id, "asking host for permission");

        let callback_fut = callback(context);
        let decision = tokio::select! {
            decision = callback_fut => decision,
            resolved = rx => resolved.unwrap_or_else(|_| PermissionDecision::deny("cancelled")),
        };
        self.pending.lock().unwrap().remove(&id);
        decision
    }

    /// Requests currently awaiting a host answer.
    pub fn pending(&self) -> Vec<PendingPermission> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(id, e)| PendingPermission {
                id: id.clone(),
                context: e.context.clone(),
            })
            .collect()
    }

    /// Resolve a pending request out of band.  Returns `false` for an
    /// unknown id (already settled).
    pub fn resolve(&self, id: &str, decision: PermissionDecision) -> bool {
        match self.pending.lock().unwrap().remove(id) {
            Some(entry) => entry.tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Deny everything still pending (host UI reset).
    pub fn clear_pending(&self) {
        let entries: Vec<PendingEntry> = self.pending.lock().unwrap().drain().map(|(_, e)| e).collect();
        for entry in entries {
            let _ = entry.tx.send(PermissionDecision::deny("cancelled"));
        }
    }
}

/// True when the call's `file_path` argument resolves under `dir`.
fn arg_path_is_under(args: &Value, dir: &Path) -> bool {
    args.get("file_path")
        .and_then(|v| v.as_str())
        .map(|p| Path::new(p).starts_with(dir))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::{ToolContext, ToolResult};

    struct FakeTool {
        name: &'static str,
        read_only: bool,
        file_edit: bool,
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn is_read_only(&self) -> bool {
            self.read_only
        }
        fn is_file_edit(&self) -> bool {
            self.file_edit
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok("")
        }
    }

    fn bash() -> FakeTool {
        FakeTool {
            name: "Bash",
            read_only: false,
            file_edit: false,
        }
    }

    fn write() -> FakeTool {
        FakeTool {
            name: "Write",
            read_only: false,
            file_edit: true,
        }
    }

    fn plan_dir() -> std::path::PathBuf {
        std::path::PathBuf::from("/proj/.wave/plans")
    }

    fn gate() -> PermissionGate {
        PermissionGate::new(None)
    }

    // ── pre_decision ──────────────────────────────────────────────────────────

    #[test]
    fn bypass_mode_allows_everything() {
        let d = gate().pre_decision(
            &bash(),
            &json!({}),
            PermissionMode::BypassPermissions,
            &[],
            &plan_dir(),
        );
        assert_eq!(d, GateDecision::Allow);
    }

    #[test]
    fn whitelist_allows_named_tool() {
        let d = gate().pre_decision(
            &bash(),
            &json!({}),
            PermissionMode::Default,
            &["Bash".to_string()],
            &plan_dir(),
        );
        assert_eq!(d, GateDecision::Allow);
    }

    #[test]
    fn safe_tools_are_allowed_by_name() {
        let read = FakeTool {
            name: "Read",
            read_only: false, // even without the flag, the name is safe
            file_edit: false,
        };
        let d = gate().pre_decision(&read, &json!({}), PermissionMode::Default, &[], &plan_dir());
        assert_eq!(d, GateDecision::Allow);
    }

    #[test]
    fn read_only_flag_allows_unknown_tool() {
        let t = FakeTool {
            name: "mcp__files__list",
            read_only: true,
            file_edit: false,
        };
        let d = gate().pre_decision(&t, &json!({}), PermissionMode::Default, &[], &plan_dir());
        assert_eq!(d, GateDecision::Allow);
    }

    #[test]
    fn plan_mode_denies_mutations_with_standard_message() {
        let d = gate().pre_decision(&bash(), &json!({}), PermissionMode::Plan, &[], &plan_dir());
        assert_eq!(d, GateDecision::Deny(PLAN_DENY_MESSAGE.to_string()));
    }

    #[test]
    fn plan_mode_allows_writes_to_plan_file() {
        let d = gate().pre_decision(
            &write(),
            &json!({"file_path": "/proj/.wave/plans/plan-1.md"}),
            PermissionMode::Plan,
            &[],
            &plan_dir(),
        );
        assert_eq!(d, GateDecision::Allow);
    }

    #[test]
    fn plan_mode_denies_writes_outside_plan_file() {
        let d = gate().pre_decision(
            &write(),
            &json!({"file_path": "/proj/src/main.rs"}),
            PermissionMode::Plan,
            &[],
            &plan_dir(),
        );
        assert!(matches!(d, GateDecision::Deny(_)));
    }

    #[test]
    fn accept_edits_allows_file_edits_only() {
        let edit = gate().pre_decision(
            &write(),
            &json!({"file_path": "/x"}),
            PermissionMode::AcceptEdits,
            &[],
            &plan_dir(),
        );
        assert_eq!(edit, GateDecision::Allow);
        let shell =
            gate().pre_decision(&bash(), &json!({}), PermissionMode::AcceptEdits, &[], &plan_dir());
        assert_eq!(shell, GateDecision::Ask);
    }

    #[test]
    fn default_mode_asks_for_side_effects() {
        let d = gate().pre_decision(&bash(), &json!({}), PermissionMode::Default, &[], &plan_dir());
        assert_eq!(d, GateDecision::Ask);
    }

    // ── ask / pending ─────────────────────────────────────────────────────────

    fn context() -> ToolPermissionContext {
        ToolPermissionContext {
            tool_name: "Bash".into(),
            tool_input: json!({"command": "echo hi"}),
            mode: PermissionMode::Default,
            session_id: "s1".into(),
        }
    }

    #[tokio::test]
    async fn ask_without_callback_denies_with_no_handler() {
        let decision = gate().ask(context()).await;
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert_eq!(decision.message.as_deref(), Some("no handler"));
    }

    #[tokio::test]
    async fn ask_routes_through_callback() {
        let callback: CanUseTool = Arc::new(|ctx| {
            Box::pin(async move {
                if ctx.tool_name == "Bash" {
                    PermissionDecision::deny("no shell")
                } else {
                    PermissionDecision::allow()
                }
            })
        });
        let gate = PermissionGate::new(Some(callback));
        let decision = gate.ask(context()).await;
        assert_eq!(decision.message.as_deref(), Some("no shell"));
        assert!(gate.pending().is_empty(), "pending cleared after answer");
    }

    #[tokio::test]
    async fn out_of_band_resolve_preempts_stalled_callback() {
        // A callback that never answers: the host resolves via the table.
        let callback: CanUseTool = Arc::new(|_| Box::pin(futures::future::pending()));
        let gate = Arc::new(PermissionGate::new(Some(callback)));

        let gate2 = Arc::clone(&gate);
        let resolver = tokio::spawn(async move {
            // Wait until the request is registered, then approve it.
            loop {
                let pending = gate2.pending();
                if let Some(p) = pending.first() {
                    assert_eq!(p.context.tool_name, "Bash");
                    assert!(gate2.resolve(&p.id, PermissionDecision::allow()));
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let decision = gate.ask(context()).await;
        assert!(decision.is_allow());
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn clear_pending_denies_outstanding_requests() {
        let callback: CanUseTool = Arc::new(|_| Box::pin(futures::future::pending()));
        let gate = Arc::new(PermissionGate::new(Some(callback)));
        let gate2 = Arc::clone(&gate);
        let asker = tokio::spawn(async move { gate2.ask(context()).await });
        while gate.pending().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        gate.clear_pending();
        let decision = asker.await.unwrap();
        assert_eq!(decision.message.as_deref(), Some("cancelled"));
    }

    #[test]
    fn resolve_unknown_id_returns_false() {
        assert!(!gate().resolve("nope", PermissionDecision::allow()));
    }

    // ── Decision helpers ──────────────────────────────────────────────────────

    #[test]
    fn parsed_answers_reads_json_object() {
        let d = PermissionDecision::allow_with_message(r#"{"Proceed?": "yes"}"#);
        let answers = d.parsed_answers().unwrap();
        assert_eq!(answers["Proceed?"], "yes");
    }

    #[test]
    fn parsed_answers_rejects_non_object() {
        assert!(PermissionDecision::allow_with_message("just text")
            .parsed_answers()
            .is_none());
        assert!(PermissionDecision::allow().parsed_answers().is_none());
    }
}
