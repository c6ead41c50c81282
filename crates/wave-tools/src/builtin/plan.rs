// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Plan-mode transitions.
//!
//! `EnterPlanMode` flips the shared mode state to `Plan` and allocates a
//! fresh scratch file under `.wave/plans/`; while the mode is active the
//! gate denies every mutation outside that file.  `ExitPlanMode` reads the
//! plan back, asks the host for Approve / Reject-with-feedback through the
//! gate, and restores the prior mode on approval.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use wave_config::PermissionMode;

use crate::gate::ToolPermissionContext;
use crate::tool::{Tool, ToolContext, ToolResult};

pub struct EnterPlanModeTool;

#[async_trait]
impl Tool for EnterPlanModeTool {
    fn name(&self) -> &str {
        "EnterPlanMode"
    }

    fn description(&self) -> &str {
        "Switch to plan mode for non-trivial work. Only reads and edits to \
         the allocated plan file are permitted until the plan is approved \
         via ExitPlanMode."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "additionalProperties": false })
    }

    fn is_read_only(&self) -> bool {
        // Entering plan mode only restricts what may happen next.
        true
    }

    fn format_compact_params(&self, _args: &Value) -> String {
        String::new()
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult {
        let plans_dir = ctx.workdir.join(".wave").join("plans");
        if let Err(e) = tokio::fs::create_dir_all(&plans_dir).await {
            return ToolResult::err(format!("cannot create {}: {e}", plans_dir.display()));
        }
        let plan_file = plans_dir.join(format!("plan-{}.md", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&plan_file, "").await {
            return ToolResult::err(format!("cannot create plan file: {e}"));
        }

        {
            let mut state = ctx.mode_state.lock().unwrap();
            if state.mode == PermissionMode::Plan {
                return ToolResult::err("already in plan mode");
            }
            state.prior_mode = Some(state.mode);
            state.mode = PermissionMode::Plan;
            state.plan_file = Some(plan_file.clone());
        }
        debug!(plan = %plan_file.display(), "entered plan mode");

        ToolResult::ok(format!(
            "Plan mode active. Write the plan to {} and call ExitPlanMode \
             when it is ready for review.",
            plan_file.display()
        ))
        .with_short("plan mode on")
        .with_file(plan_file)
    }
}

pub struct ExitPlanModeTool;

#[async_trait]
impl Tool for ExitPlanModeTool {
    fn name(&self) -> &str {
        "ExitPlanMode"
    }

    fn description(&self) -> &str {
        "Present the plan file for approval. On approval the prior \
         permission mode is restored; on rejection the feedback comes back \
         as the tool error and plan mode stays active."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "additionalProperties": false })
    }

    fn is_read_only(&self) -> bool {
        // The approval decision rides through the gate inside execute; a
        // second gate pass would prompt twice.
        true
    }

    fn format_compact_params(&self, _args: &Value) -> String {
        String::new()
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult {
        let plan_file = {
            let state = ctx.mode_state.lock().unwrap();
            if state.mode != PermissionMode::Plan {
                return ToolResult::err("not in plan mode");
            }
            state.plan_file.clone()
        };
        let Some(plan_file) = plan_file else {
            return ToolResult::err("no plan file allocated");
        };
        let plan = match tokio::fs::read_to_string(&plan_file).await {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("cannot read plan: {e}")),
        };

        let decision = ctx
            .gate
            .ask(ToolPermissionContext {
                tool_name: self.name().to_string(),
                tool_input: json!({ "plan": plan }),
                mode: ctx.permission_mode,
                session_id: ctx.session_id.clone(),
            })
            .await;

        if decision.is_allow() {
            let restored = {
                let mut state = ctx.mode_state.lock().unwrap();
                let restored = state.prior_mode.take().unwrap_or_default();
                state.mode = restored;
                state.plan_file = None;
                restored
            };
            debug!(mode = %restored, "plan approved; mode restored");
            ToolResult::ok(format!("Plan approved.\n\n{plan}"))
                .with_short("plan approved")
                .with_file(plan_file)
        } else {
            ToolResult::err(format!(
                "Plan rejected: {}",
                decision.message.unwrap_or_else(|| "no feedback".into())
            ))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::builtin::testutil::ctx;
    use crate::gate::{CanUseTool, PermissionDecision, PermissionGate};

    #[tokio::test]
    async fn enter_allocates_plan_file_and_flips_mode() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        let out = EnterPlanModeTool.execute(json!({}), &context).await;
        assert!(out.success, "{:?}", out.error);

        let state = context.mode_state.lock().unwrap();
        assert_eq!(state.mode, PermissionMode::Plan);
        assert_eq!(state.prior_mode, Some(PermissionMode::Default));
        let plan = state.plan_file.as_ref().unwrap();
        assert!(plan.exists());
        assert!(plan.starts_with(tmp.path().join(".wave/plans")));
    }

    #[tokio::test]
    async fn enter_twice_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let context = ctx(tmp.path());
        EnterPlanModeTool.execute(json!({}), &context).await;
        let again = EnterPlanModeTool.execute(json!({}), &context).await;
        assert!(!again.success);
    }

    #[tokio::test]
    async fn exit_on_approval_restores_prior_mode() {
        let tmp = TempDir::new().unwrap();
        let callback: CanUseTool =
            Arc::new(|_| Box::pin(async { PermissionDecision::allow() }));
        let mut context = ctx(tmp.path());
        context.gate = Arc::new(PermissionGate::new(Some(callback)));

        EnterPlanModeTool.execute(json!({}), &context).await;
        {
            let state = context.mode_state.lock().unwrap();
            std::fs::write(state.plan_file.as_ref().unwrap(), "1. do things\n").unwrap();
        }
        let out = ExitPlanModeTool.execute(json!({}), &context).await;
        assert!(out.success, "{:?}", out.error);
        assert!(out.content.contains("do things"));

        let state = context.mode_state.lock().unwrap();
        assert_eq!(state.mode, PermissionMode::Default);
        assert!(state.plan_file.is_none());
    }

    #[tokio::test]
    async fn exit_on_rejection_keeps_plan_mode_and_feedback() {
        let tmp = TempDir::new().unwrap();
        let callback: CanUseTool =
            Arc::new(|_| Box::pin(async { PermissionDecision::deny("needs more detail") }));
        let mut context = ctx(tmp.path());
        context.gate = Arc::new(PermissionGate::new(Some(callback)));

        EnterPlanModeTool.execute(json!({}), &context).await;
        let out = ExitPlanModeTool.execute(json!({}), &context).await;
        assert!(!out.success);
        assert!(out.content.contains("needs more detail"));
        assert_eq!(
            context.mode_state.lock().unwrap().mode,
            PermissionMode::Plan
        );
    }

    #[tokio::test]
    async fn exit_outside_plan_mode_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let out = ExitPlanModeTool.execute(json!({}), &ctx(tmp.path())).await;
        assert!(!out.success);
        assert!(out.content.contains("not in plan mode"));
    }
}
