// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool plugins, the registry that holds them, the execution context they
//! receive, and the permission gate that fronts every side-effecting call.

pub mod builtin;
pub mod gate;
pub mod registry;
pub mod tool;

pub use gate::{
    CanUseTool, GateDecision, PermissionBehavior, PermissionDecision, PermissionGate,
    PendingPermission, ToolPermissionContext,
};
pub use registry::{RegistryError, ToolRegistry, ToolSchema};
pub use tool::{
    DiffSink, LspManager, McpManager, McpToolInfo, MemorySink, ModeState, ReversionManager, Tool,
    ToolContext, ToolResult,
};

pub use builtin::ask_user_question::AskUserQuestionTool;
pub use builtin::bash::BashTool;
pub use builtin::delete::DeleteTool;
pub use builtin::edit::EditTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::ls::LsTool;
pub use builtin::memory_write::MemoryWriteTool;
pub use builtin::plan::{EnterPlanModeTool, ExitPlanModeTool};
pub use builtin::read::ReadTool;
pub use builtin::skill::SkillTool;
pub use builtin::task_query::{TaskOutputTool, TaskStopTool};
pub use builtin::todo_write::{TodoItem, TodoStatus, TodoWriteTool};
pub use builtin::write::WriteTool;
