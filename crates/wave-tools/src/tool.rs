// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use wave_config::PermissionMode;
use wave_tasks::TaskManager;
use wave_transcript::{DiffBlock, ImageAttachment, MemoryBlock};

use crate::gate::PermissionGate;

/// The result of executing a tool.
///
/// File-edit tools publish structured diffs through
/// [`ToolContext::add_diff_block`] rather than carrying them here.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub success: bool,
    /// Full result text delivered to the model.
    pub content: String,
    /// ≤ 1-line summary for compact UIs.
    pub short_result: Option<String>,
    pub error: Option<String>,
    /// Primary file the tool touched, when there is one.
    pub file_path: Option<PathBuf>,
    pub images: Vec<ImageAttachment>,
    /// Set when the call was handed off to the background mid-flight; the
    /// turn continues as if the tool returned.
    pub is_manually_backgrounded: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self {
            success: false,
            content: msg.clone(),
            error: Some(msg),
            ..Self::default()
        }
    }

    pub fn with_short(mut self, short: impl Into<String>) -> Self {
        self.short_result = Some(short.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// Shared permission-mode state for one session.
///
/// Plan-mode transitions mutate it mid-turn (`EnterPlanMode` /
/// `ExitPlanMode`), so the engine and every tool context hold the same
/// handle.
#[derive(Debug, Default)]
pub struct ModeState {
    pub mode: PermissionMode,
    /// Mode to restore when plan mode exits.
    pub prior_mode: Option<PermissionMode>,
    /// Scratch file allocated by `EnterPlanMode`.
    pub plan_file: Option<PathBuf>,
}

impl ModeState {
    pub fn new(mode: PermissionMode) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            mode,
            prior_mode: None,
            plan_file: None,
        }))
    }
}

/// File-snapshot collaborator used by rewind.  Implementations live in the
/// host; the engine records a snapshot before every file mutation and
/// replays them when history is truncated.
pub trait ReversionManager: Send + Sync {
    /// Snapshot `path` before it is modified or deleted.
    fn record(&self, path: &std::path::Path);
    /// Checkpoint the snapshot stream at a user-message boundary.
    fn mark_user_message(&self, index: usize);
    /// Replay snapshots to undo edits made after the given checkpoint.
    fn rewind_to(&self, index: usize);
}

/// Minimal schema info for an MCP-provided tool.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// MCP client collaborator; the engine registers each served tool under
/// `mcp__<server>__<tool>`.
#[async_trait]
pub trait McpManager: Send + Sync {
    fn server_names(&self) -> Vec<String>;
    async fn list_tools(&self, server: &str) -> anyhow::Result<Vec<McpToolInfo>>;
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> anyhow::Result<Value>;
}

/// LSP collaborator consumed by lint-aware tools.
#[async_trait]
pub trait LspManager: Send + Sync {
    async fn diagnostics(&self, path: &std::path::Path) -> anyhow::Result<Vec<String>>;
}

/// Sink for structured diffs produced by file-edit tools; the engine wires
/// it to the transcript's diff blocks.
pub type DiffSink = Arc<dyn Fn(DiffBlock) + Send + Sync>;

/// Sink for persisted-rule records, wired to the transcript's memory blocks.
pub type MemorySink = Arc<dyn Fn(MemoryBlock) + Send + Sync>;

/// Per-call execution context.
///
/// Constructed fresh by the engine for every tool call; tools must not
/// capture it beyond the lifetime of the call.
#[derive(Clone)]
pub struct ToolContext {
    pub workdir: PathBuf,
    /// Child of the turn's token; fires on abort.
    pub cancel: CancellationToken,
    pub permission_mode: PermissionMode,
    pub session_id: String,
    /// The provider call id of this invocation.
    pub call_id: String,
    pub gate: Arc<PermissionGate>,
    pub tasks: Arc<TaskManager>,
    pub mode_state: Arc<Mutex<ModeState>>,
    pub reversion: Option<Arc<dyn ReversionManager>>,
    pub mcp: Option<Arc<dyn McpManager>>,
    pub lsp: Option<Arc<dyn LspManager>>,
    pub diff_sink: Option<DiffSink>,
    pub memory_sink: Option<MemorySink>,
    /// Environment entries from `.wave/settings.json#env`, applied to tool
    /// subprocesses only.
    pub bash_env: Vec<(String, String)>,
    /// Foreground Bash budget.
    pub bash_timeout_secs: u64,
}

impl ToolContext {
    /// Resolve a (possibly relative) path against the workdir.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.workdir.join(p)
        }
    }

    /// Publish a structured diff for the current call.
    pub fn add_diff_block(&self, diff: DiffBlock) {
        if let Some(sink) = &self.diff_sink {
            sink(diff);
        }
    }

    /// Record a persisted rule write for the current call.
    pub fn add_memory_block(&self, memory: MemoryBlock) {
        if let Some(sink) = &self.memory_sink {
            sink(memory);
        }
    }

    /// Snapshot a file with the reversion collaborator before mutating it.
    pub fn record_snapshot(&self, path: &std::path::Path) {
        if let Some(rev) = &self.reversion {
            rev.record(path);
        }
    }
}

/// Trait every built-in and plugin tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters, suitable for the LLM.
    fn parameters_schema(&self) -> Value;
    /// Extra instructional text merged into the system prompt when this
    /// tool is enabled.
    fn prompt(&self) -> Option<String> {
        None
    }
    /// Read-only tools pass the permission gate without asking.
    fn is_read_only(&self) -> bool {
        false
    }
    /// File edits are auto-approved in `acceptEdits` mode.
    fn is_file_edit(&self) -> bool {
        false
    }
    /// One-line parameter summary for UI display.
    fn format_compact_params(&self, args: &Value) -> String {
        let compact = serde_json::to_string(args).unwrap_or_default();
        if compact.chars().count() > 80 {
            let head: String = compact.chars().take(79).collect();
            format!("{head}…")
        } else {
            compact
        }
    }
    /// Execute the tool.  Failures are `ToolResult::err`, not `Err` — only
    /// the transport around the tool may fail structurally.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
