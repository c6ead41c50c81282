// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn engine: one user-to-quiescence loop of LLM calls and tool
//! execution.
//!
//! A turn commits the user message, runs `UserPromptSubmit` hooks, then
//! repeats streaming completion → concurrent tool dispatch → result append
//! until the model stops calling tools, and finally runs `Stop` hooks
//! (which may restart the loop, bounded by [`MAX_STOP_RESTARTS`]).  All
//! transcript writes funnel through the single store mutex; host callbacks
//! fire outside it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wave_config::{HookEvent, PermissionMode};
use wave_hooks::{HookInput, HookRunResult, HookRunner, PermissionDirective};
use wave_model::{CompletionRequest, Message as WireMessage, ModelProvider, StreamEvent};
use wave_runtime::{Rule, Shared, SubAgentConfig};
use wave_tasks::TaskManager;
use wave_tools::{
    DiffSink, GateDecision, LspManager, McpManager, MemorySink, ModeState, PermissionGate,
    ReversionManager, Tool, ToolContext, ToolPermissionContext, ToolRegistry, ToolResult,
};
use wave_transcript::{
    BlockDelta, BlockId, BlockPayload, CustomCommandBlock, ImageAttachment, MessageId,
    ToolTerminal, TranscriptError, TranscriptStore, UsageEntry,
};

use crate::dispatcher::EventDispatcher;
use crate::projection::project;
use crate::prompts::system_prompt;
use crate::subagent;

/// Bound on `Stop`-hook-triggered turn restarts.
pub const MAX_STOP_RESTARTS: u32 = 3;

/// Input for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub images: Vec<ImageAttachment>,
    /// The active slash-command's `allowed-tools` whitelist.
    pub whitelist: Vec<String>,
    pub model_override: Option<String>,
    /// Set when the turn came from a custom slash-command expansion.
    pub custom_command: Option<CustomCommandBlock>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Mirroring target for sub-agent engines: every child transcript change is
/// copied into the parent's `subagent` container block.
#[derive(Clone)]
pub(crate) struct Mirror {
    pub parent_store: Arc<Mutex<TranscriptStore>>,
    pub parent_dispatcher: Arc<EventDispatcher>,
    pub message_id: MessageId,
    pub block_id: BlockId,
}

/// One engine instance drives one transcript — the session's, or a private
/// one when running as a sub-agent.  Cloning shares every collaborator.
#[derive(Clone)]
pub struct Engine {
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) gate: Arc<PermissionGate>,
    pub(crate) tasks: Arc<TaskManager>,
    pub(crate) hooks: Arc<HookRunner>,
    pub(crate) mode_state: Arc<Mutex<ModeState>>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) store: Arc<Mutex<TranscriptStore>>,
    /// PostToolUse amendments by call id, applied at projection time.
    pub(crate) amendments: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) rules: Arc<Vec<Rule>>,
    pub(crate) subagents: Shared<SubAgentConfig>,
    pub(crate) agent_model: String,
    pub(crate) fast_model: String,
    pub(crate) system_prompt_base: Option<String>,
    pub(crate) workdir: PathBuf,
    pub(crate) token_limit: usize,
    pub(crate) bash_timeout_secs: u64,
    pub(crate) max_subagent_depth: usize,
    /// Sub-agent nesting depth of this engine (0 = session engine).
    pub(crate) depth: usize,
    /// Static tool restriction for sub-agent engines; `None` = everything.
    pub(crate) tool_filter: Option<Vec<String>>,
    pub(crate) reversion: Option<Arc<dyn ReversionManager>>,
    pub(crate) mcp: Option<Arc<dyn McpManager>>,
    pub(crate) lsp: Option<Arc<dyn LspManager>>,
    pub(crate) settings_env: Vec<(String, String)>,
    pub(crate) mirror: Option<Mirror>,
}

/// Transcript-invariant failures are programmer errors; crash loudly.
pub(crate) fn fatal<T>(result: Result<T, TranscriptError>) -> T {
    result.unwrap_or_else(|e| panic!("transcript invariant violated: {e}"))
}

struct StreamedCall {
    block_id: BlockId,
    call_id: String,
    name: String,
    parameters: String,
}

struct StreamOutcome {
    calls: Vec<StreamedCall>,
    aborted: bool,
    transport_error: Option<String>,
}

struct CallOutcome {
    result: ToolResult,
    diffs: Vec<wave_transcript::DiffBlock>,
    memories: Vec<wave_transcript::MemoryBlock>,
    warnings: Vec<String>,
    system_messages: Vec<String>,
    added_context: Vec<String>,
    amendment: Option<String>,
}

impl Engine {
    pub(crate) fn session_id(&self) -> String {
        self.store.lock().unwrap().session_id.clone()
    }

    pub(crate) fn current_mode(&self) -> PermissionMode {
        self.mode_state.lock().unwrap().mode
    }

    fn plan_dir(&self) -> PathBuf {
        self.workdir.join(".wave").join("plans")
    }

    /// Drain store events, dispatch them, and mirror into the parent
    /// container when this engine runs a sub-agent.
    pub(crate) fn sync(&self) {
        let (events, snapshot, usages) = {
            let mut store = self.store.lock().unwrap();
            (
                store.drain_events(),
                store.snapshot(),
                store.usages().to_vec(),
            )
        };
        let changed = !events.is_empty();
        self.dispatcher.dispatch(events, &snapshot, &usages);
        if changed {
            if let Some(mirror) = &self.mirror {
                let (events, parent_snapshot, parent_usages) = {
                    let mut parent = mirror.parent_store.lock().unwrap();
                    let _ = parent.update_block(
                        mirror.message_id,
                        mirror.block_id,
                        BlockDelta::SetSubAgentMessages(snapshot),
                    );
                    (
                        parent.drain_events(),
                        parent.snapshot(),
                        parent.usages().to_vec(),
                    )
                };
                mirror
                    .parent_dispatcher
                    .dispatch(events, &parent_snapshot, &parent_usages);
            }
        }
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut TranscriptStore) -> R) -> R {
        let result = {
            let mut store = self.store.lock().unwrap();
            f(&mut store)
        };
        self.sync();
        result
    }

    /// Whether a tool is offered to the model under the current mode and
    /// this engine's static filter.
    fn tool_available(&self, tool: &dyn Tool) -> bool {
        if let Some(filter) = &self.tool_filter {
            if !filter.iter().any(|n| n == tool.name()) {
                return false;
            }
        }
        match self.current_mode() {
            PermissionMode::Plan => tool.is_read_only() || tool.is_file_edit(),
            _ => true,
        }
    }

    fn wire_tools(&self) -> Vec<wave_model::ToolSchema> {
        let allowed: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| {
                self.registry
                    .get(name)
                    .map(|t| self.tool_available(t.as_ref()))
                    .unwrap_or(false)
            })
            .collect();
        self.registry
            .schemas_filtered(Some(&allowed))
            .into_iter()
            .map(|s| wave_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    fn compose_system_prompt(&self) -> String {
        let allowed: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| {
                self.registry
                    .get(name)
                    .map(|t| self.tool_available(t.as_ref()))
                    .unwrap_or(false)
            })
            .collect();
        let fragments = self.registry.prompt_fragments(Some(&allowed));
        system_prompt(
            self.current_mode(),
            self.system_prompt_base.as_deref(),
            &fragments,
            &self.rules,
        )
    }

    fn apply_hook_feedback(&self, result: &HookRunResult) {
        for warning in &result.warnings {
            self.dispatcher.warn(warning);
        }
        for message in &result.system_messages {
            self.dispatcher.hook_message(message);
        }
    }

    pub(crate) fn tool_context(
        &self,
        call_id: &str,
        cancel: CancellationToken,
        diff_sink: Option<DiffSink>,
        memory_sink: Option<MemorySink>,
    ) -> ToolContext {
        ToolContext {
            workdir: self.workdir.clone(),
            cancel,
            permission_mode: self.current_mode(),
            session_id: self.session_id(),
            call_id: call_id.to_string(),
            gate: Arc::clone(&self.gate),
            tasks: Arc::clone(&self.tasks),
            mode_state: Arc::clone(&self.mode_state),
            reversion: self.reversion.clone(),
            mcp: self.mcp.clone(),
            lsp: self.lsp.clone(),
            diff_sink,
            memory_sink,
            bash_env: self.settings_env.clone(),
            bash_timeout_secs: self.bash_timeout_secs,
        }
    }

    /// Compact if the projection exceeds the trigger, or unconditionally
    /// when `force` (the `/compact` builtin).  The store lock is never held
    /// across the summary call.
    pub(crate) async fn compact(&self, force: bool) -> Option<crate::compact::Compacted> {
        let amendments = self.amendments.lock().unwrap().clone();
        let plan = {
            let store = self.store.lock().unwrap();
            crate::compact::plan(store.messages(), self.token_limit, force, &amendments)
        }?;
        let summary =
            crate::compact::summarize(self.provider.as_ref(), &self.fast_model, &plan).await?;
        let result = {
            let mut store = self.store.lock().unwrap();
            crate::compact::apply(&mut store, plan, summary, &amendments)
        };
        self.sync();
        Some(result)
    }

    /// Run one full turn.  Returns the final assistant text; every
    /// non-fatal failure is reified as a block or callback first.
    pub async fn run_turn(
        &self,
        input: TurnInput,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        let _ = self.compact(false).await;

        // ── User commit ────────────────────────────────────────────────────────
        let user_msg_id = self.with_store(|store| {
            let id = store.append_user_message(&input.text, input.images.clone());
            if let Some(command) = &input.custom_command {
                fatal(store.add_custom_command_block(id, command.clone()));
            }
            id
        });
        if let Some(reversion) = &self.reversion {
            let index = {
                let store = self.store.lock().unwrap();
                store
                    .messages()
                    .iter()
                    .filter(|m| m.role == wave_transcript::MessageRole::User)
                    .count()
                    - 1
            };
            reversion.mark_user_message(index);
        }

        // ── UserPromptSubmit hooks ─────────────────────────────────────────────
        let mut pending_context: Vec<String> = Vec::new();
        if self.hooks.has_hooks(HookEvent::UserPromptSubmit) {
            let result = self
                .hooks
                .run(
                    HookInput::UserPromptSubmit {
                        user_prompt: &input.text,
                    },
                    &cancel,
                )
                .await;
            self.apply_hook_feedback(&result);
            if result.aborted {
                return Ok(String::new());
            }
            if let Some(block) = result.block {
                self.with_store(|store| fatal(store.rollback_message(user_msg_id)));
                let message = if block.stderr.is_empty() {
                    "prompt rejected by hook".to_string()
                } else {
                    block.stderr
                };
                self.dispatcher.transient_error(message);
                return Ok(String::new());
            }
            pending_context.extend(result.added_context);
        }

        // ── LLM ↔ tool loop ────────────────────────────────────────────────────
        let model = input
            .model_override
            .clone()
            .unwrap_or_else(|| self.agent_model.clone());
        let whitelist = Arc::new(input.whitelist.clone());
        let mut assistant_id = self.with_store(|s| s.append_assistant_message());
        let mut stop_restarts = 0u32;

        loop {
            let request = {
                let mut wire = vec![WireMessage::system(self.compose_system_prompt())];
                let amendments = self.amendments.lock().unwrap().clone();
                let store = self.store.lock().unwrap();
                wire.extend(project(store.messages(), &amendments));
                drop(store);
                // Hook-injected context rides on the next call only.
                for context in pending_context.drain(..) {
                    wire.push(WireMessage::user(context));
                }
                CompletionRequest {
                    model: model.clone(),
                    messages: wire,
                    tools: self.wire_tools(),
                    stream: true,
                }
            };

            let outcome = self.stream_once(assistant_id, &model, request, &cancel).await;

            if let Some(error) = outcome.transport_error {
                self.with_store(|s| fatal(s.add_error_block(assistant_id, error)));
                break;
            }
            if outcome.aborted {
                return Ok(self.finish_aborted(assistant_id));
            }

            if outcome.calls.is_empty() {
                // ── Stop hooks ─────────────────────────────────────────────────
                if self.hooks.has_hooks(HookEvent::Stop) {
                    let result = self.hooks.run(HookInput::Stop, &cancel).await;
                    self.apply_hook_feedback(&result);
                    if result.aborted {
                        return Ok(self.finish_aborted(assistant_id));
                    }
                    if let Some(block) = result.block {
                        if stop_restarts < MAX_STOP_RESTARTS {
                            stop_restarts += 1;
                            let reason = block
                                .stop_reason
                                .filter(|r| !r.is_empty())
                                .unwrap_or(block.stderr);
                            debug!(reason = %reason, "Stop hook blocked; restarting turn");
                            self.with_store(|s| {
                                s.append_user_message(&reason, vec![]);
                            });
                            assistant_id = self.with_store(|s| s.append_assistant_message());
                            continue;
                        }
                        warn!("Stop hook still blocking after {MAX_STOP_RESTARTS} restarts; ending turn");
                    }
                }
                break;
            }

            // ── Parse & dispatch tool calls ────────────────────────────────────
            let mut executable: Vec<(StreamedCall, Value)> = Vec::new();
            for call in outcome.calls {
                match parse_parameters(&call.parameters) {
                    Ok(args) => {
                        self.with_store(|s| {
                            fatal(s.update_block(
                                assistant_id,
                                call.block_id,
                                BlockDelta::StartTool {
                                    parsed_args: args.clone(),
                                },
                            ))
                        });
                        executable.push((call, args));
                    }
                    Err(e) => {
                        debug!(tool = %call.name, error = %e, "tool arguments never parsed");
                        self.with_store(|s| {
                            fatal(s.close_tool_block(
                                assistant_id,
                                call.block_id,
                                ToolTerminal {
                                    success: false,
                                    error: Some("invalid arguments".into()),
                                    ..ToolTerminal::default()
                                },
                            ))
                        });
                    }
                }
            }

            // Dispatch in parallel; results land in stream order.
            let mut handles = Vec::with_capacity(executable.len());
            for (call, args) in &executable {
                let engine = self.clone();
                let whitelist = Arc::clone(&whitelist);
                let call_id = call.call_id.clone();
                let name = call.name.clone();
                let args = args.clone();
                let child_cancel = cancel.child_token();
                handles.push(tokio::spawn(async move {
                    execute_call(engine, assistant_id, call_id, name, args, whitelist, child_cancel)
                        .await
                }));
            }

            for ((call, _), handle) in executable.into_iter().zip(handles) {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => CallOutcome {
                        result: ToolResult::err(format!("tool panicked: {e}")),
                        diffs: vec![],
                        memories: vec![],
                        warnings: vec![],
                        system_messages: vec![],
                        added_context: vec![],
                        amendment: None,
                    },
                };
                let result = outcome.result;
                self.with_store(|s| {
                    fatal(s.close_tool_block(
                        assistant_id,
                        call.block_id,
                        ToolTerminal {
                            success: result.success,
                            result: result.content.clone(),
                            short_result: result.short_result.clone(),
                            error: result.error.clone(),
                            images: result.images.clone(),
                        },
                    ));
                    for diff in outcome.diffs {
                        fatal(s.add_diff_block(assistant_id, diff));
                    }
                    for memory in outcome.memories {
                        fatal(s.add_memory_block(assistant_id, memory));
                    }
                });
                if let Some(amendment) = outcome.amendment {
                    self.amendments
                        .lock()
                        .unwrap()
                        .insert(call.call_id.clone(), amendment);
                }
                for warning in outcome.warnings {
                    self.dispatcher.warn(&warning);
                }
                for message in outcome.system_messages {
                    self.dispatcher.hook_message(&message);
                }
                pending_context.extend(outcome.added_context);
            }
            self.dispatcher.tasks_change(&self.tasks.get_all_tasks());
        }

        Ok(self.final_text(assistant_id))
    }

    /// Stream one completion, multiplexing deltas into transcript blocks.
    async fn stream_once(
        &self,
        assistant_id: MessageId,
        model: &str,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        #[derive(Default)]
        struct Pending {
            id: String,
            name: String,
            /// Argument text seen before the block could open.
            backlog: String,
            /// Full accumulated argument text.
            all: String,
            block: Option<BlockId>,
        }

        let mut stream = match self.provider.complete(request).await {
            Ok(s) => s,
            Err(e) => {
                return StreamOutcome {
                    calls: vec![],
                    aborted: false,
                    transport_error: Some(e.to_string()),
                }
            }
        };

        let mut text_block: Option<BlockId> = None;
        let mut pending: BTreeMap<u32, Pending> = BTreeMap::new();
        let mut open_order: Vec<u32> = Vec::new();
        let mut aborted = false;
        let mut transport_error = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    aborted = true;
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            match event {
                Err(e) => {
                    transport_error = Some(e.to_string());
                    break;
                }
                Ok(StreamEvent::TextDelta(delta)) if !delta.is_empty() => {
                    let block = match text_block {
                        Some(b) => b,
                        None => {
                            let b = self.with_store(|s| {
                                fatal(s.open_block(assistant_id, BlockPayload::text("")))
                            });
                            text_block = Some(b);
                            b
                        }
                    };
                    self.with_store(|s| {
                        fatal(s.update_block(assistant_id, block, BlockDelta::AppendText(delta)))
                    });
                }
                Ok(StreamEvent::TextDelta(_)) => {}
                Ok(StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                }) => {
                    let entry = pending.entry(index).or_default();
                    if entry.id.is_empty() && !id.is_empty() {
                        entry.id = id;
                    }
                    if entry.name.is_empty() && !name.is_empty() {
                        entry.name = name;
                    }
                    entry.all.push_str(&arguments);
                    if entry.block.is_none() && !entry.id.is_empty() && !entry.name.is_empty() {
                        let block = self.with_store(|s| {
                            fatal(s.add_tool_block(assistant_id, &entry.id, &entry.name))
                        });
                        entry.block = Some(block);
                        open_order.push(index);
                        if !entry.backlog.is_empty() {
                            let backlog = std::mem::take(&mut entry.backlog);
                            self.with_store(|s| {
                                fatal(s.update_block(
                                    assistant_id,
                                    block,
                                    BlockDelta::AppendParameters(backlog),
                                ))
                            });
                        }
                    }
                    if arguments.is_empty() {
                        continue;
                    }
                    match entry.block {
                        Some(block) => self.with_store(|s| {
                            fatal(s.update_block(
                                assistant_id,
                                block,
                                BlockDelta::AppendParameters(arguments),
                            ))
                        }),
                        None => entry.backlog.push_str(&arguments),
                    }
                }
                Ok(StreamEvent::Usage(usage)) => {
                    self.with_store(|s| {
                        s.add_usage(UsageEntry {
                            model: model.to_string(),
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                            cache_read_input_tokens: usage.cache_read_input_tokens,
                            cache_creation_input_tokens: usage.cache_creation_input_tokens,
                        })
                    });
                }
                Ok(StreamEvent::Done) => break,
                Ok(StreamEvent::Error(e)) => {
                    warn!(error = %e, "model stream error");
                }
            }
        }

        if let Some(block) = text_block {
            self.with_store(|s| fatal(s.freeze_text_block(assistant_id, block)));
        }

        // Flush calls whose id or name never arrived in the stream.
        for (index, entry) in pending.iter_mut() {
            if entry.block.is_some() {
                continue;
            }
            if entry.name.is_empty() {
                warn!(index = *index, "dropping tool call with empty name from model");
                continue;
            }
            if entry.id.is_empty() {
                entry.id = format!("tc_synthetic_{index}");
                warn!(tool = %entry.name, id = %entry.id, "tool call had no id; synthesized one");
            }
            let block = self
                .with_store(|s| fatal(s.add_tool_block(assistant_id, &entry.id, &entry.name)));
            if !entry.all.is_empty() {
                let all = entry.all.clone();
                self.with_store(|s| {
                    fatal(s.update_block(assistant_id, block, BlockDelta::AppendParameters(all)))
                });
            }
            entry.block = Some(block);
            open_order.push(*index);
        }

        if aborted || transport_error.is_some() {
            // Close whatever opened so no block stays pending.
            let reason = if aborted { "aborted" } else { "stream error" };
            for entry in pending.values() {
                if let Some(block) = entry.block {
                    self.with_store(|s| {
                        fatal(s.close_tool_block(
                            assistant_id,
                            block,
                            ToolTerminal {
                                success: false,
                                error: Some(reason.into()),
                                ..ToolTerminal::default()
                            },
                        ))
                    });
                }
            }
            return StreamOutcome {
                calls: vec![],
                aborted,
                transport_error,
            };
        }

        let calls = open_order
            .into_iter()
            .filter_map(|index| {
                let entry = pending.get(&index)?;
                Some(StreamedCall {
                    block_id: entry.block?,
                    call_id: entry.id.clone(),
                    name: entry.name.clone(),
                    parameters: entry.all.clone(),
                })
            })
            .collect();

        StreamOutcome {
            calls,
            aborted: false,
            transport_error: None,
        }
    }

    /// Close out an aborted turn: freeze text, fail anything in flight,
    /// and make sure something tells the user what happened.
    fn finish_aborted(&self, assistant_id: MessageId) -> String {
        let text = self.final_text(assistant_id);
        if text.is_empty() {
            self.with_store(|s| fatal(s.add_error_block(assistant_id, "aborted")));
        }
        text
    }

    fn final_text(&self, assistant_id: MessageId) -> String {
        let store = self.store.lock().unwrap();
        store
            .messages()
            .iter()
            .find(|m| m.id == assistant_id)
            .map(|m| m.text())
            .unwrap_or_default()
    }
}

/// Parse streamed tool parameters exactly once.  Empty input means "no
/// arguments" — providers send that for zero-parameter tools.
fn parse_parameters(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

/// Run one tool call end to end: PreToolUse hooks, the permission gate,
/// execution, PostToolUse hooks.  Runs on its own task; everything it
/// needs travels in the cloned engine.
async fn execute_call(
    engine: Engine,
    assistant_id: MessageId,
    call_id: String,
    name: String,
    args: Value,
    whitelist: Arc<Vec<String>>,
    cancel: CancellationToken,
) -> CallOutcome {
    let mut warnings = Vec::new();
    let mut system_messages = Vec::new();
    let mut added_context = Vec::new();
    let mut args = args;
    let mut result: Option<ToolResult> = None;
    let mut hook_decision: Option<(PermissionDirective, Option<String>)> = None;

    // ── PreToolUse ────────────────────────────────────────────────────────────
    if engine.hooks.has_hooks(HookEvent::PreToolUse) {
        let pre = engine
            .hooks
            .run(
                HookInput::PreToolUse {
                    tool_name: &name,
                    tool_input: &args,
                },
                &cancel,
            )
            .await;
        warnings.extend(pre.warnings);
        system_messages.extend(pre.system_messages);
        added_context.extend(pre.added_context);
        if pre.aborted {
            result = Some(ToolResult::err("aborted"));
        } else if let Some(block) = pre.block {
            let message = if block.stderr.is_empty() {
                "blocked by hook".to_string()
            } else {
                block.stderr
            };
            result = Some(ToolResult::err(message));
        } else {
            if let Some(updated) = pre.updated_input {
                debug!(tool = %name, "hook replaced tool input");
                args = updated;
            }
            hook_decision = pre.permission_decision;
        }
    }

    let tool = engine.registry.get(&name);

    // Sub-agent engines only see their whitelisted tools.
    if result.is_none() {
        if let Some(filter) = &engine.tool_filter {
            if !filter.iter().any(|n| n == &name) {
                result = Some(ToolResult::err(format!("tool not available: {name}")));
            }
        }
    }

    // ── Permission gate ───────────────────────────────────────────────────────
    if result.is_none() {
        let mode = engine.current_mode();
        let decision = match &hook_decision {
            Some((PermissionDirective::Allow, _)) => GateDecision::Allow,
            Some((PermissionDirective::Deny, reason)) => GateDecision::Deny(
                reason
                    .clone()
                    .unwrap_or_else(|| "denied by hook".to_string()),
            ),
            Some((PermissionDirective::Ask, _)) => GateDecision::Ask,
            None => match &tool {
                Some(t) => engine.gate.pre_decision(
                    t.as_ref(),
                    &args,
                    mode,
                    &whitelist,
                    &engine.plan_dir(),
                ),
                // Unregistered names (MCP passthrough) have no classification;
                // only bypass skips the host.
                None if mode == PermissionMode::BypassPermissions => GateDecision::Allow,
                None => GateDecision::Ask,
            },
        };
        match decision {
            GateDecision::Allow => {}
            GateDecision::Deny(message) => result = Some(ToolResult::err(message)),
            GateDecision::Ask => {
                let decision = engine
                    .gate
                    .ask(ToolPermissionContext {
                        tool_name: name.clone(),
                        tool_input: args.clone(),
                        mode,
                        session_id: engine.session_id(),
                    })
                    .await;
                if !decision.is_allow() {
                    result = Some(ToolResult::err(
                        decision
                            .message
                            .unwrap_or_else(|| "permission denied".to_string()),
                    ));
                }
            }
        }
    }

    // ── Execute ───────────────────────────────────────────────────────────────
    let diffs: Arc<Mutex<Vec<wave_transcript::DiffBlock>>> = Arc::new(Mutex::new(Vec::new()));
    let memories: Arc<Mutex<Vec<wave_transcript::MemoryBlock>>> = Arc::new(Mutex::new(Vec::new()));
    if result.is_none() {
        debug!(tool = %name, call = %call_id, "executing tool");
        let executed = if name == "Task" {
            subagent::run_task(&engine, assistant_id, &args, &cancel).await
        } else {
            match &tool {
                Some(t) => {
                    let diff_target = Arc::clone(&diffs);
                    let diff_sink: DiffSink =
                        Arc::new(move |d| diff_target.lock().unwrap().push(d));
                    let memory_target = Arc::clone(&memories);
                    let memory_sink: MemorySink =
                        Arc::new(move |m| memory_target.lock().unwrap().push(m));
                    let ctx = engine.tool_context(
                        &call_id,
                        cancel.clone(),
                        Some(diff_sink),
                        Some(memory_sink),
                    );
                    t.execute(args.clone(), &ctx).await
                }
                None => try_mcp(&engine, &name, &args, &cancel).await,
            }
        };
        result = Some(executed);
    }
    let mut result = result.expect("result settled above");

    // ── PostToolUse ───────────────────────────────────────────────────────────
    let mut amendment = None;
    if engine.hooks.has_hooks(HookEvent::PostToolUse) {
        let response = json!({
            "success": result.success,
            "content": result.content,
            "error": result.error,
        });
        let post = engine
            .hooks
            .run(
                HookInput::PostToolUse {
                    tool_name: &name,
                    tool_input: &args,
                    tool_response: &response,
                },
                &cancel,
            )
            .await;
        warnings.extend(post.warnings);
        system_messages.extend(post.system_messages);
        added_context.extend(post.added_context);
        if let Some(block) = post.block {
            // The tool already ran; the amendment reaches the model at
            // projection time without rewriting the transcript.
            amendment = Some(format!("[hook error] {}", block.stderr));
        }
    }

    if result.short_result.is_none() && !result.content.is_empty() {
        let first_line = result.content.lines().next().unwrap_or("").to_string();
        result.short_result = Some(first_line);
    }

    let taken_diffs = std::mem::take(&mut *diffs.lock().unwrap());
    let taken_memories = std::mem::take(&mut *memories.lock().unwrap());
    CallOutcome {
        result,
        diffs: taken_diffs,
        memories: taken_memories,
        warnings,
        system_messages,
        added_context,
        amendment,
    }
}

/// Dispatch an `mcp__<server>__<tool>` name through the MCP collaborator.
async fn try_mcp(
    engine: &Engine,
    name: &str,
    args: &Value,
    cancel: &CancellationToken,
) -> ToolResult {
    let Some(mcp) = &engine.mcp else {
        return ToolResult::err(format!("unknown tool: {name}"));
    };
    let Some(rest) = name.strip_prefix("mcp__") else {
        return ToolResult::err(format!("unknown tool: {name}"));
    };
    let Some((server, tool)) = rest.split_once("__") else {
        return ToolResult::err(format!("malformed MCP tool name: {name}"));
    };
    let call = mcp.call_tool(server, tool, args.clone());
    tokio::select! {
        _ = cancel.cancelled() => ToolResult::err("aborted"),
        outcome = call => match outcome {
            Ok(value) => {
                let content = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                ToolResult::ok(content)
            }
            Err(e) => ToolResult::err(format!("MCP call failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parameters_parse_to_empty_object() {
        assert_eq!(parse_parameters("").unwrap(), json!({}));
        assert_eq!(parse_parameters("  ").unwrap(), json!({}));
    }

    #[test]
    fn valid_parameters_parse_once() {
        let v = parse_parameters(r#"{"command":"echo ok"}"#).unwrap();
        assert_eq!(v["command"], "echo ok");
    }

    #[test]
    fn malformed_parameters_are_an_error() {
        assert!(parse_parameters(r#"{"command":"#).is_err());
    }
}
