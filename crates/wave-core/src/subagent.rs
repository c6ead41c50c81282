// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The sub-agent runner.
//!
//! The `Task` tool delegates a focused prompt to a named sub-agent
//! configuration.  The runner opens a `subagent` container block in the
//! parent transcript, runs the same turn algorithm against a private
//! transcript (permission mode inherited, tools filtered to the config's
//! whitelist, model optionally overridden), and mirrors every private
//! change into the container.  The final assistant text becomes the tool
//! result; backgrounded runs hand back a task id instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use wave_runtime::{Shared, SubAgentConfig};
use wave_tools::{Tool, ToolContext, ToolResult};
use wave_transcript::{BlockDelta, BlockId, MessageId, SubAgentStatus, TranscriptStore};

use crate::engine::{fatal, Engine, Mirror, TurnInput};

/// Schema-bearing registry entry for `Task`.  The engine intercepts the
/// call before registry dispatch — sub-agent runs re-enter the engine, so
/// they cannot live behind the plain tool interface.
pub struct TaskTool {
    description: String,
}

impl TaskTool {
    pub fn new(subagents: &Shared<SubAgentConfig>) -> Self {
        let configs = subagents.get();
        let mut description = String::from(
            "Delegate a focused task to a named sub-agent and return its \
             final text output. The sub-agent works on a private transcript \
             with its own system prompt and tool whitelist.",
        );
        if !configs.is_empty() {
            description.push_str("\n\nAvailable sub-agents:");
            for config in configs.iter() {
                description.push_str(&format!("\n- {}: {}", config.name, config.description));
            }
        }
        Self { description }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "Task"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subagent": {
                    "type": "string",
                    "description": "Name of the sub-agent configuration to run"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task for the sub-agent"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Detach the run and return a task id"
                }
            },
            "required": ["subagent", "prompt"],
            "additionalProperties": false
        })
    }

    fn format_compact_params(&self, args: &Value) -> String {
        args.get("subagent")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        // Reached only if a host wires this tool into a foreign dispatcher.
        ToolResult::err("Task is dispatched by the turn engine")
    }
}

fn set_status(engine: &Engine, message_id: MessageId, block_id: BlockId, status: SubAgentStatus) {
    engine.with_parent_store(|store| {
        let _ = store.update_block(message_id, block_id, BlockDelta::SetSubAgentStatus(status));
    });
}

impl Engine {
    /// Mutate the transcript this engine writes to and dispatch events.
    /// Identical to the engine's own store access; named separately for the
    /// runner's status updates.
    pub(crate) fn with_parent_store<R>(&self, f: impl FnOnce(&mut TranscriptStore) -> R) -> R {
        let result = {
            let mut store = self.store.lock().unwrap();
            f(&mut store)
        };
        self.sync();
        result
    }
}

/// Run one `Task` invocation.  Called by the engine's tool dispatch.
pub(crate) async fn run_task(
    engine: &Engine,
    assistant_id: MessageId,
    args: &Value,
    cancel: &CancellationToken,
) -> ToolResult {
    let Some(prompt) = args.get("prompt").and_then(|v| v.as_str()) else {
        return ToolResult::err("missing 'prompt'");
    };
    let Some(name) = args.get("subagent").and_then(|v| v.as_str()) else {
        return ToolResult::err("missing 'subagent'");
    };
    let run_in_background = args
        .get("run_in_background")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if engine.depth >= engine.max_subagent_depth {
        return ToolResult::err(format!(
            "maximum sub-agent depth ({}) reached",
            engine.max_subagent_depth
        ));
    }

    let configs = engine.subagents.get();
    let Some(config) = configs.iter().find(|c| c.name == name) else {
        let known: Vec<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        return ToolResult::err(format!(
            "unknown sub-agent: {name} (available: {})",
            known.join(", ")
        ));
    };

    let subagent_id = Uuid::new_v4().to_string();
    let block_id = engine.with_parent_store(|store| {
        fatal(store.add_subagent_block(assistant_id, &subagent_id, name))
    });
    debug!(subagent = name, id = %subagent_id, depth = engine.depth + 1, "spawning sub-agent");

    // Child engine over a private transcript, mirroring into the container.
    let mut child = engine.clone();
    child.store = Arc::new(Mutex::new(TranscriptStore::new()));
    child.amendments = Arc::new(Mutex::new(HashMap::new()));
    child.system_prompt_base = Some(config.system_prompt.clone());
    child.depth = engine.depth + 1;
    if !config.tools.is_empty() {
        child.tool_filter = Some(config.tools.clone());
    }
    if let Some(model) = &config.model {
        child.agent_model = model.clone();
    }
    child.mirror = Some(Mirror {
        parent_store: Arc::clone(&engine.store),
        parent_dispatcher: Arc::clone(&engine.dispatcher),
        message_id: assistant_id,
        block_id,
    });

    let input = TurnInput::text(prompt);

    // Boxed to break the `run_turn → Task → run_turn` future-type cycle.
    fn boxed_turn(
        engine: Engine,
        input: TurnInput,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<String>> {
        Box::pin(async move { engine.run_turn(input, cancel).await })
    }

    if run_in_background {
        let bg_cancel = CancellationToken::new();
        let task_id = engine.tasks.register_subagent(name, bg_cancel.clone());
        set_status(engine, assistant_id, block_id, SubAgentStatus::Backgrounded);

        let parent = engine.clone();
        let tasks = Arc::clone(&engine.tasks);
        let bg_task_id = task_id.clone();
        let turn = boxed_turn(child, input, bg_cancel);
        tokio::spawn(async move {
            match turn.await {
                Ok(text) => {
                    tasks.complete_subagent(&bg_task_id, &text, false);
                    set_status(&parent, assistant_id, block_id, SubAgentStatus::Completed);
                }
                Err(e) => {
                    tasks.complete_subagent(&bg_task_id, &format!("sub-agent error: {e}"), true);
                    set_status(&parent, assistant_id, block_id, SubAgentStatus::Failed);
                }
            }
        });

        return ToolResult::ok(format!(
            "Sub-agent '{name}' running in background with task id: {task_id}\n\
             Use TaskOutput to read its final output."
        ))
        .with_short(format!("background {task_id}"));
    }

    match boxed_turn(child, input, cancel.child_token()).await {
        Ok(text) => {
            set_status(engine, assistant_id, block_id, SubAgentStatus::Completed);
            if text.is_empty() {
                ToolResult::ok("(sub-agent produced no text output)")
            } else {
                ToolResult::ok(text).with_short(format!("{name} finished"))
            }
        }
        Err(e) => {
            set_status(engine, assistant_id, block_id, SubAgentStatus::Failed);
            ToolResult::err(format!("sub-agent error: {e}"))
        }
    }
}
