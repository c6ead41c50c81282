// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The long-lived `Agent` a host drives.
//!
//! `create` wires every subsystem from the resolved config and the on-disk
//! `.wave/` surface; `send_message` runs one turn to quiescence.  Only
//! [`ConfigError`] escapes `create`, and `send_message` resolves normally
//! with the latest assistant text for every non-fatal failure — errors are
//! reified as blocks and callbacks on the way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use wave_config::{load_settings, AgentConfig, ConfigError, McpServerSpec};
use wave_model::{GatewayProvider, ModelProvider};
use wave_runtime::{
    discover_commands, discover_plugins, discover_rules, discover_skills, discover_subagents,
    expand_command, load_mcp_servers, plugins::plugin_hooks, CustomCommand, Plugin, Shared,
};
use wave_tasks::{TaskManager, TaskSnapshot};
use wave_tools::{
    AskUserQuestionTool, BashTool, CanUseTool, DeleteTool, EditTool, EnterPlanModeTool,
    ExitPlanModeTool, GlobTool, GrepTool, LspManager, LsTool, McpManager, MemoryWriteTool,
    ModeState, PendingPermission, PermissionDecision, PermissionGate, ReadTool, ReversionManager,
    SkillTool, TaskOutputTool, TaskStopTool, TodoItem, TodoWriteTool, Tool, ToolRegistry,
    WriteTool,
};
use wave_transcript::{
    CustomCommandBlock, ImageAttachment, Message, TranscriptStore, UsageEntry,
};

use crate::dispatcher::{AgentCallbacks, EventDispatcher};
use crate::engine::{Engine, TurnInput};
use crate::slash::{self, SlashCommandInfo};
use crate::subagent::TaskTool;

/// Non-serializable collaborators and overrides passed alongside the config.
#[derive(Default)]
pub struct AgentHandles {
    /// Model provider override; defaults to the OpenAI-compatible gateway
    /// driver built from `base_url`/`api_key`.
    pub provider: Option<Arc<dyn ModelProvider>>,
    pub callbacks: AgentCallbacks,
    pub can_use_tool: Option<CanUseTool>,
    pub reversion: Option<Arc<dyn ReversionManager>>,
    pub mcp: Option<Arc<dyn McpManager>>,
    pub lsp: Option<Arc<dyn LspManager>>,
    /// Additional tools (e.g. MCP wrappers the host pre-resolved).
    pub extra_tools: Vec<Arc<dyn Tool>>,
    /// Seed transcript for restored sessions.
    pub seed_messages: Vec<Message>,
}

/// Drops `loading` back to false on every exit path.
struct LoadingGuard(Arc<AtomicBool>);

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Agent {
    engine: Engine,
    loading: Arc<AtomicBool>,
    turn_cancel: Mutex<Option<CancellationToken>>,
    input_history: Mutex<Vec<String>>,
    commands: Shared<CustomCommand>,
    plugins: Vec<Plugin>,
    project_dir: PathBuf,
    mcp_servers: HashMap<String, McpServerSpec>,
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl Agent {
    /// Create an agent with no host collaborators beyond the config.
    pub fn create(config: AgentConfig) -> Result<Self, ConfigError> {
        Self::create_with(config, AgentHandles::default())
    }

    /// Create an agent, wiring in host collaborators.
    pub fn create_with(config: AgentConfig, handles: AgentHandles) -> Result<Self, ConfigError> {
        let config = config.resolve()?;
        let project_dir = config.workdir.clone();
        let settings = load_settings(&project_dir)?;

        let plugins = discover_plugins(&config.plugins);
        let commands = Shared::new(discover_commands(&project_dir, &plugins));
        let subagents = Shared::new(discover_subagents(&project_dir, &plugins));
        let skills = Shared::new(discover_skills(&project_dir, &plugins));
        let rules = Arc::new(discover_rules(&project_dir));
        let mut mcp_servers = load_mcp_servers(&project_dir);
        mcp_servers.extend(config.mcp_servers.clone());

        // Hook layers: inline config, project settings, then plugins.
        let mut hooks = config.hooks.clone();
        for (event, matchers) in settings.hooks.clone() {
            hooks.entry(event).or_default().extend(matchers);
        }
        for plugin in &plugins {
            for (event, matchers) in plugin_hooks(plugin) {
                hooks.entry(event).or_default().extend(matchers);
            }
        }

        let store = if handles.seed_messages.is_empty() {
            TranscriptStore::new()
        } else {
            TranscriptStore::with_seed(handles.seed_messages)
        };
        let session_id = store.session_id.clone();
        let transcript_path = config.transcript_path.clone().unwrap_or_else(|| {
            project_dir
                .join(".wave")
                .join("sessions")
                .join(format!("{session_id}.json"))
        });

        let settings_env: Vec<(String, String)> = settings.env.into_iter().collect();
        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ToolRegistry::new();
        let register = |registry: &mut ToolRegistry,
                        tool: Arc<dyn Tool>|
         -> Result<(), ConfigError> {
            registry
                .register_arc(tool)
                .map_err(|e| ConfigError::InvalidField {
                    key: "tools",
                    reason: e.to_string(),
                })
        };
        register(&mut registry, Arc::new(ReadTool))?;
        register(&mut registry, Arc::new(WriteTool))?;
        register(&mut registry, Arc::new(EditTool))?;
        register(&mut registry, Arc::new(BashTool))?;
        register(&mut registry, Arc::new(GrepTool))?;
        register(&mut registry, Arc::new(GlobTool))?;
        register(&mut registry, Arc::new(LsTool))?;
        register(&mut registry, Arc::new(DeleteTool))?;
        register(&mut registry, Arc::new(TodoWriteTool::new(Arc::clone(&todos))))?;
        register(&mut registry, Arc::new(AskUserQuestionTool))?;
        register(&mut registry, Arc::new(EnterPlanModeTool))?;
        register(&mut registry, Arc::new(ExitPlanModeTool))?;
        register(&mut registry, Arc::new(MemoryWriteTool))?;
        register(&mut registry, Arc::new(SkillTool::new(skills.clone())))?;
        register(&mut registry, Arc::new(TaskOutputTool))?;
        register(&mut registry, Arc::new(TaskStopTool))?;
        register(&mut registry, Arc::new(TaskTool::new(&subagents)))?;
        for tool in handles.extra_tools {
            register(&mut registry, tool)?;
        }

        let provider: Arc<dyn ModelProvider> = match handles.provider {
            Some(p) => p,
            None => Arc::new(GatewayProvider::new(
                config.base_url.as_deref().expect("resolved config has base_url"),
                config.api_key.clone().expect("resolved config has api_key"),
            )),
        };

        let hooks_runner = wave_hooks::HookRunner::new(
            hooks,
            project_dir.clone(),
            session_id,
            transcript_path,
        );

        let engine = Engine {
            provider,
            registry: Arc::new(registry),
            gate: Arc::new(PermissionGate::new(handles.can_use_tool)),
            tasks: Arc::new(TaskManager::new()),
            hooks: Arc::new(hooks_runner),
            mode_state: ModeState::new(config.permission_mode),
            dispatcher: Arc::new(EventDispatcher::new(handles.callbacks)),
            store: Arc::new(Mutex::new(store)),
            amendments: Arc::new(Mutex::new(HashMap::new())),
            rules,
            subagents,
            agent_model: config.agent_model.clone().expect("resolved config has model"),
            fast_model: config
                .fast_model
                .clone()
                .expect("resolved config has fast model"),
            system_prompt_base: config.system_prompt.clone(),
            workdir: project_dir.clone(),
            token_limit: config.token_limit,
            bash_timeout_secs: config.bash_timeout_secs,
            max_subagent_depth: config.max_subagent_depth,
            depth: 0,
            tool_filter: None,
            reversion: handles.reversion,
            mcp: handles.mcp,
            lsp: handles.lsp,
            settings_env,
            mirror: None,
        };

        Ok(Self {
            engine,
            loading: Arc::new(AtomicBool::new(false)),
            turn_cancel: Mutex::new(None),
            input_history: Mutex::new(Vec::new()),
            commands,
            plugins,
            project_dir,
            mcp_servers,
            todos,
        })
    }

    // ── The turn entry point ──────────────────────────────────────────────────

    /// Submit user input and run the turn to quiescence.  Returns the final
    /// assistant text (possibly empty).  Fails fast when a turn is already
    /// in progress — the engine is non-reentrant per session.
    pub async fn send_message(
        &self,
        text: &str,
        images: Vec<ImageAttachment>,
    ) -> anyhow::Result<String> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            anyhow::bail!("a turn is already in progress; queue or abort first");
        }
        let _guard = LoadingGuard(Arc::clone(&self.loading));
        self.input_history.lock().unwrap().push(text.to_string());

        let input = match slash::parse(text) {
            Some((name, args)) => match self.dispatch_slash(&name, &args).await? {
                SlashOutcome::Handled(reply) => return Ok(reply),
                SlashOutcome::Turn(input) => input,
            },
            None => TurnInput {
                text: text.to_string(),
                images,
                ..TurnInput::default()
            },
        };

        let cancel = CancellationToken::new();
        *self.turn_cancel.lock().unwrap() = Some(cancel.clone());
        let result = self.engine.run_turn(input, cancel).await;
        *self.turn_cancel.lock().unwrap() = None;
        result
    }

    async fn dispatch_slash(&self, name: &str, args: &str) -> anyhow::Result<SlashOutcome> {
        match name {
            "compact" => {
                let reply = match self.engine.compact(true).await {
                    Some(c) => format!(
                        "Compacted context: ~{} → ~{} tokens",
                        c.tokens_before, c.tokens_after
                    ),
                    None => "Nothing to compact".to_string(),
                };
                return Ok(SlashOutcome::Handled(reply));
            }
            "rewind" => {
                let index: usize = args.trim().parse().unwrap_or(0);
                self.truncate_history(index)?;
                return Ok(SlashOutcome::Handled(format!(
                    "Rewound to user message {index}"
                )));
            }
            _ => {}
        }

        let command = {
            let commands = self.commands.get();
            commands.iter().find(|c| c.name == name).cloned()
        };
        let Some(command) = command else {
            debug!(command = name, "unknown slash command");
            self.engine
                .dispatcher
                .transient_error(format!("Unknown command: /{name}"));
            return Ok(SlashOutcome::Handled(String::new()));
        };

        let prompt = expand_command(&command, args, &self.project_dir).await;
        Ok(SlashOutcome::Turn(TurnInput {
            text: prompt.clone(),
            images: vec![],
            whitelist: command.allowed_tools.clone(),
            model_override: command.model.clone(),
            custom_command: Some(CustomCommandBlock {
                command_name: command.name.clone(),
                prompt,
            }),
        }))
    }

    // ── Turn control ──────────────────────────────────────────────────────────

    /// Abort the in-flight turn.  Foreground tools and the stream stop;
    /// background tasks are unaffected.
    pub fn abort(&self) {
        if let Some(cancel) = self.turn_cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
    }

    /// Move the most recent backgroundable foreground tool to the
    /// background.  Returns `false` when nothing was running.
    pub fn background_current_task(&self) -> bool {
        self.engine.tasks.background_current()
    }

    /// Truncate the transcript after the `index`-th user message and replay
    /// file snapshots recorded since.
    pub fn truncate_history(&self, user_message_index: usize) -> anyhow::Result<()> {
        {
            let mut store = self.engine.store.lock().unwrap();
            store
                .truncate(user_message_index)
                .map_err(|e| anyhow::anyhow!("cannot rewind: {e}"))?;
        }
        self.engine.sync();
        if let Some(reversion) = &self.engine.reversion {
            reversion.rewind_to(user_message_index);
        }
        self.engine.dispatcher.show_rewind();
        Ok(())
    }

    /// Release resources: abort the turn and stop every background task.
    pub fn destroy(&self) {
        self.abort();
        for task in self.engine.tasks.get_all_tasks() {
            self.engine.tasks.stop_task(&task.id);
        }
        self.engine.gate.clear_pending();
    }

    // ── Permissions ───────────────────────────────────────────────────────────

    pub fn get_pending_permissions(&self) -> Vec<PendingPermission> {
        self.engine.gate.pending()
    }

    pub fn resolve_permission_request(&self, id: &str, decision: PermissionDecision) -> bool {
        self.engine.gate.resolve(id, decision)
    }

    pub fn clear_pending_permissions(&self) {
        self.engine.gate.clear_pending()
    }

    // ── Slash commands ────────────────────────────────────────────────────────

    pub fn get_slash_commands(&self) -> Vec<SlashCommandInfo> {
        let mut out: Vec<SlashCommandInfo> = slash::BUILTINS
            .iter()
            .map(|(name, description)| SlashCommandInfo {
                name: (*name).to_string(),
                description: (*description).to_string(),
                builtin: true,
            })
            .collect();
        for command in self.commands.get().iter() {
            out.push(SlashCommandInfo {
                name: command.name.clone(),
                description: command.description.clone(),
                builtin: false,
            });
        }
        out
    }

    pub fn get_custom_commands(&self) -> Vec<CustomCommand> {
        self.commands.get().to_vec()
    }

    pub fn reload_custom_commands(&self) {
        self.commands
            .set(discover_commands(&self.project_dir, &self.plugins));
    }

    /// Run a slash command by name, as if the user typed `/name`.
    pub async fn execute_slash_command(&self, name: &str) -> anyhow::Result<String> {
        self.send_message(&format!("/{name}"), vec![]).await
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn messages(&self) -> Vec<Message> {
        self.engine.store.lock().unwrap().snapshot()
    }

    pub fn usages(&self) -> Vec<UsageEntry> {
        self.engine.store.lock().unwrap().usages().to_vec()
    }

    pub fn session_id(&self) -> String {
        self.engine.session_id()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn user_input_history(&self) -> Vec<String> {
        self.input_history.lock().unwrap().clone()
    }

    pub fn get_all_tasks(&self) -> Vec<TaskSnapshot> {
        self.engine.tasks.get_all_tasks()
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.lock().unwrap().clone()
    }

    pub fn mcp_servers(&self) -> &HashMap<String, McpServerSpec> {
        &self.mcp_servers
    }
}

enum SlashOutcome {
    /// Builtin handled internally; reply text for the host.
    Handled(String),
    /// Expanded custom command to run as a turn.
    Turn(TurnInput),
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.destroy();
    }
}
