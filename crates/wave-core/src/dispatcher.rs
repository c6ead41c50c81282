// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Callback fan-out to the host.
//!
//! Delivery is synchronous to the operation that caused the change,
//! incremental callbacks fire before the aggregate `on_messages_change`,
//! and a panicking callback is logged and swallowed — host bugs must not
//! corrupt a turn.

use std::panic::AssertUnwindSafe;

use tracing::error;

use wave_tasks::TaskSnapshot;
use wave_transcript::{Block, BlockPayload, Message, MessageId, TranscriptEvent, UsageEntry};

type Cb<T> = Box<dyn Fn(&T) + Send + Sync>;
type SliceCb<T> = Box<dyn Fn(&[T]) + Send + Sync>;

/// Host-supplied callbacks; every field is optional.
#[derive(Default)]
pub struct AgentCallbacks {
    pub on_user_message_added: Option<Cb<Message>>,
    pub on_assistant_message_added: Option<Cb<MessageId>>,
    /// Streaming text chunk on the assistant tail.
    pub on_assistant_content_updated: Option<Cb<str>>,
    pub on_tool_block_added: Option<Cb<Block>>,
    /// Fired on every tool-block mutation; the block carries its `stage`.
    pub on_tool_block_updated: Option<Cb<Block>>,
    pub on_diff_block_added: Option<Cb<Block>>,
    pub on_error_block_added: Option<Cb<Block>>,
    pub on_compress_block_added: Option<Cb<Block>>,
    pub on_memory_block_added: Option<Cb<Block>>,
    pub on_sub_agent_block_added: Option<Cb<Block>>,
    pub on_sub_agent_block_updated: Option<Cb<Block>>,
    pub on_custom_command_added: Option<Cb<Block>>,
    /// `systemMessage` directives from hooks.
    pub on_hook_message: Option<Cb<str>>,
    pub on_warn_message_added: Option<Cb<str>>,
    pub on_show_rewind: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_tasks_change: Option<SliceCb<TaskSnapshot>>,
    pub on_usages_change: Option<SliceCb<UsageEntry>>,
    /// Aggregate: fired after the incrementals of each logical change.
    pub on_messages_change: Option<SliceCb<Message>>,
}

pub struct EventDispatcher {
    callbacks: AgentCallbacks,
}

/// Run a host callback, swallowing panics.
fn guard(f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("host callback panicked; continuing");
    }
}

impl EventDispatcher {
    pub fn new(callbacks: AgentCallbacks) -> Self {
        Self { callbacks }
    }

    /// Deliver queued store events: each incremental in order, then one
    /// aggregate snapshot.  `snapshot` and `usages` are detached copies so
    /// host callbacks can freely read the agent without re-entering a lock.
    pub fn dispatch(
        &self,
        events: Vec<TranscriptEvent>,
        snapshot: &[Message],
        usages: &[UsageEntry],
    ) {
        if events.is_empty() {
            return;
        }
        let mut transcript_changed = false;
        for event in events {
            match event {
                TranscriptEvent::UserMessageAdded { message } => {
                    transcript_changed = true;
                    if let Some(cb) = &self.callbacks.on_user_message_added {
                        guard(|| cb(&message));
                    }
                }
                TranscriptEvent::AssistantMessageAdded { message_id } => {
                    transcript_changed = true;
                    if let Some(cb) = &self.callbacks.on_assistant_message_added {
                        guard(|| cb(&message_id));
                    }
                }
                TranscriptEvent::TextAppended { delta, .. } => {
                    transcript_changed = true;
                    if let Some(cb) = &self.callbacks.on_assistant_content_updated {
                        guard(|| cb(&delta));
                    }
                }
                TranscriptEvent::BlockAdded { block, .. } => {
                    transcript_changed = true;
                    self.block_added(&block);
                }
                TranscriptEvent::BlockUpdated { block, .. } => {
                    transcript_changed = true;
                    self.block_updated(&block);
                }
                TranscriptEvent::Truncated => {
                    transcript_changed = true;
                }
                TranscriptEvent::UsageAdded { .. } => {
                    if let Some(cb) = &self.callbacks.on_usages_change {
                        guard(|| cb(usages));
                    }
                }
            }
        }
        if transcript_changed {
            if let Some(cb) = &self.callbacks.on_messages_change {
                guard(|| cb(snapshot));
            }
        }
    }

    fn block_added(&self, block: &Block) {
        let cb = match &block.payload {
            BlockPayload::Tool(_) => &self.callbacks.on_tool_block_added,
            BlockPayload::Diff(_) => &self.callbacks.on_diff_block_added,
            BlockPayload::Error { .. } => &self.callbacks.on_error_block_added,
            BlockPayload::Compress(_) => &self.callbacks.on_compress_block_added,
            BlockPayload::Memory(_) => &self.callbacks.on_memory_block_added,
            BlockPayload::SubAgent(_) => &self.callbacks.on_sub_agent_block_added,
            BlockPayload::CustomCommand(_) => &self.callbacks.on_custom_command_added,
            BlockPayload::Text { .. } => &None,
        };
        if let Some(cb) = cb {
            guard(|| cb(block));
        }
    }

    fn block_updated(&self, block: &Block) {
        let cb = match &block.payload {
            BlockPayload::Tool(_) => &self.callbacks.on_tool_block_updated,
            BlockPayload::SubAgent(_) => &self.callbacks.on_sub_agent_block_updated,
            _ => &None,
        };
        if let Some(cb) = cb {
            guard(|| cb(block));
        }
    }

    /// Surface an error block that is *not* part of the transcript (e.g. a
    /// rejected user prompt that was rolled back).
    pub fn transient_error(&self, message: impl Into<String>) {
        if let Some(cb) = &self.callbacks.on_error_block_added {
            let block = Block {
                id: 0,
                payload: BlockPayload::Error {
                    message: message.into(),
                },
            };
            guard(|| cb(&block));
        }
    }

    pub fn hook_message(&self, message: &str) {
        if let Some(cb) = &self.callbacks.on_hook_message {
            guard(|| cb(message));
        }
    }

    pub fn warn(&self, message: &str) {
        if let Some(cb) = &self.callbacks.on_warn_message_added {
            guard(|| cb(message));
        }
    }

    pub fn show_rewind(&self) {
        if let Some(cb) = &self.callbacks.on_show_rewind {
            guard(cb);
        }
    }

    pub fn tasks_change(&self, tasks: &[TaskSnapshot]) {
        if let Some(cb) = &self.callbacks.on_tasks_change {
            guard(|| cb(tasks));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use wave_transcript::TranscriptStore;

    fn run(dispatcher: &EventDispatcher, store: &mut TranscriptStore) {
        let events = store.drain_events();
        let snapshot = store.snapshot();
        dispatcher.dispatch(events, &snapshot, store.usages());
    }

    #[test]
    fn incrementals_fire_before_aggregate() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(vec![]));
        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let dispatcher = EventDispatcher::new(AgentCallbacks {
            on_user_message_added: Some(Box::new(move |_| o1.lock().unwrap().push("incremental"))),
            on_messages_change: Some(Box::new(move |_| o2.lock().unwrap().push("aggregate"))),
            ..AgentCallbacks::default()
        });

        let mut store = TranscriptStore::new();
        store.append_user_message("hi", vec![]);
        run(&dispatcher, &mut store);

        assert_eq!(*order.lock().unwrap(), vec!["incremental", "aggregate"]);
    }

    #[test]
    fn panicking_callback_is_swallowed() {
        let aggregate_count = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&aggregate_count);
        let dispatcher = EventDispatcher::new(AgentCallbacks {
            on_user_message_added: Some(Box::new(|_| panic!("host bug"))),
            on_messages_change: Some(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })),
            ..AgentCallbacks::default()
        });

        let mut store = TranscriptStore::new();
        store.append_user_message("hi", vec![]);
        run(&dispatcher, &mut store);

        assert_eq!(aggregate_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tool_block_events_route_to_tool_callbacks() {
        let added = Arc::new(AtomicUsize::new(0));
        let updated = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&added);
        let u = Arc::clone(&updated);
        let dispatcher = EventDispatcher::new(AgentCallbacks {
            on_tool_block_added: Some(Box::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })),
            on_tool_block_updated: Some(Box::new(move |_| {
                u.fetch_add(1, Ordering::SeqCst);
            })),
            ..AgentCallbacks::default()
        });

        let mut store = TranscriptStore::new();
        store.append_user_message("u", vec![]);
        let assistant = store.append_assistant_message();
        let block = store.add_tool_block(assistant, "c1", "Bash").unwrap();
        store
            .close_tool_block(assistant, block, wave_transcript::ToolTerminal::default())
            .unwrap();
        run(&dispatcher, &mut store);

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(updated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn usage_event_fires_usages_change_without_aggregate() {
        let usages_fired = Arc::new(AtomicUsize::new(0));
        let aggregate_fired = Arc::new(AtomicUsize::new(0));
        let uf = Arc::clone(&usages_fired);
        let af = Arc::clone(&aggregate_fired);
        let dispatcher = EventDispatcher::new(AgentCallbacks {
            on_usages_change: Some(Box::new(move |_| {
                uf.fetch_add(1, Ordering::SeqCst);
            })),
            on_messages_change: Some(Box::new(move |_| {
                af.fetch_add(1, Ordering::SeqCst);
            })),
            ..AgentCallbacks::default()
        });

        let mut store = TranscriptStore::new();
        store.add_usage(UsageEntry {
            model: "m".into(),
            input_tokens: 1,
            output_tokens: 1,
            cache_read_input_tokens: 0,
            cache_creation_input_tokens: 0,
        });
        run(&dispatcher, &mut store);

        assert_eq!(usages_fired.load(Ordering::SeqCst), 1);
        assert_eq!(aggregate_fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_error_does_not_need_a_store() {
        let seen = Arc::new(Mutex::new(String::new()));
        let s = Arc::clone(&seen);
        let dispatcher = EventDispatcher::new(AgentCallbacks {
            on_error_block_added: Some(Box::new(move |b| {
                if let BlockPayload::Error { message } = &b.payload {
                    *s.lock().unwrap() = message.clone();
                }
            })),
            ..AgentCallbacks::default()
        });
        dispatcher.transient_error("prompt rejected");
        assert_eq!(*seen.lock().unwrap(), "prompt rejected");
    }
}
