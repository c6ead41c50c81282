// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, StreamEvent, Usage};

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// response script from the front of the queue, which lets tests specify
/// exact event sequences — including split tool-call argument deltas —
/// without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// Every `CompletionRequest` seen by this provider, in call order.
    /// Tests inspect this to verify prompt composition and projection.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of response scripts; the inner
    /// `Vec` is the event sequence emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// A plain text response script with nominal usage.
    pub fn text_script(reply: impl Into<String>) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextDelta(reply.into()),
            StreamEvent::Usage(Usage {
                input_tokens: 5,
                output_tokens: 5,
                ..Usage::default()
            }),
            StreamEvent::Done,
        ]
    }

    /// A script that requests one tool call with the given id/name/args.
    pub fn tool_call_script(id: &str, name: &str, args_json: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: id.into(),
                name: name.into(),
                arguments: args_json.into(),
            },
            StreamEvent::Usage(Usage {
                input_tokens: 8,
                output_tokens: 4,
                ..Usage::default()
            }),
            StreamEvent::Done,
        ]
    }

    /// Number of scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Out of scripts: end the conversation rather than hanging.
                vec![StreamEvent::Done]
            } else {
                scripts.remove(0)
            }
        };
        let events: Vec<anyhow::Result<StreamEvent>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::ModelProvider;

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text_script("first"),
            ScriptedProvider::text_script("second"),
        ]);

        for expected in ["first", "second"] {
            let mut stream = provider
                .complete(CompletionRequest::default())
                .await
                .unwrap();
            let mut text = String::new();
            while let Some(ev) = stream.next().await {
                if let StreamEvent::TextDelta(d) = ev.unwrap() {
                    text.push_str(&d);
                }
            }
            assert_eq!(text, expected);
        }
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_scripts_yield_done_only() {
        let provider = ScriptedProvider::new(vec![]);
        let mut stream = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Done));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let provider = ScriptedProvider::always_text("hi");
        let req = CompletionRequest {
            model: "m1".into(),
            ..CompletionRequest::default()
        };
        let _ = provider.complete(req).await.unwrap();
        assert_eq!(provider.requests.lock().unwrap()[0].model, "m1");
    }
}
