// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, StreamEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// The streaming completion interface the turn engine drives.
///
/// Implementations must be cheap to share (`Arc<dyn ModelProvider>`); the
/// engine calls [`complete`][Self::complete] once per loop iteration and may
/// drop the returned stream mid-flight on abort.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for diagnostics.
    fn name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}
