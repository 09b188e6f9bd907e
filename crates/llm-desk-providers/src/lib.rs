//! LLM provider abstraction.
//!
//! Every vendor streams its reply as `data: <json>` lines. The [`sse`] module
//! turns raw response bytes into text deltas, [`dialect`] knows where each
//! vendor keeps the delta text and how to address it, and [`router`] picks the
//! vendor from configuration and exposes one streaming call.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use llm_desk_core::config::ChatConfig;
use llm_desk_core::error::Result;
use llm_desk_core::types::ChatMessage;

pub mod dialect;
pub mod probe;
pub mod router;
pub mod sse;

pub use dialect::{Dialect, Vendor};
pub use router::ProviderRouter;

/// An incremental fragment of assistant output.
pub type TextDelta = String;

/// Lazy, finite sequence of deltas in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<TextDelta>> + Send>>;

/// Uniform streaming chat call.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Start a streaming completion.
    ///
    /// Fails before any delta on configuration or transport errors. When
    /// `cancel` fires, the returned stream ends without yielding more deltas.
    async fn stream_chat(
        &self,
        config: &ChatConfig,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;
}
