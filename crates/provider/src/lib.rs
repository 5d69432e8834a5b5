pub mod types;

pub mod factory;
pub mod openai;

mod error;
mod sse;

pub use error::ProviderError;
pub use factory::{ClientFactory, ModelClientFactory};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: &CompletionRequest) -> Result<Completion>;

    async fn chat_stream(&self, request: &CompletionRequest) -> Result<DeltaStream>;

    /// Issues the completion the way `request.stream` asks for.
    async fn create(&self, request: &CompletionRequest) -> Result<CompletionOutput> {
        if request.stream {
            Ok(CompletionOutput::Stream(self.chat_stream(request).await?))
        } else {
            Ok(CompletionOutput::Complete(self.chat(request).await?))
        }
    }
}
