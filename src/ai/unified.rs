use crate::ai::local::LocalLlmProvider;
use crate::ai::openai::OpenAiProvider;
use crate::ai::types::{ChatRequest, ChatResponse, LlmError, LlmProvider};
use crate::ai::{LlmBackend, LlmClientConfig};
use async_trait::async_trait;

#[derive(Clone)]
pub enum InnerProvider {
    OpenAi(OpenAiProvider),
    Local(LocalLlmProvider),
}

#[derive(Clone)]
pub struct AnyProvider {
    inner: InnerProvider,
}

impl AnyProvider {
    /// Builds the provider selected by `cfg.backend`; credentials come from the environment.
    pub fn from_config(cfg: &LlmClientConfig) -> Result<Self, LlmError> {
        let inner = match cfg.backend {
            LlmBackend::Local => InnerProvider::Local(LocalLlmProvider::from_env(cfg)?),
            LlmBackend::OpenAi => InnerProvider::OpenAi(OpenAiProvider::from_env(cfg)?),
        };
        Ok(Self { inner })
    }

    pub fn name(&self) -> &'static str {
        match &self.inner {
            InnerProvider::OpenAi(_) => "openai",
            InnerProvider::Local(_) => "local",
        }
    }
}

#[async_trait]
impl LlmProvider for AnyProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        match &self.inner {
            InnerProvider::OpenAi(p) => p.chat(req).await,
            InnerProvider::Local(p) => p.chat(req).await,
        }
    }
}
