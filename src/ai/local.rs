use crate::ai::types::{ChatRequest, ChatResponse, LlmError, LlmProvider};
use crate::ai::{
    build_llm_http_client, chat_body, map_send_error, read_chat_response, LlmClientConfig,
};
use async_trait::async_trait;
use log::info;

/// Self-hosted OpenAI-compatible server (vLLM, llama.cpp, ...). No auth header.
#[derive(Clone)]
pub struct LocalLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model_override: Option<String>,
}

impl LocalLlmProvider {
    pub fn from_env(cfg: &LlmClientConfig) -> Result<Self, LlmError> {
        let base_url = std::env::var("LOCAL_LLM_SERVER_URL")
            .map_err(|_| LlmError::MissingEnv("LOCAL_LLM_SERVER_URL"))?;
        let model_override = std::env::var("LOCAL_LLM_MODEL_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty());
        info!("local llm at {} (model override: {:?})", base_url, model_override);

        Ok(Self {
            client: build_llm_http_client(cfg)?,
            base_url,
            model_override,
        })
    }
}

#[async_trait]
impl LlmProvider for LocalLlmProvider {
    async fn chat(&self, mut req: ChatRequest) -> Result<ChatResponse, LlmError> {
        if let Some(m) = &self.model_override {
            req.model = m.clone();
        }
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = chat_body(&req);

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        read_chat_response(resp).await
    }
}
