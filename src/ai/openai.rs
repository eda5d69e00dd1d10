use crate::ai::types::{ChatRequest, ChatResponse, LlmError, LlmProvider};
use crate::ai::{
    build_llm_http_client, chat_body, map_send_error, read_chat_response, split_keys,
    LlmClientConfig,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    api_keys: Vec<String>,
    index: Arc<AtomicUsize>,
}

impl OpenAiProvider {
    pub fn from_env(cfg: &LlmClientConfig) -> Result<Self, LlmError> {
        let api_keys = std::env::var("OPENAI_API_KEYS")
            .ok()
            .map(|s| split_keys(&s))
            .unwrap_or_default();
        let api_key = if api_keys.is_empty() {
            std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::MissingEnv("OPENAI_API_KEY"))?
        } else {
            api_keys[0].clone()
        };
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: build_llm_http_client(cfg)?,
            api_key,
            base_url,
            api_keys,
            index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn next_key(&self) -> String {
        if self.api_keys.is_empty() {
            self.api_key.clone()
        } else {
            let i = self.index.fetch_add(1, Ordering::Relaxed);
            self.api_keys[i % self.api_keys.len()].clone()
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = chat_body(&req);

        let resp = self
            .client
            .post(url)
            .bearer_auth(self.next_key())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        read_chat_response(resp).await
    }
}
