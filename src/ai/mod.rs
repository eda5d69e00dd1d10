pub mod local;
pub mod openai;
pub mod types;
pub mod unified;

pub use local::LocalLlmProvider;
pub use openai::OpenAiProvider;
pub use types::{ChatRequest, ChatResponse, LlmError, LlmProvider};
pub use unified::AnyProvider;

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Which provider family `AnyProvider` talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Local,
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown llm provider '{other}'")),
        }
    }
}

/// Transport settings shared by every provider.
#[derive(Clone, Debug)]
pub struct LlmClientConfig {
    pub backend: LlmBackend,
    pub timeout: Duration,
    /// `host:port` is taken as socks5h; anything with a scheme is used as-is.
    pub proxy: Option<String>,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}

pub(crate) fn build_llm_http_client(cfg: &LlmClientConfig) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder().timeout(cfg.timeout);

    if let Some(raw) = &cfg.proxy {
        let t = raw.trim();
        if !t.is_empty() {
            let url = if t.contains("://") {
                t.to_string()
            } else {
                format!("socks5h://{}", t)
            };
            let proxy = reqwest::Proxy::all(&url).map_err(|e| LlmError::Http(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
    }

    builder.build().map_err(|e| LlmError::Http(e.to_string()))
}

pub(crate) fn split_keys(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == ';' || c == '\n' || c == '\t' || c == ' ')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

pub(crate) fn chat_body(req: &ChatRequest) -> Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "temperature": req.temperature,
        "max_tokens": req.max_tokens,
        "messages": [
            {"role": "system", "content": req.system},
            {"role": "user", "content": req.user}
        ]
    });
    if req.json_mode {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }
    body
}

pub(crate) fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Http(e.to_string())
    }
}

/// Reads an OpenAI-compatible completion response into a `ChatResponse`.
pub(crate) async fn read_chat_response(resp: reqwest::Response) -> Result<ChatResponse, LlmError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(LlmError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => return Err(LlmError::RateLimited),
        _ => {}
    }

    let status = resp.status();
    let raw = resp.text().await.map_err(map_send_error)?;

    if !status.is_success() {
        return Err(LlmError::Http(format!("{} {}", status.as_u16(), raw)));
    }

    let text = extract_chat_text(&raw)?;
    Ok(ChatResponse {
        text,
        raw: Some(raw),
    })
}

/// Servers disagree on where the completion text lives: `message.content` (string or parts
/// array), `content`, `text`, or a top-level `output_text`.
pub(crate) fn extract_chat_text(raw: &str) -> Result<String, LlmError> {
    let v: Value = serde_json::from_str(raw)
        .map_err(|e| LlmError::InvalidResponse(format!("json parse failed: {e}, raw={raw}")))?;

    if let Some(Value::String(s)) = v.get("output_text") {
        return Ok(s.clone());
    }

    let choice0 = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::InvalidResponse(format!("missing choices[0], raw={raw}")))?;

    let content = choice0
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| choice0.get("content"));

    match content {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(arr)) => {
            let mut parts = Vec::new();
            for it in arr {
                if let Some(t) = it.get("text").and_then(|x| x.as_str()) {
                    parts.push(t.to_string());
                } else if let Some(t) = it.as_str() {
                    parts.push(t.to_string());
                }
            }
            Ok(parts.join("\n"))
        }
        Some(_) => Err(LlmError::InvalidResponse(format!(
            "unexpected content type, raw={raw}"
        ))),
        None => match choice0.get("text") {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(LlmError::InvalidResponse(format!(
                "missing content/text in choices[0], raw={raw}"
            ))),
        },
    }
}
