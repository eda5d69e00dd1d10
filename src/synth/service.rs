use crate::ai::{ChatRequest, LlmError, LlmProvider};
use crate::synth::parser::{clean_report, clean_title, extract_code_block, parse_script_payload};
use crate::synth::prompt::{
    repair_user_prompt, ScriptPromptBuilder, REPAIR_SYSTEM_PROMPT, REPORT_SYSTEM_PROMPT,
    TITLE_SYSTEM_PROMPT,
};
use crate::synth::{GeneratedScript, StrategySynthesizer, FALLBACK_TITLE};
use async_trait::async_trait;
use log::{info, warn};

// tail caps on text forwarded to the model
const MAX_REPORT_LOG_CHARS: usize = 60_000;
const MAX_REPAIR_ERROR_CHARS: usize = 8_000;

#[derive(Clone, Debug)]
pub struct SynthModels {
    pub script: String,
    pub report: String,
    pub title: String,
}

impl SynthModels {
    pub fn from_env() -> Self {
        let script =
            std::env::var("LLM_SCRIPT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let report = std::env::var("LLM_REPORT_MODEL").unwrap_or_else(|_| script.clone());
        let title =
            std::env::var("LLM_TITLE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self {
            script,
            report,
            title,
        }
    }
}

pub struct LlmSynthesizer<P: LlmProvider> {
    provider: P,
    models: SynthModels,
}

impl<P: LlmProvider> LlmSynthesizer<P> {
    pub fn new(provider: P, models: SynthModels) -> Self {
        Self { provider, models }
    }
}

#[async_trait]
impl<P: LlmProvider> StrategySynthesizer for LlmSynthesizer<P> {
    async fn strategy_title(&self, description: &str) -> String {
        let req = ChatRequest::new(&self.models.title, TITLE_SYSTEM_PROMPT, description)
            .temperature(0.3)
            .max_tokens(30);
        match self.provider.chat(req).await {
            Ok(resp) => clean_title(&resp.text).unwrap_or_else(|| FALLBACK_TITLE.to_string()),
            Err(e) => {
                warn!("title generation failed, using fallback: {}", e);
                FALLBACK_TITLE.to_string()
            }
        }
    }

    async fn synthesize_script(
        &self,
        description: &str,
        columns_hint: &str,
    ) -> Result<Option<GeneratedScript>, LlmError> {
        let system = ScriptPromptBuilder::new(columns_hint).build();
        let req = ChatRequest::new(&self.models.script, system, description)
            .temperature(0.2)
            .max_tokens(4000)
            .json();
        let resp = self.provider.chat(req).await?;
        let parsed = parse_script_payload(&resp.text);
        match &parsed {
            Some(g) => info!(
                "script synthesized ({} bytes, columns: {})",
                g.script.len(),
                g.data_columns.join(",")
            ),
            None => warn!("script synthesis returned no usable script"),
        }
        Ok(parsed)
    }

    async fn repair_script(&self, script: &str, error: &str) -> Result<Option<String>, LlmError> {
        let error = tail_chars(error, MAX_REPAIR_ERROR_CHARS);
        let req = ChatRequest::new(
            &self.models.script,
            REPAIR_SYSTEM_PROMPT,
            repair_user_prompt(script, error),
        )
        .temperature(0.2)
        .max_tokens(4000);
        let resp = self.provider.chat(req).await?;
        Ok(extract_code_block(&resp.text))
    }

    async fn synthesize_report(&self, log_text: &str) -> Result<String, LlmError> {
        let log_text = tail_chars(log_text, MAX_REPORT_LOG_CHARS);
        let req = ChatRequest::new(&self.models.report, REPORT_SYSTEM_PROMPT, log_text)
            .temperature(0.3)
            .max_tokens(2000);
        let resp = self.provider.chat(req).await?;
        clean_report(&resp.text)
            .ok_or_else(|| LlmError::InvalidResponse("empty report".to_string()))
    }
}

fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatResponse;
    use std::sync::Mutex;

    struct CannedProvider {
        reply: Result<String, ()>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl CannedProvider {
        fn ok(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.seen.lock().unwrap().push(req);
            match &self.reply {
                Ok(t) => Ok(ChatResponse {
                    text: t.clone(),
                    raw: None,
                }),
                Err(_) => Err(LlmError::Timeout),
            }
        }
    }

    fn models() -> SynthModels {
        SynthModels {
            script: "s".into(),
            report: "r".into(),
            title: "t".into(),
        }
    }

    #[tokio::test]
    async fn title_falls_back_on_error() {
        let s = LlmSynthesizer::new(CannedProvider::failing(), models());
        assert_eq!(s.strategy_title("buy low sell high").await, FALLBACK_TITLE);
    }

    #[tokio::test]
    async fn script_request_uses_json_mode_and_hint() {
        let p = CannedProvider::ok(r#"{"script":"print(1)","data_columns":["close"]}"#);
        let s = LlmSynthesizer::new(p, models());
        let g = s
            .synthesize_script("sma crossover", "Available data columns for X: time, close")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(g.data_columns, vec!["close"]);
        let seen = s.provider.seen.lock().unwrap();
        assert!(seen[0].json_mode);
        assert_eq!(seen[0].model, "s");
        assert!(seen[0].system.contains("Available data columns for X"));
    }

    #[tokio::test]
    async fn repair_declined_is_none() {
        let s = LlmSynthesizer::new(CannedProvider::ok("NONE"), models());
        assert!(s.repair_script("print(1)", "boom").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_report_is_an_error() {
        let s = LlmSynthesizer::new(CannedProvider::ok("  "), models());
        assert!(s.synthesize_report("log").await.is_err());
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }
}
