//! Thin OpenRouter chat-completion client, grounded on `vault::llm::OpenRouterClient`.
//! The trading-decision DSL parser that lived alongside it in the teacher
//! repo has no counterpart here; only the HTTP client survives.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterClient {
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("OPENROUTER_API_KEY empty"));
        }

        let referer = std::env::var("OPENROUTER_HTTP_REFERER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let title = std::env::var("OPENROUTER_APP_TITLE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self { http, api_key, referer, title })
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
        timeout: Duration,
    ) -> Result<LlmCallOutput> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system.to_string() },
                ChatMessage { role: "user".to_string(), content: user.to_string() },
            ],
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        let mut http_req = self
            .http
            .post("https://openrouter.ai/api/v1/chat/completions")
            .timeout(timeout)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(r) = &self.referer {
            http_req = http_req.header("HTTP-Referer", r);
        }
        if let Some(t) = &self.title {
            http_req = http_req.header("X-Title", t);
        }

        let resp = http_req.json(&req).send().await.context("openrouter request")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).context("openrouter json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(LlmCallOutput {
            model: model.to_string(),
            content,
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}
