//! LLM-backed identity judge: the precision phase of similarity matching.
//! Reuses the chat-completion client idiom from the teacher's OpenRouter
//! integration. Any request failure or unparseable verdict is treated as
//! FALSE -- matching pairs is a one-way door (it gates real capital), so the
//! failure mode is conservative.

use anyhow::Result;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an expert at reading prediction-market contract rules. \
Answer only TRUE or TRUE or FALSE.";

const MAX_TOKENS: u32 = 8;
const TEMPERATURE: f64 = 0.0;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct IdentityJudge {
    client: crate::llm::OpenRouterClient,
    model: String,
}

impl IdentityJudge {
    pub fn new(client: crate::llm::OpenRouterClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }

    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let model = std::env::var("JUDGE_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
        Ok(Self::new(crate::llm::OpenRouterClient::from_env(http)?, model))
    }

    /// Asks whether two event contracts are identical in the strictest
    /// sense (same underlying event, same resolution rule). Returns `false`
    /// on any transport, parse, or ambiguous-answer failure.
    pub async fn are_identical(
        &self,
        name_a: &str,
        rules_a: &str,
        name_b: &str,
        rules_b: &str,
    ) -> bool {
        let prompt = format!(
            "Contract A:\nName: {name_a}\nRules: {rules_a}\n\n\
             Contract B:\nName: {name_b}\nRules: {rules_b}\n\n\
             Are these two event contracts IDENTICAL -- same underlying event, \
             same resolution rule -- in the strictest sense? Answer TRUE or FALSE only."
        );

        match self
            .client
            .chat_completion(&self.model, SYSTEM_PROMPT, &prompt, MAX_TOKENS, TEMPERATURE, REQUEST_TIMEOUT)
            .await
        {
            Ok(out) => parse_verdict(&out.content),
            Err(reason) => {
                tracing::warn!(%reason, "judge call failed, defaulting to FALSE");
                false
            }
        }
    }
}

fn parse_verdict(content: &str) -> bool {
    content.trim().to_ascii_uppercase().starts_with("TRUE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_true_and_false() {
        assert!(parse_verdict("TRUE"));
        assert!(parse_verdict("true."));
        assert!(!parse_verdict("FALSE"));
        assert!(!parse_verdict(""));
        assert!(!parse_verdict("unsure"));
    }
}
