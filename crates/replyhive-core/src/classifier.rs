use std::sync::Arc;

use anyhow::{anyhow, Result};
use replyhive_provider::{LlmProvider, LlmRequest};
use replyhive_schema::Classification;
use serde::{Deserialize, Serialize};

const CLASSIFY_PROMPT: &str = "\
You sort incoming chat messages into exactly one of two labels.
phatic: greetings, thanks, acknowledgements, emoji-only or small talk that needs no memory of past conversations.
substantive: questions, plans, news, requests or anything that benefits from knowing the sender.
Answer with the single word `phatic` or `substantive` and nothing else.";

const SIMPLE_REPLY_PROMPT: &str = "\
You reply on the account owner's behalf to a short social message.
Keep it to one brief sentence that matches the owner's usual tone.";

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    5
}

fn default_reply_max_tokens() -> u32 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Pinned so identical input yields identical labels.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u32,
    /// Used for simple replies when the caller supplies none.
    #[serde(default)]
    pub style_guide: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            reply_max_tokens: default_reply_max_tokens(),
            style_guide: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub response: String,
    pub tokens_used: u32,
}

pub struct ClassificationRouter {
    provider: Arc<dyn LlmProvider>,
    config: ClassifierConfig,
}

impl ClassificationRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ClassifierConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Never fails. Provider errors and unexpected labels map to `Substantive`.
    pub async fn classify(&self, content: &str) -> Classification {
        let request = LlmRequest::simple(
            self.config.model.clone(),
            Some(CLASSIFY_PROMPT.to_string()),
            content.to_string(),
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        match self.provider.chat(request).await {
            Ok(resp) => {
                let label = resp.text.trim().to_lowercase();
                match Classification::from_label(&label) {
                    Some(classification) => {
                        tracing::debug!(%classification, "message classified");
                        classification
                    }
                    None => {
                        tracing::warn!(raw = %resp.text, "unexpected classifier label; treating as substantive");
                        Classification::Substantive
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "classifier call failed; treating as substantive");
                Classification::Substantive
            }
        }
    }

    /// Short reply for phatic messages; skips skill execution entirely.
    pub async fn get_simple_response(
        &self,
        content: &str,
        style_guide: Option<&str>,
    ) -> Result<SimpleResponse> {
        let mut system = SIMPLE_REPLY_PROMPT.to_string();
        if let Some(guide) = style_guide.or(self.config.style_guide.as_deref()) {
            if !guide.trim().is_empty() {
                system.push_str("\n\n## Style\n");
                system.push_str(guide.trim());
            }
        }

        let request = LlmRequest::simple(self.config.model.clone(), Some(system), content.to_string())
            .with_max_tokens(self.config.reply_max_tokens);
        let resp = self.provider.chat(request).await?;
        let response = resp.text.trim().to_string();
        if response.is_empty() {
            return Err(anyhow!("provider returned an empty reply"));
        }
        Ok(SimpleResponse {
            response,
            tokens_used: resp.total_tokens(),
        })
    }
}
