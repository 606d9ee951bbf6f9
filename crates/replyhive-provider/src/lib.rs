pub mod openai;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{ChatError, OpenAiProvider};
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Configuration for the chat-completions endpoint used by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    openai::DEFAULT_TIMEOUT.as_secs()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    if config.api_base.trim().is_empty() {
        return Err(anyhow!("provider api_base must not be empty"));
    }
    if config.timeout_secs == 0 {
        return Err(anyhow!("provider timeout_secs must be greater than 0"));
    }
    let provider = OpenAiProvider::new(config.api_base.clone())
        .with_api_key(config.api_key.clone())
        .with_timeout(Duration::from_secs(config.timeout_secs));
    Ok(Arc::new(provider))
}
