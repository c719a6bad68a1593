//! Answer generation through a language model.
//!
//! [`Generator`] is the seam the service talks to; [`OllamaGenerator`] is the
//! only provider. It calls `/api/generate` with streaming disabled and reads
//! the `response` field. The HTTP retry policy is shared with the embedding
//! clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::{GenerationConfig, DEFAULT_OLLAMA_URL};
use crate::embedding::send_with_retry;

/// Transient failures are retried this many times.
const GENERATION_RETRIES: u32 = 2;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Completes `prompt` and returns the model's text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Prompt asking for a short answer to `query` grounded in `context`.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful assistant. Use the following context to answer the question concisely and accurately.\n\
         Context: {}\n\
         Question: {}\n\
         Answer in 1-2 sentences:",
        context, query
    )
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let request = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body);
        let json = send_with_retry("Ollama", request, GENERATION_RETRIES).await?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}
