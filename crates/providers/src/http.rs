//! HTTP adapters for the completion and embedding seams.
//!
//! `OpenAiCompatLlm` speaks the `/chat/completions` wire format most hosted
//! and local inference servers accept. `OllamaEmbedder` speaks the
//! `/api/embeddings` format. Both map provider failures into the error
//! taxonomy so retry policy is decided upstream, not here.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use sw_domain::config::{EmbeddingConfig, LlmConfig};
use sw_domain::error::{Error, Result};

use crate::traits::{CompletionRequest, EmbeddingProvider, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatLlm {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    default_temperature: f32,
}

impl OpenAiCompatLlm {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::LlmApi(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key,
            default_temperature: config.temperature,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);

        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.prompt }));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature.unwrap_or(self.default_temperature),
        });
        if req.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LlmApi(format!("completion request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(classify_llm_failure(status.as_u16(), &body_text));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| Error::LlmApi(format!("parsing completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::LlmApi("completion response had no content".into()))
    }

    fn provider_id(&self) -> &str {
        "openai-compat"
    }
}

/// Map a completion HTTP failure to the taxonomy.
///
/// 429 is a rate limit; a 4xx whose body names the context window is a
/// context-limit error; everything else is a generic API error.
fn classify_llm_failure(status: u16, body: &str) -> Error {
    if status == 429 {
        return Error::LlmRateLimit(format!("HTTP 429: {body}"));
    }
    let lower = body.to_lowercase();
    if (400..500).contains(&status)
        && (lower.contains("context_length") || lower.contains("maximum context"))
    {
        return Error::LlmContextLimit(format!("HTTP {status}: {body}"));
    }
    Error::LlmApi(format!("HTTP {status}: {body}"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OllamaEmbedder {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, dimensions: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::LlmApi(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            dimensions,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.endpoint);
        let body = json!({ "model": self.model, "prompt": text });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LlmApi(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(classify_llm_failure(status.as_u16(), &body_text));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::LlmApi(format!("parsing embedding response: {e}")))?;

        let embedding: Vec<f32> = parsed
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::LlmApi("response missing 'embedding' array".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
