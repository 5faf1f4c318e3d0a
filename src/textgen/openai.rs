use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::textgen::{Persona, TextGenError, TextGenerator};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl OpenAiSettings {
    /// Defaults overlaid with `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `OPENAI_MODEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            timeout: defaults.timeout,
        }
    }
}

/// Chat Completions client for OpenAI and OpenAI-compatible servers.
pub struct OpenAiTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    model: String,
}

impl OpenAiTextGenerator {
    pub fn new(settings: OpenAiSettings) -> Result<Self, TextGenError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &settings.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| TextGenError::Config(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TextGenError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            headers,
            model: settings.model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn extract_reply(data: &Value) -> Option<String> {
    let content = data
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;

    let text = match content {
        Value::String(s) => s.clone(),
        // Content-part arrays: concatenate the text parts.
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };

    if text.trim().is_empty() { None } else { Some(text) }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, persona: &Persona, prompt: &str) -> Result<String, TextGenError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": persona.system_prompt() },
                { "role": "user", "content": prompt },
            ],
        });

        debug!(endpoint = %self.endpoint, persona = persona.name, "Sending text generation request");

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| TextGenError::Request {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| TextGenError::Request {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        if !status.is_success() {
            return Err(TextGenError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|source| TextGenError::Decode {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        extract_reply(&parsed).ok_or(TextGenError::EmptyResponse)
    }
}
