//! Chat-model providers used for answer generation.
//!
//! Mirrors the embedding providers: a [`ChatModel`] trait, one
//! implementation per backend, and [`create_chat_model`] to pick one from
//! configuration. Decoding parameters (temperature, max tokens, top-p)
//! are fixed per process from `[generation]`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::aws::AwsCredentials;
use crate::config::GenerationConfig;
use crate::embedding::{invoke_bedrock, post_with_retry};

/// A single-turn text completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Send one user prompt and return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
struct Decoding {
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    explicit_top_p: Option<f32>,
}

impl From<&GenerationConfig> for Decoding {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.effective_top_p(),
            explicit_top_p: config.top_p,
        }
    }
}

pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "bedrock" => Ok(Arc::new(BedrockChatModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn required_model(config: &GenerationConfig, provider: &str) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("generation.model required for {} provider", provider))
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ Bedrock (Anthropic messages) ============

pub struct BedrockChatModel {
    model: String,
    region: String,
    endpoint: Option<String>,
    decoding: Decoding,
    client: reqwest::Client,
}

impl BedrockChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config, "Bedrock")?,
            region: config
                .region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: config.url.clone(),
            decoding: Decoding::from(config),
            client: http_client(config)?,
        })
    }

    /// `top_p` is only sent when configured explicitly.
    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": self.decoding.max_tokens,
            "temperature": self.decoding.temperature,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": prompt}]}
            ],
        });
        if let Some(top_p) = self.decoding.explicit_top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        body
    }
}

#[async_trait]
impl ChatModel for BedrockChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let creds = AwsCredentials::from_env()?;
        let json = invoke_bedrock(
            &self.client,
            &creds,
            &self.region,
            self.endpoint.as_deref(),
            &self.model,
            &self.request_body(prompt),
            0,
        )
        .await?;
        parse_anthropic_response(&json)
    }
}

/// Concatenate the `text` blocks of an Anthropic messages response.
fn parse_anthropic_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Bedrock response: missing content"))?;
    let text: String = content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text)
}

// ============ OpenAI-compatible ============

pub struct OpenAIChatModel {
    model: String,
    url: String,
    api_key: String,
    decoding: Decoding,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: required_model(config, "OpenAI")?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            decoding: Decoding::from(config),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.decoding.temperature,
            "max_tokens": self.decoding.max_tokens,
            "top_p": self.decoding.top_p,
        });
        let url = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));

        let json = post_with_retry("OpenAI", 0, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

// ============ Ollama ============

pub struct OllamaChatModel {
    model: String,
    url: String,
    decoding: Decoding,
    client: reqwest::Client,
}

impl OllamaChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config, "Ollama")?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            decoding: Decoding::from(config),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
            "options": {
                "temperature": self.decoding.temperature,
                "top_p": self.decoding.top_p,
                "num_predict": self.decoding.max_tokens,
            },
        });
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));

        let json = post_with_retry("Ollama", 0, || self.client.post(&url).json(&body)).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "Class 9 "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "dangerous goods."}
            ],
            "stop_reason": "end_turn"
        });
        assert_eq!(
            parse_anthropic_response(&json).unwrap(),
            "Class 9 dangerous goods."
        );
    }

    #[test]
    fn bedrock_body_carries_decoding_parameters() {
        let config = GenerationConfig {
            provider: "bedrock".to_string(),
            model: Some("anthropic.claude-3-5-sonnet-20240620-v1:0".to_string()),
            ..GenerationConfig::default()
        };
        let model = BedrockChatModel::new(&config).unwrap();
        let body = model.request_body("What is a ULD?");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["messages"][0]["content"][0]["text"], "What is a ULD?");
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.1).abs() < 1e-6);
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn bedrock_body_sends_configured_top_p() {
        let config = GenerationConfig {
            provider: "bedrock".to_string(),
            model: Some("anthropic.claude-3-5-sonnet-20240620-v1:0".to_string()),
            top_p: Some(0.5),
            ..GenerationConfig::default()
        };
        let body = BedrockChatModel::new(&config).unwrap().request_body("q");
        let top_p = body["top_p"].as_f64().unwrap();
        assert!((top_p - 0.5).abs() < 1e-6);
    }

    #[test]
    fn other_backends_default_top_p() {
        let decoding = Decoding::from(&GenerationConfig::default());
        assert!((decoding.top_p - 0.9).abs() < 1e-6);
        assert_eq!(decoding.explicit_top_p, None);
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let model = create_chat_model(&GenerationConfig::default()).unwrap();
        assert_eq!(model.model_name(), "disabled");
        assert!(model.complete("hi").await.is_err());
    }
}
