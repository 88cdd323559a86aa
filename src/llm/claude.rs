//! Anthropic messages adapter

use super::{build_http_client, send_with_retry, LanguageAdapter, Provider};
use crate::config::LlmConfig;
use crate::error::AssistantError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeAdapter {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl ClaudeAdapter {
    pub fn new(api_key: String, config: &LlmConfig) -> crate::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            api_key,
            model: config.claude_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn build_request<'a>(&'a self, system: &'a str, prompt: &'a str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            system,
            messages: vec![UserMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl LanguageAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn complete(&self, system: &str, prompt: &str) -> crate::Result<String> {
        let request = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.build_request(system, prompt));

        debug!(model = %self.model, "Calling Anthropic API");
        let response = send_with_retry(request, self.max_retries, Provider::Claude).await?;

        let body: MessagesResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Anthropic response: {}", e);
            AssistantError::LlmError(format!("Anthropic parse error: {}", e))
        })?;

        collect_text(body)
    }
}

fn collect_text(body: MessagesResponse) -> crate::Result<String> {
    let text: String = body
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if text.trim().is_empty() {
        Err(AssistantError::LlmError(
            "Empty response from Anthropic".to_string(),
        ))
    } else {
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<UserMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let adapter =
            ClaudeAdapter::new("anthropic-test-123".to_string(), &LlmConfig::default()).unwrap();
        let json = serde_json::to_value(adapter.build_request("sistema", "pergunta")).unwrap();

        assert_eq!(json["system"], "sistema");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "pergunta");
    }

    #[test]
    fn test_collect_text() {
        let body: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Sem alertas."}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(collect_text(body).unwrap(), "Sem alertas.");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(collect_text(empty).is_err());
    }
}
