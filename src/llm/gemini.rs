//! Gemini adapter
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{build_http_client, send_with_retry, LanguageAdapter, Provider};
use crate::config::LlmConfig;
use crate::error::AssistantError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl GeminiAdapter {
    pub fn new(api_key: String, config: &LlmConfig) -> crate::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            api_key,
            url: format!("{}/{}:generateContent", BASE_URL, config.gemini_model),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn build_request(&self, system: &str, prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        }
    }
}

#[async_trait]
impl LanguageAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn complete(&self, system: &str, prompt: &str) -> crate::Result<String> {
        let url = format!("{}?key={}", self.url, self.api_key);
        let request = self.client.post(&url).json(&self.build_request(system, prompt));

        debug!("Calling Gemini API");
        let response = send_with_retry(request, self.max_retries, Provider::Gemini).await?;

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AssistantError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        extract_text(gemini_response)
    }
}

fn extract_text(response: GeminiResponse) -> crate::Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AssistantError::LlmError("No response from Gemini API".to_string()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(AssistantError::LlmError(
            "Gemini blocked the response".to_string(),
        ));
    }

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(AssistantError::LlmError(
            "Empty response from Gemini".to_string(),
        ));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let adapter = GeminiAdapter::new("test-key-123456".to_string(), &LlmConfig::default())
            .unwrap();
        let request = adapter.build_request("Você é Moara", "Quanto gastei?");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Quanto gastei?");
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "Você é Moara");
        assert_eq!(json["generation_config"]["max_output_tokens"], 300);
        assert!(adapter.url.ends_with("gemini-2.0-flash:generateContent"));
    }

    #[test]
    fn test_extract_text() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Olá, "},{"text":"João."}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Olá, João.");

        let empty: GeminiResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(extract_text(empty).is_err());

        let blocked: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"SAFETY"}]}"#,
        )
        .unwrap();
        assert!(extract_text(blocked).is_err());
    }
}
