//! Language adapter
//!
//! Optional language-model layer. It only rephrases rule-engine output,
//! classifies intents, or (in dynamic mode) composes free-form answers.
//! Any failure is reported as an error so callers can fall back to
//! deterministic text.

use crate::config::LlmConfig;
use crate::error::AssistantError;
use crate::models::{AgentResponse, Intent};
use crate::security::secure_env_var;
use crate::Result;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod claude;
pub mod gemini;
pub mod openai;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Persona and guardrails shared by every hosted provider
pub const SYSTEM_PROMPT: &str = r#"Você é Moara, um analista financeiro pessoal proativo.

Regras críticas:
* Use APENAS as informações presentes nos dados fornecidos
* NUNCA invente valores, transações ou produtos que não existam nos dados
* Quando algo não puder ser respondido com os dados disponíveis, informe isso claramente
* Use linguagem natural, direta e adequada para interface mobile
* Limite sua resposta a no máximo 2-3 frases curtas
* Não explique regras internas, arquitetura ou funcionamento do sistema
* Quando relevante, cite de onde obteve a informação (ex: "segundo suas transações", "de acordo com seu perfil")"#;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"Você classifica perguntas de um assistente financeiro.
Responda SOMENTE com JSON válido, sem texto adicional, no formato:
{"intent": "<intent>", "confidence": <número entre 0 e 1>}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
    Claude,
    Mock,
}

impl Provider {
    /// Environment variable holding this provider's API key
    pub fn key_variable(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::Claude => Some("ANTHROPIC_API_KEY"),
            Provider::Mock => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "gemini" => Some(Provider::Gemini),
            "claude" | "anthropic" => Some(Provider::Claude),
            "mock" => Some(Provider::Mock),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
            Provider::Mock => "mock",
        };
        write!(f, "{}", s)
    }
}

/// Intent picked by a language model, with its self-reported confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

/// Trait for language-model backends
#[async_trait]
pub trait LanguageAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Single system + user completion
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    fn is_llm(&self) -> bool {
        self.provider() != Provider::Mock
    }

    /// Classify a query into one of [`Intent::ROUTABLE`]. Any failure is `None`.
    async fn classify(&self, query: &str) -> Option<Classification> {
        let prompt = build_classification_prompt(query);

        match self.complete(CLASSIFIER_SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => {
                let parsed = parse_classification(&raw);
                if parsed.is_none() {
                    warn!(provider = %self.provider(), "Malformed intent classification");
                }
                parsed
            }
            Err(e) => {
                warn!(provider = %self.provider(), "Intent classification failed: {}", e);
                None
            }
        }
    }

    /// Rephrase a rule-engine answer. Values must be kept verbatim.
    async fn verbalize(&self, response: &AgentResponse) -> Result<String> {
        let text = self
            .complete(SYSTEM_PROMPT, &build_verbalize_prompt(response))
            .await?;
        non_empty(text)
    }

    /// Free-form answer over a serialized data context (dynamic mode)
    async fn answer(&self, query: &str, data_context: &str) -> Result<String> {
        let text = self
            .complete(SYSTEM_PROMPT, &build_dynamic_prompt(query, data_context))
            .await?;
        non_empty(text)
    }
}

/// Deterministic stand-in used when no provider is configured
pub struct MockAdapter;

#[async_trait]
impl LanguageAdapter for MockAdapter {
    fn provider(&self) -> Provider {
        Provider::Mock
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(AssistantError::LlmUnavailable(
            "no language model configured".to_string(),
        ))
    }

    async fn classify(&self, _query: &str) -> Option<Classification> {
        None
    }

    async fn verbalize(&self, response: &AgentResponse) -> Result<String> {
        Ok(response.message.clone())
    }
}

/// Pick the provider: explicit override first, then the first valid key among
/// OpenAI, Gemini and Anthropic. Returns `None` when only the mock applies.
pub fn detect_provider(
    provider_override: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<(Provider, String)> {
    if let Some(name) = provider_override {
        let provider = match Provider::from_name(name) {
            Some(Provider::Mock) => return None,
            Some(provider) => provider,
            None => {
                warn!(provider = name, "Unknown LLM provider, using deterministic mode");
                return None;
            }
        };

        let variable = provider.key_variable()?;
        return match lookup(variable) {
            Some(key) => Some((provider, key)),
            None => {
                warn!(provider = %provider, "{} not set, using deterministic mode", variable);
                None
            }
        };
    }

    [Provider::OpenAi, Provider::Gemini, Provider::Claude]
        .into_iter()
        .find_map(|provider| {
            let key = lookup(provider.key_variable()?)?;
            Some((provider, key))
        })
}

/// Build the adapter for the current environment, falling back to [`MockAdapter`]
pub fn select_adapter(config: &LlmConfig) -> Arc<dyn LanguageAdapter> {
    let detected = detect_provider(config.provider_override.as_deref(), secure_env_var);

    let adapter: Result<Arc<dyn LanguageAdapter>> = match detected {
        Some((Provider::OpenAi, key)) => {
            OpenAiAdapter::new(key, config).map(|a| Arc::new(a) as Arc<dyn LanguageAdapter>)
        }
        Some((Provider::Gemini, key)) => {
            GeminiAdapter::new(key, config).map(|a| Arc::new(a) as Arc<dyn LanguageAdapter>)
        }
        Some((Provider::Claude, key)) => {
            ClaudeAdapter::new(key, config).map(|a| Arc::new(a) as Arc<dyn LanguageAdapter>)
        }
        Some((Provider::Mock, _)) | None => Ok(Arc::new(MockAdapter)),
    };

    match adapter {
        Ok(adapter) => {
            info!(provider = %adapter.provider(), "Language adapter selected");
            adapter
        }
        Err(e) => {
            warn!("Failed to initialize language adapter, using deterministic mode: {}", e);
            Arc::new(MockAdapter)
        }
    }
}

/// Build the shared HTTP client with the adapter's timeout
pub(crate) fn build_http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .build()?)
}

/// Send a request, retrying transport errors, 429 and 5xx up to `max_attempts` times
pub(crate) async fn send_with_retry(
    request: RequestBuilder,
    max_attempts: u32,
    provider: Provider,
) -> Result<Response> {
    let attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let Some(pending) = request.try_clone() else {
            return Err(AssistantError::LlmError(
                "request body cannot be retried".to_string(),
            ));
        };

        match pending.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(provider = %provider, attempt, %status, "LLM API error response");

                let error =
                    AssistantError::LlmError(format!("{} returned {}: {}", provider, status, body));
                if !is_retryable(status) {
                    return Err(error);
                }
                last_error = Some(error);
            }
            Err(e) => {
                warn!(provider = %provider, attempt, "LLM API request failed: {}", e);
                last_error = Some(AssistantError::HttpError(e));
            }
        }

        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
    }

    Err(last_error
        .unwrap_or_else(|| AssistantError::LlmError(format!("{} request not sent", provider))))
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn non_empty(text: String) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(AssistantError::LlmError("empty completion".to_string()))
    } else {
        Ok(trimmed.to_string())
    }
}

fn build_classification_prompt(query: &str) -> String {
    let intents: Vec<&str> = Intent::ROUTABLE.iter().map(|i| i.as_str()).collect();

    format!(
        r#"Intenções possíveis:
- goal_planning: metas, objetivos, quanto guardar ou poupar
- spending_summary: quanto gastou, resumo de despesas
- spending_alert: alertas, aumento de gastos, despesas recorrentes
- product_suggestion: onde investir, recomendação de produtos
- greeting: cumprimentos

Valores válidos para "intent": {}

PERGUNTA: {}"#,
        intents.join(", "),
        query
    )
}

fn build_verbalize_prompt(response: &AgentResponse) -> String {
    let sources = if response.sources.is_empty() {
        "dados do sistema".to_string()
    } else {
        response.sources.join(", ")
    };

    format!(
        r#"Com base nos dados financeiros do usuário, responda a consulta relacionada a: {}

Dados disponíveis: {}

Mensagem de referência: {}

Fontes dos dados: {}

Gere uma resposta clara e objetiva em no máximo 2 frases. Mantenha todos os valores exatos fornecidos."#,
        response.intent, response.data, response.message, sources
    )
}

fn build_dynamic_prompt(query: &str, data_context: &str) -> String {
    format!(
        "{}\n\nPERGUNTA DO USUÁRIO: {}\n\nResponda com base exclusivamente nos dados acima. Máximo 2-3 frases.",
        data_context, query
    )
}

/// Parse `{"intent": "...", "confidence": 0.9}`, tolerating markdown fences
pub fn parse_classification(raw: &str) -> Option<Classification> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json: serde_json::Value = serde_json::from_str(cleaned).ok()?;

    let intent = Intent::from_label(json.get("intent")?.as_str()?)?;
    let confidence = json.get("confidence")?.as_f64()?;

    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(Classification {
        intent,
        confidence: confidence as f32,
    })
}
