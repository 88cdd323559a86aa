//! Runtime configuration
//!
//! Defaults live here; every value can be overridden from the environment
//! (a `.env` file is loaded first by the binaries).

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_QUERY_LENGTH: usize = 500;
pub const MAX_TRANSACTIONS_CONTEXT: usize = 20;
pub const MAX_HISTORY_CONTEXT: usize = 10;
pub const INTENT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const LLM_TEMPERATURE: f32 = 0.3;
pub const LLM_MAX_TOKENS: u32 = 300;
pub const API_TIMEOUT_SECONDS: u64 = 30;
pub const MAX_API_RETRIES: u32 = 3;
pub const MAX_CHAT_HISTORY: usize = 100;
pub const MAX_SESSIONS: usize = 1000;
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

pub const OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const CLAUDE_MODEL: &str = "claude-3-haiku-20240307";

/// Settings for the hosted language model clients
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Forces a provider ("openai", "gemini", "claude", "mock") instead of auto-detection
    pub provider_override: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub openai_model: String,
    pub gemini_model: String,
    pub claude_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_override: None,
            temperature: LLM_TEMPERATURE,
            max_tokens: LLM_MAX_TOKENS,
            timeout: Duration::from_secs(API_TIMEOUT_SECONDS),
            max_retries: MAX_API_RETRIES,
            openai_model: OPENAI_MODEL.to_string(),
            gemini_model: GEMINI_MODEL.to_string(),
            claude_model: CLAUDE_MODEL.to_string(),
        }
    }
}

/// Top-level assistant configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub data_dir: PathBuf,
    pub max_query_length: usize,
    /// Transactions serialized into the dynamic-mode context
    pub max_transactions_context: usize,
    /// Service history rows serialized into the dynamic-mode context
    pub max_history_context: usize,
    /// Minimum confidence to accept an LLM intent classification
    pub intent_confidence_threshold: f32,
    pub api_port: u16,
    /// Messages kept per session; older ones are dropped first
    pub max_chat_history: usize,
    /// Upper bound on sessions held by the API server
    pub max_sessions: usize,
    /// API sessions untouched for this long are evicted
    pub session_idle_timeout: Duration,
    pub llm: LlmConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_query_length: MAX_QUERY_LENGTH,
            max_transactions_context: MAX_TRANSACTIONS_CONTEXT,
            max_history_context: MAX_HISTORY_CONTEXT,
            intent_confidence_threshold: INTENT_CONFIDENCE_THRESHOLD,
            api_port: 8080,
            max_chat_history: MAX_CHAT_HISTORY,
            max_sessions: MAX_SESSIONS,
            session_idle_timeout: Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS),
            llm: LlmConfig::default(),
        }
    }
}

impl AssistantConfig {
    /// Build the configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.max_query_length = env_parse("MAX_QUERY_LENGTH", config.max_query_length)?;
        config.max_transactions_context =
            env_parse("MAX_TRANSACTIONS_CONTEXT", config.max_transactions_context)?;
        config.max_history_context = env_parse("MAX_HISTORY_CONTEXT", config.max_history_context)?;
        config.intent_confidence_threshold = env_parse(
            "INTENT_CONFIDENCE_THRESHOLD",
            config.intent_confidence_threshold,
        )?;

        config.api_port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AssistantError::Config(format!("invalid port '{}'", raw)))?,
            Err(_) => config.api_port,
        };

        config.max_chat_history = env_parse("MAX_CHAT_HISTORY", config.max_chat_history)?.max(1);
        config.max_sessions = env_parse("MAX_SESSIONS", config.max_sessions)?.max(1);
        config.session_idle_timeout = Duration::from_secs(env_parse(
            "SESSION_IDLE_TIMEOUT_SECS",
            config.session_idle_timeout.as_secs(),
        )?);

        config.llm.provider_override = env::var("LLM_PROVIDER")
            .ok()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty());
        config.llm.timeout = Duration::from_secs(env_parse(
            "LLM_TIMEOUT_SECS",
            config.llm.timeout.as_secs(),
        )?);
        config.llm.max_retries = env_parse("LLM_MAX_RETRIES", config.llm.max_retries)?.max(1);

        if !(0.0..=1.0).contains(&config.intent_confidence_threshold) {
            return Err(AssistantError::Config(
                "INTENT_CONFIDENCE_THRESHOLD must be between 0 and 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AssistantError::Config(format!("invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AssistantConfig::default();
        assert_eq!(config.max_query_length, 500);
        assert_eq!(config.max_transactions_context, 20);
        assert_eq!(config.max_history_context, 10);
        assert!((config.intent_confidence_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.max_chat_history, 100);
        assert_eq!(config.max_sessions, 1000);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        env::set_var("MOARA_TEST_NUMBER", "abc");
        let parsed: Result<usize> = env_parse("MOARA_TEST_NUMBER", 1);
        assert!(parsed.is_err());

        env::set_var("MOARA_TEST_NUMBER", " 42 ");
        assert_eq!(env_parse::<usize>("MOARA_TEST_NUMBER", 1).unwrap(), 42);
        env::remove_var("MOARA_TEST_NUMBER");
    }
}
