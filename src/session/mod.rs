//! Chat sessions
//!
//! A session owns its history and answer mode. Each turn runs:
//! sanitize → rule engine (or dynamic responder) → verbalize → validate → store.

pub mod history;

pub use history::{ChatHistory, ChatMessage, MessageRole};

use crate::agent::{greeting_message, FinancialAgent};
use crate::config::AssistantConfig;
use crate::dynamic::{ContextLimits, DynamicResponder};
use crate::llm::LanguageAdapter;
use crate::models::{AgentResponse, FinancialData, Intent};
use crate::security::sanitize_user_input;
use crate::validator::{ResponseValidator, MAX_SENTENCES_DEFAULT};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a session answers queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Intent routing into the rule engine
    #[default]
    Routed,
    /// Full data context handed to the language model
    Dynamic,
}

/// What the user sees for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    pub justification: String,
    pub detail: String,
    pub sources: Vec<String>,
    pub intent: Option<Intent>,
}

pub struct ChatSession {
    id: Uuid,
    agent: FinancialAgent,
    adapter: Arc<dyn LanguageAdapter>,
    dynamic: DynamicResponder,
    mode: AnswerMode,
    max_query_length: usize,
    history: ChatHistory,
    last_active: DateTime<Utc>,
}

impl ChatSession {
    /// Build a session over shared data; the welcome message is recorded immediately
    pub fn start(
        data: Arc<FinancialData>,
        adapter: Arc<dyn LanguageAdapter>,
        mode: AnswerMode,
        config: &AssistantConfig,
    ) -> Self {
        Self::start_with_id(Uuid::new_v4(), data, adapter, mode, config)
    }

    pub fn start_with_id(
        id: Uuid,
        data: Arc<FinancialData>,
        adapter: Arc<dyn LanguageAdapter>,
        mode: AnswerMode,
        config: &AssistantConfig,
    ) -> Self {
        let agent = FinancialAgent::new(data)
            .with_adapter(adapter.clone())
            .with_confidence_threshold(config.intent_confidence_threshold);

        Self::with_agent(id, agent, adapter, mode, config)
    }

    pub fn with_agent(
        id: Uuid,
        agent: FinancialAgent,
        adapter: Arc<dyn LanguageAdapter>,
        mode: AnswerMode,
        config: &AssistantConfig,
    ) -> Self {
        let mut session = Self {
            id,
            agent,
            dynamic: DynamicResponder::new(adapter.clone(), ContextLimits::from(config)),
            adapter,
            mode,
            max_query_length: config.max_query_length,
            history: ChatHistory::with_limit(config.max_chat_history),
            last_active: Utc::now(),
        };
        session.push_welcome();

        info!(session_id = %id, mode = ?mode, "Chat session started");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> AnswerMode {
        self.mode
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn agent(&self) -> &FinancialAgent {
        &self.agent
    }

    pub fn welcome_message(&self) -> String {
        greeting_message(&self.agent.data().profile.name)
    }

    /// Time of the last turn or clear
    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// Drop the conversation and start over from the welcome message
    pub fn clear(&mut self) {
        self.last_active = Utc::now();
        self.history.clear();
        self.push_welcome();
        debug!(session_id = %self.id, "Chat history cleared");
    }

    /// Run one turn and record both sides in the history
    pub async fn process_user_input(&mut self, raw: &str) -> ChatReply {
        self.last_active = Utc::now();
        self.history.push(ChatMessage::user(raw.trim()));

        let reply = match self.reply_for(raw).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(session_id = %self.id, "Failed to process message: {}", e);
                ChatReply {
                    content: format!("Erro ao processar sua mensagem. {}", e),
                    justification: String::new(),
                    detail: String::new(),
                    sources: Vec::new(),
                    intent: None,
                }
            }
        };

        self.history.push(
            ChatMessage::assistant(reply.content.clone()).with_metadata(
                reply.justification.clone(),
                reply.detail.clone(),
                reply.sources.clone(),
            ),
        );

        reply
    }

    async fn reply_for(&self, raw: &str) -> Result<ChatReply> {
        let query = sanitize_user_input(raw, self.max_query_length)?;

        let (text, mut detail, sources, intent) = match self.mode {
            AnswerMode::Routed => {
                let response = self.agent.answer_query(&query).await;

                let text = match self.adapter.verbalize(&response).await {
                    Ok(text) if Self::grounded_in(&text, &response) => text,
                    Ok(text) => {
                        warn!(
                            provider = %self.adapter.provider(),
                            verbalized = %text,
                            "Verbalization introduced numbers absent from the rule result, using rule message"
                        );
                        response.message.clone()
                    }
                    Err(e) => {
                        warn!(provider = %self.adapter.provider(), "Verbalization failed, using rule message: {}", e);
                        response.message.clone()
                    }
                };

                (text, response.detail, response.sources, Some(response.intent))
            }
            AnswerMode::Dynamic => {
                let answer = self.dynamic.respond(&self.agent, &query).await;
                (answer.text, String::new(), answer.sources, None)
            }
        };

        let (valid, content) = ResponseValidator::validate_response(&text, MAX_SENTENCES_DEFAULT);
        if !valid && content != text {
            detail = text;
        }
        if detail == content {
            detail.clear();
        }

        Ok(ChatReply {
            justification: ResponseValidator::create_justification(&sources),
            content,
            detail,
            sources,
            intent,
        })
    }

    /// Verbalized text may only repeat numbers the rule engine produced
    fn grounded_in(text: &str, response: &AgentResponse) -> bool {
        let reference = format!("{} {} {}", response.message, response.detail, response.data);
        ResponseValidator::numbers_grounded(text, &reference)
    }

    fn push_welcome(&mut self) {
        let welcome = self.welcome_message();
        self.history.push(ChatMessage::assistant(welcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockAdapter, Provider};
    use crate::loader::DataLoader;
    use async_trait::async_trait;
    use std::path::Path;

    fn sample_data() -> Arc<FinancialData> {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        Arc::new(DataLoader::new(dir).load_all().unwrap())
    }

    fn session(adapter: Arc<dyn LanguageAdapter>, mode: AnswerMode) -> ChatSession {
        ChatSession::start(sample_data(), adapter, mode, &AssistantConfig::default())
    }

    /// Hosted-model stand-in that always answers with the same text
    struct VerboseAdapter;

    #[async_trait]
    impl LanguageAdapter for VerboseAdapter {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> crate::Result<String> {
            Ok("Você gastou R$ 3604.90. A maior categoria foi moradia. Isso é normal. Revise o orçamento.".to_string())
        }
    }

    /// Hosted-model stand-in that makes up its own amount
    struct InventiveAdapter;

    #[async_trait]
    impl LanguageAdapter for InventiveAdapter {
        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> crate::Result<String> {
            Ok("Você gastou R$ 99999.99 no mês.".to_string())
        }
    }

    #[test]
    fn test_session_starts_with_welcome() {
        let session = session(Arc::new(MockAdapter), AnswerMode::Routed);
        let history = session.history();

        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, MessageRole::Assistant);
        assert_eq!(
            history.messages()[0].content,
            "Olá, João Silva. Estou aqui para ajudar com suas finanças. Como posso ajudar hoje?"
        );
    }

    #[tokio::test]
    async fn test_routed_turn_with_mock_adapter() {
        let mut session = session(Arc::new(MockAdapter), AnswerMode::Routed);

        let reply = session.process_user_input("  Quanto gastei?  ").await;
        assert_eq!(reply.intent, Some(Intent::SpendingSummary));
        assert!(reply.content.starts_with("Você gastou R$ 3604.90 nos últimos 30 dias."));
        assert_eq!(reply.justification, "Análise baseada em transacoes.csv.");
        assert_eq!(reply.sources, vec!["transacoes.csv:data,tipo,categoria,valor"]);
        // detail equal to the shown text is dropped
        assert!(reply.detail.is_empty());

        assert_eq!(session.history().len(), 3);
        assert_eq!(session.history().messages()[1].content, "Quanto gastei?");
    }

    #[tokio::test]
    async fn test_truncated_verbalization_moves_to_detail() {
        let mut session = session(Arc::new(VerboseAdapter), AnswerMode::Routed);

        let reply = session.process_user_input("quanto gastei?").await;
        assert_eq!(
            reply.content,
            "Você gastou R$ 3604.90. A maior categoria foi moradia."
        );
        assert!(reply.detail.ends_with("Revise o orçamento."));
        assert_eq!(reply.intent, Some(Intent::SpendingSummary));
    }

    #[tokio::test]
    async fn test_invented_numbers_fall_back_to_rule_message() {
        let mut session = session(Arc::new(InventiveAdapter), AnswerMode::Routed);

        let reply = session.process_user_input("quanto gastei?").await;
        assert!(reply.content.starts_with("Você gastou R$ 3604.90 nos últimos 30 dias."));
        assert!(!reply.content.contains("99999.99"));
        assert!(!reply.detail.contains("99999.99"));
    }

    #[tokio::test]
    async fn test_invalid_input_becomes_error_reply() {
        let mut session = session(Arc::new(MockAdapter), AnswerMode::Routed);

        let reply = session.process_user_input("   ").await;
        assert!(reply.content.starts_with("Erro ao processar sua mensagem."));
        assert!(reply.sources.is_empty());

        let reply = session.process_user_input(&"a".repeat(501)).await;
        assert!(reply.content.starts_with("Erro ao processar sua mensagem."));
    }

    #[tokio::test]
    async fn test_greeting_has_generic_justification() {
        let mut session = session(Arc::new(MockAdapter), AnswerMode::Routed);

        let reply = session.process_user_input("boa tarde").await;
        assert_eq!(reply.justification, "Resposta baseada nas regras gerais do agente.");
        assert!(!session.history().last_assistant().unwrap().has_details());
    }

    #[tokio::test]
    async fn test_dynamic_mode_without_model() {
        let mut session = session(Arc::new(MockAdapter), AnswerMode::Dynamic);

        let reply = session.process_user_input("qual minha meta?").await;
        assert!(reply.content.starts_with("Sua meta é Completar reserva de emergência"));
        assert_eq!(reply.intent, None);
        assert_eq!(reply.sources, vec!["perfil_investidor.json"]);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let config = AssistantConfig {
            max_chat_history: 4,
            ..AssistantConfig::default()
        };
        let mut session = ChatSession::start(
            sample_data(),
            Arc::new(MockAdapter),
            AnswerMode::Routed,
            &config,
        );
        let started = session.last_active();

        for _ in 0..5 {
            session.process_user_input("oi").await;
        }

        assert_eq!(session.history().len(), 4);
        assert_eq!(session.history().messages()[0].role, MessageRole::User);
        assert!(session.last_active() >= started);
    }

    #[test]
    fn test_clear_restores_welcome() {
        let mut session = session(Arc::new(MockAdapter), AnswerMode::Routed);
        tokio_test::block_on(session.process_user_input("oi"));
        assert_eq!(session.history().len(), 3);

        session.clear();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().messages()[0].content, session.welcome_message());
    }
}
