//! Dynamic answer mode
//!
//! Skips intent routing: every dataset is serialized into a bounded text
//! context and the language adapter composes the answer. Without a model
//! (or when the model fails) a keyword generator answers from the rule engine.

use crate::agent::{greeting_message, FinancialAgent, DEFAULT_SUMMARY_WINDOW_DAYS};
use crate::classifier::{
    contains_any, normalize, GOAL_KEYWORDS, GREETING_KEYWORDS, INVESTMENT_KEYWORDS,
    SPENDING_KEYWORDS,
};
use crate::config::{AssistantConfig, MAX_HISTORY_CONTEXT, MAX_TRANSACTIONS_CONTEXT};
use crate::llm::LanguageAdapter;
use crate::loader::{FILE_HISTORY, FILE_PRODUCTS, FILE_PROFILE, FILE_TRANSACTIONS};
use crate::models::FinancialData;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

const TRANSACTION_WORDS: &[&str] = &[
    "gasto",
    "gastei",
    "despesa",
    "transação",
    "transações",
    "compra",
    "pagamento",
    "categoria",
];
const PROFILE_WORDS: &[&str] = &["perfil", "renda", "meta", "metas", "objetivo", "risco"];
const PRODUCT_WORDS: &[&str] = &[
    "produto",
    "investimento",
    "investir",
    "aplicação",
    "cdb",
    "tesouro",
    "fundo",
];
const HISTORY_WORDS: &[&str] = &["atendimento", "histórico", "suporte", "reclamação", "chamado"];

/// Alert words for the keyword generator; also matches "recorrente"
const DYNAMIC_ALERT_WORDS: &[&str] = &["alerta", "aumento", "aumentou", "recorrente"];

pub const GENERIC_SOURCE: &str = "dados do sistema";

/// Row caps for the serialized context
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub max_transactions: usize,
    pub max_history: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_transactions: MAX_TRANSACTIONS_CONTEXT,
            max_history: MAX_HISTORY_CONTEXT,
        }
    }
}

impl From<&AssistantConfig> for ContextLimits {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            max_transactions: config.max_transactions_context,
            max_history: config.max_history_context,
        }
    }
}

/// Answer text plus the heuristically attributed sources
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicAnswer {
    pub text: String,
    pub sources: Vec<String>,
}

/// Render every dataset as plain text for the model prompt
pub fn build_data_context(data: &FinancialData, limits: ContextLimits) -> String {
    let mut out = String::new();
    let profile = &data.profile;

    // writes into a String cannot fail
    let _ = writeln!(out, "PERFIL DO USUÁRIO:");
    let _ = writeln!(out, "- Nome: {}", profile.name);
    let _ = writeln!(
        out,
        "- Renda mensal: R$ {:.2}",
        profile.monthly_income.unwrap_or(0.0)
    );
    let _ = writeln!(out, "- Perfil de investidor: {}", profile.investor_type);
    let _ = writeln!(
        out,
        "- Patrimônio total: R$ {:.2}",
        profile.total_assets.unwrap_or(0.0)
    );
    let _ = writeln!(
        out,
        "- Reserva de emergência: R$ {:.2}",
        profile.emergency_reserve.unwrap_or(0.0)
    );
    let _ = writeln!(
        out,
        "- Aceita risco: {}",
        if profile.accepts_risk { "Sim" } else { "Não" }
    );
    if !profile.goals.is_empty() {
        let _ = writeln!(out, "- Metas financeiras:");
        for goal in &profile.goals {
            let _ = writeln!(
                out,
                "  * {}: R$ {:.2} até {}",
                goal.name, goal.target_amount, goal.deadline
            );
        }
    }
    out.push('\n');

    if !data.transactions.is_empty() {
        let _ = writeln!(
            out,
            "TRANSAÇÕES RECENTES ({} registros):",
            data.transactions.len()
        );
        for tx in data.transactions.iter().take(limits.max_transactions) {
            let _ = writeln!(
                out,
                "- {}: {} - {} - R$ {:.2} ({})",
                tx.date, tx.description, tx.category, tx.amount, tx.kind
            );
        }
        if data.transactions.len() > limits.max_transactions {
            let _ = writeln!(
                out,
                "... e mais {} transações",
                data.transactions.len() - limits.max_transactions
            );
        }
        out.push('\n');
    }

    if !data.history.is_empty() {
        let _ = writeln!(
            out,
            "HISTÓRICO DE ATENDIMENTO ({} registros):",
            data.history.len()
        );
        for record in data.history.iter().take(limits.max_history) {
            let _ = writeln!(out, "- {}: {} - {}", record.date, record.topic, record.summary);
        }
        if data.history.len() > limits.max_history {
            let _ = writeln!(
                out,
                "... e mais {} atendimentos",
                data.history.len() - limits.max_history
            );
        }
        out.push('\n');
    }

    if !data.products.is_empty() {
        let _ = writeln!(
            out,
            "PRODUTOS FINANCEIROS DISPONÍVEIS ({} produtos):",
            data.products.len()
        );
        for product in &data.products {
            let _ = writeln!(
                out,
                "- {} ({}, risco {}): {}",
                product.name, product.category, product.risk_level, product.suited_for
            );
        }
    }

    out.trim_end().to_string()
}

/// Cite each dataset whose keywords appear in the query or the answer
pub fn attribute_sources(query: &str, answer: &str) -> Vec<String> {
    let text = format!("{} {}", normalize(query), normalize(answer));

    let sources: Vec<String> = [
        (TRANSACTION_WORDS, FILE_TRANSACTIONS),
        (PROFILE_WORDS, FILE_PROFILE),
        (PRODUCT_WORDS, FILE_PRODUCTS),
        (HISTORY_WORDS, FILE_HISTORY),
    ]
    .iter()
    .filter(|(words, _)| contains_any(&text, words))
    .map(|(_, file)| file.to_string())
    .collect();

    if sources.is_empty() {
        vec![GENERIC_SOURCE.to_string()]
    } else {
        sources
    }
}

/// Keyword answer used without a language model
pub fn keyword_answer(agent: &FinancialAgent, query: &str) -> String {
    let text = normalize(query);
    let data = agent.data();

    if contains_any(&text, GREETING_KEYWORDS) {
        return greeting_message(&data.profile.name);
    }

    if contains_any(&text, SPENDING_KEYWORDS) {
        let outcome = agent.get_spending_summary(DEFAULT_SUMMARY_WINDOW_DAYS);
        return if outcome.success {
            outcome.message
        } else {
            "Ainda não tenho dados suficientes sobre seus gastos para fazer uma análise detalhada."
                .to_string()
        };
    }

    if contains_any(&text, DYNAMIC_ALERT_WORDS) {
        return "Seus gastos estão estáveis no momento. Continue monitorando suas despesas recorrentes."
            .to_string();
    }

    if contains_any(&text, GOAL_KEYWORDS) {
        return match data.profile.goals.first() {
            Some(goal) => format!(
                "Sua meta é {} de R$ {:.2} até {}. Posso ajudar a calcular quanto precisa guardar mensalmente.",
                goal.name, goal.target_amount, goal.deadline
            ),
            None => "Você ainda não definiu metas financeiras no seu perfil. Qual objetivo deseja alcançar?"
                .to_string(),
        };
    }

    if contains_any(&text, INVESTMENT_KEYWORDS) {
        return if data.products.is_empty() {
            "Não tenho produtos disponíveis no momento para recomendação.".to_string()
        } else {
            format!(
                "Considerando seu perfil {}, posso recomendar produtos adequados ao seu nível de risco. Deseja saber mais sobre opções específicas?",
                data.profile.investor_type
            )
        };
    }

    "Posso ajudar com: análise de gastos, alertas, planejamento de metas ou sugestões de produtos. Sobre qual tema deseja falar?"
        .to_string()
}

/// Answers free-form questions over the full data context
pub struct DynamicResponder {
    adapter: Arc<dyn LanguageAdapter>,
    limits: ContextLimits,
}

impl DynamicResponder {
    pub fn new(adapter: Arc<dyn LanguageAdapter>, limits: ContextLimits) -> Self {
        Self { adapter, limits }
    }

    pub async fn respond(&self, agent: &FinancialAgent, query: &str) -> DynamicAnswer {
        let text = if self.adapter.is_llm() {
            let context = build_data_context(agent.data(), self.limits);
            debug!(context_len = context.len(), "Dynamic context built");

            match self.adapter.answer(query, &context).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(provider = %self.adapter.provider(), "Dynamic answer failed, using keyword generator: {}", e);
                    keyword_answer(agent, query)
                }
            }
        } else {
            keyword_answer(agent, query)
        };

        DynamicAnswer {
            sources: attribute_sources(query, &text),
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::llm::{MockAdapter, Provider};
    use crate::loader::DataLoader;
    use crate::models::{ServiceHistoryRecord, Transaction, TransactionKind};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::path::Path;

    fn sample_data() -> FinancialData {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        DataLoader::new(dir).load_all().unwrap()
    }

    struct FixedAdapter {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl LanguageAdapter for FixedAdapter {
        fn provider(&self) -> Provider {
            Provider::Claude
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> crate::Result<String> {
            self.reply
                .map(str::to_string)
                .ok_or_else(|| AssistantError::LlmError("timeout".to_string()))
        }
    }

    #[test]
    fn test_context_contains_every_dataset() {
        let context = build_data_context(&sample_data(), ContextLimits::default());

        assert!(context.starts_with("PERFIL DO USUÁRIO:"));
        assert!(context.contains("- Nome: João Silva"));
        assert!(context.contains("- Renda mensal: R$ 5000.00"));
        assert!(context.contains("- Aceita risco: Não"));
        assert!(context.contains("  * Entrada do apartamento: R$ 50000.00 até 2027-12"));
        assert!(context.contains("TRANSAÇÕES RECENTES (17 registros):"));
        assert!(context.contains("- 2025-10-02: Aluguel - moradia - R$ 1200.00 (saida)"));
        assert!(context.contains("HISTÓRICO DE ATENDIMENTO (4 registros):"));
        assert!(context.contains("- Tesouro Selic (renda_fixa, risco baixo):"));
        assert!(!context.contains("... e mais"));
    }

    #[test]
    fn test_context_caps_long_lists() {
        let mut data = sample_data();
        let day = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        data.transactions = (0..25)
            .map(|i| Transaction {
                date: day,
                description: format!("Compra {}", i),
                category: "mercado".to_string(),
                amount: 10.0,
                kind: TransactionKind::Outflow,
            })
            .collect();
        data.history = (0..12)
            .map(|i| ServiceHistoryRecord {
                date: day,
                channel: "chat".to_string(),
                topic: format!("tema {}", i),
                summary: "resumo".to_string(),
                resolved: true,
            })
            .collect();

        let context = build_data_context(&data, ContextLimits::default());
        assert!(context.contains("Compra 19"));
        assert!(!context.contains("Compra 20"));
        assert!(context.contains("... e mais 5 transações"));
        assert!(context.contains("... e mais 2 atendimentos"));
    }

    #[test]
    fn test_attribute_sources() {
        assert_eq!(
            attribute_sources("Quanto gastei?", "Seus gastos somam R$ 10.00."),
            vec![FILE_TRANSACTIONS]
        );
        assert_eq!(
            attribute_sources("Qual meu perfil?", "Sugiro o Tesouro Selic."),
            vec![FILE_PROFILE, FILE_PRODUCTS]
        );
        assert_eq!(
            attribute_sources("Meu último chamado?", "Foi resolvido."),
            vec![FILE_HISTORY]
        );
        assert_eq!(attribute_sources("Tudo bem?", "Sim."), vec![GENERIC_SOURCE]);
    }

    #[test]
    fn test_keyword_answer_order() {
        let agent = FinancialAgent::new(Arc::new(sample_data()));

        assert!(keyword_answer(&agent, "bom dia").starts_with("Olá, João Silva."));
        assert!(keyword_answer(&agent, "quanto gastei?").starts_with("Você gastou R$ 3604.90"));
        assert!(keyword_answer(&agent, "algo recorrente?").starts_with("Seus gastos estão estáveis"));
        assert!(keyword_answer(&agent, "minha meta")
            .starts_with("Sua meta é Completar reserva de emergência de R$ 15000.00 até 2026-06."));
        assert!(keyword_answer(&agent, "onde investir").contains("perfil moderado"));
        assert!(keyword_answer(&agent, "previsão do tempo").starts_with("Posso ajudar com: análise"));
    }

    #[tokio::test]
    async fn test_mock_adapter_uses_keyword_generator() {
        let agent = FinancialAgent::new(Arc::new(sample_data()));
        let responder = DynamicResponder::new(Arc::new(MockAdapter), ContextLimits::default());

        let answer = responder.respond(&agent, "quanto gastei?").await;
        assert!(answer.text.starts_with("Você gastou"));
        assert_eq!(answer.sources, vec![FILE_TRANSACTIONS]);
    }

    #[tokio::test]
    async fn test_llm_answer_and_failure_fallback() {
        let agent = FinancialAgent::new(Arc::new(sample_data()));

        let working = DynamicResponder::new(
            Arc::new(FixedAdapter {
                reply: Some("  Segundo seu perfil, sua renda é R$ 5000.00.  "),
            }),
            ContextLimits::default(),
        );
        let answer = working.respond(&agent, "qual minha renda?").await;
        assert_eq!(answer.text, "Segundo seu perfil, sua renda é R$ 5000.00.");
        assert_eq!(answer.sources, vec![FILE_PROFILE]);

        let failing = DynamicResponder::new(
            Arc::new(FixedAdapter { reply: None }),
            ContextLimits::default(),
        );
        let answer = failing.respond(&agent, "oi").await;
        assert!(answer.text.starts_with("Olá, João Silva."));
    }
}
