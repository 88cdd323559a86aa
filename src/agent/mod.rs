//! Rule engine
//!
//! QUERY → ROUTE (LLM classification | keywords) → RULE → AgentResponse
//!
//! Every number shown to the user is computed here. The language adapter may
//! pick the intent, but never produces values.

use crate::classifier::IntentClassifier;
use crate::config::INTENT_CONFIDENCE_THRESHOLD;
use crate::llm::LanguageAdapter;
use crate::loader::FILE_TRANSACTIONS;
use crate::models::{
    AgentResponse, FinancialData, Intent, RiskLevel, RoutedBy, RuleOutcome, Transaction,
};
use chrono::{Datelike, Duration, Local, NaiveDate};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_ALERT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_SUMMARY_WINDOW_DAYS: i64 = 30;
/// Recent spending must exceed the previous window by more than this factor
pub const ALERT_INCREASE_RATIO: f64 = 1.2;
pub const MIN_RECURRING_COUNT: usize = 2;
/// Horizon used when a goal deadline cannot be parsed
pub const DEFAULT_GOAL_MONTHS: i64 = 12;

const NO_ALERTS_MESSAGE: &str = "Sem alertas no momento. Seus gastos estão estáveis.";
const NO_GOALS_MESSAGE: &str =
    "Informe seu objetivo e prazo para calcular valor mensal. Qual meta deseja alcançar?";
const HELP_MESSAGE: &str =
    "Posso ajudar com: gastos, alertas, metas ou produtos financeiros. Sobre qual tema deseja falar?";

/// A rule outcome plus the computed values behind it
struct Evaluation {
    outcome: RuleOutcome,
    data: Value,
}

impl From<RuleOutcome> for Evaluation {
    fn from(outcome: RuleOutcome) -> Self {
        Self {
            outcome,
            data: json!({}),
        }
    }
}

/// Deterministic financial agent over one user's datasets
pub struct FinancialAgent {
    data: Arc<FinancialData>,
    adapter: Option<Arc<dyn LanguageAdapter>>,
    confidence_threshold: f32,
    reference_date: NaiveDate,
}

impl FinancialAgent {
    pub fn new(data: Arc<FinancialData>) -> Self {
        Self {
            data,
            adapter: None,
            confidence_threshold: INTENT_CONFIDENCE_THRESHOLD,
            reference_date: Local::now().date_naive(),
        }
    }

    /// Enable LLM-assisted routing. Adapters without a model are ignored.
    pub fn with_adapter(mut self, adapter: Arc<dyn LanguageAdapter>) -> Self {
        self.adapter = adapter.is_llm().then_some(adapter);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Date goal horizons are measured from (defaults to today)
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = date;
        self
    }

    pub fn data(&self) -> &Arc<FinancialData> {
        &self.data
    }

    //
    // ================= Rules =================
    //

    /// Compare outflows of the last `window_days` with the window before it
    pub fn detect_spending_increase(&self, window_days: i64) -> RuleOutcome {
        self.evaluate_spending_increase(window_days).outcome
    }

    /// Most frequent outflow category with at least two occurrences
    pub fn detect_recurring_expenses(&self) -> RuleOutcome {
        self.evaluate_recurring_expenses().outcome
    }

    /// Monthly amount needed to reach `target_amount` in `months`
    pub fn calculate_goal_planning(&self, target_amount: f64, months: i64) -> RuleOutcome {
        self.evaluate_goal_planning(target_amount, months).outcome
    }

    /// First product matching the investor's risk tier, falling back to low risk
    pub fn suggest_product(&self) -> RuleOutcome {
        self.evaluate_product().outcome
    }

    /// Total outflow and top category over the last `window_days`
    pub fn get_spending_summary(&self, window_days: i64) -> RuleOutcome {
        self.evaluate_spending_summary(window_days).outcome
    }

    fn evaluate_spending_increase(&self, window_days: i64) -> Evaluation {
        let transactions = &self.data.transactions;

        if transactions.len() < 2 {
            return RuleOutcome::not_found(
                "Dados insuficientes para análise de gastos. Adicione mais transações.",
                &[FILE_TRANSACTIONS],
            )
            .into();
        }

        let outflows = outflows(transactions);
        let Some(latest) = latest_date(&outflows) else {
            return RuleOutcome::not_found(
                "Sem despesas registradas para análise.",
                &["transacoes.csv:tipo"],
            )
            .into();
        };

        let Some((period_start, previous_start)) = window_start(latest, window_days)
            .and_then(|start| Some((start, window_start(start, window_days)?)))
        else {
            return RuleOutcome::not_found(
                format!("Período de {} dias fora do intervalo de datas suportado.", window_days),
                &["transacoes.csv:data"],
            )
            .into();
        };

        let recent_total: f64 = outflows
            .iter()
            .filter(|t| t.date >= period_start)
            .map(|t| t.amount)
            .sum();

        let previous: Vec<&Transaction> = outflows
            .iter()
            .copied()
            .filter(|t| t.date >= previous_start && t.date < period_start)
            .collect();

        if previous.is_empty() {
            return RuleOutcome::not_found(
                "Período anterior sem dados para comparação.",
                &["transacoes.csv:data,valor"],
            )
            .into();
        }

        let previous_total: f64 = previous.iter().map(|t| t.amount).sum();

        debug!(
            window_days,
            recent_total, previous_total, "Spending windows computed"
        );

        if recent_total > previous_total * ALERT_INCREASE_RATIO {
            let increase_pct = (recent_total - previous_total) / previous_total * 100.0;
            let message = format!(
                "Seus gastos aumentaram {:.0}% nos últimos {} dias. Pode ser um bom momento para revisar o orçamento.",
                increase_pct, window_days
            );

            return Evaluation {
                outcome: RuleOutcome::found(message, &["transacoes.csv:data,valor,tipo"]),
                data: json!({
                    "window_days": window_days,
                    "recent_total": round2(recent_total),
                    "previous_total": round2(previous_total),
                    "increase_pct": increase_pct.round(),
                }),
            };
        }

        RuleOutcome::not_found(
            format!(
                "Sem aumento atípico de gastos nos últimos {} dias.",
                window_days
            ),
            &["transacoes.csv:data,valor"],
        )
        .into()
    }

    fn evaluate_recurring_expenses(&self) -> Evaluation {
        let transactions = &self.data.transactions;

        if transactions.len() < 2 {
            return RuleOutcome::not_found(
                "Dados insuficientes para detectar recorrências.",
                &[FILE_TRANSACTIONS],
            )
            .into();
        }

        let outflows = outflows(transactions);
        if outflows.is_empty() {
            return RuleOutcome::not_found("Sem despesas registradas.", &["transacoes.csv:tipo"])
                .into();
        }

        let groups = group_by_category(&outflows);

        // strict comparison keeps the first category on ties
        let top = groups
            .iter()
            .filter(|g| g.count >= MIN_RECURRING_COUNT)
            .fold(None::<&CategoryTotal>, |best, g| match best {
                Some(b) if b.count >= g.count => Some(b),
                _ => Some(g),
            });

        match top {
            Some(group) => Evaluation {
                outcome: RuleOutcome::found(
                    format!(
                        "Você tem {} despesas em '{}' totalizando R$ {:.2}. Considere analisar se há oportunidade de redução.",
                        group.count, group.category, group.total
                    ),
                    &["transacoes.csv:categoria,valor"],
                ),
                data: json!({
                    "category": group.category,
                    "count": group.count,
                    "total": round2(group.total),
                }),
            },
            None => RuleOutcome::not_found(
                "Nenhuma despesa recorrente identificada.",
                &["transacoes.csv:categoria"],
            )
            .into(),
        }
    }

    fn evaluate_goal_planning(&self, target_amount: f64, months: i64) -> Evaluation {
        if months <= 0 {
            return RuleOutcome::not_found(
                "Prazo inválido para meta financeira. Informe um prazo em meses maior que zero.",
                &[],
            )
            .into();
        }

        let profile = &self.data.profile;
        let income = match profile.monthly_income {
            Some(income) if income > 0.0 => income,
            _ => {
                return RuleOutcome::not_found(
                    "Renda mensal não informada no perfil.",
                    &["perfil_investidor.json:renda_mensal"],
                )
                .into()
            }
        };

        let monthly_needed = target_amount / months as f64;
        let income_pct = monthly_needed / income * 100.0;

        Evaluation {
            outcome: RuleOutcome::found(
                format!(
                    "Para atingir R$ {:.2} em {} meses, reserve R$ {:.2} mensais. Isso representa {:.1}% da sua renda ({}).",
                    target_amount, months, monthly_needed, income_pct, profile.investor_type
                ),
                &["perfil_investidor.json:renda_mensal,perfil_investidor"],
            ),
            data: json!({
                "target_amount": round2(target_amount),
                "months": months,
                "monthly_needed": round2(monthly_needed),
                "income_pct": (income_pct * 10.0).round() / 10.0,
                "investor_type": profile.investor_type.to_string(),
            }),
        }
    }

    fn evaluate_product(&self) -> Evaluation {
        let products = &self.data.products;

        if products.is_empty() {
            return RuleOutcome::not_found(
                "Produtos financeiros não disponíveis.",
                &["produtos_financeiros.json"],
            )
            .into();
        }

        let profile = &self.data.profile;
        let target = profile.investor_type.target_risk(profile.accepts_risk);

        let chosen = products
            .iter()
            .find(|p| p.risk_level == target)
            .or_else(|| products.iter().find(|p| p.risk_level == RiskLevel::Low));

        let Some(product) = chosen else {
            return RuleOutcome::not_found(
                "Nenhum produto compatível encontrado.",
                &["produtos_financeiros.json"],
            )
            .into();
        };

        debug!(target = %target, product = %product.name, "Product selected");

        Evaluation {
            outcome: RuleOutcome::found(
                format!(
                    "Com perfil {}, considere '{}'. {}.",
                    profile.investor_type,
                    product.name,
                    product.suited_for.trim().trim_end_matches('.')
                ),
                &[
                    "perfil_investidor.json:perfil_investidor,aceita_risco",
                    "produtos_financeiros.json:nome,risco,indicado_para",
                ],
            ),
            data: json!({
                "investor_type": profile.investor_type.to_string(),
                "target_risk": target.to_string(),
                "product": product.name,
                "risk": product.risk_level.to_string(),
                "suited_for": product.suited_for,
            }),
        }
    }

    fn evaluate_spending_summary(&self, window_days: i64) -> Evaluation {
        let transactions = &self.data.transactions;

        if transactions.is_empty() {
            return RuleOutcome::not_found("Sem transações registradas.", &[FILE_TRANSACTIONS])
                .into();
        }

        let outflows = outflows(transactions);
        let Some(latest) = latest_date(&outflows) else {
            return RuleOutcome::not_found("Sem despesas registradas.", &["transacoes.csv:tipo"])
                .into();
        };

        let Some(cutoff) = window_start(latest, window_days) else {
            return RuleOutcome::not_found(
                format!("Período de {} dias fora do intervalo de datas suportado.", window_days),
                &["transacoes.csv:data"],
            )
            .into();
        };
        let recent: Vec<&Transaction> = outflows
            .iter()
            .copied()
            .filter(|t| t.date >= cutoff)
            .collect();

        if recent.is_empty() {
            return RuleOutcome::not_found(
                format!("Sem despesas nos últimos {} dias.", window_days),
                &["transacoes.csv:data"],
            )
            .into();
        }

        let total: f64 = recent.iter().map(|t| t.amount).sum();
        let groups = group_by_category(&recent);

        // strict comparison keeps the first category on ties
        let top = groups
            .iter()
            .fold(None::<&CategoryTotal>, |best, g| match best {
                Some(b) if b.total >= g.total => Some(b),
                _ => Some(g),
            });

        let Some(top) = top else {
            return RuleOutcome::not_found("Sem despesas registradas.", &["transacoes.csv:tipo"])
                .into();
        };

        Evaluation {
            outcome: RuleOutcome::found(
                format!(
                    "Você gastou R$ {:.2} nos últimos {} dias. Maior categoria: {} (R$ {:.2}).",
                    total, window_days, top.category, top.total
                ),
                &["transacoes.csv:data,tipo,categoria,valor"],
            ),
            data: json!({
                "window_days": window_days,
                "total": round2(total),
                "top_category": top.category,
                "top_category_total": round2(top.total),
            }),
        }
    }

    //
    // ================= Routing =================
    //

    /// Route a query and run the matching rule
    pub async fn answer_query(&self, query: &str) -> AgentResponse {
        let (intent, routed_by) = self.route(query).await;
        info!(intent = %intent, routed_by = ?routed_by, "Query routed");
        self.respond(intent, routed_by)
    }

    async fn route(&self, query: &str) -> (Intent, RoutedBy) {
        let Some(adapter) = &self.adapter else {
            return (IntentClassifier::classify(query), RoutedBy::Keyword);
        };

        match adapter.classify(query).await {
            Some(c) if c.confidence >= self.confidence_threshold => {
                return (c.intent, RoutedBy::Llm);
            }
            Some(c) => debug!(
                intent = %c.intent,
                confidence = c.confidence,
                threshold = self.confidence_threshold,
                "LLM classification below threshold"
            ),
            None => debug!("No usable LLM classification"),
        }

        (IntentClassifier::classify(query), RoutedBy::Fallback)
    }

    /// Run the handler for an already-decided intent
    pub fn respond(&self, intent: Intent, routed_by: RoutedBy) -> AgentResponse {
        let (evaluation, with_detail) = match intent {
            Intent::GoalPlanning => self.handle_goal(),
            Intent::SpendingSummary => (
                self.evaluate_spending_summary(DEFAULT_SUMMARY_WINDOW_DAYS),
                true,
            ),
            Intent::SpendingAlert => self.handle_alert(),
            Intent::ProductSuggestion => (self.evaluate_product(), true),
            Intent::Greeting => (
                Evaluation {
                    outcome: RuleOutcome::found(greeting_message(&self.data.profile.name), &[]),
                    data: json!({ "name": self.data.profile.name }),
                },
                false,
            ),
            Intent::Help => (RuleOutcome::found(HELP_MESSAGE, &[]).into(), false),
        };

        let Evaluation { outcome, data } = evaluation;

        AgentResponse {
            intent,
            routed_by,
            detail: if with_detail {
                outcome.message.clone()
            } else {
                String::new()
            },
            message: outcome.message,
            sources: outcome.sources,
            data,
        }
    }

    fn handle_goal(&self) -> (Evaluation, bool) {
        let Some(goal) = self.data.profile.goals.first() else {
            return (
                RuleOutcome::not_found(NO_GOALS_MESSAGE, &["perfil_investidor.json:metas"]).into(),
                false,
            );
        };

        let months = goal
            .deadline_month()
            .map(|deadline| months_between(self.reference_date, deadline).max(1))
            .unwrap_or(DEFAULT_GOAL_MONTHS);

        let mut evaluation = self.evaluate_goal_planning(goal.target_amount, months);
        if let Value::Object(map) = &mut evaluation.data {
            map.insert("goal".to_string(), json!(goal.name));
            map.insert("deadline".to_string(), json!(goal.deadline));
        }
        (evaluation, true)
    }

    fn handle_alert(&self) -> (Evaluation, bool) {
        let increase = self.evaluate_spending_increase(DEFAULT_ALERT_WINDOW_DAYS);
        if increase.outcome.success {
            return (increase, true);
        }

        let recurring = self.evaluate_recurring_expenses();
        if recurring.outcome.success {
            return (recurring, true);
        }

        (
            RuleOutcome::not_found(NO_ALERTS_MESSAGE, &[FILE_TRANSACTIONS]).into(),
            false,
        )
    }
}

/// Welcome/greeting text for a profile name
pub fn greeting_message(name: &str) -> String {
    let name = if name.trim().is_empty() {
        "Cliente"
    } else {
        name.trim()
    };
    format!(
        "Olá, {}. Estou aqui para ajudar com suas finanças. Como posso ajudar hoje?",
        name
    )
}

struct CategoryTotal {
    category: String,
    count: usize,
    total: f64,
}

fn outflows(transactions: &[Transaction]) -> Vec<&Transaction> {
    transactions.iter().filter(|t| t.is_outflow()).collect()
}

fn latest_date(transactions: &[&Transaction]) -> Option<NaiveDate> {
    transactions.iter().map(|t| t.date).max()
}

/// Per-category count and total, in first-encountered order
fn group_by_category(transactions: &[&Transaction]) -> Vec<CategoryTotal> {
    let mut groups: Vec<CategoryTotal> = Vec::new();

    for t in transactions {
        match groups.iter_mut().find(|g| g.category == t.category) {
            Some(group) => {
                group.count += 1;
                group.total += t.amount;
            }
            None => groups.push(CategoryTotal {
                category: t.category.clone(),
                count: 1,
                total: t.amount,
            }),
        }
    }

    groups
}

/// Calendar months from `from` to `to`, ignoring days
/// `latest` minus `window_days`, or `None` when the date would overflow
fn window_start(latest: NaiveDate, window_days: i64) -> Option<NaiveDate> {
    latest.checked_sub_signed(Duration::try_days(window_days)?)
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
