//! Core data models for the finance assistant

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionKind {
    #[serde(rename = "entrada")]
    Inflow,
    #[serde(rename = "saida", alias = "saída")]
    Outflow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RiskLevel {
    #[serde(rename = "baixo")]
    Low,
    #[serde(rename = "medio", alias = "médio")]
    Medium,
    #[serde(rename = "alto")]
    High,
}

/// Investor profile type. Unrecognised values are kept verbatim so they can
/// still be shown to the user; they map to the low risk tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvestorType {
    Conservative,
    Moderate,
    Aggressive,
    Other(String),
}

impl InvestorType {
    /// Risk tier a product must carry to suit this investor
    pub fn target_risk(&self, accepts_risk: bool) -> RiskLevel {
        match self {
            InvestorType::Conservative => RiskLevel::Low,
            InvestorType::Moderate if accepts_risk => RiskLevel::Medium,
            InvestorType::Moderate => RiskLevel::Low,
            InvestorType::Aggressive => RiskLevel::High,
            InvestorType::Other(_) => RiskLevel::Low,
        }
    }
}

impl From<String> for InvestorType {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "conservador" => InvestorType::Conservative,
            "moderado" => InvestorType::Moderate,
            "arrojado" => InvestorType::Aggressive,
            _ => InvestorType::Other(value.trim().to_lowercase()),
        }
    }
}

impl From<InvestorType> for String {
    fn from(value: InvestorType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for InvestorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestorType::Conservative => "conservador",
            InvestorType::Moderate => "moderado",
            InvestorType::Aggressive => "arrojado",
            InvestorType::Other(raw) => raw.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "baixo",
            RiskLevel::Medium => "medio",
            RiskLevel::High => "alto",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::Inflow => "entrada",
            TransactionKind::Outflow => "saida",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Datasets =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    pub category: String,
    pub amount: f64,
    pub kind: TransactionKind,
}

impl Transaction {
    pub fn is_outflow(&self) -> bool {
        self.kind == TransactionKind::Outflow
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHistoryRecord {
    pub date: NaiveDate,
    pub channel: String,
    pub topic: String,
    pub summary: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialGoal {
    #[serde(rename = "meta", default)]
    pub name: String,
    #[serde(rename = "valor_necessario", default)]
    pub target_amount: f64,
    /// Year-month deadline, e.g. "2026-12"
    #[serde(rename = "prazo", default)]
    pub deadline: String,
}

impl FinancialGoal {
    /// First day of the deadline month, if the deadline is a valid "YYYY-MM"
    pub fn deadline_month(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&format!("{}-01", self.deadline.trim()), "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestorProfile {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "perfil_investidor")]
    pub investor_type: InvestorType,
    #[serde(rename = "renda_mensal")]
    pub monthly_income: Option<f64>,
    #[serde(rename = "aceita_risco", default)]
    pub accepts_risk: bool,
    #[serde(rename = "metas", default)]
    pub goals: Vec<FinancialGoal>,
    #[serde(rename = "idade", default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(rename = "patrimonio_total", default, skip_serializing_if = "Option::is_none")]
    pub total_assets: Option<f64>,
    #[serde(
        rename = "reserva_emergencia_atual",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub emergency_reserve: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "risco")]
    pub risk_level: RiskLevel,
    #[serde(rename = "indicado_para")]
    pub suited_for: String,
}

/// Everything loaded at session start. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct FinancialData {
    pub transactions: Vec<Transaction>,
    pub history: Vec<ServiceHistoryRecord>,
    pub profile: InvestorProfile,
    pub products: Vec<Product>,
}

//
// ================= Rule Outputs =================
//

/// Result of a single rule evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleOutcome {
    pub success: bool,
    pub message: String,
    pub sources: Vec<String>,
}

impl RuleOutcome {
    pub fn found(message: impl Into<String>, sources: &[&str]) -> Self {
        Self {
            success: true,
            message: message.into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn not_found(message: impl Into<String>, sources: &[&str]) -> Self {
        Self {
            success: false,
            message: message.into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GoalPlanning,
    SpendingSummary,
    SpendingAlert,
    ProductSuggestion,
    Greeting,
    Help,
}

impl Intent {
    /// Intents a language model may pick during classification
    pub const ROUTABLE: [Intent; 5] = [
        Intent::GoalPlanning,
        Intent::SpendingSummary,
        Intent::SpendingAlert,
        Intent::ProductSuggestion,
        Intent::Greeting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GoalPlanning => "goal_planning",
            Intent::SpendingSummary => "spending_summary",
            Intent::SpendingAlert => "spending_alert",
            Intent::ProductSuggestion => "product_suggestion",
            Intent::Greeting => "greeting",
            Intent::Help => "help",
        }
    }

    /// Parse a routable intent label. `help` and unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ROUTABLE.into_iter().find(|i| i.as_str() == label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoutedBy {
    Keyword,
    Llm,
    /// Keyword router used after the LLM classification was rejected
    Fallback,
}

/// Structured answer produced by the rule engine for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub intent: Intent,
    pub routed_by: RoutedBy,
    pub message: String,
    pub detail: String,
    pub sources: Vec<String>,
    /// Computed values backing the message
    pub data: serde_json::Value,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_investor_type_parsing() {
        assert_eq!(InvestorType::from("Moderado".to_string()), InvestorType::Moderate);
        assert_eq!(
            InvestorType::from("ousado".to_string()),
            InvestorType::Other("ousado".to_string())
        );
        assert_eq!(InvestorType::Aggressive.to_string(), "arrojado");
    }

    #[test]
    fn test_target_risk_mapping() {
        assert_eq!(InvestorType::Conservative.target_risk(true), RiskLevel::Low);
        assert_eq!(InvestorType::Moderate.target_risk(false), RiskLevel::Low);
        assert_eq!(InvestorType::Moderate.target_risk(true), RiskLevel::Medium);
        assert_eq!(InvestorType::Aggressive.target_risk(false), RiskLevel::High);
        assert_eq!(
            InvestorType::Other("x".to_string()).target_risk(true),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_product_risk_accepts_accent() {
        let product: Product = serde_json::from_str(
            r#"{"nome":"Fundo","categoria":"fundo","risco":"médio","indicado_para":"x"}"#,
        )
        .unwrap();
        assert_eq!(product.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_goal_deadline_month() {
        let goal = FinancialGoal {
            name: "Viagem".to_string(),
            target_amount: 5000.0,
            deadline: "2026-07".to_string(),
        };
        assert_eq!(goal.deadline_month(), NaiveDate::from_ymd_opt(2026, 7, 1));

        let bad = FinancialGoal {
            deadline: "julho".to_string(),
            ..goal
        };
        assert!(bad.deadline_month().is_none());
    }

    #[test]
    fn test_intent_labels() {
        assert_eq!(Intent::from_label(" Spending_Alert "), Some(Intent::SpendingAlert));
        assert_eq!(Intent::from_label("help"), None);
        assert_eq!(Intent::from_label("weather"), None);
    }
}
