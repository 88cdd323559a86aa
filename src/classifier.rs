//! Keyword intent classifier
//!
//! Maps a Portuguese user query to an [`Intent`] by substring matching over
//! fixed keyword sets. Routes are evaluated in priority order and the first
//! match wins, so a query like "quanto devo guardar para a meta?" is a goal
//! question even though it also contains a spending word.

use crate::models::Intent;

/// Static keyword lists, zero allocation
pub const GOAL_KEYWORDS: &[&str] = &["meta", "objetivo", "poupar", "guardar"];

pub const SPENDING_KEYWORDS: &[&str] = &["gasto", "gastei", "despesa", "quanto"];

pub const ALERT_KEYWORDS: &[&str] = &["alerta", "aumento", "aumentou"];

pub const INVESTMENT_KEYWORDS: &[&str] = &["investir", "produto", "aplicar", "recomendar"];

pub const GREETING_KEYWORDS: &[&str] = &["oi", "olá", "ola", "bom dia", "boa tarde", "boa noite"];

/// A keyword set and the intent it routes to
#[derive(Debug, Clone, Copy)]
pub struct KeywordRoute {
    pub intent: Intent,
    pub keywords: &'static [&'static str],
}

/// Priority-ordered routes. Order matters: keywords overlap.
pub const ROUTES: &[KeywordRoute] = &[
    KeywordRoute {
        intent: Intent::GoalPlanning,
        keywords: GOAL_KEYWORDS,
    },
    KeywordRoute {
        intent: Intent::SpendingSummary,
        keywords: SPENDING_KEYWORDS,
    },
    KeywordRoute {
        intent: Intent::SpendingAlert,
        keywords: ALERT_KEYWORDS,
    },
    KeywordRoute {
        intent: Intent::ProductSuggestion,
        keywords: INVESTMENT_KEYWORDS,
    },
    KeywordRoute {
        intent: Intent::Greeting,
        keywords: GREETING_KEYWORDS,
    },
];

/// Normalize a query for keyword matching
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// True if any keyword occurs in the (already normalized) text
pub fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Keyword intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a raw query; no match yields [`Intent::Help`]
    pub fn classify(query: &str) -> Intent {
        let normalized = normalize(query);

        ROUTES
            .iter()
            .find(|route| contains_any(&normalized, route.keywords))
            .map(|route| route.intent)
            .unwrap_or(Intent::Help)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_category_queries() {
        let cases = vec![
            ("Quero poupar para uma viagem", Intent::GoalPlanning),
            ("Quanto eu gastei este mês?", Intent::SpendingSummary),
            ("Tem algum alerta pra mim?", Intent::SpendingAlert),
            ("Onde devo investir?", Intent::ProductSuggestion),
            ("Bom dia!", Intent::Greeting),
        ];

        for (query, expected) in cases {
            assert_eq!(IntentClassifier::classify(query), expected, "query: {query}");
        }
    }

    #[test]
    fn test_priority_order_for_overlapping_keywords() {
        // goal beats spending
        assert_eq!(
            IntentClassifier::classify("Quanto preciso guardar por mês?"),
            Intent::GoalPlanning
        );
        // spending beats alert
        assert_eq!(
            IntentClassifier::classify("Meus gastos aumentaram?"),
            Intent::SpendingSummary
        );
        // alert beats investment
        assert_eq!(
            IntentClassifier::classify("Houve aumento no produto?"),
            Intent::SpendingAlert
        );
    }

    #[test]
    fn test_substring_matching_and_case() {
        assert_eq!(IntentClassifier::classify("  METAS  "), Intent::GoalPlanning);
        assert_eq!(IntentClassifier::classify("OLÁ"), Intent::Greeting);
    }

    #[test]
    fn test_unmatched_falls_through_to_help() {
        assert_eq!(IntentClassifier::classify("previsão do tempo"), Intent::Help);
        assert_eq!(IntentClassifier::classify(""), Intent::Help);
    }
}
