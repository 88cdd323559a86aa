//! Moara - personal finance chat assistant
//!
//! A rule-based assistant that answers Portuguese questions about a user's
//! own transactions, investor profile and available products:
//! - Deterministic rule engine (alerts, recurring expenses, goals, products, summaries)
//! - Keyword intent routing with optional LLM-assisted classification
//! - Language models only rephrase; every value comes from the rules
//! - Answers trimmed to two sentences with cited data sources
//!
//! TURN:
//! INPUT → SANITIZE → ROUTE → RULE → VERBALIZE → VALIDATE → REPLY

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod llm;
pub mod loader;
pub mod models;
pub mod security;
pub mod session;
pub mod validator;

pub use error::{AssistantError, Result};

// Re-export common types
pub use agent::FinancialAgent;
pub use classifier::IntentClassifier;
pub use models::*;
pub use session::{AnswerMode, ChatReply, ChatSession};
