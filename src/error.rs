//! Error types for the finance assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Data Loading Errors
    // =============================

    #[error("Arquivo não encontrado: {0}")]
    MissingFile(String),

    #[error("Colunas obrigatórias ausentes em {file}: {columns:?}")]
    MissingColumns { file: String, columns: Vec<String> },

    #[error("Campos obrigatórios ausentes em {file}: {fields:?}")]
    MissingFields { file: String, fields: Vec<String> },

    #[error("Data inválida em {file} (linha {line}): '{value}'")]
    InvalidDate {
        file: String,
        line: usize,
        value: String,
    },

    #[error("Valor inválido em {file}, campo '{field}': {detail}")]
    InvalidValue {
        file: String,
        field: String,
        detail: String,
    },

    // =============================
    // Runtime Errors
    // =============================

    #[error("Entrada inválida: {0}")]
    InvalidInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
