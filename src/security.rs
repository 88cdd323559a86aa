//! Input sanitization and credential checks

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::path::Path;
use tracing::warn;

/// Trim and clean a user query before it reaches the rule engine
pub fn sanitize_user_input(input: &str, max_length: usize) -> Result<String> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(AssistantError::InvalidInput(
            "a mensagem não pode estar vazia".to_string(),
        ));
    }

    if trimmed.chars().count() > max_length {
        return Err(AssistantError::InvalidInput(format!(
            "a mensagem excede o limite de {} caracteres",
            max_length
        )));
    }

    let sanitized: String = trimmed
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();

    if sanitized.trim().is_empty() {
        return Err(AssistantError::InvalidInput(
            "a mensagem ficou vazia após a sanitização".to_string(),
        ));
    }

    Ok(sanitized)
}

/// Shape check for API keys; never logs the key itself
pub fn validate_api_key(key: &str) -> bool {
    let len = key.trim().len();
    (10..=500).contains(&len) && !key.contains([' ', '\n', '\t'])
}

/// Read an API key from the environment, ignoring values that fail [`validate_api_key`]
pub fn secure_env_var(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    if validate_api_key(&value) {
        Some(value)
    } else {
        warn!(variable = name, "Ignoring malformed credential");
        None
    }
}

/// True when `path` resolves to a location inside `base`
pub fn validate_data_path(path: &Path, base: &Path) -> bool {
    match (path.canonicalize(), base.canonicalize()) {
        (Ok(target), Ok(base)) => target.starts_with(base),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_trims_and_strips_control_chars() {
        let cleaned = sanitize_user_input("  quanto gastei?\u{0007}  ", 500).unwrap();
        assert_eq!(cleaned, "quanto gastei?");

        let multiline = sanitize_user_input("oi\nbom dia", 500).unwrap();
        assert_eq!(multiline, "oi\nbom dia");
    }

    #[test]
    fn test_sanitize_rejects_empty_and_long() {
        assert!(sanitize_user_input("   ", 500).is_err());
        assert!(sanitize_user_input("\u{0001}\u{0002}", 500).is_err());
        assert!(sanitize_user_input(&"a".repeat(501), 500).is_err());
        assert!(sanitize_user_input(&"á".repeat(500), 500).is_ok());
    }

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("sk-1234567890abcdef"));
        assert!(!validate_api_key("short"));
        assert!(!validate_api_key("sk-1234 567890abcdef"));
        assert!(!validate_api_key(&"k".repeat(501)));
    }

    #[test]
    fn test_validate_data_path() {
        let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        assert!(validate_data_path(&base.join("transacoes.csv"), &base));
        assert!(!validate_data_path(&base.join("../Cargo.toml"), &base));
    }
}
