//! Response validator
//!
//! Keeps assistant replies short enough for a mobile chat bubble and renders
//! the citation / justification lines shown under each reply.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

/// Sentence limit for the main chat bubble
pub const MAX_SENTENCES_DEFAULT: usize = 2;
/// Sentence limit when the user asked for details
pub const MAX_SENTENCES_DETAILED: usize = 6;

const SOURCES_LABEL: &str = "Fontes: ";
const FALLBACK_JUSTIFICATION: &str = "Resposta baseada nas regras gerais do agente.";

lazy_static! {
    /// Decimal numbers such as monetary values ("10.50")
    static ref DECIMAL_RE: Regex = Regex::new(r"\d+\.\d+").unwrap();
    /// Terminal punctuation followed by whitespace or end of text
    static ref SENTENCE_BREAK_RE: Regex = Regex::new(r"[.!?]+\s+|[.!?]+$").unwrap();
    /// Integers and decimals with either separator ("27", "3604.90", "10,5")
    static ref NUMBER_RE: Regex = Regex::new(r"\d+(?:[.,]\d+)?").unwrap();
}

pub struct ResponseValidator;

impl ResponseValidator {
    /// Count sentences, ignoring the dot inside decimal numbers
    pub fn count_sentences(text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }

        let masked = DECIMAL_RE.replace_all(text, "NUM");

        SENTENCE_BREAK_RE
            .split(masked.trim())
            .filter(|segment| !segment.trim().is_empty())
            .count()
    }

    /// Check a reply against `max_sentences`.
    ///
    /// Returns `(true, text)` unchanged when it fits, otherwise `(false, truncated)`
    /// where `truncated` holds the first `max_sentences` sentences exactly as
    /// written (punctuation and inner spacing preserved).
    pub fn validate_response(text: &str, max_sentences: usize) -> (bool, String) {
        if text.trim().is_empty() {
            return (true, text.to_string());
        }

        let count = Self::count_sentences(text);
        if count <= max_sentences {
            return (true, text.to_string());
        }

        let original = text.trim();
        let ends = sentence_ends(original);

        let truncated = match max_sentences {
            0 => String::new(),
            n if ends.len() >= n => original[..ends[n - 1]].trim_end().to_string(),
            _ => original.to_string(),
        };

        debug!(
            sentences = count,
            max_sentences,
            "Response truncated"
        );

        (false, truncated)
    }

    /// True when every number in `text` also appears in `reference`.
    ///
    /// Values are compared numerically, so "27" matches "27.0" and "10,50"
    /// matches "10.5".
    pub fn numbers_grounded(text: &str, reference: &str) -> bool {
        let known = numeric_values(reference);

        numeric_values(text)
            .iter()
            .all(|value| known.iter().any(|k| (k - value).abs() < 1e-6))
    }

    /// "Fontes: a, b" or an empty string when there is nothing to cite
    pub fn format_sources(sources: &[String]) -> String {
        if sources.is_empty() {
            return String::new();
        }

        format!("{}{}", SOURCES_LABEL, sources.join(", "))
    }

    /// One-line justification naming the main data file behind a reply
    pub fn create_justification(sources: &[String]) -> String {
        match sources.first() {
            Some(first) => {
                let main_source = first.split(':').next().unwrap_or(first);
                format!("Análise baseada em {}.", main_source)
            }
            None => FALLBACK_JUSTIFICATION.to_string(),
        }
    }
}

/// Byte offsets just past each sentence-ending punctuation run.
///
/// A run only ends a sentence when it is followed by whitespace or the end of
/// the text, and a dot between two digits is never a terminator.
fn sentence_ends(text: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut ends = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !is_terminal(chars[i].1) || is_decimal_point(&chars, i) {
            i += 1;
            continue;
        }

        let mut j = i;
        while j + 1 < chars.len() && is_terminal(chars[j + 1].1) {
            j += 1;
        }

        let after = j + 1;
        if after >= chars.len() {
            ends.push(text.len());
        } else if chars[after].1.is_whitespace() {
            ends.push(chars[after].0);
        }

        i = after;
    }

    ends
}

fn numeric_values(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', ".").parse().ok())
        .collect()
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_decimal_point(chars: &[(usize, char)], i: usize) -> bool {
    chars[i].1 == '.'
        && i > 0
        && chars[i - 1].1.is_ascii_digit()
        && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())
}
