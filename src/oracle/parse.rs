// src/oracle/parse.rs
//! Turns free-form oracle text into a similarity score.
//!
//! The oracle is asked for `{"similarity_score": <number>}` but nothing
//! enforces it, so replies may be wrapped in prose or markdown fences. The
//! whole reply is tried as JSON first; failing that, the first balanced
//! `{...}` that parses as a JSON object is used.

use serde_json::{Map, Value};
use thiserror::Error;

pub const SCORE_FIELD: &str = "similarity_score";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreParseError {
    #[error("no JSON object found in oracle response")]
    NoJsonObject,
    #[error("malformed JSON object in oracle response")]
    InvalidJson,
    #[error("oracle response has no 'similarity_score' field")]
    MissingField,
    #[error("'similarity_score' is not numeric: {0}")]
    NonNumeric(String),
    #[error("'similarity_score' outside [0, 1]: {0}")]
    OutOfRange(f64),
}

/// Returns the first balanced `{...}` slice of `text` that parses as a JSON
/// object. Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            let slice = &text[start..start + end];
            if matches!(serde_json::from_str::<Value>(slice), Ok(Value::Object(_))) {
                return Some(slice);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn locate_object(response: &str) -> Result<Map<String, Value>, ScoreParseError> {
    let trimmed = response.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(map);
    }

    match extract_json_object(trimmed) {
        Some(slice) => match serde_json::from_str::<Value>(slice) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(ScoreParseError::InvalidJson),
        },
        None if trimmed.contains('{') => Err(ScoreParseError::InvalidJson),
        None => Err(ScoreParseError::NoJsonObject),
    }
}

/// Parses the similarity score out of an oracle reply.
///
/// Numbers and numeric strings are accepted; the value must be finite and
/// within `[0, 1]`.
pub fn parse_similarity_score(response: &str) -> Result<f64, ScoreParseError> {
    let object = locate_object(response)?;
    let value = object
        .get(SCORE_FIELD)
        .ok_or(ScoreParseError::MissingField)?;

    let score = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ScoreParseError::NonNumeric(n.to_string()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ScoreParseError::NonNumeric(s.clone()))?,
        other => return Err(ScoreParseError::NonNumeric(other.to_string())),
    };

    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(ScoreParseError::OutOfRange(score));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        assert_eq!(parse_similarity_score(r#"{"similarity_score": 0.92}"#), Ok(0.92));
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let reply = "Here is my assessment:\n```json\n{\n  \"similarity_score\": 0.47\n}\n```\nThanks";
        assert_eq!(parse_similarity_score(reply), Ok(0.47));
    }

    #[test]
    fn test_first_well_formed_object_wins() {
        let reply = r#"scale {0.0-1.0} then {"similarity_score": 0.3} and {"similarity_score": 0.9}"#;
        assert_eq!(parse_similarity_score(reply), Ok(0.3));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let text = r#"x {"note": "a } b", "similarity_score": 0.5} y"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"note": "a } b", "similarity_score": 0.5}"#)
        );
    }

    #[test]
    fn test_numeric_string_accepted() {
        assert_eq!(parse_similarity_score(r#"{"similarity_score": " 0.8 "}"#), Ok(0.8));
    }

    #[test]
    fn test_malformed_replies() {
        assert_eq!(
            parse_similarity_score("I cannot answer that."),
            Err(ScoreParseError::NoJsonObject)
        );
        assert_eq!(
            parse_similarity_score(r#"{"similarity_score": 0.4"#),
            Err(ScoreParseError::InvalidJson)
        );
        assert_eq!(
            parse_similarity_score(r#"{"score": 0.4}"#),
            Err(ScoreParseError::MissingField)
        );
        assert_eq!(
            parse_similarity_score(r#"{"similarity_score": "high"}"#),
            Err(ScoreParseError::NonNumeric("high".to_string()))
        );
        assert_eq!(
            parse_similarity_score(r#"{"similarity_score": null}"#),
            Err(ScoreParseError::NonNumeric("null".to_string()))
        );
        assert_eq!(
            parse_similarity_score(r#"{"similarity_score": 1.7}"#),
            Err(ScoreParseError::OutOfRange(1.7))
        );
        assert!(parse_similarity_score("").is_err());
    }

    #[test]
    fn test_bare_json_scalar_is_not_an_object() {
        assert_eq!(parse_similarity_score("0.8"), Err(ScoreParseError::NoJsonObject));
    }
}
