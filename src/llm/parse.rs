use regex::Regex;
use std::sync::OnceLock;

use crate::models::comparison::ParsedAnalysis;

const SUMMARY_MAX_CHARS: usize = 1000;

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

fn inline_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)\{[^{}]*"rating"[^{}]*\}"#).unwrap())
}

fn validate(value: &serde_json::Value) -> Option<ParsedAnalysis> {
    let rating = value.get("rating")?.as_str()?.to_uppercase();
    if !matches!(rating.as_str(), "BUY" | "HOLD" | "SELL") {
        return None;
    }

    let clamp = |v: Option<&serde_json::Value>| -> i64 {
        v.and_then(|n| n.as_f64())
            .map(|n| n.round() as i64)
            .unwrap_or(50)
            .clamp(0, 100)
    };

    let summary: String = value
        .get("summary")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .trim()
        .chars()
        .take(SUMMARY_MAX_CHARS)
        .collect();

    Some(ParsedAnalysis {
        rating,
        score: clamp(value.get("score")),
        confidence: clamp(value.get("confidence")),
        summary,
    })
}

/// Extract structured analysis fields from model response text.
///
/// Attempts, in order: a direct JSON parse of the stripped text, the first
/// fenced ```json block, and the first inline object containing a "rating"
/// key. Returns None when nothing parses into the expected shape.
pub fn parse_structured_response(text: &str) -> Option<ParsedAnalysis> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(parsed) = validate(&value) {
            return Some(parsed);
        }
    }

    if let Some(captures) = fenced_block_re().captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&captures[1]) {
            if let Some(parsed) = validate(&value) {
                return Some(parsed);
            }
        }
    }

    if let Some(found) = inline_object_re().find(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(found.as_str()) {
            if let Some(parsed) = validate(&value) {
                return Some(parsed);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let parsed = parse_structured_response(
            r#"{"rating": "BUY", "score": 75, "confidence": 80, "summary": "Looks strong."}"#,
        )
        .unwrap();
        assert_eq!(parsed.rating, "BUY");
        assert_eq!(parsed.score, 75);
        assert_eq!(parsed.confidence, 80);
        assert_eq!(parsed.summary, "Looks strong.");
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here is my analysis:\n```json\n{\"rating\": \"hold\", \"score\": 55, \"confidence\": 60, \"summary\": \"Mixed signals.\"}\n```\nHope that helps!";
        let parsed = parse_structured_response(text).unwrap();
        assert_eq!(parsed.rating, "HOLD");
        assert_eq!(parsed.score, 55);
    }

    #[test]
    fn test_inline_object() {
        let text = r#"I think the answer is {"rating": "SELL", "score": 30, "confidence": 70, "summary": "Weak outlook."} based on the data."#;
        let parsed = parse_structured_response(text).unwrap();
        assert_eq!(parsed.rating, "SELL");
        assert_eq!(parsed.confidence, 70);
    }

    #[test]
    fn test_scores_clamped() {
        let parsed = parse_structured_response(
            r#"{"rating": "BUY", "score": 150, "confidence": -10, "summary": ""}"#,
        )
        .unwrap();
        assert_eq!(parsed.score, 100);
        assert_eq!(parsed.confidence, 0);
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed = parse_structured_response(r#"{"rating": "HOLD"}"#).unwrap();
        assert_eq!(parsed.score, 50);
        assert_eq!(parsed.confidence, 50);
        assert_eq!(parsed.summary, "");
    }

    #[test]
    fn test_summary_truncated() {
        let long = "x".repeat(5000);
        let text = format!(r#"{{"rating": "BUY", "summary": "{long}"}}"#);
        let parsed = parse_structured_response(&text).unwrap();
        assert_eq!(parsed.summary.len(), 1000);
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_structured_response("").is_none());
        assert!(parse_structured_response("I cannot provide a rating.").is_none());
        assert!(parse_structured_response(r#"{"rating": "MAYBE"}"#).is_none());
        assert!(parse_structured_response(r#"{"score": 50}"#).is_none());
    }
}
