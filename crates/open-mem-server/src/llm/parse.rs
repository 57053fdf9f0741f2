// crates/open-mem-server/src/llm/parse.rs
// Strict validation of provider compression/summarization/rerank output

use anyhow::{Result, anyhow};
use open_mem_types::ObservationType;
use serde_json::Value;

use super::provider::{CompressedObservation, SummaryFields};
use crate::utils::json::parse_json_lenient;

/// Parse a compression response.
///
/// Required fields: `type`, `title`, `narrative`. Optional: `subtitle`,
/// `facts[]`, `concepts[]`, `filesRead[]`, `filesModified[]`, `importance`.
/// Unknown observation types coerce to `discovery`; importance clamps to
/// 1..=5. A hard parse failure is NOT retried at the gateway layer: the
/// pending row is marked failed by the processor.
pub fn parse_compression(raw: &str) -> Result<CompressedObservation> {
    let value: Value = parse_json_lenient(raw).map_err(|e| anyhow!(e))?;

    let title = required_string(&value, "title")?;
    let narrative = required_string(&value, "narrative")?;
    let kind_str = required_string(&value, "type")?;
    let kind = ObservationType::from_str_lossy(&kind_str);

    let importance = value
        .get("importance")
        .and_then(Value::as_i64)
        .unwrap_or(3)
        .clamp(1, 5);

    Ok(CompressedObservation {
        kind,
        title,
        subtitle: optional_string(&value, "subtitle"),
        facts: string_array(&value, "facts"),
        narrative,
        concepts: string_array(&value, "concepts"),
        files_read: string_array(&value, "filesRead"),
        files_modified: string_array(&value, "filesModified"),
        importance,
    })
}

/// Parse a summarization response. Only `summary` is required.
pub fn parse_summary(raw: &str) -> Result<SummaryFields> {
    let value: Value = parse_json_lenient(raw).map_err(|e| anyhow!(e))?;
    let summary = required_string(&value, "summary")?;

    Ok(SummaryFields {
        summary,
        key_decisions: string_array(&value, "keyDecisions"),
        files_modified: string_array(&value, "filesModified"),
        concepts: string_array(&value, "concepts"),
        request: nonempty(optional_string(&value, "request")),
        investigated: nonempty(optional_string(&value, "investigated")),
        learned: nonempty(optional_string(&value, "learned")),
        completed: nonempty(optional_string(&value, "completed")),
        next_steps: nonempty(optional_string(&value, "nextSteps")),
    })
}

/// Parse a rerank response: a JSON array of candidate indices.
///
/// Validation of whether the indices form a usable permutation is the
/// caller's job (the reranker degrades to original order on junk).
pub fn parse_rerank(raw: &str) -> Result<Vec<usize>> {
    let value: Value = parse_json_lenient(raw).map_err(|e| anyhow!(e))?;
    // Accept either a bare array or {"order": [...]}
    let array = value
        .as_array()
        .or_else(|| value.get("order").and_then(Value::as_array))
        .ok_or_else(|| anyhow!("rerank response is not an index array"))?;

    array
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| anyhow!("non-integer rerank index: {v}"))
        })
        .collect()
}

fn required_string(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| anyhow!("missing required field '{field}' in model output"))
}

fn optional_string(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn string_array(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn nonempty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_compression_parses() {
        let obs =
            parse_compression(r#"{"type": "bugfix", "title": "T", "narrative": "N"}"#).unwrap();
        assert_eq!(obs.kind, ObservationType::Bugfix);
        assert_eq!(obs.title, "T");
        assert!(obs.facts.is_empty());
        assert_eq!(obs.importance, 3);
    }

    #[test]
    fn unknown_type_coerces_to_discovery() {
        let obs = parse_compression(r#"{"type": "epiphany", "title": "T", "narrative": "N"}"#)
            .unwrap();
        assert_eq!(obs.kind, ObservationType::Discovery);
    }

    #[test]
    fn missing_title_is_an_error() {
        assert!(parse_compression(r#"{"type": "bugfix", "narrative": "N"}"#).is_err());
    }

    #[test]
    fn missing_narrative_is_an_error() {
        assert!(parse_compression(r#"{"type": "bugfix", "title": "T"}"#).is_err());
    }

    #[test]
    fn importance_clamps_into_band() {
        let obs = parse_compression(
            r#"{"type": "decision", "title": "T", "narrative": "N", "importance": 99}"#,
        )
        .unwrap();
        assert_eq!(obs.importance, 5);
        let obs = parse_compression(
            r#"{"type": "decision", "title": "T", "narrative": "N", "importance": -1}"#,
        )
        .unwrap();
        assert_eq!(obs.importance, 1);
    }

    #[test]
    fn optional_arrays_parse() {
        let obs = parse_compression(
            r#"{"type": "feature", "title": "T", "narrative": "N",
                "facts": ["a", ""], "filesModified": ["src/x.rs"]}"#,
        )
        .unwrap();
        assert_eq!(obs.facts, vec!["a"]);
        assert_eq!(obs.files_modified, vec!["src/x.rs"]);
    }

    #[test]
    fn fenced_output_still_parses() {
        let raw = "```json\n{\"type\": \"change\", \"title\": \"T\", \"narrative\": \"N\"}\n```";
        assert!(parse_compression(raw).is_ok());
    }

    #[test]
    fn summary_requires_summary_field() {
        assert!(parse_summary(r#"{"keyDecisions": []}"#).is_err());
        let fields = parse_summary(r#"{"summary": "did things", "nextSteps": "more"}"#).unwrap();
        assert_eq!(fields.summary, "did things");
        assert_eq!(fields.next_steps.as_deref(), Some("more"));
        assert!(fields.request.is_none());
    }

    #[test]
    fn rerank_accepts_bare_and_wrapped_arrays() {
        assert_eq!(parse_rerank("[2, 0, 1]").unwrap(), vec![2, 0, 1]);
        assert_eq!(parse_rerank(r#"{"order": [1, 0]}"#).unwrap(), vec![1, 0]);
        assert!(parse_rerank(r#"{"ranking": "first"}"#).is_err());
    }
}
