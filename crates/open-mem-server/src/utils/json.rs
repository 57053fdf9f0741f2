//! crates/open-mem-server/src/utils/json.rs
//! Hardened JSON parsing for structured data embedded in LLM output.

use serde::de::DeserializeOwned;

/// Parse JSON from LLM output with fallback strategies.
///
/// Tries in order: direct parse of the trimmed content, parse after
/// stripping markdown code fences, parse of the first balanced `{...}` or
/// `[...]` block. Compression and summarization responses go through this
/// before strict field validation.
pub fn parse_json_lenient<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    let unfenced = strip_code_fences(trimmed);
    if unfenced != trimmed
        && let Ok(v) = serde_json::from_str::<T>(unfenced)
    {
        return Ok(v);
    }

    if let Some(block) = first_json_block(trimmed)
        && let Ok(v) = serde_json::from_str::<T>(block)
    {
        return Ok(v);
    }

    Err(format!(
        "no parseable JSON in model output (direct, fence-strip, and block-extract all failed); starts with: {}",
        &trimmed[..trimmed.len().min(160)]
    ))
}

/// Strip a surrounding ```json / ``` fence pair, if present.
fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    for prefix in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(prefix)
            && let Some(inner) = rest.strip_suffix("```")
        {
            return inner.trim();
        }
    }
    trimmed
}

/// Extract the first balanced `{...}` or `[...]` block, string-aware.
fn first_json_block(s: &str) -> Option<&str> {
    let brace = s.find('{');
    let bracket = s.find('[');
    let (open, close, start) = match (brace, bracket) {
        (Some(b), Some(k)) if b < k => ('{', '}', b),
        (Some(b), Some(k)) if b > k => ('[', ']', k),
        (Some(b), Some(_)) => ('{', '}', b),
        (None, Some(k)) => ('[', ']', k),
        (Some(b), None) => ('{', '}', b),
        (None, None) => return None,
    };

    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let ch = b as char;
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        title: String,
    }

    #[test]
    fn parses_plain_json() {
        let p: Probe = parse_json_lenient(r#"{"title": "t"}"#).unwrap();
        assert_eq!(p.title, "t");
    }

    #[test]
    fn parses_fenced_json() {
        let p: Probe = parse_json_lenient("```json\n{\"title\": \"t\"}\n```").unwrap();
        assert_eq!(p.title, "t");
    }

    #[test]
    fn parses_json_with_prose_around_it() {
        let input = "Sure, here is the observation:\n{\"title\": \"t\"}\nLet me know!";
        let p: Probe = parse_json_lenient(input).unwrap();
        assert_eq!(p.title, "t");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let input = r#"note: {"title": "a {nested} value"} trailer"#;
        let p: Probe = parse_json_lenient(input).unwrap();
        assert_eq!(p.title, "a {nested} value");
    }

    #[test]
    fn escaped_quotes_handled() {
        let input = r#"{"title": "say \"hi\""}"#;
        let p: Probe = parse_json_lenient(input).unwrap();
        assert_eq!(p.title, "say \"hi\"");
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_json_lenient::<Probe>("nothing structured here").is_err());
    }

    #[test]
    fn extracts_arrays_too() {
        let v: Vec<i64> = parse_json_lenient("ranks: [2, 0, 1]").unwrap();
        assert_eq!(v, vec![2, 0, 1]);
    }
}
