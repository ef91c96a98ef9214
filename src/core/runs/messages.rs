//! Normalization of runner-reported messages into a user-facing transcript.
//!
//! Runner output is inherently schema-less: some runners emit plain prose,
//! others emit JSON envelopes tagged with a worker prefix. All traversal of
//! untyped structures lives behind [`extract_text`]; nothing else in the
//! crate walks arbitrary JSON.

use serde_json::Value;

/// Prefix that marks a reconciliation-failure notice. These lines are
/// internal bookkeeping and must never survive a later normalization pass.
pub const RECONCILE_FAILURE_PREFIX: &str = "OpenShip reconciliation failed:";

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Execution completed.";

/// Keys whose string values count as human-readable text when flattening a
/// structured runner payload.
const TEXT_KEYS: [&str; 8] = [
    "text",
    "content",
    "message",
    "response",
    "result",
    "summary",
    "output",
    "aggregated_output",
];

const MAX_EXTRACT_DEPTH: usize = 6;

/// Flatten one raw runner message into zero or more plain-text lines.
///
/// A leading bracketed tag (`[worker-1] ...`) is stripped first. If the rest
/// parses as JSON, nested text fields are collected in document order;
/// otherwise the trimmed raw string is kept as-is.
pub fn extract_text(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    // Whole-string JSON takes priority: a top-level array also starts with
    // '[' and must not be mistaken for a worker tag.
    if let Some(out) = extract_structured(trimmed) {
        return out;
    }

    let stripped = strip_worker_tag(trimmed).trim();
    if stripped.is_empty() {
        return Vec::new();
    }
    extract_structured(stripped).unwrap_or_else(|| vec![stripped.to_string()])
}

fn extract_structured(text: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            let mut out = Vec::new();
            collect_text(&value, 0, &mut out);
            if out.is_empty() {
                Some(vec![text.to_string()])
            } else {
                Some(out)
            }
        }
        _ => None,
    }
}

/// Normalize a raw message list: flatten, dedupe preserving first-seen
/// order, and substitute a default line when nothing readable remains.
/// Idempotent: running an already-normalized list through again returns it
/// unchanged.
pub fn normalize_messages(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for message in raw {
        for line in extract_text(message) {
            if !seen.contains(&line) {
                seen.push(line);
            }
        }
    }
    if seen.is_empty() {
        seen.push(DEFAULT_SUCCESS_MESSAGE.to_string());
    }
    seen
}

pub fn is_reconcile_failure(message: &str) -> bool {
    message.trim_start().starts_with(RECONCILE_FAILURE_PREFIX)
}

fn strip_worker_tag(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        return &rest[end + 1..];
    }
    raw
}

fn collect_text(value: &Value, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_EXTRACT_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(nested) = map.get(key) {
                    push_text(nested, depth, out);
                }
            }
            if let Some(Value::Array(items)) = map.get("items") {
                for item in items {
                    push_text(item, depth, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                push_text(item, depth, out);
            }
        }
        _ => {}
    }
}

fn push_text(value: &Value, depth: usize, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        Value::Object(_) | Value::Array(_) => collect_text(value, depth + 1, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_strings_pass_through_trimmed() {
        assert_eq!(extract_text("  Done.  "), vec!["Done.".to_string()]);
    }

    #[test]
    fn worker_tag_is_stripped_before_parsing() {
        assert_eq!(
            extract_text("[worker-1] {\"text\":\"ok\"}"),
            vec!["ok".to_string()]
        );
        assert_eq!(
            extract_text("[agent] plain words"),
            vec!["plain words".to_string()]
        );
    }

    #[test]
    fn nested_text_fields_are_flattened_in_order() {
        let raw = r#"{"summary":"first","items":[{"text":"second"},{"output":"third"}]}"#;
        assert_eq!(
            extract_text(raw),
            vec![
                "first".to_string(),
                "second".to_string(),
                "third".to_string()
            ]
        );
    }

    #[test]
    fn top_level_json_arrays_are_parsed_not_tag_stripped() {
        assert_eq!(
            extract_text(r#"[{"text":"ok"}]"#),
            vec!["ok".to_string()]
        );
        assert_eq!(
            extract_text(r#"["alpha","beta"]"#),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert_eq!(
            normalize_messages(&[r#"["alpha","beta"]"#.to_string()]),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn structured_payload_without_text_falls_back_to_raw() {
        let raw = r#"{"elapsed_ms": 12}"#;
        assert_eq!(extract_text(raw), vec![raw.to_string()]);
    }

    #[test]
    fn recursion_stops_at_the_depth_bound() {
        let mut value = serde_json::json!({"text": "deep"});
        for _ in 0..12 {
            value = serde_json::json!({ "content": value });
        }
        assert!(extract_text(&value.to_string()).iter().all(|m| m != "deep"));
    }

    #[test]
    fn normalization_dedupes_preserving_first_seen_order() {
        let raw = vec![
            "alpha".to_string(),
            "[w2] {\"text\":\"beta\"}".to_string(),
            "alpha".to_string(),
            "beta".to_string(),
        ];
        assert_eq!(
            normalize_messages(&raw),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = vec![
            "[w] {\"response\":\"one\"}".to_string(),
            "two words".to_string(),
        ];
        let first = normalize_messages(&raw);
        let second = normalize_messages(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_yields_the_default_line() {
        assert_eq!(
            normalize_messages(&[]),
            vec![DEFAULT_SUCCESS_MESSAGE.to_string()]
        );
        assert_eq!(
            normalize_messages(&["   ".to_string()]),
            vec![DEFAULT_SUCCESS_MESSAGE.to_string()]
        );
    }

    #[test]
    fn reconcile_failures_are_detected_by_prefix() {
        assert!(is_reconcile_failure(
            "OpenShip reconciliation failed: disk full"
        ));
        assert!(!is_reconcile_failure("reconciliation went fine"));
    }
}
