use crate::providers::FetchOutcome;
use serde_json::Value;

/// Three-way verdict on a provider response. Drives the refund policy:
/// only `Valid` keeps the debit, and only `Valid` is audited.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// At least one usable record. Carries the payload onward so the
    /// formatter can only ever receive classified-valid data.
    Valid(Value),
    /// Well-formed response with no records.
    Empty,
    /// Explicit provider error or transport exhaustion.
    Error(String),
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Valid(_) => "valid",
            Classification::Empty => "empty",
            Classification::Error(_) => "error",
        }
    }
}

/// Sentinel phrases vendors use for a "no results" outcome.
const NO_DATA_PHRASES: &[&str] = &[
    "no records found",
    "no record found",
    "no results",
    "no data",
    "not found",
];

/// Phrases that indicate the caller is blocked or throttled rather than the
/// query being bad. The provider client rotates to the next candidate on
/// these instead of surfacing them.
const BLOCKED_PHRASES: &[&str] = &[
    "blocked",
    "rate limit",
    "too many requests",
    "quota exceeded",
    "captcha",
    "access denied",
];

pub fn classify(outcome: FetchOutcome) -> Classification {
    match outcome {
        FetchOutcome::Exhausted { attempts, detail } => Classification::Error(format!(
            "all {} candidate(s) failed: {}",
            attempts, detail
        )),
        FetchOutcome::Fetched { raw, .. } => classify_payload(raw),
    }
}

/// Classify a payload the transport layer already delivered successfully.
pub fn classify_payload(raw: Value) -> Classification {
    if let Some(marker) = error_marker(&raw) {
        return Classification::Error(marker);
    }
    if is_empty_payload(&raw) {
        return Classification::Empty;
    }
    Classification::Valid(raw)
}

/// Returns a description if the payload carries an explicit error marker.
///
/// Known markers: an `error` key with content, `"status": "fail"` (or
/// `"error"`), a numeric `status`/`code` of 400+, `"success": false`.
pub fn error_marker(raw: &Value) -> Option<String> {
    let obj = raw.as_object()?;

    if let Some(err) = obj.get("error") {
        match err {
            Value::Null => {}
            Value::Bool(false) => {}
            Value::String(s) if s.is_empty() => {}
            other => return Some(format!("error field: {}", summarize(other))),
        }
    }

    for key in ["status", "code"] {
        match obj.get(key) {
            Some(Value::String(s)) => {
                let s = s.to_ascii_lowercase();
                if s == "fail" || s == "failure" || s == "error" {
                    return Some(format!("{} = {}", key, s));
                }
            }
            Some(Value::Number(n)) => {
                if let Some(code) = n.as_i64() {
                    if code >= 400 {
                        return Some(format!("{} = {}", key, code));
                    }
                }
            }
            _ => {}
        }
    }

    if obj.get("success") == Some(&Value::Bool(false)) {
        return Some("success = false".to_string());
    }

    None
}

/// Returns a description if the payload signals the caller is blocked or
/// throttled. Checked from the `error`/`message`/`detail` fields.
pub fn blocked_marker(raw: &Value) -> Option<String> {
    let obj = raw.as_object()?;
    for key in ["error", "message", "detail", "reason"] {
        if let Some(Value::String(s)) = obj.get(key) {
            let lower = s.to_ascii_lowercase();
            for phrase in BLOCKED_PHRASES {
                if lower.contains(phrase) {
                    return Some(format!("{}: {}", key, s));
                }
            }
        }
    }
    None
}

/// Well-formed but record-free: null, empty containers, a vendor "no
/// results" sentinel, or an object whose every leaf is blank.
pub fn is_empty_payload(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty() || is_no_data_phrase(s),
        Value::Array(items) => items.iter().all(is_empty_payload),
        Value::Object(obj) => {
            if obj.is_empty() {
                return true;
            }
            // Named "no results" bucket, e.g. {"result": [], "status": "success"}
            for key in ["result", "results", "data", "records"] {
                if let Some(bucket) = obj.get(key) {
                    return is_empty_payload(bucket);
                }
            }
            if let Some(Value::String(msg)) = obj.get("message") {
                if is_no_data_phrase(msg) {
                    return true;
                }
            }
            // Record-level emptiness: every field blank or absent. Status-ish
            // bookkeeping keys alone do not make a payload non-empty.
            obj.iter()
                .filter(|(k, _)| !is_bookkeeping_key(k))
                .all(|(_, v)| is_empty_payload(v))
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn is_no_data_phrase(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    NO_DATA_PHRASES.iter().any(|p| lower.contains(p))
}

fn is_bookkeeping_key(key: &str) -> bool {
    matches!(key, "status" | "success" | "code" | "message" | "query")
}

fn summarize(value: &Value) -> String {
    match value {
        Value::String(s) => s.chars().take(120).collect(),
        other => {
            let rendered = other.to_string();
            rendered.chars().take(120).collect()
        }
    }
}
