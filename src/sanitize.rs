use crate::models::LookupCategory;
use serde_json::Value;

/// Field-level redaction applied to every classified-valid payload before
/// the formatter sees it.
///
/// Two policies:
/// 1. Vendor-injected diagnostic and advertising fields are stripped
///    (status echoes, credit counters, timing fields, channel plugs).
/// 2. The relationship provider ships `mother_name` and `father_name`
///    swapped; they are exchanged back here so the formatter can trust its
///    labels.

/// Keys vendors inject that carry no record data.
const DIAGNOSTIC_KEYS: &[&str] = &[
    "success",
    "query",
    "credits",
    "credits_left",
    "credits_used",
    "took",
    "time_taken",
    "cache",
    "cached",
    "request_id",
    "api_owner",
    "dev",
    "developer",
    "join",
    "channel",
];

/// `status` is only diagnostic when it looks like a transport echo
/// ("success", numeric code). A domain status such as "Active" stays.
fn is_diagnostic_status(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            s == "success" || s == "ok" || s == "fail" || s == "failure" || s == "error"
        }
        _ => false,
    }
}

pub fn scrub(category: LookupCategory, mut raw: Value) -> Value {
    scrub_value(&mut raw);

    if category == LookupCategory::Relationship {
        unswap_parent_fields(&mut raw);
    }

    raw
}

fn scrub_value(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            for key in DIAGNOSTIC_KEYS {
                obj.remove(*key);
            }
            if obj
                .get("status")
                .map(is_diagnostic_status)
                .unwrap_or(false)
            {
                obj.remove("status");
            }
            for nested in obj.values_mut() {
                scrub_value(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_value(item);
            }
        }
        _ => {}
    }
}

/// The relationship vendor has `mother_name` and `father_name` reversed in
/// its responses. Swap them everywhere they appear side by side.
fn unswap_parent_fields(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            if obj.contains_key("mother_name") && obj.contains_key("father_name") {
                let mother = obj.remove("mother_name").unwrap_or(Value::Null);
                let father = obj.remove("father_name").unwrap_or(Value::Null);
                obj.insert("mother_name".to_string(), father);
                obj.insert("father_name".to_string(), mother);
            }
            for nested in obj.values_mut() {
                unswap_parent_fields(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                unswap_parent_fields(item);
            }
        }
        _ => {}
    }
}
