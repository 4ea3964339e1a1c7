use crate::models::{
    FinancialCodeRecord, IdentityRecord, LookupCategory, NetworkAddressRecord,
    RelationshipRecord, Report, ReportField, SocialProfileRecord, VehicleRecord,
};
use serde_json::Value;

/// Renders a classified-valid, already-sanitized payload into a structured
/// report. The type flow upstream guarantees empty/error payloads never get
/// here: only `Classification::Valid` carries a payload out of the
/// classifier.

const MAX_RECORDS: usize = 3;

pub fn render(category: LookupCategory, payload: &Value, query: &str) -> Report {
    let mut fields = Vec::new();

    for (idx, record) in records_of(payload).into_iter().take(MAX_RECORDS).enumerate() {
        let before = fields.len();
        match category {
            LookupCategory::Identity => identity_fields(record, idx, &mut fields),
            LookupCategory::Relationship => relationship_fields(record, idx, &mut fields),
            LookupCategory::Vehicle => vehicle_fields(record, idx, &mut fields),
            LookupCategory::FinancialCode => financial_code_fields(record, idx, &mut fields),
            LookupCategory::SocialProfile => social_profile_fields(record, idx, &mut fields),
            LookupCategory::NetworkAddress => network_address_fields(record, idx, &mut fields),
        }
        // Typed decode produced nothing the labels know about; fall back to
        // the record's own scalar keys so the report is never blank.
        if fields.len() == before {
            fallback_fields(record, idx, &mut fields);
        }
    }

    Report {
        category,
        title: format!("{} report for {}", category.label(), query),
        fields,
    }
}

/// A payload is either a direct record or a bucket of records.
fn records_of(payload: &Value) -> Vec<&Value> {
    if let Some(obj) = payload.as_object() {
        for key in ["result", "results", "data", "records"] {
            if let Some(Value::Array(items)) = obj.get(key) {
                return items.iter().collect();
            }
        }
    }
    if let Some(items) = payload.as_array() {
        return items.iter().collect();
    }
    vec![payload]
}

fn label_for(base: &str, idx: usize) -> String {
    if idx == 0 {
        base.to_string()
    } else {
        format!("{} #{}", base, idx + 1)
    }
}

fn push(fields: &mut Vec<ReportField>, label: String, value: Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            fields.push(ReportField {
                label,
                value: trimmed.to_string(),
            });
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn identity_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: IdentityRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Name", idx), decoded.name);
    push(fields, label_for("Father's name", idx), decoded.father_name);
    push(fields, label_for("Address", idx), decoded.address);
    push(fields, label_for("Mobile", idx), decoded.mobile);
    push(fields, label_for("Alt mobile", idx), decoded.alt_mobile);
    push(fields, label_for("Email", idx), decoded.email);
    push(fields, label_for("ID number", idx), decoded.id_number);
    push(fields, label_for("Circle", idx), decoded.circle);
}

fn relationship_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: RelationshipRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Family head", idx), decoded.family_head);
    push(fields, label_for("Mother", idx), decoded.mother_name);
    push(fields, label_for("Father", idx), decoded.father_name);
    push(fields, label_for("District", idx), decoded.district);
    for member in decoded.members {
        let name = member.name.unwrap_or_default();
        if name.trim().is_empty() {
            continue;
        }
        let detail = match (member.relation, member.age.as_ref().and_then(scalar)) {
            (Some(rel), Some(age)) => format!("{} ({}, {})", name, rel, age),
            (Some(rel), None) => format!("{} ({})", name, rel),
            (None, Some(age)) => format!("{} ({})", name, age),
            (None, None) => name,
        };
        push(fields, label_for("Member", idx), Some(detail));
    }
}

fn vehicle_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: VehicleRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Owner", idx), decoded.owner_name);
    push(fields, label_for("Registration", idx), decoded.reg_no);
    push(fields, label_for("Class", idx), decoded.vehicle_class);
    push(fields, label_for("Maker / model", idx), decoded.maker_model);
    push(fields, label_for("Fuel", idx), decoded.fuel_type);
    push(
        fields,
        label_for("Registered on", idx),
        decoded.registration_date,
    );
    push(fields, label_for("RC status", idx), decoded.rc_status);
    push(
        fields,
        label_for("Insurance valid till", idx),
        decoded.insurance_upto,
    );
}

fn financial_code_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: FinancialCodeRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Code", idx), decoded.code);
    push(fields, label_for("Legal name", idx), decoded.legal_name);
    push(fields, label_for("Trade name", idx), decoded.trade_name);
    push(fields, label_for("State", idx), decoded.state);
    push(
        fields,
        label_for("Status", idx),
        decoded.registration_status,
    );
    push(
        fields,
        label_for("Registered on", idx),
        decoded.registration_date,
    );
}

fn social_profile_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: SocialProfileRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Username", idx), decoded.username);
    push(fields, label_for("Full name", idx), decoded.full_name);
    push(fields, label_for("Bio", idx), decoded.biography);
    push(
        fields,
        label_for("Followers", idx),
        decoded.followers.as_ref().and_then(scalar),
    );
    push(
        fields,
        label_for("Following", idx),
        decoded.following.as_ref().and_then(scalar),
    );
    push(
        fields,
        label_for("Posts", idx),
        decoded.posts.as_ref().and_then(scalar),
    );
    push(
        fields,
        label_for("Private", idx),
        decoded.is_private.map(|b| b.to_string()),
    );
}

fn network_address_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let decoded: NetworkAddressRecord = serde_json::from_value(record.clone()).unwrap_or_default();
    push(fields, label_for("Country", idx), decoded.country);
    push(fields, label_for("Region", idx), decoded.region);
    push(fields, label_for("City", idx), decoded.city);
    push(fields, label_for("ZIP", idx), decoded.zip);
    push(fields, label_for("ISP", idx), decoded.isp);
    push(fields, label_for("Organization", idx), decoded.org);
    push(fields, label_for("AS", idx), decoded.autonomous_system);
    push(fields, label_for("Timezone", idx), decoded.timezone);
}

/// Last resort: surface whatever scalar fields the record has, so a vendor
/// schema drift degrades the report instead of blanking it.
fn fallback_fields(record: &Value, idx: usize, fields: &mut Vec<ReportField>) {
    let Some(obj) = record.as_object() else {
        push(fields, label_for("Result", idx), scalar(record));
        return;
    };
    for (key, value) in obj {
        push(fields, label_for(key, idx), scalar(value));
    }
}
