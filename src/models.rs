use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The fixed set of lookup providers a user can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupCategory {
    /// Phone / email reverse lookup. The only category with a fallback chain.
    #[serde(rename = "identity-lookup")]
    Identity,
    /// Household / family-linkage lookup.
    #[serde(rename = "relationship-lookup")]
    Relationship,
    /// Vehicle registration lookup.
    #[serde(rename = "vehicle")]
    Vehicle,
    /// Tax / business registration code lookup.
    #[serde(rename = "financial-code")]
    FinancialCode,
    /// Social media profile lookup.
    #[serde(rename = "social-profile")]
    SocialProfile,
    /// IP address / hostname lookup.
    #[serde(rename = "network-address")]
    NetworkAddress,
}

impl LookupCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupCategory::Identity => "identity-lookup",
            LookupCategory::Relationship => "relationship-lookup",
            LookupCategory::Vehicle => "vehicle",
            LookupCategory::FinancialCode => "financial-code",
            LookupCategory::SocialProfile => "social-profile",
            LookupCategory::NetworkAddress => "network-address",
        }
    }

    /// Human-readable label used in prompts and report titles.
    pub fn label(&self) -> &'static str {
        match self {
            LookupCategory::Identity => "Phone / Email",
            LookupCategory::Relationship => "Family",
            LookupCategory::Vehicle => "Vehicle",
            LookupCategory::FinancialCode => "Registration Code",
            LookupCategory::SocialProfile => "Social Profile",
            LookupCategory::NetworkAddress => "IP / Host",
        }
    }
}

impl std::fmt::Display for LookupCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the raw user input, decided before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Phone,
    Email,
    Identifier,
}

/// Persisted per-user account record.
///
/// Created lazily on first contact, mutated only by the credit ledger and the
/// rate limiter, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub user_key: String,
    /// Paid credit balance. Never driven negative by a permitted debit.
    pub balance: i64,
    /// Trial pool, consumed before balance.
    pub free_uses: i64,
    pub last_accepted: Option<DateTime<Utc>>,
    /// Requests accepted within the current rolling day window.
    pub day_count: i64,
    pub referred_by: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub total_lookups: i64,
}

impl UserRecord {
    pub fn new(user_key: &str, free_allowance: i64) -> Self {
        Self {
            user_key: user_key.to_string(),
            balance: 0,
            free_uses: free_allowance,
            last_accepted: None,
            day_count: 0,
            referred_by: None,
            joined_at: Utc::now(),
            total_lookups: 0,
        }
    }
}

/// Append-only audit entry, written only for `valid` lookup outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_key: String,
    pub query: String,
    pub category: LookupCategory,
    pub outcome: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

/// Inbound chat event - can be single object or array
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Single(InboundEvent),
    Batch(Vec<InboundEvent>),
}

impl EventPayload {
    /// Convert to a vec of events for uniform processing
    pub fn into_events(self) -> Vec<InboundEvent> {
        match self {
            EventPayload::Single(event) => vec![event],
            EventPayload::Batch(events) => events,
        }
    }
}

/// Individual event delivered by the chat transport.
///
/// The transport has already parsed commands and keyboard selections; what
/// arrives here is structured.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundEvent {
    /// Opaque user key assigned by the transport.
    pub user: String,

    /// Transport-side event id, if any.
    #[serde(default)]
    pub event_id: Option<String>,

    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// User picked a lookup category; the next query event consumes it.
    CategorySelected { category: LookupCategory },
    /// Raw query text for the previously selected category.
    Query { text: String },
    /// Administrative credit grant. `grant_id` deduplicates transport retries.
    Grant {
        target: String,
        amount: i64,
        grant_id: Uuid,
    },
    /// Administrative balance inspection. Without `target`, reports the
    /// sender's own account.
    Balance { target: Option<String> },
    /// Administrative notice sent to every known user.
    Broadcast { text: String },
    /// Administrative gateway/ledger status dump.
    Diagnostics,
}

/// Per-event disposition reported back to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    Accepted,
    /// Enqueued, but the worker did not confirm pickup within the bounded
    /// wait. The work still runs to completion.
    AcceptedUnconfirmed,
    NotReady,
    ProcessingError,
}

/// Response sent back to the chat transport for a batch of events.
#[derive(Debug, Serialize)]
pub struct EventBatchResponse {
    pub status: String,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub dispositions: Vec<EventDisposition>,
}

/// A rendered lookup report, ready for the chat transport.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub category: LookupCategory,
    pub title: String,
    pub fields: Vec<ReportField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportField {
    pub label: String,
    pub value: String,
}

impl Report {
    /// Plain-text rendering for transports without rich formatting.
    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity(64 + self.fields.len() * 32);
        out.push_str(&self.title);
        for field in &self.fields {
            out.push('\n');
            out.push_str(&field.label);
            out.push_str(": ");
            out.push_str(&field.value);
        }
        out
    }
}

// ============ Provider payload shapes ============
//
// Each category decodes into its own record type with every field optional;
// unknown vendor fields are preserved in `extra`. Decoding happens at the
// boundary, after classification, so the formatter works on typed data.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityRecord {
    pub name: Option<String>,
    pub father_name: Option<String>,
    pub address: Option<String>,
    #[serde(alias = "phone")]
    pub mobile: Option<String>,
    #[serde(alias = "alt_phone")]
    pub alt_mobile: Option<String>,
    pub email: Option<String>,
    pub id_number: Option<String>,
    pub circle: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipRecord {
    pub family_head: Option<String>,
    pub mother_name: Option<String>,
    pub father_name: Option<String>,
    #[serde(default)]
    pub members: Vec<FamilyMember>,
    pub district: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilyMember {
    pub name: Option<String>,
    pub relation: Option<String>,
    pub age: Option<Value>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleRecord {
    pub owner_name: Option<String>,
    pub reg_no: Option<String>,
    pub vehicle_class: Option<String>,
    pub maker_model: Option<String>,
    pub fuel_type: Option<String>,
    pub registration_date: Option<String>,
    pub rc_status: Option<String>,
    pub insurance_upto: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinancialCodeRecord {
    #[serde(alias = "gstin")]
    pub code: Option<String>,
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub state: Option<String>,
    #[serde(alias = "status")]
    pub registration_status: Option<String>,
    pub registration_date: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocialProfileRecord {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub followers: Option<Value>,
    pub following: Option<Value>,
    pub posts: Option<Value>,
    pub is_private: Option<bool>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkAddressRecord {
    pub country: Option<String>,
    #[serde(alias = "regionName")]
    pub region: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub autonomous_system: Option<String>,
    pub timezone: Option<String>,
    pub query: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_event() {
        let json = r#"
        {
            "user": "u-1001",
            "event_id": "evt-1",
            "type": "category_selected",
            "category": "identity-lookup"
        }
        "#;

        let payload: EventPayload = serde_json::from_str(json).unwrap();
        match payload {
            EventPayload::Single(event) => {
                assert_eq!(event.user, "u-1001");
                match event.kind {
                    EventKind::CategorySelected { category } => {
                        assert_eq!(category, LookupCategory::Identity);
                    }
                    other => panic!("Expected category selection, got {:?}", other),
                }
            }
            _ => panic!("Expected single event"),
        }
    }

    #[test]
    fn test_parse_batch_events() {
        let json = r#"
        [
            {"user": "u-1", "type": "query", "text": "9006895231"},
            {"user": "u-2", "type": "diagnostics"}
        ]
        "#;

        let payload: EventPayload = serde_json::from_str(json).unwrap();
        match payload {
            EventPayload::Batch(events) => {
                assert_eq!(events.len(), 2);
            }
            _ => panic!("Expected batch events"),
        }
    }

    #[test]
    fn test_parse_grant_event() {
        let json = r#"
        {
            "user": "admin-1",
            "type": "grant",
            "target": "u-7",
            "amount": 5,
            "grant_id": "6f2cbb34-21c5-4e6f-9c3a-0d6a8f6f2a11"
        }
        "#;

        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event.kind {
            EventKind::Grant { target, amount, .. } => {
                assert_eq!(target, "u-7");
                assert_eq!(amount, 5);
            }
            other => panic!("Expected grant, got {:?}", other),
        }
    }

    #[test]
    fn test_network_record_decodes_vendor_fields() {
        let raw = serde_json::json!({
            "status": "success",
            "country": "Germany",
            "regionName": "Hesse",
            "city": "Frankfurt",
            "isp": "Example GmbH",
            "as": "AS12345 Example",
            "query": "1.2.3.4"
        });

        let record: NetworkAddressRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.region.as_deref(), Some("Hesse"));
        assert_eq!(record.autonomous_system.as_deref(), Some("AS12345 Example"));
    }

    #[test]
    fn test_report_render_text() {
        let report = Report {
            category: LookupCategory::Vehicle,
            title: "Vehicle report for BR01AB1234".to_string(),
            fields: vec![ReportField {
                label: "Owner".to_string(),
                value: "J DOE".to_string(),
            }],
        };

        let text = report.render_text();
        assert!(text.starts_with("Vehicle report"));
        assert!(text.contains("Owner: J DOE"));
    }
}
