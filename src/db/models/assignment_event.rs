use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phone_number::{NumberState, PhoneNumber};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Assigned,
    FlaggedForRelease,
    Pooled,
    Reassigned,
    Released,
    ProviderReleased,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Assigned => "assigned",
            EventType::FlaggedForRelease => "flagged_for_release",
            EventType::Pooled => "pooled",
            EventType::Reassigned => "reassigned",
            EventType::Released => "released",
            EventType::ProviderReleased => "provider_released",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        match value {
            "assigned" => Some(EventType::Assigned),
            "flagged_for_release" => Some(EventType::FlaggedForRelease),
            "pooled" => Some(EventType::Pooled),
            "reassigned" => Some(EventType::Reassigned),
            "released" => Some(EventType::Released),
            "provider_released" => Some(EventType::ProviderReleased),
            _ => None,
        }
    }
}

/// Append-only audit record. `performed_by = None` means the system acted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentEvent {
    pub seq: i64,
    pub id: String,
    pub phone_number_id: String,
    pub organization_id: Option<String>,
    pub event_type: EventType,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub performed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAssignmentEvent {
    pub id: String,
    pub phone_number_id: String,
    pub organization_id: Option<String>,
    pub event_type: EventType,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub performed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An event joined with the number it belongs to, for history listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub event: AssignmentEvent,
    pub raw_number: String,
    pub display_number: String,
}

/// One guarded ledger mutation: the row as it must look afterwards, the state it must
/// still be in when written, and the events recorded alongside.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub expected_state: NumberState,
    pub updated: PhoneNumber,
    pub events: Vec<NewAssignmentEvent>,
}
