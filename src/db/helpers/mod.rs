use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{EventType, NumberState};

/// Fixed-width RFC 3339 so that text comparison in SQL matches chronological order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_state(value: &str) -> Result<NumberState> {
    NumberState::from_code(value).ok_or_else(|| anyhow!("unknown phone number state {value}"))
}

pub fn parse_event_type(value: &str) -> Result<EventType> {
    EventType::from_code(value).ok_or_else(|| anyhow!("unknown assignment event type {value}"))
}

pub fn parse_metadata(value: &str) -> Result<serde_json::Value> {
    serde_json::from_str(value).context("failed to parse event metadata")
}
