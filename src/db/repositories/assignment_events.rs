use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_event_type, parse_metadata},
    models::{AssignmentEvent, HistoryEntry, NewAssignmentEvent},
};

fn row_to_event(row: &Row) -> Result<AssignmentEvent> {
    let event_type: String = row.get("event_type")?;
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;

    Ok(AssignmentEvent {
        seq: row.get("seq")?,
        id: row.get("id")?,
        phone_number_id: row.get("phone_number_id")?,
        organization_id: row.get("organization_id")?,
        event_type: parse_event_type(&event_type)?,
        reason: row.get("reason")?,
        metadata: parse_metadata(&metadata)?,
        performed_by: row.get("performed_by")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Appends one event. Callers run this inside the transaction that mutates the ledger row.
pub(crate) fn insert_event(conn: &Connection, event: &NewAssignmentEvent) -> Result<()> {
    let metadata =
        serde_json::to_string(&event.metadata).context("failed to serialize event metadata")?;
    conn.execute(
        "INSERT INTO phone_assignment_events (
            id, phone_number_id, organization_id, event_type, reason, metadata, performed_by, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.id,
            event.phone_number_id,
            event.organization_id,
            event.event_type.as_str(),
            event.reason,
            metadata,
            event.performed_by,
            format_datetime(&event.created_at),
        ],
    )
    .with_context(|| format!("failed to append {} event", event.event_type.as_str()))?;
    Ok(())
}

impl Database {
    /// Newest-first page of events, optionally for a single number.
    pub async fn list_assignment_history(
        &self,
        phone_number_id: Option<String>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.seq, e.id, e.phone_number_id, e.organization_id, e.event_type,
                        e.reason, e.metadata, e.performed_by, e.created_at,
                        p.raw_number, p.display_number
                 FROM phone_assignment_events e
                 JOIN phone_numbers p ON p.id = e.phone_number_id
                 WHERE ?1 IS NULL OR e.phone_number_id = ?1
                 ORDER BY e.seq DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let mut rows = stmt.query(params![phone_number_id, limit, offset])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(HistoryEntry {
                    event: row_to_event(row)?,
                    raw_number: row.get("raw_number")?,
                    display_number: row.get("display_number")?,
                });
            }
            Ok(entries)
        })
        .await
    }

    /// Every event of one number in the order it was appended.
    pub async fn list_events_for_number(&self, phone_number_id: &str) -> Result<Vec<AssignmentEvent>> {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, id, phone_number_id, organization_id, event_type, reason, metadata,
                        performed_by, created_at
                 FROM phone_assignment_events
                 WHERE phone_number_id = ?1
                 ORDER BY seq ASC",
            )?;

            let mut rows = stmt.query(params![phone_number_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }
}
