use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::{
    db::{
        connection::Database,
        helpers::{
            format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime,
            parse_state,
        },
        models::{LedgerWrite, NumberState, OrgCostRow, PhoneNumber, StateTotal},
        repositories::assignment_events::insert_event,
    },
    error::LifecycleError,
};

const PHONE_NUMBER_COLUMNS: &str = "id, raw_number, display_number, provider_reference_id,
    organization_id, agent_reference_id, state, grace_period_ends_at, release_reason,
    monthly_cost_cents, provisioned_at, last_call_at, release_reserved_at, created_at, updated_at";

fn row_to_phone_number(row: &Row) -> Result<PhoneNumber> {
    let state: String = row.get("state")?;
    let grace_period_ends_at: Option<String> = row.get("grace_period_ends_at")?;
    let provisioned_at: String = row.get("provisioned_at")?;
    let last_call_at: Option<String> = row.get("last_call_at")?;
    let release_reserved_at: Option<String> = row.get("release_reserved_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(PhoneNumber {
        id: row.get("id")?,
        raw_number: row.get("raw_number")?,
        display_number: row.get("display_number")?,
        provider_reference_id: row.get("provider_reference_id")?,
        organization_id: row.get("organization_id")?,
        agent_reference_id: row.get("agent_reference_id")?,
        state: parse_state(&state)?,
        grace_period_ends_at: parse_optional_datetime(
            grace_period_ends_at,
            "grace_period_ends_at",
        )?,
        release_reason: row.get("release_reason")?,
        monthly_cost_cents: row.get("monthly_cost_cents")?,
        provisioned_at: parse_datetime(&provisioned_at, "provisioned_at")?,
        last_call_at: parse_optional_datetime(last_call_at, "last_call_at")?,
        release_reserved_at: parse_optional_datetime(release_reserved_at, "release_reserved_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

/// Re-reads a row written in the current transaction, so callers see exactly what was stored.
fn reload(conn: &Connection, id: &str) -> Result<PhoneNumber> {
    select_phone_number(conn, id)?
        .ok_or_else(|| anyhow::anyhow!("phone number {id} vanished inside its own transaction"))
}

pub(crate) fn select_phone_number(conn: &Connection, id: &str) -> Result<Option<PhoneNumber>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PHONE_NUMBER_COLUMNS} FROM phone_numbers WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_phone_number(row)?)),
        None => Ok(None),
    }
}

fn load_for_update(conn: &Connection, id: &str) -> Result<PhoneNumber> {
    let number = select_phone_number(conn, id)?
        .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
    if number.release_reserved_at.is_some() {
        return Err(LifecycleError::Conflict(format!(
            "a release of {} is already in progress",
            number.label()
        ))
        .into());
    }
    Ok(number)
}

/// Writes the lifecycle columns of `write.updated`, guarded on the state the caller
/// planned against. Returns the number of rows touched (0 means someone got there first).
fn write_lifecycle_columns(
    conn: &Connection,
    write: &LedgerWrite,
    release_token: Option<&str>,
) -> Result<usize> {
    let number = &write.updated;
    let token_guard = if release_token.is_some() {
        "release_token = ?9"
    } else {
        "release_token IS NULL AND ?9 IS NULL"
    };
    let sql = format!(
        "UPDATE phone_numbers
         SET state = ?1,
             organization_id = ?2,
             agent_reference_id = ?3,
             grace_period_ends_at = ?4,
             release_reason = ?5,
             updated_at = ?6,
             release_token = NULL,
             release_reserved_at = NULL
         WHERE id = ?7 AND state = ?8 AND {token_guard}"
    );
    let rows = conn.execute(
        &sql,
        params![
            number.state.as_str(),
            number.organization_id,
            number.agent_reference_id,
            format_optional_datetime(number.grace_period_ends_at.as_ref()),
            number.release_reason,
            format_datetime(&number.updated_at),
            number.id,
            write.expected_state.as_str(),
            release_token,
        ],
    )?;
    Ok(rows)
}

impl Database {
    pub async fn get_phone_number(&self, phone_number_id: &str) -> Result<Option<PhoneNumber>> {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| select_phone_number(conn, &phone_number_id))
            .await
    }

    /// Numbers in any of `states`, oldest lease first. An empty slice lists everything.
    pub async fn list_phone_numbers(&self, states: &[NumberState]) -> Result<Vec<PhoneNumber>> {
        let states: Vec<&'static str> = states.iter().map(|state| state.as_str()).collect();
        self.execute(move |conn| {
            let filter = if states.is_empty() {
                String::new()
            } else {
                let placeholders = (1..=states.len())
                    .map(|idx| format!("?{idx}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("WHERE state IN ({placeholders})")
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {PHONE_NUMBER_COLUMNS}
                 FROM phone_numbers
                 {filter}
                 ORDER BY provisioned_at ASC, id ASC"
            ))?;

            let mut rows = stmt.query(rusqlite::params_from_iter(states.iter()))?;
            let mut numbers = Vec::new();
            while let Some(row) = rows.next()? {
                numbers.push(row_to_phone_number(row)?);
            }
            Ok(numbers)
        })
        .await
    }

    /// Grace-period numbers whose window closed at or before `now`, skipping any whose
    /// release is already in flight.
    pub async fn list_expired_grace_numbers(&self, now: DateTime<Utc>) -> Result<Vec<PhoneNumber>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PHONE_NUMBER_COLUMNS}
                 FROM phone_numbers
                 WHERE state = 'grace_period'
                   AND grace_period_ends_at <= ?1
                   AND release_token IS NULL
                 ORDER BY grace_period_ends_at ASC"
            ))?;

            let mut rows = stmt.query(params![format_datetime(&now)])?;
            let mut numbers = Vec::new();
            while let Some(row) = rows.next()? {
                numbers.push(row_to_phone_number(row)?);
            }
            Ok(numbers)
        })
        .await
    }

    /// Inserts a newly leased number together with its first assignment event.
    pub(crate) async fn insert_phone_number(&self, write: LedgerWrite) -> Result<PhoneNumber> {
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let number = &write.updated;

            let duplicate: Option<String> = tx
                .query_row(
                    "SELECT id FROM phone_numbers WHERE raw_number = ?1 AND state <> 'released'",
                    params![number.raw_number],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = duplicate {
                return Err(LifecycleError::Validation(format!(
                    "{} is already tracked as {existing}",
                    number.raw_number
                ))
                .into());
            }

            tx.execute(
                "INSERT INTO phone_numbers (
                    id, raw_number, display_number, provider_reference_id, organization_id,
                    agent_reference_id, state, grace_period_ends_at, release_reason,
                    monthly_cost_cents, provisioned_at, last_call_at, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    number.id,
                    number.raw_number,
                    number.display_number,
                    number.provider_reference_id,
                    number.organization_id,
                    number.agent_reference_id,
                    number.state.as_str(),
                    format_optional_datetime(number.grace_period_ends_at.as_ref()),
                    number.release_reason,
                    number.monthly_cost_cents,
                    format_datetime(&number.provisioned_at),
                    format_optional_datetime(number.last_call_at.as_ref()),
                    format_datetime(&number.created_at),
                    format_datetime(&number.updated_at),
                ],
            )?;

            for event in &write.events {
                insert_event(&tx, event)?;
            }

            let stored = reload(&tx, &write.updated.id)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// Runs `plan` against the current row and applies the resulting write, all inside one
    /// IMMEDIATE transaction. The row update is guarded on the planned-from state and on the
    /// absence of a release reservation, so a concurrent transition surfaces as a conflict.
    pub(crate) async fn apply_transition<F>(
        &self,
        phone_number_id: &str,
        plan: F,
    ) -> Result<PhoneNumber>
    where
        F: FnOnce(&PhoneNumber) -> std::result::Result<LedgerWrite, LifecycleError>
            + Send
            + 'static,
    {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = load_for_update(&tx, &phone_number_id)?;
            let write = plan(&current)?;

            if write_lifecycle_columns(&tx, &write, None)? == 0 {
                return Err(LifecycleError::Conflict(format!(
                    "{} changed state while the action was being applied",
                    current.label()
                ))
                .into());
            }
            for event in &write.events {
                insert_event(&tx, event)?;
            }

            let stored = reload(&tx, &write.updated.id)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// First phase of a release: checks the transition with `check` and stamps the row
    /// with `token`. Only one reservation can exist per number.
    pub(crate) async fn reserve_release<F>(
        &self,
        phone_number_id: &str,
        token: String,
        reserved_at: DateTime<Utc>,
        check: F,
    ) -> Result<PhoneNumber>
    where
        F: FnOnce(&PhoneNumber) -> std::result::Result<(), LifecycleError> + Send + 'static,
    {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut current = load_for_update(&tx, &phone_number_id)?;
            check(&current)?;

            let rows = tx.execute(
                "UPDATE phone_numbers
                 SET release_token = ?1,
                     release_reserved_at = ?2
                 WHERE id = ?3 AND state = ?4 AND release_token IS NULL",
                params![
                    token,
                    format_datetime(&reserved_at),
                    phone_number_id,
                    current.state.as_str(),
                ],
            )?;
            if rows == 0 {
                return Err(LifecycleError::Conflict(format!(
                    "{} changed state before the release could be reserved",
                    current.label()
                ))
                .into());
            }

            tx.commit()?;
            current.release_reserved_at = Some(reserved_at);
            Ok(current)
        })
        .await
    }

    /// Second phase of a successful release. Only the holder of `token` can commit.
    pub(crate) async fn complete_release(&self, token: String, write: LedgerWrite) -> Result<PhoneNumber> {
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if write_lifecycle_columns(&tx, &write, Some(&token))? == 0 {
                return Err(LifecycleError::Conflict(format!(
                    "release reservation for {} was lost before commit",
                    write.updated.label()
                ))
                .into());
            }
            for event in &write.events {
                insert_event(&tx, event)?;
            }

            let stored = reload(&tx, &write.updated.id)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// Drops a reservation after a failed provider call. Returns false when the
    /// reservation was no longer held by `token`.
    pub(crate) async fn cancel_release(&self, phone_number_id: &str, token: String) -> Result<bool> {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE phone_numbers
                 SET release_token = NULL,
                     release_reserved_at = NULL
                 WHERE id = ?1 AND release_token = ?2",
                params![phone_number_id, token],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// Clears reservations stamped before `cutoff`, returning the affected ids.
    pub(crate) async fn clear_stale_reservations(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let cutoff = format_datetime(&cutoff);

            let mut ids = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id FROM phone_numbers
                     WHERE release_token IS NOT NULL AND release_reserved_at < ?1",
                )?;
                let mut rows = stmt.query(params![cutoff])?;
                while let Some(row) = rows.next()? {
                    ids.push(row.get::<_, String>(0)?);
                }
            }

            tx.execute(
                "UPDATE phone_numbers
                 SET release_token = NULL,
                     release_reserved_at = NULL
                 WHERE release_token IS NOT NULL AND release_reserved_at < ?1",
                params![cutoff],
            )?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    /// Moves `last_call_at` forward; an older timestamp leaves the row untouched.
    pub(crate) async fn touch_last_call(
        &self,
        phone_number_id: &str,
        at: DateTime<Utc>,
    ) -> Result<PhoneNumber> {
        let phone_number_id = phone_number_id.to_string();
        self.execute(move |conn| {
            let stamp = format_datetime(&at);
            conn.execute(
                "UPDATE phone_numbers
                 SET last_call_at = ?1
                 WHERE id = ?2 AND (last_call_at IS NULL OR last_call_at < ?1)",
                params![stamp, phone_number_id],
            )?;

            let number = select_phone_number(conn, &phone_number_id)?
                .ok_or_else(|| LifecycleError::NotFound(phone_number_id.clone()))?;
            Ok(number)
        })
        .await
    }

    /// Count and recurring cost per state, with zero rows for empty states.
    pub async fn state_totals(&self) -> Result<Vec<StateTotal>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*), COALESCE(SUM(monthly_cost_cents), 0)
                 FROM phone_numbers
                 GROUP BY state",
            )?;
            let mut rows = stmt.query([])?;

            let mut totals: Vec<StateTotal> = NumberState::ALL
                .iter()
                .map(|state| StateTotal {
                    state: *state,
                    count: 0,
                    monthly_cost_cents: 0,
                })
                .collect();
            while let Some(row) = rows.next()? {
                let state = parse_state(&row.get::<_, String>(0)?)?;
                if let Some(total) = totals.iter_mut().find(|total| total.state == state) {
                    total.count = row.get(1)?;
                    total.monthly_cost_cents = row.get(2)?;
                }
            }
            Ok(totals)
        })
        .await
    }

    /// Billed numbers grouped by owner. Released and unowned numbers are excluded.
    pub async fn org_cost_rows(&self) -> Result<Vec<OrgCostRow>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT organization_id,
                        COUNT(*),
                        COALESCE(SUM(monthly_cost_cents), 0),
                        MAX(last_call_at)
                 FROM phone_numbers
                 WHERE organization_id IS NOT NULL AND state <> 'released'
                 GROUP BY organization_id
                 ORDER BY 3 DESC, organization_id ASC",
            )?;
            let mut rows = stmt.query([])?;

            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                let last_call_at: Option<String> = row.get(3)?;
                result.push(OrgCostRow {
                    organization_id: row.get(0)?,
                    number_count: row.get(1)?,
                    monthly_cost_cents: row.get(2)?,
                    last_call_at: parse_optional_datetime(last_call_at, "last_call_at")?,
                });
            }
            Ok(result)
        })
        .await
    }
}
