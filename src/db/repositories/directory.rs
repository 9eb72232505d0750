//! Snapshot tables mirrored from the organization and agent stores.
//!
//! The upserts are for the sync job that keeps the snapshots current; the lifecycle core
//! only reads through the directory traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{
    db::{
        connection::Database,
        helpers::{
            format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime,
        },
    },
    signals::{
        AgentDirectory, AgentSignals, MemberActivity, OrganizationDirectory, OrganizationSignals,
        SubscriptionStatus,
    },
};

impl Database {
    pub async fn upsert_organization(&self, organization: &OrganizationSignals) -> Result<()> {
        let record = organization.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let now = format_datetime(&Utc::now());
            tx.execute(
                "INSERT INTO organizations (
                    id, name, subscription_tier, subscription_status, subscription_canceled_at,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    subscription_tier = excluded.subscription_tier,
                    subscription_status = excluded.subscription_status,
                    subscription_canceled_at = excluded.subscription_canceled_at,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.name,
                    record.subscription_tier,
                    record.subscription_status.as_str(),
                    format_optional_datetime(record.subscription_canceled_at.as_ref()),
                    format_datetime(&record.created_at),
                    now,
                ],
            )?;

            tx.execute(
                "DELETE FROM organization_members WHERE organization_id = ?1",
                params![record.id],
            )?;
            for member in &record.members {
                tx.execute(
                    "INSERT INTO organization_members (organization_id, user_id, last_login_at)
                     VALUES (?1, ?2, ?3)",
                    params![
                        record.id,
                        member.user_id,
                        format_optional_datetime(member.last_login_at.as_ref()),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_agent(&self, agent: &AgentSignals) -> Result<()> {
        let record = agent.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO voice_agents (id, organization_id, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    organization_id = excluded.organization_id,
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.organization_id,
                    record.is_active,
                    format_datetime(&record.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl OrganizationDirectory for Database {
    async fn organization(&self, organization_id: &str) -> Result<Option<OrganizationSignals>> {
        let organization_id = organization_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, subscription_tier, subscription_status, subscription_canceled_at,
                        created_at
                 FROM organizations
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![organization_id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let status: Option<String> = row.get("subscription_status")?;
            let canceled_at: Option<String> = row.get("subscription_canceled_at")?;
            let created_at: String = row.get("created_at")?;
            let mut organization = OrganizationSignals {
                id: row.get("id")?,
                name: row.get("name")?,
                subscription_tier: row.get("subscription_tier")?,
                subscription_status: status
                    .as_deref()
                    .map(SubscriptionStatus::from_code)
                    .unwrap_or(SubscriptionStatus::Unknown),
                subscription_canceled_at: parse_optional_datetime(
                    canceled_at,
                    "subscription_canceled_at",
                )?,
                created_at: parse_datetime(&created_at, "created_at")?,
                members: Vec::new(),
            };

            let mut members = conn.prepare(
                "SELECT user_id, last_login_at FROM organization_members
                 WHERE organization_id = ?1
                 ORDER BY user_id ASC",
            )?;
            let mut member_rows = members.query(params![organization.id])?;
            while let Some(member) = member_rows.next()? {
                let last_login_at: Option<String> = member.get(1)?;
                organization.members.push(MemberActivity {
                    user_id: member.get(0)?,
                    last_login_at: parse_optional_datetime(last_login_at, "last_login_at")?,
                });
            }

            Ok(Some(organization))
        })
        .await
    }
}

#[async_trait]
impl AgentDirectory for Database {
    async fn agent(&self, agent_reference_id: &str) -> Result<Option<AgentSignals>> {
        let agent_reference_id = agent_reference_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, organization_id, is_active, updated_at
                 FROM voice_agents
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![agent_reference_id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let updated_at: String = row.get("updated_at")?;
            let updated_at: DateTime<Utc> = parse_datetime(&updated_at, "updated_at")?;
            Ok(Some(AgentSignals {
                id: row.get("id")?,
                organization_id: row.get("organization_id")?,
                is_active: row.get("is_active")?,
                updated_at,
            }))
        })
        .await
    }
}
