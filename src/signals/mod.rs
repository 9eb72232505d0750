//! Read-only views of data owned by other stores.
//!
//! The lifecycle core consults the organization/subscription store and the agent
//! (voice-config) store when classifying numbers; it never writes to either.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
    Canceled,
    /// No subscription on record, or a status this crate does not recognise.
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unknown => "unknown",
        }
    }

    pub fn from_code(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            "canceled" | "cancelled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Unknown,
        }
    }

    /// The subscription will not bill again without the customer starting over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationSignals {
    pub id: String,
    pub name: String,
    pub subscription_tier: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub subscription_canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub members: Vec<MemberActivity>,
}

impl OrganizationSignals {
    /// Most recent login across all members, `None` if nobody ever logged in.
    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.members
            .iter()
            .filter_map(|member| member.last_login_at)
            .max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberActivity {
    pub user_id: String,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSignals {
    pub id: String,
    pub organization_id: Option<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn organization(&self, organization_id: &str) -> Result<Option<OrganizationSignals>>;
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn agent(&self, agent_reference_id: &str) -> Result<Option<AgentSignals>>;
}
