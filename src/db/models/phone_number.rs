//! Phone number ledger rows.
//!
//! A row is created when a number is first leased and is never deleted: `released` is the
//! logical end of its life and the row stays for historical reporting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MONTHLY_COST_CENTS: i64 = 150;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NumberState {
    Active,
    GracePeriod,
    Pooled,
    Released,
}

impl NumberState {
    pub const ALL: [NumberState; 4] = [
        NumberState::Active,
        NumberState::GracePeriod,
        NumberState::Pooled,
        NumberState::Released,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NumberState::Active => "active",
            NumberState::GracePeriod => "grace_period",
            NumberState::Pooled => "pooled",
            NumberState::Released => "released",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        match value {
            "active" => Some(NumberState::Active),
            "grace_period" => Some(NumberState::GracePeriod),
            "pooled" => Some(NumberState::Pooled),
            "released" => Some(NumberState::Released),
            _ => None,
        }
    }

    /// States that still carry an organization and can be judged as orphaned.
    pub fn is_assigned(&self) -> bool {
        matches!(self, NumberState::Active | NumberState::GracePeriod)
    }
}

impl fmt::Display for NumberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoneNumber {
    pub id: String,
    pub raw_number: String,
    pub display_number: String,
    pub provider_reference_id: String,
    pub organization_id: Option<String>,
    pub agent_reference_id: Option<String>,
    pub state: NumberState,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
    pub monthly_cost_cents: i64,
    pub provisioned_at: DateTime<Utc>,
    pub last_call_at: Option<DateTime<Utc>>,
    /// Set while a release is waiting on the telephony provider.
    pub release_reserved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhoneNumber {
    pub fn label(&self) -> &str {
        if self.display_number.is_empty() {
            &self.raw_number
        } else {
            &self.display_number
        }
    }
}

/// A freshly leased number handed over by the provisioning flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhoneNumber {
    pub raw_number: String,
    #[serde(default)]
    pub display_number: Option<String>,
    pub provider_reference_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub agent_reference_id: Option<String>,
    #[serde(default)]
    pub monthly_cost_cents: Option<i64>,
    #[serde(default)]
    pub provisioned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_call_at: Option<DateTime<Utc>>,
}

/// Count and recurring cost of the numbers in one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTotal {
    pub state: NumberState,
    pub count: i64,
    pub monthly_cost_cents: i64,
}

/// Billed numbers grouped by owning organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgCostRow {
    pub organization_id: String,
    pub number_count: i64,
    pub monthly_cost_cents: i64,
    pub last_call_at: Option<DateTime<Utc>>,
}
