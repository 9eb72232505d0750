//! Orphan detection: which leased numbers no longer pay for themselves.

pub mod classifier;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::NumberState;

pub use classifier::OrphanClassifier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCategory {
    CanceledSubscription,
    InactiveOrg,
    DeactivatedAgent,
    GracePeriod,
}

/// One matching rule together with the measurement that tripped it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum OrphanSignal {
    CanceledSubscription { days_since_canceled: i64 },
    InactiveOrg { days_since_login: i64 },
    DeactivatedAgent { days_since_agent_update: i64 },
    GracePeriod { days_remaining: i64 },
}

impl OrphanSignal {
    pub fn category(&self) -> OrphanCategory {
        match self {
            OrphanSignal::CanceledSubscription { .. } => OrphanCategory::CanceledSubscription,
            OrphanSignal::InactiveOrg { .. } => OrphanCategory::InactiveOrg,
            OrphanSignal::DeactivatedAgent { .. } => OrphanCategory::DeactivatedAgent,
            OrphanSignal::GracePeriod { .. } => OrphanCategory::GracePeriod,
        }
    }
}

/// Classification of one `active` or `grace_period` number. An empty `signals` list means
/// the number is healthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub phone_number_id: String,
    pub raw_number: String,
    pub display_number: String,
    pub state: NumberState,
    pub organization_id: Option<String>,
    pub org_name: Option<String>,
    pub agent_reference_id: Option<String>,
    pub monthly_cost_cents: i64,
    pub last_call_at: Option<DateTime<Utc>>,
    pub signals: Vec<OrphanSignal>,
}

impl OrphanEntry {
    pub fn is_orphan(&self) -> bool {
        !self.signals.is_empty()
    }

    pub fn signal(&self, category: OrphanCategory) -> Option<&OrphanSignal> {
        self.signals
            .iter()
            .find(|signal| signal.category() == category)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// The number is `active`/`grace_period` but has no owner on the row.
    MissingOwner,
    /// The owning organization has no record in the organization store.
    MissingOrganization,
    /// The bound agent has no record in the agent store.
    MissingAgent,
    /// A directory lookup failed outright.
    LookupFailed,
}

/// A record that could not be fully classified. Reported instead of failing the scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationAnomaly {
    pub phone_number_id: Option<String>,
    pub organization_id: Option<String>,
    pub kind: AnomalyKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateCounts {
    pub total_active: i64,
    pub total_grace_period: i64,
    pub total_pooled: i64,
    pub total_released: i64,
}

impl StateCounts {
    pub fn record(&mut self, state: NumberState, count: i64) {
        match state {
            NumberState::Active => self.total_active = count,
            NumberState::GracePeriod => self.total_grace_period = count,
            NumberState::Pooled => self.total_pooled = count,
            NumberState::Released => self.total_released = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.total_active + self.total_grace_period + self.total_pooled + self.total_released
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanReport {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<OrphanEntry>,
    pub anomalies: Vec<ClassificationAnomaly>,
    pub summary: StateCounts,
}

impl OrphanReport {
    pub fn orphans(&self) -> impl Iterator<Item = &OrphanEntry> {
        self.entries.iter().filter(|entry| entry.is_orphan())
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans().count()
    }

    /// Entries carrying `category`, for a per-category listing. A number with several
    /// signals shows up under each of them.
    pub fn in_category(&self, category: OrphanCategory) -> Vec<&OrphanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.signal(category).is_some())
            .collect()
    }

    pub fn entry(&self, phone_number_id: &str) -> Option<&OrphanEntry> {
        self.entries
            .iter()
            .find(|entry| entry.phone_number_id == phone_number_id)
    }
}
