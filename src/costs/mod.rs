//! Spend roll-ups over the ledger.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::{Database, NumberState},
    error::{LifecycleError, LifecycleResult},
    orphans::{ClassificationAnomaly, OrphanClassifier, StateCounts},
    signals::OrganizationDirectory,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgCost {
    pub organization_id: String,
    pub org_name: Option<String>,
    pub subscription_tier: Option<String>,
    pub number_count: i64,
    pub monthly_cost_cents: i64,
    pub last_call_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub generated_at: DateTime<Utc>,
    /// Every number ever registered, released ones included.
    pub total_numbers: i64,
    /// Numbers still billed: `active` + `grace_period`.
    pub active_numbers: i64,
    pub counts: StateCounts,
    /// Recurring spend across every non-released number.
    pub total_monthly_cost_cents: i64,
    pub cost_by_state: BTreeMap<NumberState, i64>,
    /// Ordered by spend, highest first.
    pub cost_by_org: Vec<OrgCost>,
    /// What releasing every currently orphaned number would save per month.
    pub potential_savings_cents: i64,
    pub anomalies: Vec<ClassificationAnomaly>,
}

#[derive(Clone)]
pub struct CostAggregator {
    db: Database,
    organizations: Arc<dyn OrganizationDirectory>,
    classifier: OrphanClassifier,
}

impl CostAggregator {
    pub fn new(
        db: Database,
        organizations: Arc<dyn OrganizationDirectory>,
        classifier: OrphanClassifier,
    ) -> Self {
        Self {
            db,
            organizations,
            classifier,
        }
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> LifecycleResult<CostSummary> {
        let totals = self
            .db
            .state_totals()
            .await
            .map_err(LifecycleError::from_storage)?;

        let mut counts = StateCounts::default();
        let mut cost_by_state = BTreeMap::new();
        for total in &totals {
            counts.record(total.state, total.count);
            if total.state != NumberState::Released {
                cost_by_state.insert(total.state, total.monthly_cost_cents);
            }
        }
        let total_monthly_cost_cents = cost_by_state.values().sum();

        let rows = self
            .db
            .org_cost_rows()
            .await
            .map_err(LifecycleError::from_storage)?;
        let mut names: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();
        let mut cost_by_org = Vec::with_capacity(rows.len());
        for row in rows {
            if !names.contains_key(&row.organization_id) {
                let details = match self.organizations.organization(&row.organization_id).await {
                    Ok(Some(org)) => (Some(org.name), org.subscription_tier),
                    Ok(None) => (None, None),
                    Err(err) => {
                        warn!(
                            "Could not load organization {} for cost report: {err:#}",
                            row.organization_id
                        );
                        (None, None)
                    }
                };
                names.insert(row.organization_id.clone(), details);
            }
            let (org_name, subscription_tier) = names
                .get(&row.organization_id)
                .cloned()
                .unwrap_or((None, None));
            cost_by_org.push(OrgCost {
                organization_id: row.organization_id,
                org_name,
                subscription_tier,
                number_count: row.number_count,
                monthly_cost_cents: row.monthly_cost_cents,
                last_call_at: row.last_call_at,
            });
        }

        let report = self.classifier.classify(now).await?;
        let potential_savings_cents = report
            .orphans()
            .map(|entry| entry.monthly_cost_cents)
            .sum();

        debug!(
            "Cost summary: {} cents/month billed, {} cents/month reclaimable",
            total_monthly_cost_cents, potential_savings_cents
        );

        Ok(CostSummary {
            generated_at: now,
            total_numbers: counts.total(),
            active_numbers: counts.total_active + counts.total_grace_period,
            counts,
            total_monthly_cost_cents,
            cost_by_state,
            cost_by_org,
            potential_savings_cents,
            anomalies: report.anomalies,
        })
    }
}
