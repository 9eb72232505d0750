use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::{
    db::{Database, NumberState, PhoneNumber},
    error::{LifecycleError, LifecycleResult},
    settings::ClassifierSettings,
    signals::{AgentDirectory, AgentSignals, OrganizationDirectory, OrganizationSignals},
};

use super::{
    rules::{evaluate, RuleContext},
    AnomalyKind, ClassificationAnomaly, OrphanEntry, OrphanReport, OrphanSignal, StateCounts,
};

/// Read-only pass over the ledger that decides which numbers are orphaned.
///
/// The classifier never mutates state. Missing or failing directory lookups are recorded
/// as anomalies on the report so one bad record does not hide the rest.
#[derive(Clone)]
pub struct OrphanClassifier {
    db: Database,
    organizations: Arc<dyn OrganizationDirectory>,
    agents: Arc<dyn AgentDirectory>,
    settings: ClassifierSettings,
}

enum Lookup<T> {
    Found(T),
    Missing,
    Failed(String),
}

impl OrphanClassifier {
    pub fn new(
        db: Database,
        organizations: Arc<dyn OrganizationDirectory>,
        agents: Arc<dyn AgentDirectory>,
        settings: ClassifierSettings,
    ) -> Self {
        Self {
            db,
            organizations,
            agents,
            settings,
        }
    }

    pub async fn classify(&self, now: DateTime<Utc>) -> LifecycleResult<OrphanReport> {
        let candidates = self
            .db
            .list_phone_numbers(&[NumberState::Active, NumberState::GracePeriod])
            .await
            .map_err(LifecycleError::from_storage)?;

        let mut summary = StateCounts::default();
        for total in self
            .db
            .state_totals()
            .await
            .map_err(LifecycleError::from_storage)?
        {
            summary.record(total.state, total.count);
        }

        let mut organizations: HashMap<String, Lookup<OrganizationSignals>> = HashMap::new();
        let mut entries = Vec::with_capacity(candidates.len());
        let mut anomalies = Vec::new();

        for number in candidates {
            let Some(organization_id) = number.organization_id.clone() else {
                anomalies.push(ClassificationAnomaly {
                    phone_number_id: Some(number.id.clone()),
                    organization_id: None,
                    kind: AnomalyKind::MissingOwner,
                    detail: format!(
                        "{} is {} without an owning organization",
                        number.label(),
                        number.state
                    ),
                });
                continue;
            };

            if !organizations.contains_key(&organization_id) {
                let lookup = self.lookup_organization(&organization_id).await;
                organizations.insert(organization_id.clone(), lookup);
            }
            let organization = match organizations.get(&organization_id) {
                Some(Lookup::Found(org)) => Some(org),
                Some(Lookup::Failed(detail)) => {
                    anomalies.push(ClassificationAnomaly {
                        phone_number_id: Some(number.id.clone()),
                        organization_id: Some(organization_id.clone()),
                        kind: AnomalyKind::LookupFailed,
                        detail: detail.clone(),
                    });
                    None
                }
                _ => {
                    anomalies.push(ClassificationAnomaly {
                        phone_number_id: Some(number.id.clone()),
                        organization_id: Some(organization_id.clone()),
                        kind: AnomalyKind::MissingOrganization,
                        detail: format!("organization {organization_id} has no record"),
                    });
                    None
                }
            };

            let agent = match number.agent_reference_id.as_deref() {
                Some(agent_id) => match self.lookup_agent(agent_id).await {
                    Lookup::Found(agent) => Some(agent),
                    Lookup::Missing => {
                        anomalies.push(ClassificationAnomaly {
                            phone_number_id: Some(number.id.clone()),
                            organization_id: Some(organization_id.clone()),
                            kind: AnomalyKind::MissingAgent,
                            detail: format!("agent {agent_id} has no record"),
                        });
                        None
                    }
                    Lookup::Failed(detail) => {
                        anomalies.push(ClassificationAnomaly {
                            phone_number_id: Some(number.id.clone()),
                            organization_id: Some(organization_id.clone()),
                            kind: AnomalyKind::LookupFailed,
                            detail,
                        });
                        None
                    }
                },
                None => None,
            };

            let signals = evaluate(&RuleContext {
                number: &number,
                organization,
                agent: agent.as_ref(),
                settings: &self.settings,
                now,
            });
            if !signals.is_empty() {
                debug!("{} ({}) orphaned: {:?}", number.label(), number.id, signals);
            }
            entries.push(to_entry(number, organization, signals));
        }

        for anomaly in &anomalies {
            warn!(
                "Classification anomaly {:?} on {}: {}",
                anomaly.kind,
                anomaly.phone_number_id.as_deref().unwrap_or("-"),
                anomaly.detail
            );
        }

        Ok(OrphanReport {
            generated_at: now,
            entries,
            anomalies,
            summary,
        })
    }

    async fn lookup_organization(&self, organization_id: &str) -> Lookup<OrganizationSignals> {
        match self.organizations.organization(organization_id).await {
            Ok(Some(org)) => Lookup::Found(org),
            Ok(None) => Lookup::Missing,
            Err(err) => Lookup::Failed(format!("organization {organization_id}: {err:#}")),
        }
    }

    async fn lookup_agent(&self, agent_id: &str) -> Lookup<AgentSignals> {
        match self.agents.agent(agent_id).await {
            Ok(Some(agent)) => Lookup::Found(agent),
            Ok(None) => Lookup::Missing,
            Err(err) => Lookup::Failed(format!("agent {agent_id}: {err:#}")),
        }
    }
}

fn to_entry(
    number: PhoneNumber,
    organization: Option<&OrganizationSignals>,
    signals: Vec<OrphanSignal>,
) -> OrphanEntry {
    OrphanEntry {
        phone_number_id: number.id,
        raw_number: number.raw_number,
        display_number: number.display_number,
        state: number.state,
        organization_id: number.organization_id,
        org_name: organization.map(|org| org.name.clone()),
        agent_reference_id: number.agent_reference_id,
        monthly_cost_cents: number.monthly_cost_cents,
        last_call_at: number.last_call_at,
        signals,
    }
}
