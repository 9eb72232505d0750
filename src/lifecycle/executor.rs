use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::{models::phone_number::DEFAULT_MONTHLY_COST_CENTS, Database, NewPhoneNumber, NumberState, PhoneNumber},
    error::{LifecycleError, LifecycleResult},
    provider::TelephonyProvider,
    settings::ReclamationSettings,
    signals::OrganizationDirectory,
};

use super::state::{
    check_transition, plan_registration, plan_transition, Attribution, LifecycleAction,
    MAX_GRACE_DAYS,
};

/// The only writer of the phone number ledger.
///
/// Every transition is a guarded state check, row update and event append committed in one
/// transaction. `release` is the one action that reaches the telephony provider and runs in
/// two phases so the provider is never called twice for the same number.
#[derive(Clone)]
pub struct ActionExecutor {
    db: Database,
    provider: Arc<dyn TelephonyProvider>,
    organizations: Arc<dyn OrganizationDirectory>,
    settings: ReclamationSettings,
}

fn validate_reason(reason: &str) -> LifecycleResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LifecycleError::Validation("a reason is required".into()));
    }
    Ok(reason.to_string())
}

impl ActionExecutor {
    pub fn new(
        db: Database,
        provider: Arc<dyn TelephonyProvider>,
        organizations: Arc<dyn OrganizationDirectory>,
        settings: ReclamationSettings,
    ) -> Self {
        Self {
            db,
            provider,
            organizations,
            settings,
        }
    }

    /// Takes over a number the provisioning flow just leased.
    pub async fn register_number(
        &self,
        new_number: NewPhoneNumber,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        let raw_number = new_number.raw_number.trim().to_string();
        if raw_number.is_empty() {
            return Err(LifecycleError::Validation("raw_number is required".into()));
        }
        if new_number.provider_reference_id.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "provider_reference_id is required".into(),
            ));
        }
        let monthly_cost_cents = new_number
            .monthly_cost_cents
            .unwrap_or(DEFAULT_MONTHLY_COST_CENTS);
        if monthly_cost_cents < 0 {
            return Err(LifecycleError::Validation(
                "monthly_cost_cents cannot be negative".into(),
            ));
        }
        if new_number.organization_id.is_none() && new_number.agent_reference_id.is_some() {
            return Err(LifecycleError::Validation(
                "an agent can only be bound to an assigned number".into(),
            ));
        }
        if let Some(organization_id) = new_number.organization_id.as_deref() {
            self.ensure_organization(organization_id).await?;
        }

        let now = Utc::now();
        let number = PhoneNumber {
            id: Uuid::new_v4().to_string(),
            display_number: new_number
                .display_number
                .unwrap_or_else(|| raw_number.clone()),
            raw_number,
            provider_reference_id: new_number.provider_reference_id,
            organization_id: new_number.organization_id,
            agent_reference_id: new_number.agent_reference_id,
            state: NumberState::Pooled,
            grace_period_ends_at: None,
            release_reason: None,
            monthly_cost_cents,
            provisioned_at: new_number.provisioned_at.unwrap_or(now),
            last_call_at: new_number.last_call_at,
            release_reserved_at: None,
            created_at: now,
            updated_at: now,
        };
        let attribution = Attribution {
            reason: "provisioned".into(),
            performed_by,
            at: now,
        };

        let write = plan_registration(number, &attribution);
        let registered = self
            .db
            .insert_phone_number(write)
            .await
            .map_err(LifecycleError::from_storage)?;
        info!(
            "Registered {} as {} ({})",
            registered.label(),
            registered.id,
            registered.state
        );
        Ok(registered)
    }

    /// `active` → `grace_period`. A number already in grace is rejected with
    /// `AlreadyFlagged` and left untouched.
    pub async fn flag_for_release(
        &self,
        phone_number_id: &str,
        reason: &str,
        grace_days: Option<u32>,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        let grace_days = grace_days.unwrap_or(self.settings.default_grace_days);
        if grace_days == 0 || grace_days > MAX_GRACE_DAYS {
            return Err(LifecycleError::Validation(format!(
                "grace_days must be between 1 and {MAX_GRACE_DAYS}"
            )));
        }
        self.transition(
            phone_number_id,
            LifecycleAction::FlagForRelease { grace_days },
            reason,
            performed_by,
        )
        .await
    }

    /// `active`/`grace_period` → `pooled`. The provider lease is kept.
    pub async fn pool(
        &self,
        phone_number_id: &str,
        reason: &str,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        self.transition(phone_number_id, LifecycleAction::Pool, reason, performed_by)
            .await
    }

    /// `pooled` → `active` under `target_org_id`.
    pub async fn reassign(
        &self,
        phone_number_id: &str,
        target_org_id: &str,
        reason: &str,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        let target_org_id = target_org_id.trim();
        if target_org_id.is_empty() {
            return Err(LifecycleError::Validation(
                "a target organization is required".into(),
            ));
        }
        self.ensure_organization(target_org_id).await?;

        self.transition(
            phone_number_id,
            LifecycleAction::Reassign {
                target_org_id: target_org_id.to_string(),
            },
            reason,
            performed_by,
        )
        .await
    }

    async fn ensure_organization(&self, organization_id: &str) -> LifecycleResult<()> {
        let known = self
            .organizations
            .organization(organization_id)
            .await
            .map_err(LifecycleError::from_storage)?;
        if known.is_none() {
            return Err(LifecycleError::Validation(format!(
                "organization {organization_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn transition(
        &self,
        phone_number_id: &str,
        action: LifecycleAction,
        reason: &str,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        let attribution = Attribution {
            reason: validate_reason(reason)?,
            performed_by,
            at: Utc::now(),
        };
        let action_name = action.name();

        let result = self
            .db
            .apply_transition(phone_number_id, move |current| {
                plan_transition(current, &action, &attribution)
            })
            .await
            .map_err(LifecycleError::from_storage);

        match &result {
            Ok(number) => info!(
                "{action_name}: {} ({}) is now {}",
                number.label(),
                number.id,
                number.state
            ),
            Err(err) => warn!("{action_name} rejected for {phone_number_id}: {err}"),
        }
        result
    }

    /// Deprovisions the number with the provider and marks it `released`.
    ///
    /// Phase one reserves the row; phase two commits the release only after the provider
    /// confirmed. A provider failure or timeout drops the reservation and leaves the row
    /// exactly as it was. While a reservation is held every other action on the number,
    /// including a second release, fails with `Conflict`.
    pub async fn release(
        &self,
        phone_number_id: &str,
        reason: &str,
        performed_by: Option<String>,
    ) -> LifecycleResult<PhoneNumber> {
        let reason = validate_reason(reason)?;
        let token = Uuid::new_v4().to_string();

        let reserved = self
            .db
            .reserve_release(phone_number_id, token.clone(), Utc::now(), |current| {
                check_transition(current, &LifecycleAction::Release).map(|_| ())
            })
            .await
            .map_err(LifecycleError::from_storage)
            .map_err(|err| {
                warn!("release rejected for {phone_number_id}: {err}");
                err
            })?;

        let timeout = self.settings.provider_timeout();
        let outcome = tokio::time::timeout(
            timeout,
            self.provider.deprovision(&reserved.provider_reference_id),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(LifecycleError::Provider(err.to_string())),
            Err(_) => Some(LifecycleError::ProviderTimeout {
                after_ms: timeout.as_millis() as u64,
            }),
        };

        if let Some(err) = failure {
            error!(
                "Provider release of {} ({}) failed: {err}; rolling back",
                reserved.label(),
                reserved.provider_reference_id
            );
            match self.db.cancel_release(phone_number_id, token).await {
                Ok(true) => {}
                Ok(false) => warn!("Release reservation on {phone_number_id} was already cleared"),
                Err(rollback_err) => error!(
                    "Failed to clear release reservation on {phone_number_id}: {rollback_err:#}"
                ),
            }
            return Err(err);
        }

        let attribution = Attribution {
            reason,
            performed_by,
            at: Utc::now(),
        };
        let write = plan_transition(&reserved, &LifecycleAction::Release, &attribution)?;
        let released = self
            .db
            .complete_release(token, write)
            .await
            .map_err(LifecycleError::from_storage)
            .map_err(|err| {
                error!(
                    "{} was released with the provider but the ledger commit failed: {err}",
                    reserved.provider_reference_id
                );
                err
            })?;

        info!(
            "release: {} ({}) deprovisioned, saving {} cents/month",
            released.label(),
            released.id,
            released.monthly_cost_cents
        );
        Ok(released)
    }

    /// Stamps call activity. Not a lifecycle transition, so no event is appended.
    pub async fn record_call_activity(
        &self,
        phone_number_id: &str,
        at: DateTime<Utc>,
    ) -> LifecycleResult<PhoneNumber> {
        self.db
            .touch_last_call(phone_number_id, at)
            .await
            .map_err(LifecycleError::from_storage)
    }

    /// Clears release reservations left behind by a crash mid-call. The release is treated
    /// as failed; the number keeps its previous state.
    pub async fn recover_stale_reservations(&self) -> LifecycleResult<usize> {
        let cutoff = Utc::now() - Duration::seconds(self.settings.stale_reservation_secs as i64);
        let cleared = self
            .db
            .clear_stale_reservations(cutoff)
            .await
            .map_err(LifecycleError::from_storage)?;

        for id in &cleared {
            warn!("Recovered abandoned release reservation on {id}; release must be retried");
        }
        Ok(cleared.len())
    }
}
