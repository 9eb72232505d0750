//! The phone number state machine.
//!
//! Pure functions only: deciding whether an action is legal from a given row, building the
//! row and events that a legal action produces, and replaying an event log back into a
//! state. The executor is the only caller that turns these plans into ledger writes.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::{AssignmentEvent, EventType, LedgerWrite, NewAssignmentEvent, NumberState, PhoneNumber},
    error::{LifecycleError, LifecycleResult},
};

/// Longest grace period an operator may grant.
pub const MAX_GRACE_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    FlagForRelease { grace_days: u32 },
    Pool,
    Release,
    Reassign { target_org_id: String },
}

impl LifecycleAction {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleAction::FlagForRelease { .. } => "flag for release",
            LifecycleAction::Pool => "pool",
            LifecycleAction::Release => "release",
            LifecycleAction::Reassign { .. } => "reassign",
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            LifecycleAction::FlagForRelease { .. } => EventType::FlaggedForRelease,
            LifecycleAction::Pool => EventType::Pooled,
            LifecycleAction::Release => EventType::Released,
            LifecycleAction::Reassign { .. } => EventType::Reassigned,
        }
    }
}

/// The state `action` leads to from `number`, or why it may not run.
pub fn check_transition(
    number: &PhoneNumber,
    action: &LifecycleAction,
) -> LifecycleResult<NumberState> {
    use LifecycleAction as A;
    use NumberState as S;

    match (number.state, action) {
        (S::Released, _) => Err(LifecycleError::Terminal(number.label().to_string())),
        (S::Active, A::FlagForRelease { .. }) => Ok(S::GracePeriod),
        (S::GracePeriod, A::FlagForRelease { .. }) => Err(LifecycleError::AlreadyFlagged {
            phone_number_id: number.id.clone(),
            grace_period_ends_at: number.grace_period_ends_at.unwrap_or(number.updated_at),
        }),
        (S::Active | S::GracePeriod, A::Pool) => Ok(S::Pooled),
        (S::Active | S::GracePeriod | S::Pooled, A::Release) => Ok(S::Released),
        (S::Pooled, A::Reassign { .. }) => Ok(S::Active),
        (from, action) => Err(LifecycleError::IllegalTransition {
            from,
            action: action.name(),
        }),
    }
}

/// Who asked for a transition and why.
#[derive(Debug, Clone)]
pub struct Attribution {
    pub reason: String,
    pub performed_by: Option<String>,
    pub at: DateTime<Utc>,
}

impl Attribution {
    fn event(
        &self,
        number: &PhoneNumber,
        organization_id: Option<String>,
        event_type: EventType,
        metadata: serde_json::Value,
    ) -> NewAssignmentEvent {
        NewAssignmentEvent {
            id: Uuid::new_v4().to_string(),
            phone_number_id: number.id.clone(),
            organization_id,
            event_type,
            reason: Some(self.reason.clone()),
            metadata,
            performed_by: self.performed_by.clone(),
            created_at: self.at,
        }
    }
}

/// Builds the guarded write for `action` against `number`.
///
/// Release yields both `released` and `provider_released`; it is only planned after the
/// provider confirmed the deprovision.
pub fn plan_transition(
    number: &PhoneNumber,
    action: &LifecycleAction,
    attribution: &Attribution,
) -> LifecycleResult<LedgerWrite> {
    let next_state = check_transition(number, action)?;
    let mut updated = number.clone();
    updated.state = next_state;
    updated.updated_at = attribution.at;
    updated.release_reserved_at = None;

    let events = match action {
        LifecycleAction::FlagForRelease { grace_days } => {
            let ends_at = Duration::try_days(i64::from(*grace_days))
                .and_then(|span| attribution.at.checked_add_signed(span))
                .ok_or_else(|| {
                    LifecycleError::Validation(format!(
                        "a grace period of {grace_days} days is out of range"
                    ))
                })?;
            updated.grace_period_ends_at = Some(ends_at);
            updated.release_reason = Some(attribution.reason.clone());
            vec![attribution.event(
                number,
                number.organization_id.clone(),
                EventType::FlaggedForRelease,
                json!({
                    "grace_days": grace_days,
                    "grace_period_ends_at": ends_at,
                }),
            )]
        }
        LifecycleAction::Pool => {
            updated.organization_id = None;
            updated.agent_reference_id = None;
            updated.grace_period_ends_at = None;
            updated.release_reason = None;
            vec![attribution.event(
                number,
                number.organization_id.clone(),
                EventType::Pooled,
                json!({
                    "previous_state": number.state,
                    "previous_agent_reference_id": number.agent_reference_id,
                }),
            )]
        }
        LifecycleAction::Reassign { target_org_id } => {
            updated.organization_id = Some(target_org_id.clone());
            updated.agent_reference_id = None;
            updated.grace_period_ends_at = None;
            updated.release_reason = None;
            vec![attribution.event(
                number,
                Some(target_org_id.clone()),
                EventType::Reassigned,
                json!({ "previous_organization_id": number.organization_id }),
            )]
        }
        LifecycleAction::Release => {
            updated.organization_id = None;
            updated.agent_reference_id = None;
            updated.grace_period_ends_at = None;
            updated.release_reason = Some(attribution.reason.clone());
            vec![
                attribution.event(
                    number,
                    number.organization_id.clone(),
                    EventType::Released,
                    json!({
                        "previous_state": number.state,
                        "previous_agent_reference_id": number.agent_reference_id,
                        "monthly_cost_cents": number.monthly_cost_cents,
                    }),
                ),
                attribution.event(
                    number,
                    number.organization_id.clone(),
                    EventType::ProviderReleased,
                    json!({ "provider_reference_id": number.provider_reference_id }),
                ),
            ]
        }
    };

    Ok(LedgerWrite {
        expected_state: number.state,
        updated,
        events,
    })
}

/// Builds the insert for a freshly leased number: `active` with an `assigned` event when an
/// owner is known, otherwise `pooled`.
pub fn plan_registration(number: PhoneNumber, attribution: &Attribution) -> LedgerWrite {
    let (event_type, state) = match number.organization_id {
        Some(_) => (EventType::Assigned, NumberState::Active),
        None => (EventType::Pooled, NumberState::Pooled),
    };
    let mut number = number;
    number.state = state;

    let event = attribution.event(
        &number,
        number.organization_id.clone(),
        event_type,
        json!({
            "provider_reference_id": number.provider_reference_id,
            "agent_reference_id": number.agent_reference_id,
            "monthly_cost_cents": number.monthly_cost_cents,
        }),
    );

    LedgerWrite {
        expected_state: state,
        updated: number,
        events: vec![event],
    }
}

/// The state an event leaves a number in. `provider_released` only confirms the
/// `released` that precedes it.
pub fn state_after(event_type: EventType) -> Option<NumberState> {
    match event_type {
        EventType::Assigned | EventType::Reassigned => Some(NumberState::Active),
        EventType::FlaggedForRelease => Some(NumberState::GracePeriod),
        EventType::Pooled => Some(NumberState::Pooled),
        EventType::Released => Some(NumberState::Released),
        EventType::ProviderReleased => None,
    }
}

/// Folds an oldest-first event log into the state it implies.
pub fn replay_state(events: &[AssignmentEvent]) -> Option<NumberState> {
    events
        .iter()
        .fold(None, |state, event| state_after(event.event_type).or(state))
}
