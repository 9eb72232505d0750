//! Caller-facing wrappers around the executor.
//!
//! Each command takes the request shape the admin console sends and always answers with a
//! structured result; errors never escape as anything but `success: false`.

use serde::{Deserialize, Serialize};

use crate::{
    db::PhoneNumber,
    error::{LifecycleError, LifecycleResult},
};

use super::executor::ActionExecutor;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub phone_number_id: String,
    pub reason: String,
    #[serde(default)]
    pub grace_days: Option<u32>,
    #[serde(default)]
    pub target_org_id: Option<String>,
    #[serde(default)]
    pub performed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<PhoneNumber>,
}

impl ActionResult {
    fn from_outcome(
        outcome: LifecycleResult<PhoneNumber>,
        describe: impl FnOnce(&PhoneNumber) -> String,
        failure: &str,
    ) -> Self {
        match outcome {
            Ok(number) => Self {
                success: true,
                error: None,
                error_kind: None,
                message: describe(&number),
                phone_number: Some(number),
            },
            Err(err) => Self::failed(err, failure),
        }
    }

    fn failed(err: LifecycleError, failure: &str) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            message: format!("{failure}: {err}"),
            phone_number: None,
        }
    }
}

pub async fn flag_number_for_release(executor: &ActionExecutor, request: ActionRequest) -> ActionResult {
    let outcome = executor
        .flag_for_release(
            &request.phone_number_id,
            &request.reason,
            request.grace_days,
            request.performed_by,
        )
        .await;
    ActionResult::from_outcome(
        outcome,
        |number| {
            let days = number
                .grace_period_ends_at
                .map(|ends| (ends - number.updated_at).num_days())
                .unwrap_or_default();
            format!("Flagged {} for release ({days}-day grace)", number.label())
        },
        "Flag failed",
    )
}

pub async fn pool_number(executor: &ActionExecutor, request: ActionRequest) -> ActionResult {
    let outcome = executor
        .pool(&request.phone_number_id, &request.reason, request.performed_by)
        .await;
    ActionResult::from_outcome(
        outcome,
        |number| format!("Pooled {}", number.label()),
        "Pool failed",
    )
}

pub async fn release_number(executor: &ActionExecutor, request: ActionRequest) -> ActionResult {
    let outcome = executor
        .release(&request.phone_number_id, &request.reason, request.performed_by)
        .await;
    ActionResult::from_outcome(
        outcome,
        |number| format!("Released {}", number.label()),
        "Release failed",
    )
}

pub async fn reassign_number(executor: &ActionExecutor, request: ActionRequest) -> ActionResult {
    let Some(target_org_id) = request.target_org_id.as_deref() else {
        return ActionResult::failed(
            LifecycleError::Validation("target_org_id is required".into()),
            "Reassign failed",
        );
    };
    let outcome = executor
        .reassign(
            &request.phone_number_id,
            target_org_id,
            &request.reason,
            request.performed_by.clone(),
        )
        .await;
    ActionResult::from_outcome(
        outcome,
        |number| {
            format!(
                "Reassigned {} to {}",
                number.label(),
                number.organization_id.as_deref().unwrap_or_default()
            )
        },
        "Reassign failed",
    )
}
