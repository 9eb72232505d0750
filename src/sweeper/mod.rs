//! Background release of numbers whose grace period has run out.

pub mod controller;
pub mod loop_worker;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    db::Database,
    error::{LifecycleError, LifecycleResult},
    lifecycle::ActionExecutor,
};

pub use controller::SweeperController;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub released: Vec<String>,
    pub failed: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub phone_number_id: String,
    pub error_kind: &'static str,
    pub message: String,
    /// Provider or storage trouble; the number stays in grace and the next pass retries it.
    pub retryable: bool,
}

/// Releases every `grace_period` number whose grace window ended at or before `now`.
///
/// Each release goes through the executor like any operator release, so provider
/// failures leave the number in grace for the next pass. A number that changed state
/// since it was listed simply fails its transition check and is reported, not retried.
pub async fn sweep_expired_grace_periods(
    executor: &ActionExecutor,
    db: &Database,
    reason: &str,
    now: DateTime<Utc>,
) -> LifecycleResult<SweepReport> {
    let expired = db
        .list_expired_grace_numbers(now)
        .await
        .map_err(LifecycleError::from_storage)?;

    let mut report = SweepReport {
        expired: expired.len(),
        ..SweepReport::default()
    };
    for number in expired {
        match executor.release(&number.id, reason, None).await {
            Ok(released) => report.released.push(released.id),
            Err(err) => report.failed.push(SweepFailure {
                phone_number_id: number.id,
                error_kind: err.kind(),
                message: err.to_string(),
                retryable: !err.is_rejection(),
            }),
        }
    }
    Ok(report)
}
