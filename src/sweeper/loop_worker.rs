use chrono::Utc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{db::Database, lifecycle::ActionExecutor, settings::SweeperSettings};

use super::sweep_expired_grace_periods;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub async fn sweeper_loop(
    executor: ActionExecutor,
    db: Database,
    settings: SweeperSettings,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!(
        "grace sweeper running every {}s",
        settings.interval_secs.max(1)
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep_expired_grace_periods(&executor, &db, &settings.release_reason, Utc::now()).await {
                    Ok(report) if report.expired == 0 => log_debug!("grace sweep: nothing expired"),
                    Ok(report) => {
                        log_info!(
                            "grace sweep: {} expired, {} released, {} failed",
                            report.expired,
                            report.released.len(),
                            report.failed.len()
                        );
                        for failure in &report.failed {
                            if failure.retryable {
                                log_warn!(
                                    "grace sweep could not release {}, will retry: {}",
                                    failure.phone_number_id,
                                    failure.message
                                );
                            } else {
                                log_debug!(
                                    "grace sweep skipped {} ({}): {}",
                                    failure.phone_number_id,
                                    failure.error_kind,
                                    failure.message
                                );
                            }
                        }
                    }
                    Err(err) => log_error!("grace sweep failed: {err}"),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("grace sweeper shutting down");
                break;
            }
        }
    }
}
