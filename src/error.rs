use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::NumberState;

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("phone number {0} not found")]
    NotFound(String),

    #[error("{phone_number_id} is already flagged for release (grace period ends {grace_period_ends_at})")]
    AlreadyFlagged {
        phone_number_id: String,
        grace_period_ends_at: DateTime<Utc>,
    },

    #[error("{0} has been released; released numbers cannot change state")]
    Terminal(String),

    #[error("cannot {action} a number in state {from}")]
    IllegalTransition {
        from: NumberState,
        action: &'static str,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("telephony provider rejected the release: {0}")]
    Provider(String),

    #[error("telephony provider did not answer within {after_ms}ms")]
    ProviderTimeout { after_ms: u64 },

    #[error(transparent)]
    Storage(anyhow::Error),
}

impl LifecycleError {
    /// Recovers a domain error raised inside a database task; anything else is storage.
    pub fn from_storage(err: anyhow::Error) -> Self {
        match err.downcast::<LifecycleError>() {
            Ok(domain) => domain,
            Err(other) => LifecycleError::Storage(other),
        }
    }

    /// Stable code for callers that branch on the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Validation(_) => "validation",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::AlreadyFlagged { .. } => "already_flagged",
            LifecycleError::Terminal(_) => "terminal",
            LifecycleError::IllegalTransition { .. } => "illegal_transition",
            LifecycleError::Conflict(_) => "conflict",
            LifecycleError::Provider(_) => "provider",
            LifecycleError::ProviderTimeout { .. } => "provider_timeout",
            LifecycleError::Storage(_) => "storage",
        }
    }

    /// Rejections the caller can fix by changing the request or re-reading state.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            LifecycleError::Provider(_)
                | LifecycleError::ProviderTimeout { .. }
                | LifecycleError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_survive_a_trip_through_anyhow() {
        let wrapped: anyhow::Error = LifecycleError::Conflict("busy".into()).into();
        let recovered = LifecycleError::from_storage(wrapped);
        assert_eq!(recovered.kind(), "conflict");
    }

    #[test]
    fn plain_storage_failures_stay_storage() {
        let recovered = LifecycleError::from_storage(anyhow::anyhow!("disk full"));
        assert_eq!(recovered.kind(), "storage");
        assert!(!recovered.is_rejection());
        assert_eq!(recovered.to_string(), "disk full");
    }
}
