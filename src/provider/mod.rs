//! Telephony provider client.
//!
//! The lifecycle core needs exactly one capability from the provider: giving a leased
//! number back. Everything else about provisioning lives outside this crate.

pub mod twilio;

use async_trait::async_trait;
use thiserror::Error;

pub use twilio::{TwilioConfig, TwilioProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider API error {status}: {message}")]
    Api { status: u16, code: Option<i64>, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Deprovisions the number identified by the provider's own reference (e.g. a SID).
    async fn deprovision(&self, provider_reference_id: &str) -> Result<(), ProviderError>;
}
