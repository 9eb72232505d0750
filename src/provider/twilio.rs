use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ProviderError, TelephonyProvider};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioApiError {
    code: Option<i64>,
    message: Option<String>,
}

pub struct TwilioProvider {
    config: TwilioConfig,
    http_client: Client,
    base_url: String,
}

impl TwilioProvider {
    pub fn new(config: TwilioConfig, request_timeout: Duration) -> Result<Self, ProviderError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(ProviderError::Config(
                "account SID and auth token are required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    fn incoming_number_url(&self, number_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/IncomingPhoneNumbers/{}.json",
            self.base_url.trim_end_matches('/'),
            self.config.account_sid,
            number_sid
        )
    }
}

#[async_trait]
impl TelephonyProvider for TwilioProvider {
    async fn deprovision(&self, provider_reference_id: &str) -> Result<(), ProviderError> {
        let url = self.incoming_number_url(provider_reference_id);

        let response = self
            .http_client
            .delete(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!("Twilio released number {provider_reference_id}");
            return Ok(());
        }

        // Already gone on Twilio's side: the lease no longer bills.
        if status == StatusCode::NOT_FOUND {
            warn!("Twilio has no number {provider_reference_id}; treating as released");
            return Ok(());
        }

        let error: TwilioApiError = response.json().await.unwrap_or(TwilioApiError {
            code: None,
            message: None,
        });
        Err(ProviderError::Api {
            status: status.as_u16(),
            code: error.code,
            message: error
                .message
                .unwrap_or_else(|| "failed to release number".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_incoming_number_resource_url() {
        let provider = TwilioProvider::new(
            TwilioConfig {
                account_sid: "AC123".into(),
                auth_token: "secret".into(),
                base_url: Some("http://localhost:9000/".into()),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            provider.incoming_number_url("PN456"),
            "http://localhost:9000/Accounts/AC123/IncomingPhoneNumbers/PN456.json"
        );
    }

    #[test]
    fn rejects_missing_credentials() {
        let result = TwilioProvider::new(
            TwilioConfig {
                account_sid: String::new(),
                auth_token: "secret".into(),
                base_url: None,
            },
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
