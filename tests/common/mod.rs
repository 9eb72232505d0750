#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use phone_lifecycle::{
    provider::{ProviderError, TelephonyProvider},
    settings::LifecycleSettings,
    signals::{AgentSignals, MemberActivity, OrganizationSignals, SubscriptionStatus},
    LifecycleService, NewPhoneNumber, PhoneNumber,
};
use tempfile::TempDir;

#[derive(Default)]
pub struct MockProvider {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    released: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyProvider for MockProvider {
    async fn deprovision(&self, provider_reference_id: &str) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                code: Some(20500),
                message: "upstream unavailable".into(),
            });
        }
        self.released
            .lock()
            .unwrap()
            .push(provider_reference_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub service: LifecycleService,
    pub provider: Arc<MockProvider>,
    _dir: TempDir,
}

/// A fresh ledger with one known organization, `org-a`.
pub async fn harness() -> Harness {
    harness_with(LifecycleSettings::default()).await
}

pub async fn harness_with(settings: LifecycleSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::default());
    let service = LifecycleService::open(
        dir.path().join("ledger.sqlite3"),
        settings,
        provider.clone(),
    )
    .await
    .unwrap();
    service
        .db
        .upsert_organization(&organization("org-a", "Acme"))
        .await
        .unwrap();
    Harness {
        service,
        provider,
        _dir: dir,
    }
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(days)
}

pub fn organization(id: &str, name: &str) -> OrganizationSignals {
    OrganizationSignals {
        id: id.into(),
        name: name.into(),
        subscription_tier: Some("business".into()),
        subscription_status: SubscriptionStatus::Active,
        subscription_canceled_at: None,
        created_at: days_ago(400),
        members: vec![MemberActivity {
            user_id: format!("{id}-owner"),
            last_login_at: Some(days_ago(1)),
        }],
    }
}

pub fn canceled_organization(id: &str, name: &str, canceled_days_ago: i64) -> OrganizationSignals {
    OrganizationSignals {
        subscription_status: SubscriptionStatus::Canceled,
        subscription_canceled_at: Some(days_ago(canceled_days_ago)),
        ..organization(id, name)
    }
}

pub fn agent(id: &str, organization_id: &str, is_active: bool, updated_days_ago: i64) -> AgentSignals {
    AgentSignals {
        id: id.into(),
        organization_id: Some(organization_id.into()),
        is_active,
        updated_at: days_ago(updated_days_ago),
    }
}

pub fn new_number(raw_number: &str, organization_id: Option<&str>) -> NewPhoneNumber {
    NewPhoneNumber {
        raw_number: raw_number.into(),
        display_number: None,
        provider_reference_id: format!("PN{}", raw_number.trim_start_matches('+')),
        organization_id: organization_id.map(str::to_string),
        agent_reference_id: None,
        monthly_cost_cents: None,
        provisioned_at: None,
        last_call_at: None,
    }
}

pub async fn register(
    service: &LifecycleService,
    raw_number: &str,
    organization_id: Option<&str>,
) -> PhoneNumber {
    service
        .executor
        .register_number(new_number(raw_number, organization_id), Some("provisioning".into()))
        .await
        .unwrap()
}
