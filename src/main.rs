use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use env_logger::Env;
use log::info;
use phone_lifecycle::{
    provider::{TwilioConfig, TwilioProvider},
    LifecycleService, SettingsStore, SweeperController,
};

const DEFAULT_DB_PATH: &str = "phone-lifecycle.sqlite3";
const DEFAULT_SETTINGS_PATH: &str = "phone-lifecycle.settings.json";

fn path_from_env(key: &str, default: &str) -> PathBuf {
    env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info unless RUST_LOG says otherwise.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("phone-lifecycle sweeper starting up...");

    let settings_store = SettingsStore::new(path_from_env(
        "PHONE_LIFECYCLE_SETTINGS",
        DEFAULT_SETTINGS_PATH,
    ))?;
    let settings = settings_store.current();

    let twilio = TwilioConfig {
        account_sid: env::var("TWILIO_ACCOUNT_SID").context("TWILIO_ACCOUNT_SID is not set")?,
        auth_token: env::var("TWILIO_AUTH_TOKEN").context("TWILIO_AUTH_TOKEN is not set")?,
        base_url: None,
    };
    let provider = TwilioProvider::new(twilio, settings.reclamation.provider_timeout())
        .context("failed to build Twilio client")?;

    let service = LifecycleService::open(
        path_from_env("PHONE_LIFECYCLE_DB", DEFAULT_DB_PATH),
        settings,
        Arc::new(provider),
    )
    .await?;

    let mut sweeper = SweeperController::new();
    service.start_sweeper(&mut sweeper)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    sweeper.stop().await
}
