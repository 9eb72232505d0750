use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::lifecycle::state::MAX_GRACE_DAYS;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierSettings {
    /// An organization with no member login for longer than this counts as inactive.
    pub inactive_org_days: i64,
    /// A disabled agent untouched for longer than this counts as abandoned.
    pub deactivated_agent_days: i64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            inactive_org_days: 14,
            deactivated_agent_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReclamationSettings {
    pub default_grace_days: u32,
    pub provider_timeout_secs: u64,
    /// Release reservations older than this are considered abandoned at startup.
    pub stale_reservation_secs: u64,
}

impl Default for ReclamationSettings {
    fn default() -> Self {
        Self {
            default_grace_days: 30,
            provider_timeout_secs: 15,
            stale_reservation_secs: 300,
        }
    }
}

impl ReclamationSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub release_reason: String,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            release_reason: "grace_period_expired".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleSettings {
    pub classifier: ClassifierSettings,
    pub reclamation: ReclamationSettings,
    pub sweeper: SweeperSettings,
}

impl LifecycleSettings {
    /// Rejects values that would make every action or sweep fail at run time.
    pub fn validate(&self) -> Result<()> {
        if self.sweeper.release_reason.trim().is_empty() {
            bail!("sweeper.release_reason must not be empty");
        }
        let grace_days = self.reclamation.default_grace_days;
        if grace_days == 0 || grace_days > MAX_GRACE_DAYS {
            bail!("reclamation.default_grace_days must be between 1 and {MAX_GRACE_DAYS}");
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<LifecycleSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings in {} ({err}); using defaults",
                    path.display()
                );
                LifecycleSettings::default()
            })
        } else {
            LifecycleSettings::default()
        };
        data.validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> LifecycleSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: LifecycleSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &LifecycleSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.current();
        assert_eq!(settings.classifier.inactive_org_days, 14);
        assert_eq!(settings.reclamation.default_grace_days, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"sweeper": {"interval_secs": 60}}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().current();
        assert_eq!(settings.sweeper.interval_secs, 60);
        assert!(settings.sweeper.enabled);
        assert_eq!(settings.sweeper.release_reason, "grace_period_expired");
    }

    #[test]
    fn updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.current();
        settings.reclamation.default_grace_days = 45;
        store.update(settings).unwrap();

        let reloaded = SettingsStore::new(path).unwrap().current();
        assert_eq!(reloaded.reclamation.default_grace_days, 45);
    }

    #[test]
    fn blank_sweeper_reason_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"sweeper": {"release_reason": "  "}}"#).unwrap();

        let err = SettingsStore::new(path).err().unwrap();
        assert!(format!("{err:#}").contains("release_reason"));
    }

    #[test]
    fn invalid_update_keeps_previous_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.current();
        settings.sweeper.release_reason = String::new();
        assert!(store.update(settings).is_err());
        assert_eq!(store.current().sweeper.release_reason, "grace_period_expired");
        assert!(!path.exists());

        let mut settings = store.current();
        settings.reclamation.default_grace_days = 10_000;
        assert!(store.update(settings).is_err());
    }
}
