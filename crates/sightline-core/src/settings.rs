//! Backend-managed settings.
//!
//! The backend can override a subset of the local configuration at runtime.
//! Each override set carries a revision; [`EffectiveSettings`] layers the
//! latest accepted revision over the locally loaded [`SightlineConfig`] and
//! persists it so the override survives restarts.
//!
//! A fetch yields one of three answers (see [`SettingsUpdate`]): nothing new,
//! a new revision, or "no overrides", which reverts to the local config.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::SightlineConfig;
use crate::error::{Result, SightlineError};
use crate::storage::{save_json, DurableStore};

/// Durable store key of the accepted remote settings.
pub const SETTINGS_KEY: &str = "settings.remote";

/// Fields the backend may override. Absent fields keep the local value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({ "background_scan_ms": 30000, "background_wait_ms": 90000, "max_retries": 5 }))]
pub struct SettingsPatch {
    /// Radio-on window in the foreground.
    pub foreground_scan_ms: Option<u64>,
    /// Radio-off window in the foreground.
    pub foreground_wait_ms: Option<u64>,
    /// Radio-on window in the background.
    pub background_scan_ms: Option<u64>,
    /// Radio-off window in the background.
    pub background_wait_ms: Option<u64>,
    /// Exit check delay after un-pausing, foreground.
    pub foreground_exit_grace_ms: Option<u64>,
    /// Exit check delay after un-pausing, background.
    pub background_exit_grace_ms: Option<u64>,
    /// Radio-on absence before an exit.
    pub exit_timeout_ms: Option<u64>,
    /// Stop duration after which presence is cleared on start.
    pub restart_timeout_ms: Option<u64>,
    /// RSSI floor.
    pub min_rssi: Option<i16>,
    /// Distance ceiling in metres.
    pub max_distance_m: Option<f64>,
    /// Resolution retries.
    pub max_retries: Option<u32>,
    /// Delay between resolution attempts.
    pub retry_delay_ms: Option<u64>,
    /// Layout refresh period.
    pub layout_refresh_interval_ms: Option<u64>,
    /// History upload period.
    pub upload_interval_ms: Option<u64>,
    /// Settings refresh period.
    pub settings_refresh_interval_ms: Option<u64>,
}

fn set<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl SettingsPatch {
    /// `base` with every present field overridden.
    #[must_use]
    pub fn apply(&self, base: &SightlineConfig) -> SightlineConfig {
        let mut config = base.clone();
        let s = &mut config.scanner;
        set(&mut s.foreground_scan_ms, self.foreground_scan_ms);
        set(&mut s.foreground_wait_ms, self.foreground_wait_ms);
        set(&mut s.background_scan_ms, self.background_scan_ms);
        set(&mut s.background_wait_ms, self.background_wait_ms);
        set(&mut s.foreground_exit_grace_ms, self.foreground_exit_grace_ms);
        set(&mut s.background_exit_grace_ms, self.background_exit_grace_ms);
        set(&mut s.exit_timeout_ms, self.exit_timeout_ms);
        set(&mut s.restart_timeout_ms, self.restart_timeout_ms);
        if self.min_rssi.is_some() {
            s.min_rssi = self.min_rssi;
        }
        if self.max_distance_m.is_some() {
            s.max_distance_m = self.max_distance_m;
        }

        let r = &mut config.resolver;
        set(&mut r.max_retries, self.max_retries);
        set(&mut r.retry_delay_ms, self.retry_delay_ms);
        set(&mut r.layout_refresh_interval_ms, self.layout_refresh_interval_ms);

        set(&mut config.history.upload_interval_ms, self.upload_interval_ms);
        set(
            &mut config.backend.settings_refresh_interval_ms,
            self.settings_refresh_interval_ms,
        );
        config
    }
}

/// One revision of backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Monotonic revision assigned by the backend.
    pub revision: u64,
    /// Overrides of this revision.
    #[serde(default)]
    pub settings: SettingsPatch,
}

/// Answer of a settings fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsUpdate {
    /// The revision the client holds is current.
    Unchanged,
    /// The backend has no overrides; revert to the local configuration.
    Reset,
    /// A revision to apply.
    Changed(RemoteSettings),
}

/// Local configuration plus the accepted remote revision.
pub struct EffectiveSettings {
    base: SightlineConfig,
    remote: Option<RemoteSettings>,
    effective: SightlineConfig,
    store: Arc<dyn DurableStore>,
}

impl EffectiveSettings {
    /// Layer the persisted revision, if any and still valid, over `base`.
    #[must_use]
    pub fn open(base: SightlineConfig, store: Arc<dyn DurableStore>) -> Self {
        let persisted: Option<RemoteSettings> =
            crate::storage::load_json_or_default(store.as_ref(), SETTINGS_KEY);
        let mut settings = Self {
            effective: base.clone(),
            base,
            remote: None,
            store,
        };
        if let Some(remote) = persisted {
            let candidate = remote.settings.apply(&settings.base);
            match candidate.validate() {
                Ok(()) => {
                    debug!(revision = remote.revision, "Restored remote settings");
                    settings.effective = candidate;
                    settings.remote = Some(remote);
                }
                Err(e) => warn!(revision = remote.revision, error = %e, "Ignoring persisted remote settings"),
            }
        }
        settings
    }

    /// Configuration in force.
    #[must_use]
    pub const fn effective(&self) -> &SightlineConfig {
        &self.effective
    }

    /// Accepted revision, `None` while running on the local configuration.
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.remote.as_ref().map(|r| r.revision)
    }

    /// Overrides of the accepted revision.
    #[must_use]
    pub fn overrides(&self) -> Option<&SettingsPatch> {
        self.remote.as_ref().map(|r| &r.settings)
    }

    /// Apply a fetch result.
    ///
    /// Returns the new effective configuration when it changed, `None` when
    /// nothing needs to be pushed to the components.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ConfigValidationError`] if the revision would
    /// produce an invalid configuration; the previous settings stay in force.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<Option<SightlineConfig>> {
        match update {
            SettingsUpdate::Unchanged => Ok(None),
            SettingsUpdate::Reset => {
                if self.remote.take().is_none() {
                    return Ok(None);
                }
                if let Err(e) = self.store.delete(SETTINGS_KEY) {
                    warn!(error = %e, "Failed to delete remote settings");
                }
                self.effective = self.base.clone();
                info!("Remote settings withdrawn, using local configuration");
                Ok(Some(self.effective.clone()))
            }
            SettingsUpdate::Changed(remote) => {
                if self.revision() == Some(remote.revision) {
                    return Ok(None);
                }
                let candidate = remote.settings.apply(&self.base);
                candidate.validate().map_err(SightlineError::from)?;
                if let Err(e) = save_json(self.store.as_ref(), SETTINGS_KEY, &remote) {
                    warn!(error = %e, "Failed to persist remote settings");
                }
                info!(revision = remote.revision, "Remote settings applied");
                self.remote = Some(remote);
                self.effective = candidate;
                Ok(Some(self.effective.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn revision(revision: u64, settings: SettingsPatch) -> SettingsUpdate {
        SettingsUpdate::Changed(RemoteSettings { revision, settings })
    }

    fn shorter_cycle() -> SettingsPatch {
        SettingsPatch {
            background_scan_ms: Some(5_000),
            max_retries: Some(7),
            upload_interval_ms: Some(60_000),
            ..SettingsPatch::default()
        }
    }

    #[test]
    fn test_patch_overrides_only_present_fields() {
        let base = SightlineConfig::default();
        let config = shorter_cycle().apply(&base);

        assert_eq!(config.scanner.background_scan_ms, 5_000);
        assert_eq!(config.scanner.background_wait_ms, base.scanner.background_wait_ms);
        assert_eq!(config.resolver.max_retries, 7);
        assert_eq!(config.resolver.retry_delay_ms, base.resolver.retry_delay_ms);
        assert_eq!(config.history.upload_interval_ms, 60_000);
        assert_eq!(config.backend, base.backend);
    }

    #[test]
    fn test_patch_from_partial_json() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"min_rssi": -80, "unknown_knob": true}"#).unwrap();
        assert_eq!(patch.min_rssi, Some(-80));
        assert!(patch.exit_timeout_ms.is_none());
    }

    #[test]
    fn test_same_revision_is_applied_once() {
        let mut settings =
            EffectiveSettings::open(SightlineConfig::default(), Arc::new(MemoryStore::new()));
        assert_eq!(settings.revision(), None);

        let applied = settings.apply(revision(3, shorter_cycle())).unwrap();
        assert_eq!(applied.unwrap().scanner.background_scan_ms, 5_000);
        assert_eq!(settings.revision(), Some(3));

        assert!(settings.apply(revision(3, shorter_cycle())).unwrap().is_none());
        assert!(settings.apply(SettingsUpdate::Unchanged).unwrap().is_none());
    }

    #[test]
    fn test_reset_reverts_to_local_config() {
        let store = Arc::new(MemoryStore::new());
        let base = SightlineConfig::default();
        let mut settings = EffectiveSettings::open(base.clone(), store.clone());
        settings.apply(revision(1, shorter_cycle())).unwrap();

        let reverted = settings.apply(SettingsUpdate::Reset).unwrap();
        assert_eq!(reverted.as_ref(), Some(&base));
        assert_eq!(settings.revision(), None);
        assert!(store.load(SETTINGS_KEY).unwrap().is_none());

        assert!(settings.apply(SettingsUpdate::Reset).unwrap().is_none());
    }

    #[test]
    fn test_invalid_revision_keeps_previous() {
        let mut settings =
            EffectiveSettings::open(SightlineConfig::default(), Arc::new(MemoryStore::new()));
        settings.apply(revision(1, shorter_cycle())).unwrap();

        let broken = SettingsPatch {
            exit_timeout_ms: Some(0),
            ..SettingsPatch::default()
        };
        let err = settings.apply(revision(2, broken)).unwrap_err();
        assert!(matches!(err, SightlineError::ConfigValidationError(_)));
        assert_eq!(settings.revision(), Some(1));
        assert_eq!(settings.effective().scanner.background_scan_ms, 5_000);
    }

    #[test]
    fn test_revision_survives_reopen() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let mut settings = EffectiveSettings::open(SightlineConfig::default(), Arc::clone(&store));
        settings.apply(revision(4, shorter_cycle())).unwrap();

        let reopened = EffectiveSettings::open(SightlineConfig::default(), store);
        assert_eq!(reopened.revision(), Some(4));
        assert_eq!(reopened.effective().resolver.max_retries, 7);
        assert_eq!(reopened.overrides(), Some(&shorter_cycle()));
    }
}
