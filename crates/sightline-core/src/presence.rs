//! Persisted presence state.
//!
//! The [`PresenceLedger`] maps each currently present beacon to the moment it
//! was last sighted and the dwell token issued at entry. It is written through
//! to the durable store after every mutation so a restarted process still knows
//! which beacons are present and can correlate their eventual exits.
//!
//! Only the scanner mutates the ledger; other components read snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::beacon::BeaconId;
use crate::clock::Millis;
use crate::storage::{load_json_or_default, save_json, DurableStore};

/// Durable store key of the ledger.
pub const PRESENCE_KEY: &str = "presence.ledger";

/// Last-seen state of one present beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Beacon identity.
    pub beacon_id: BeaconId,
    /// Last sighting.
    pub last_seen_at: Millis,
    /// Directions already emitted for this dwell.
    pub event_mask: u8,
    /// Dwell token issued at entry.
    pub pairing_id: Uuid,
    /// Radio-off time since the last sighting, excluded from the exit clock.
    pub accumulated_pause_ms: Millis,
}

impl PresenceEntry {
    /// Radio-on time since the beacon was last seen.
    #[must_use]
    pub const fn absence(&self, now: Millis) -> Millis {
        now.saturating_sub(self.last_seen_at)
            .saturating_sub(self.accumulated_pause_ms)
    }
}

/// Presence map with write-through persistence.
pub struct PresenceLedger {
    entries: HashMap<BeaconId, PresenceEntry>,
    store: Arc<dyn DurableStore>,
}

/// Shared handle to the ledger.
pub type SharedLedger = Arc<Mutex<PresenceLedger>>;

/// Lock the shared ledger, recovering from poisoning.
pub fn lock_ledger(ledger: &SharedLedger) -> MutexGuard<'_, PresenceLedger> {
    match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PresenceLedger {
    /// Create a ledger, restoring persisted entries when `restore` is set.
    #[must_use]
    pub fn open(store: Arc<dyn DurableStore>, restore: bool) -> Self {
        let entries = if restore {
            let stored: Vec<PresenceEntry> = load_json_or_default(store.as_ref(), PRESENCE_KEY);
            stored
                .into_iter()
                .map(|entry| (entry.beacon_id.clone(), entry))
                .collect()
        } else {
            HashMap::new()
        };
        Self { entries, store }
    }

    /// Entry for `beacon`, if present.
    #[must_use]
    pub fn get(&self, beacon: &BeaconId) -> Option<&PresenceEntry> {
        self.entries.get(beacon)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: PresenceEntry) {
        self.entries.insert(entry.beacon_id.clone(), entry);
        self.persist();
    }

    /// Mark `beacon` as seen at `now`, resetting its pause accounting.
    ///
    /// Returns `false` if the beacon is not present.
    pub fn refresh(&mut self, beacon: &BeaconId, now: Millis) -> bool {
        let Some(entry) = self.entries.get_mut(beacon) else {
            return false;
        };
        entry.last_seen_at = now;
        entry.accumulated_pause_ms = 0;
        self.persist();
        true
    }

    /// Add a radio-off interval to every entry.
    pub fn add_pause_time(&mut self, pause_ms: Millis) {
        if pause_ms == 0 || self.entries.is_empty() {
            return;
        }
        for entry in self.entries.values_mut() {
            entry.accumulated_pause_ms = entry.accumulated_pause_ms.saturating_add(pause_ms);
        }
        self.persist();
    }

    /// Remove and return every entry absent for longer than `exit_timeout`.
    pub fn drain_expired(&mut self, now: Millis, exit_timeout: Millis) -> Vec<PresenceEntry> {
        let expired: Vec<BeaconId> = self
            .entries
            .values()
            .filter(|entry| entry.absence(now) > exit_timeout)
            .map(|entry| entry.beacon_id.clone())
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }
        let mut removed: Vec<PresenceEntry> = expired
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect();
        removed.sort_by(|a, b| a.beacon_id.cmp(&b.beacon_id));
        self.persist();
        removed
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Number of present beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no beacon is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of all entries, ordered by beacon.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.beacon_id.cmp(&b.beacon_id));
        entries
    }

    fn persist(&self) {
        if let Err(e) = save_json(self.store.as_ref(), PRESENCE_KEY, &self.snapshot()) {
            warn!(error = %e, "Failed to persist presence ledger");
        }
    }
}

impl std::fmt::Debug for PresenceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceLedger")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
