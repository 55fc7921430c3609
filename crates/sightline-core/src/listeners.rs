//! Listener traits and a small thread-safe listener registry.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::beacon::BeaconId;
use crate::error::SightlineError;
use crate::types::{ResolvedAction, ScanEvent};

/// Receives entry and exit events. Called on the scanner's context; must not block.
pub trait ScannerListener: Send + Sync {
    /// An entry or exit was detected.
    fn on_scan_event(&self, event: &ScanEvent);
}

/// Receives signal updates for beacons that are already present.
pub trait RssiListener: Send + Sync {
    /// A present beacon was sighted again.
    fn on_rssi_updated(&self, beacon: &BeaconId, rssi: i16);
}

/// Receives resolution outcomes. Exactly one callback fires per resolved event.
pub trait ResolverListener: Send + Sync {
    /// The backend answered; `actions` holds those matching the event direction.
    fn on_resolved(&self, event: &ScanEvent, actions: &[ResolvedAction]);

    /// Resolution was abandoned.
    fn on_resolution_failed(&self, event: &ScanEvent, error: &SightlineError);
}

/// Registry of listeners guarded by a monitor.
///
/// Iteration works on a snapshot, so a listener may add or remove listeners
/// from inside its callback.
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Arc<L>>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `listener`. Adding the same listener twice is a no-op.
    pub fn add(&self, listener: Arc<L>) {
        let mut listeners = self.guard();
        if !listeners.iter().any(|l| same(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregister `listener`. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.guard();
        let before = listeners.len();
        listeners.retain(|l| !same(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Call `f` for every listener registered at the time of the call.
    pub fn for_each(&self, mut f: impl FnMut(&L)) {
        let snapshot: Vec<Arc<L>> = self.guard().clone();
        for listener in &snapshot {
            f(listener.as_ref());
        }
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
