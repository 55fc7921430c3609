//! Radio primitive contract.
//!
//! The platform radio is an external collaborator: it can start and stop a
//! scan and, while scanning, reports sightings through a callback. Decoding of
//! advertisements happens on the platform side; the pipeline only sees
//! [`Sighting`] values.
//!
//! [`BridgeRadio`] is a radio whose sightings are pushed in from elsewhere
//! through a [`BridgeFeed`], for example from a local REST endpoint or a test.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::trace;

use crate::beacon::BeaconId;

/// A single decoded advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Advertised identity.
    pub beacon_id: BeaconId,
    /// Observed signal strength in dBm.
    pub rssi: i16,
    /// Advertised calibrated strength at one metre.
    pub calibrated_rssi: i16,
    /// Hardware address of the advertiser, if known.
    pub address: Option<String>,
    /// Raw advertisement bytes.
    pub raw: Vec<u8>,
}

/// What the radio hands to the scan callback.
pub type RadioReport = Result<Sighting, i32>;

/// Scan callback. Must not block.
pub type RadioCallback = Arc<dyn Fn(RadioReport) + Send + Sync>;

/// Errors from radio start/stop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    /// A scan is already running or the adapter is temporarily busy.
    #[error("radio busy")]
    Busy,

    /// The platform reported a failure.
    #[error("platform error {code}: {message}")]
    Platform {
        /// Platform error code.
        code: i32,
        /// Platform message.
        message: String,
    },
}

/// Start/stop scan primitive.
pub trait Radio: Send {
    /// Begin scanning, delivering reports to `callback`.
    ///
    /// # Errors
    ///
    /// Returns a [`RadioError`] if the platform refuses to start.
    fn start_scan(&mut self, callback: RadioCallback) -> Result<(), RadioError>;

    /// Stop scanning.
    ///
    /// # Errors
    ///
    /// Returns a [`RadioError`] if the platform refuses to stop.
    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Whether a scan is currently running.
    fn is_scanning(&self) -> bool;
}

#[derive(Default)]
struct BridgeShared {
    scanning: AtomicBool,
    failing_starts: AtomicU32,
    callback: Mutex<Option<RadioCallback>>,
}

impl BridgeShared {
    fn callback(&self) -> Option<RadioCallback> {
        let guard = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }

    fn set_callback(&self, callback: Option<RadioCallback>) {
        let mut guard = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = callback;
    }
}

/// A radio fed by an external producer.
pub struct BridgeRadio {
    shared: Arc<BridgeShared>,
}

/// Producer side of a [`BridgeRadio`].
#[derive(Clone)]
pub struct BridgeFeed {
    shared: Arc<BridgeShared>,
}

impl BridgeRadio {
    /// Create a radio and its feed.
    #[must_use]
    pub fn new() -> (Self, BridgeFeed) {
        let shared = Arc::new(BridgeShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            BridgeFeed { shared },
        )
    }
}

impl Radio for BridgeRadio {
    fn start_scan(&mut self, callback: RadioCallback) -> Result<(), RadioError> {
        let failing = self.shared.failing_starts.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_starts.store(failing - 1, Ordering::SeqCst);
            return Err(RadioError::Busy);
        }
        self.shared.set_callback(Some(callback));
        self.shared.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.shared.set_callback(None);
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }
}

impl BridgeFeed {
    /// Forward a sighting. Returns `false` if the radio is not scanning.
    pub fn push(&self, sighting: Sighting) -> bool {
        self.deliver(Ok(sighting))
    }

    /// Forward a platform error code. Returns `false` if the radio is not scanning.
    pub fn push_error(&self, code: i32) -> bool {
        self.deliver(Err(code))
    }

    /// Whether the radio is currently scanning.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    /// Make the next `count` start requests fail with [`RadioError::Busy`].
    pub fn fail_next_starts(&self, count: u32) {
        self.shared.failing_starts.store(count, Ordering::SeqCst);
    }

    fn deliver(&self, report: RadioReport) -> bool {
        if !self.is_scanning() {
            trace!("Dropping report, radio is off");
            return false;
        }
        match self.shared.callback() {
            Some(callback) => {
                callback(report);
                true
            }
            None => false,
        }
    }
}

/// Estimated distance in metres from observed and calibrated signal strength.
///
/// Returns `None` when the calibration is zero.
#[must_use]
pub fn estimate_distance(rssi: i16, calibrated_rssi: i16) -> Option<f64> {
    if calibrated_rssi == 0 {
        return None;
    }
    let ratio = f64::from(rssi) / f64::from(calibrated_rssi);
    if ratio < 1.0 {
        Some(ratio.powi(10))
    } else {
        Some(0.899_76f64.mul_add(ratio.powf(7.709_5), 0.111))
    }
}
