//! # sightline-core
//!
//! Core engine of the sightline beacon presence pipeline.
//!
//! This crate provides:
//! - A duty-cycled scanner that turns raw beacon sightings into entry and exit events
//! - A resolver that asks the backend which campaign actions an event triggers
//! - A history ledger with suppression rules and periodic upload
//! - Delayed delivery of resolved actions to the host application
//! - Backend-managed settings applied to the running pipeline
//!
//! ## Architecture
//!
//! - [`scanner`] - duty cycle state machine and presence tracking
//! - [`actor`] - tokio task driving the scanner, plus its handle
//! - [`radio`] - platform radio abstraction and a channel-fed implementation
//! - [`presence`] - persisted map of beacons currently in range
//! - [`resolver`] - per-beacon ordered resolution with retries
//! - [`transport`] - backend transport trait and its HTTP implementation
//! - [`history`] - history buffers, suppression and uploads
//! - [`delivery`] - persisted queue of delayed deliveries
//! - [`settings`] - revisioned backend overrides of the local configuration
//! - [`orchestrator`] - wires every component into one pipeline
//! - [`config`], [`storage`], [`error`] - configuration, durable storage and errors

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod actor;
pub mod beacon;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod history;
pub mod listeners;
pub mod location;
pub mod orchestrator;
pub mod presence;
pub mod radio;
pub mod resolver;
pub mod scanner;
pub mod settings;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use actor::{spawn_scanner, ScannerHandle};
pub use beacon::BeaconId;
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::{
    default_config_path, BackendConfig, ConfigError, ConfigResult, HistoryConfig, LoggingConfig,
    ResolverConfig, ScannerConfig, SightlineConfig, StorageConfig,
};
pub use delivery::{DeliveryScheduler, DeliverySink, PendingDelivery};
pub use error::{Result, SightlineError};
pub use history::{HistoryCounts, HistoryLedger, HistoryPublisher};
pub use listeners::{ResolverListener, RssiListener, ScannerListener};
pub use location::{FixedLocation, LocationSource, NoLocation};
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use presence::PresenceEntry;
pub use radio::{BridgeFeed, BridgeRadio, Radio, RadioError, Sighting};
pub use resolver::{LayoutFilter, Resolver};
pub use scanner::ScannerState;
pub use settings::{EffectiveSettings, RemoteSettings, SettingsPatch, SettingsUpdate};
pub use storage::{default_data_dir, DurableStore, FileStore, MemoryStore};
#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;
pub use transport::{Transport, TransportError, TransportResult};
pub use types::{
    ActionDescriptor, ActionKind, ActionRecord, ConversionKind, ConversionRecord, HistoryBatch,
    ResolvedAction, ScanEvent, SignalMetadata, Trigger,
};
