//! Shared pipeline types.
//!
//! - [`ScanEvent`] - an entry or exit produced by the scanner
//! - [`ActionDescriptor`] - a campaign action as returned by the backend
//! - [`ResolvedAction`] - a descriptor bound to the event that triggered it
//! - [`ConversionRecord`], [`ActionRecord`] - history entries awaiting upload

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::beacon::BeaconId;
use crate::clock::Millis;

/// Signal details of the sighting that produced an entry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    /// Observed signal strength in dBm.
    pub rssi: i16,
    /// Calibrated signal strength at one metre, as advertised.
    pub calibrated_rssi: i16,
    /// Hardware address of the advertiser, if known.
    pub address: Option<String>,
}

/// An entry or exit detected by the scanner. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Beacon the event refers to.
    pub beacon_id: BeaconId,
    /// Detection time.
    pub timestamp: Millis,
    /// `true` for entry, `false` for exit.
    pub is_entry: bool,
    /// Location hint at detection time.
    pub location_hint: Option<String>,
    /// Dwell token shared by the entry and the matching exit.
    pub pairing_id: Uuid,
    /// Present on entry events only.
    pub signal: Option<SignalMetadata>,
}

/// Which direction of a dwell an action reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Fires on entry only.
    Entry,
    /// Fires on exit only.
    Exit,
    /// Fires on both.
    EntryExit,
}

impl Trigger {
    /// Bit value used in presence event masks.
    pub const ENTRY_MASK: u8 = 1;
    /// Bit value used in presence event masks.
    pub const EXIT_MASK: u8 = 2;

    /// Bitmask of the directions this trigger covers.
    #[must_use]
    pub const fn mask(self) -> u8 {
        match self {
            Self::Entry => Self::ENTRY_MASK,
            Self::Exit => Self::EXIT_MASK,
            Self::EntryExit => Self::ENTRY_MASK | Self::EXIT_MASK,
        }
    }

    /// Whether an event with the given direction matches.
    #[must_use]
    pub const fn matches(self, is_entry: bool) -> bool {
        let bit = if is_entry {
            Self::ENTRY_MASK
        } else {
            Self::EXIT_MASK
        };
        self.mask() & bit != 0
    }
}

/// What an action does once delivered. Presentation is up to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// A plain notification.
    Message {
        /// Notification title.
        subject: Option<String>,
        /// Notification text.
        body: Option<String>,
    },
    /// A notification that opens a URI in the host application.
    Uri {
        /// Notification title.
        subject: Option<String>,
        /// Notification text.
        body: Option<String>,
        /// Target URI.
        uri: String,
    },
    /// A notification that opens a website.
    Website {
        /// Notification title.
        subject: Option<String>,
        /// Notification text.
        body: Option<String>,
        /// Target URL.
        url: String,
    },
    /// Content rendered inside the host application.
    InApp {
        /// Title.
        subject: Option<String>,
        /// Text.
        body: Option<String>,
        /// Content URL.
        url: String,
    },
    /// Recorded in history, never shown.
    Silent,
}

impl ActionKind {
    /// Short discriminant name, as serialized.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Uri { .. } => "uri",
            Self::Website { .. } => "website",
            Self::InApp { .. } => "in_app",
            Self::Silent => "silent",
        }
    }

    /// Whether the action is ever handed to the host.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}

/// A campaign action as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Logical action identity.
    pub uuid: Uuid,
    /// Kind and kind-specific fields.
    pub content: ActionKind,
    /// Direction(s) the action reacts to.
    pub trigger: Trigger,
    /// Delivery delay relative to resolution.
    #[serde(default)]
    pub delay_ms: u64,
    /// Absolute delivery time; takes precedence over `delay_ms`.
    #[serde(default)]
    pub deliver_at: Option<Millis>,
    /// Minimum re-presentation interval; `0` disables the window.
    #[serde(default)]
    pub suppression_window_ms: u64,
    /// Deliver at most once ever.
    #[serde(default)]
    pub send_only_once: bool,
    /// Flush history as soon as the action is resolved.
    #[serde(default)]
    pub report_immediately: bool,
    /// Opaque host payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// A descriptor bound to the event that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAction {
    /// Logical action identity.
    pub uuid: Uuid,
    /// Locally generated identity of this particular delivery.
    pub instance_uuid: Uuid,
    /// Kind and kind-specific fields.
    pub content: ActionKind,
    /// Delivery delay relative to resolution.
    pub delay_ms: u64,
    /// Absolute delivery time.
    pub deliver_at: Option<Millis>,
    /// Minimum re-presentation interval; `0` disables the window.
    pub suppression_window_ms: u64,
    /// Deliver at most once ever.
    pub send_only_once: bool,
    /// Flush history as soon as the action is resolved.
    pub report_immediately: bool,
    /// Opaque host payload.
    pub payload: Option<serde_json::Value>,
    /// Beacon whose event produced the action.
    pub beacon_id: BeaconId,
    /// Direction of the producing event.
    pub is_entry: bool,
    /// Dwell token of the producing event.
    pub pairing_id: Uuid,
    /// When the backend answered.
    pub resolved_at: Millis,
}

impl ResolvedAction {
    /// Bind `descriptor` to `event` with a fresh instance identity.
    #[must_use]
    pub fn from_descriptor(descriptor: ActionDescriptor, event: &ScanEvent, now: Millis) -> Self {
        Self {
            uuid: descriptor.uuid,
            instance_uuid: Uuid::new_v4(),
            content: descriptor.content,
            delay_ms: descriptor.delay_ms,
            deliver_at: descriptor.deliver_at,
            suppression_window_ms: descriptor.suppression_window_ms,
            send_only_once: descriptor.send_only_once,
            report_immediately: descriptor.report_immediately,
            payload: descriptor.payload,
            beacon_id: event.beacon_id.clone(),
            is_entry: event.is_entry,
            pairing_id: event.pairing_id,
            resolved_at: now,
        }
    }
}

/// Outcome of presenting an action, ranked for the monotonic upgrade rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    /// The host has notifications turned off.
    NotificationDisabled,
    /// Handed to the host but not yet shown.
    Suppressed,
    /// Shown to the user.
    Shown,
    /// The user acted on it.
    Success,
}

/// Conversion status of one delivered action instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// Instance the status refers to.
    pub action_instance_uuid: Uuid,
    /// Current status.
    pub kind: ConversionKind,
    /// When the status was reported.
    pub timestamp: Millis,
    /// Location hint at report time.
    pub location_hint: Option<String>,
}

/// History entry for a presented action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Logical action identity.
    pub action_uuid: Uuid,
    /// Instance identity.
    pub instance_uuid: Uuid,
    /// Beacon that triggered it.
    pub beacon_id: BeaconId,
    /// Direction of the triggering event.
    pub is_entry: bool,
    /// Dwell token of the triggering event.
    pub pairing_id: Uuid,
    /// Presentation time.
    pub timestamp: Millis,
    /// Location hint at presentation time.
    pub location_hint: Option<String>,
}

/// One upload batch of history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryBatch {
    /// Scan events.
    pub scans: Vec<ScanEvent>,
    /// Presented actions.
    pub actions: Vec<ActionRecord>,
    /// Conversion statuses.
    pub conversions: Vec<ConversionRecord>,
}

impl HistoryBatch {
    /// Total records across all three lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scans.len() + self.actions.len() + self.conversions.len()
    }

    /// Whether there is nothing to upload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
