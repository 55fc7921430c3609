//! Beacon identifiers.
//!
//! An iBeacon is identified by 20 bytes: a 16-byte proximity UUID followed by
//! big-endian `major` and `minor` values. Geofences reuse the same pipeline
//! through a string surrogate.
//!
//! Accepted textual forms:
//! - `f7826da6-4fa2-4e98-8024-bc5b71e0893e:100:5` (traditional)
//! - `f7826da64fa24e988024bc5b71e0893e00640005` (40 hex characters)
//! - `geofence:<id>`

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Result, SightlineError};

static HEX_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{40}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

const GEOFENCE_PREFIX: &str = "geofence:";

/// Identity of a sighted beacon. Equality and hashing are by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BeaconId {
    /// UUID + major + minor, 20 bytes.
    IBeacon([u8; 20]),
    /// Geofence-derived surrogate.
    Geofence(String),
}

impl BeaconId {
    /// Build an iBeacon identifier from its parts.
    #[must_use]
    pub fn new(proximity_uuid: Uuid, major: u16, minor: u16) -> Self {
        let mut bytes = [0u8; 20];
        bytes[..16].copy_from_slice(proximity_uuid.as_bytes());
        bytes[16..18].copy_from_slice(&major.to_be_bytes());
        bytes[18..].copy_from_slice(&minor.to_be_bytes());
        Self::IBeacon(bytes)
    }

    /// Build a geofence surrogate identifier.
    #[must_use]
    pub fn geofence(id: impl Into<String>) -> Self {
        Self::Geofence(id.into())
    }

    /// Parse the 40-character hex form.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::InvalidBeaconId`] if `hex` is not exactly 40 hex digits.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if !HEX_FORM.is_match(hex) {
            return Err(SightlineError::InvalidBeaconId(hex.to_string()));
        }
        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| SightlineError::InvalidBeaconId(hex.to_string()))?;
        }
        Ok(Self::IBeacon(bytes))
    }

    /// Proximity UUID, or `None` for geofences.
    #[must_use]
    pub fn proximity_uuid(&self) -> Option<Uuid> {
        match self {
            Self::IBeacon(bytes) => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&bytes[..16]);
                Some(Uuid::from_bytes(raw))
            }
            Self::Geofence(_) => None,
        }
    }

    /// Major value, or `None` for geofences.
    #[must_use]
    pub const fn major(&self) -> Option<u16> {
        match self {
            Self::IBeacon(bytes) => Some(u16::from_be_bytes([bytes[16], bytes[17]])),
            Self::Geofence(_) => None,
        }
    }

    /// Minor value, or `None` for geofences.
    #[must_use]
    pub const fn minor(&self) -> Option<u16> {
        match self {
            Self::IBeacon(bytes) => Some(u16::from_be_bytes([bytes[18], bytes[19]])),
            Self::Geofence(_) => None,
        }
    }

    /// Proximity UUID as lowercase hex without dashes, the form the layout uses.
    #[must_use]
    pub fn normalized_uuid(&self) -> Option<String> {
        self.proximity_uuid()
            .map(|uuid| uuid.simple().to_string())
    }

    /// Backend identifier: normalized UUID followed by zero-padded major and minor.
    #[must_use]
    pub fn pid(&self) -> String {
        match self {
            Self::IBeacon(_) => format!(
                "{}{:05}{:05}",
                self.normalized_uuid().unwrap_or_default(),
                self.major().unwrap_or_default(),
                self.minor().unwrap_or_default()
            ),
            Self::Geofence(id) => id.clone(),
        }
    }

    /// Raw 40-character hex form, or `None` for geofences.
    #[must_use]
    pub fn to_hex(&self) -> Option<String> {
        match self {
            Self::IBeacon(bytes) => Some(bytes.iter().map(|b| format!("{b:02x}")).collect()),
            Self::Geofence(_) => None,
        }
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IBeacon(_) => write!(
                f,
                "{}:{}:{}",
                self.proximity_uuid().unwrap_or_default().hyphenated(),
                self.major().unwrap_or_default(),
                self.minor().unwrap_or_default()
            ),
            Self::Geofence(id) => write!(f, "{GEOFENCE_PREFIX}{id}"),
        }
    }
}

impl FromStr for BeaconId {
    type Err = SightlineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(id) = s.strip_prefix(GEOFENCE_PREFIX) {
            if id.is_empty() {
                return Err(SightlineError::InvalidBeaconId(s.to_string()));
            }
            return Ok(Self::geofence(id));
        }
        if HEX_FORM.is_match(s) {
            return Self::from_hex(s);
        }

        let invalid = || SightlineError::InvalidBeaconId(s.to_string());
        let mut parts = s.split(':');
        let (Some(uuid), Some(major), Some(minor), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let uuid = Uuid::parse_str(uuid).map_err(|_| invalid())?;
        let major = major.parse::<u16>().map_err(|_| invalid())?;
        let minor = minor.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(uuid, major, minor))
    }
}

impl Serialize for BeaconId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BeaconId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
