//! Location hints attached to scan events and history records.

/// Supplies an opaque location hint (typically a geohash) for the current position.
pub trait LocationSource: Send + Sync {
    /// Current hint, or `None` if the position is unknown.
    fn location_hint(&self) -> Option<String>;
}

/// A location source that never knows where it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationSource for NoLocation {
    fn location_hint(&self) -> Option<String> {
        None
    }
}

/// A location source pinned to one hint, for fixed installations.
#[derive(Debug, Clone)]
pub struct FixedLocation(pub String);

impl LocationSource for FixedLocation {
    fn location_hint(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
