use std::time::{SystemTime, UNIX_EPOCH};

use crate::render::artifact::CompositeRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MosaicUpdated,
    Reset,
    ContributorCountChanged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MosaicUpdated => "mosaic_updated",
            Self::Reset => "reset",
            Self::ContributorCountChanged => "contributor_count_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One broadcast message. Viewers fetch pixels through `composite`; the event itself stays small.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MosaicEvent {
    /// Strictly increasing per broadcaster, starting at 1.
    pub sequence: u64,
    pub kind: EventKind,
    /// Current composite, if one has been written yet.
    pub composite: Option<CompositeRef>,
    pub contributor_count: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl MosaicEvent {
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
