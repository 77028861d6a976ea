//! Socket wire format: JSON text frames shaped `{"type": ..., "data": ...}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server greeting sent after the handshake
pub const CONNECTED: &str = "CONNECTED";
/// Server acknowledgement of a saved entry
pub const ENTRY_SAVED: &str = "ENTRY_SAVED";
/// Server reply carrying the entry list
pub const ENTRIES_LIST: &str = "ENTRIES_LIST";
/// Server-side failure
pub const ERROR: &str = "ERROR";
/// Client request to save an entry
pub const SAVE_ENTRY: &str = "SAVE_ENTRY";
/// Client request for the entry list
pub const GET_ENTRIES: &str = "GET_ENTRIES";

/// A socket message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type; unknown types are passed through untouched
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Creates an envelope
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// `SAVE_ENTRY` carrying the entry
    pub fn save_entry(entry: Value) -> Self {
        Self::new(SAVE_ENTRY, entry)
    }

    /// `GET_ENTRIES` with no payload
    pub fn get_entries() -> Self {
        Self::new(GET_ENTRIES, Value::Null)
    }

    /// Parses a text frame
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Serializes to a single-line text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// True for the given type
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}
