//! Identity types for PeerDrop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque rendezvous identifier assigned to a session by the relay.
///
/// The other device presents it in a `connect` request to be paired.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RendezvousId(String);

impl RendezvousId {
    /// Wrap a relay-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random identifier (what the relay hands out).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty identifier (a `connect` without an id).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RendezvousId({})", self.0)
    }
}

impl From<&str> for RendezvousId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one file inside a transfer.
///
/// Generated by the sender when it announces the file and echoed in
/// `file-end` and `file-received`. UUID v4 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(uuid::Uuid);

impl FileId {
    /// Create a new random FileId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", &self.0.to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_are_unique() {
        let a = FileId::new();
        let b = FileId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn file_id_serializes_as_plain_string() {
        let id = FileId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn file_id_debug_is_short() {
        let id = FileId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("FileId("));
        assert_eq!(debug.len(), "FileId(".len() + 8 + 1);
    }

    #[test]
    fn rendezvous_id_is_transparent() {
        let id = RendezvousId::new("abc-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-123\"");
        assert_eq!(id.to_string(), "abc-123");
    }

    #[test]
    fn generated_rendezvous_ids_are_uuids() {
        let id = RendezvousId::generate();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
        assert!(!id.is_empty());
    }

    #[test]
    fn default_rendezvous_id_is_empty() {
        assert!(RendezvousId::default().is_empty());
    }
}
