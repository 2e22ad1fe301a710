//! Control messages carried as text frames on the peer channel.
//!
//! Binary frames between a `file-meta` and its `file-end` carry the raw
//! chunk bytes of that file; see [`Frame`](crate::Frame).

use serde::{Deserialize, Serialize};

use crate::{FileId, WireError};

/// Control-plane messages of the transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces a new file (file-begin)
    FileMeta(FileMeta),
    /// All chunks of `id` have been sent
    FileEnd {
        /// The file being closed
        id: FileId,
    },
    /// The receiver materialized a file
    FileReceived {
        /// The file that completed (absent from legacy peers)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<FileId>,
    },
}

impl ControlMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }
}

/// Metadata announced for a file before its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Identifier echoed by `file-end` / `file-received`
    pub id: FileId,
    /// Original file name
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// MIME type
    pub mime: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_meta_is_tagged() {
        let id = FileId::new();
        let msg = ControlMessage::FileMeta(FileMeta {
            id,
            name: "photo.jpg".into(),
            size: 40000,
            mime: "image/jpeg".into(),
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "file-meta");
        assert_eq!(json["name"], "photo.jpg");
        assert_eq!(json["size"], 40000);
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn file_end_is_tagged() {
        let id = FileId::new();
        let json = ControlMessage::FileEnd { id }.to_json().unwrap();
        assert_eq!(json, format!(r#"{{"type":"file-end","id":"{}"}}"#, id));
    }

    #[test]
    fn file_received_echoes_id() {
        let id = FileId::new();
        let msg = ControlMessage::from_json(&format!(
            r#"{{"type":"file-received","id":"{}"}}"#,
            id
        ))
        .unwrap();
        assert_eq!(msg, ControlMessage::FileReceived { id: Some(id) });
    }

    #[test]
    fn legacy_file_received_without_id() {
        let msg = ControlMessage::from_json(r#"{"type":"file-received"}"#).unwrap();
        assert_eq!(msg, ControlMessage::FileReceived { id: None });
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"file-received"}"#);
    }

    #[test]
    fn unknown_control_type_is_rejected() {
        assert!(ControlMessage::from_json(r#"{"type":"EOF"}"#).is_err());
    }
}
