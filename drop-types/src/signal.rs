//! Signaling envelopes exchanged with the relay.
//!
//! Every envelope is one JSON text frame on the relay connection, tagged by
//! its `type` field:
//!
//! | type | fields | direction |
//! |---|---|---|
//! | register | - | device → relay |
//! | registered | id | relay → device |
//! | connect | id | device → relay |
//! | connected / disconnected | - | relay → both devices |
//! | disconnect | - | device → relay |
//! | offer / answer | payload (session description) | device ↔ device |
//! | candidate | payload (ice candidate) | device ↔ device |
//! | error | error | relay → device |

use serde::{Deserialize, Serialize};

use crate::{RendezvousId, WireError};

/// Strictly typed signaling envelope, as seen by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Ask the relay for a rendezvous identifier
    Register,
    /// Relay assigned a rendezvous identifier
    Registered {
        /// The assigned identifier
        id: RendezvousId,
    },
    /// Ask the relay to pair this session with `id`
    Connect {
        /// Identifier of the remote session (empty when omitted)
        #[serde(default)]
        id: RendezvousId,
    },
    /// Relay paired the two sessions; negotiation may begin
    Connected,
    /// Relay reports the pairing ended
    Disconnected,
    /// Device voluntarily ends its logical session
    Disconnect,
    /// Session description offer, relayed to the paired device
    Offer {
        /// The offer
        payload: SessionDescription,
    },
    /// Session description answer, relayed to the paired device
    Answer {
        /// The answer
        payload: SessionDescription,
    },
    /// ICE candidate, relayed to the paired device
    Candidate {
        /// The candidate
        payload: IceCandidate,
    },
    /// Relay-side error report
    Error {
        /// Human-readable reason
        error: String,
    },
}

impl SignalMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }

    /// Convenience constructor for relay error replies.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    /// Short name of the envelope type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Registered { .. } => "registered",
            Self::Connect { .. } => "connect",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Disconnect => "disconnect",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Error { .. } => "error",
        }
    }
}

/// Loosely typed envelope used by the relay.
///
/// The relay never interprets negotiation payloads; it forwards `payload`
/// verbatim, so it only needs the routing fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Envelope type (`register`, `offer`, ...); empty when absent
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Rendezvous identifier for `registered` / `connect`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Error reason for `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque negotiation payload for `offer` / `answer` / `candidate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl RelayEnvelope {
    /// Envelope carrying only a type.
    pub fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }
}

/// Session description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// An offer
    Offer,
    /// A provisional answer
    Pranswer,
    /// A final answer
    Answer,
    /// A rollback
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// An offer with the given SDP.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer with the given SDP.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}
