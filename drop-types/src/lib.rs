//! # drop-types
//!
//! Wire format types for PeerDrop.
//!
//! This crate provides the foundational types shared by every PeerDrop crate:
//! - [`RendezvousId`], [`FileId`] - Identity types
//! - [`SignalMessage`], [`RelayEnvelope`] - Relay (signaling) envelopes
//! - [`ControlMessage`], [`Frame`] - Peer-channel control plane and frames
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod control;
mod error;
mod frame;
mod ids;
mod signal;

pub use control::{ControlMessage, FileMeta};
pub use error::WireError;
pub use frame::Frame;
pub use ids::{FileId, RendezvousId};
pub use signal::{IceCandidate, RelayEnvelope, SdpType, SessionDescription, SignalMessage};

/// Size of one binary chunk frame (16 KiB).
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Buffered-bytes threshold at which chunk sending suspends (10 chunks).
pub const HIGH_WATER_MARK: usize = 10 * CHUNK_SIZE;

/// Buffered-bytes threshold at which suspended chunk sending resumes.
pub const LOW_WATER_MARK: usize = 4 * CHUNK_SIZE;

/// Label of the single data channel created by the initiator.
pub const DATA_CHANNEL_LABEL: &str = "file";

/// Public STUN server used when no ICE servers are configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Relay endpoint used when none is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3001/ws";
