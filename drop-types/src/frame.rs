//! Peer-channel frames.
//!
//! The peer channel is message-oriented: each frame is delivered whole, so
//! binary chunk frames carry no length header.

use crate::{ControlMessage, WireError};

/// One message on the peer channel.
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON control message
    Text(String),
    /// Raw chunk bytes
    Binary(Vec<u8>),
}

impl Frame {
    /// Encode a control message as a text frame.
    pub fn control(message: &ControlMessage) -> Result<Self, WireError> {
        message.to_json().map(Frame::Text)
    }

    /// Decode a text frame as a control message.
    pub fn as_control(&self) -> Result<ControlMessage, WireError> {
        match self {
            Frame::Text(text) => ControlMessage::from_json(text),
            Frame::Binary(_) => Err(WireError::UnexpectedFrame("binary")),
        }
    }

    /// Number of payload bytes this frame occupies on the channel.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    /// True for a frame with no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for binary chunk frames.
    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Frame::Binary(bytes) => write!(f, "Binary([{} bytes])", bytes.len()),
        }
    }
}
