//! # peerdrop-relay
//!
//! Signaling relay for PeerDrop.
//!
//! The relay introduces two devices to each other and carries their
//! connection negotiation until the direct peer channel is up. It never
//! sees file data.
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                    ┌── Device B
//!            │   WebSocket /ws    │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       peerdrop-relay       │
//!        │  waiting ids · pairings    │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! JSON text frames tagged by `type`:
//! - register → registered (rendezvous id issued)
//! - connect → connected (sent to both devices)
//! - offer / answer / candidate (forwarded to the paired device)
//! - disconnect → disconnected (sent to the former peer)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{ProtocolError, RelayError};
pub use server::SignalRelay;
