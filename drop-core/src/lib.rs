//! # drop-core
//!
//! Pure logic for PeerDrop (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of a transfer
//! session without any network, timer or task, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`negotiation`] turns signaling/peer events into actions to execute
//! - [`chunker`] slices a file into chunk frames
//! - [`batch`] counts acknowledgements for the batch in flight
//! - [`reassembly`] rebuilds incoming files from ordered frames
//!
//! The actual I/O (relay socket, peer channel) is performed by `drop-client`,
//! which interprets the actions and results produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod chunker;
pub mod files;
pub mod negotiation;
pub mod reassembly;
pub mod status;

pub use batch::{BatchError, BatchProgress, BatchSlot, OutgoingBatch};
pub use chunker::{chunk_count, Chunker};
pub use files::{OutgoingFile, ReceivedFile, SharedFiles};
pub use negotiation::{
    NegotiationAction, NegotiationEvent, NegotiationNotice, NegotiationState, Role,
};
pub use reassembly::{ReassemblyError, ReassemblyTable};
pub use status::ConnectionStatus;
