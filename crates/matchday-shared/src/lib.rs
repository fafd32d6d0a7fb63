//! # matchday-shared
//!
//! Types shared by the store, the server and clients: participant and room
//! identifiers, the duplex-channel wire protocol, and the client-side
//! reconciliation helpers used by live and polling clients alike.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod types;

pub use error::ProtocolError;
pub use types::{resolve, ConnectionId, ParticipantId, RoomId};
