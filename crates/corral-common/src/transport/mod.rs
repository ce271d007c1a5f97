//! Corral Transport Layer
//!
//! This module provides the codec, framing and peer connection used on every
//! corral socket.
//!
//! # Architecture
//!
//! - **Codec**: JSON serialization of [`crate::protocol::Message`]
//! - **Wire format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Peer connection**: one [`PeerConnection`] per socket, usable from
//!   either end, with serial-correlated asynchronous method calls, signal
//!   emission and an event channel for incoming traffic
//!
//! # Frame Size Limit
//!
//! Frames are capped at 16 MiB ([`framed::MAX_FRAME_SIZE`]) to prevent
//! memory exhaustion from a misbehaving peer.

pub mod codec;
pub mod framed;
pub mod peer;

pub use codec::{Codec, JsonCodec};
pub use peer::{ConnectionId, PeerConnection, PeerEvent};
