//! Corral Protocol Definitions
//!
//! This module defines the message model shared by the node protocol and the
//! public API, the well-known object paths and interface names, and the error
//! type used throughout the system.
//!
//! # Message Model
//!
//! Every frame on the wire carries one [`Message`]:
//!
//! - **`method-call`**: addressed by object path, interface and member, with
//!   a caller-chosen serial used to correlate the reply
//! - **`method-return`** / **`error`**: replies carrying the originating
//!   serial
//! - **`signal`**: unsolicited notifications addressed like method calls
//!
//! # Error Handling
//!
//! [`CorralError`] covers both local failures (I/O, serialization, timeouts)
//! and errors received over the wire. Each variant that can cross the wire
//! has a stable error name (see [`names::error`]); [`CorralError::from_wire`]
//! reconstructs the matching variant on the receiving side.

pub mod error;
pub mod message;
pub mod names;


pub use error::{CorralError, Result};
pub use message::{Message, Serial};
