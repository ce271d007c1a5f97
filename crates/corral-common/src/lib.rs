//! Corral Common Types and Transport
//!
//! This crate provides the message model and transport layer shared by every
//! component of the corral fleet orchestrator.
//!
//! # Overview
//!
//! Corral is a small fleet-management plane: nodes hold persistent control
//! connections to a central orchestrator, and external clients drive
//! fleet-wide jobs through the orchestrator's public endpoint. Both surfaces
//! speak the same message abstraction, defined here:
//!
//! - **Protocol layer**: a bus-style message union (method call, method
//!   return, error, signal) addressed by object path, interface and member,
//!   plus the well-known names and error types used across the system.
//! - **Transport layer**: JSON codec, length-prefixed framing, and the
//!   bidirectional peer connection used for both node and client links.
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types ([`Message`], well-known names,
//!   [`CorralError`])
//! - [`transport`] - Codec, framing and the [`transport::PeerConnection`]
//!
//! # Example
//!
//! ```
//! use corral_common::protocol::{names, Message};
//! use serde_json::json;
//!
//! let call = Message::method_call(
//!     1,
//!     names::ORCHESTRATOR_OBJECT_PATH,
//!     names::ORCHESTRATOR_IFACE,
//!     "IsolateAll",
//!     json!({"target": "multi-user.target"}),
//! );
//! let reply = Message::method_return(1, json!("/org/corral/orchestrator/jobs/1"));
//! # let _ = (call, reply);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
