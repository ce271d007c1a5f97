//! Corral Client
//!
//! This crate provides the client library for talking to a corral
//! orchestrator's public API endpoint.
//!
//! # Overview
//!
//! [`CorralClient`] holds one persistent connection. Method calls (submit an
//! isolate job, read job properties) and the lifecycle signal stream
//! (`JobNew`, `JobRemoved`, property change notifications) share that
//! connection, so a client observes signals for exactly the jobs the server
//! ran while it was connected.
//!
//! # Usage
//!
//! ```rust,no_run
//! use corral_client::{CorralClient, JobEvent};
//!
//! #[tokio::main]
//! async fn main() -> corral_common::Result<()> {
//!     let mut client = CorralClient::connect("127.0.0.1:2000").await?;
//!
//!     let job = client.isolate_all("multi-user.target").await?;
//!     println!("queued {}", job);
//!
//!     while let Some(event) = client.next_event().await {
//!         if let JobEvent::Removed { job, result, .. } = event {
//!             println!("{} finished: {}", job, result);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;

pub use client::{CorralClient, JobEvent, DEFAULT_CALL_TIMEOUT};
