//! Corral Orchestrator
//!
//! This crate provides the orchestrator component of the corral fleet plane:
//! a long-lived server that accepts persistent control connections from
//! nodes, exposes a request interface to external clients, and drives
//! fleet-wide jobs that fan method invocations out to every registered node
//! and aggregate their replies.
//!
//! # Architecture
//!
//! Everything runs on one engine task:
//!
//! 1. **Node registry**: accepts node connections on the node listener,
//!    handles the `Register` protocol, removes nodes on disconnect
//! 2. **Job engine**: FIFO queue, single-flight scheduler, lifecycle
//!    signals (`JobNew`, `JobRemoved`, property change notifications)
//! 3. **Public facade**: `IsolateAll` and property access on the API
//!    listener, with lifecycle signals broadcast to every connected client
//!
//! The engine owns all mutable state and receives everything else (accepted
//! sockets, peer traffic, per-node call completions, deferred work) as
//! events, so every lifecycle transition happens at the top of an engine
//! turn and no locks are needed.
//!
//! # Single-flight scheduling
//!
//! At most one job runs at a time. Starting the next job and finishing the
//! current one are both deferred through the engine's own event channel
//! rather than invoked directly; that keeps completions that fire inside a
//! start routine (e.g. a fan-out over zero nodes) from recursively starting
//! the next job within the previous one's call stack.
//!
//! # Example
//!
//! ```no_run
//! use corral_orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> corral_common::Result<()> {
//! let orchestrator = Orchestrator::bind(OrchestratorConfig::default()).await?;
//! orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod job;
pub mod node;
pub mod orchestrator;
pub mod queue;

pub use job::{CallOutcome, Job, JobId, JobResult, JobSource, JobSpec, JobState, JobType};
pub use node::{Node, NodeRegistry, RegisterError};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use queue::JobQueue;
