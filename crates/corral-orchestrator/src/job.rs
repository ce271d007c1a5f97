//! Job model: lifecycle enums, the job record, and per-variant behavior.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use corral_common::protocol::names;
use corral_common::protocol::{CorralError, Serial};
use corral_common::transport::{ConnectionId, PeerConnection};

use crate::orchestrator::Event;

/// Job identifier, unique within the process lifetime.
pub type JobId = u32;

/// Deadline for each per-node call issued by a fan-out job.
pub const NODE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    IsolateAll,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::IsolateAll => write!(f, "isolate-all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Running,
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
        }
    }
}

/// Aggregate outcome of a job. The `Display` tokens are the wire contract
/// carried by the `JobRemoved` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Done,
    Cancelled,
    Failed,
    Timeout,
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobResult::Done => write!(f, "done"),
            JobResult::Cancelled => write!(f, "cancelled"),
            JobResult::Failed => write!(f, "failed"),
            JobResult::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one per-node call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Failed,
    Timeout,
}

/// The client request that created a job.
///
/// Kept on the job so the reply flows through the originating request, and
/// so later versions can defer the reply until completion.
#[derive(Debug, Clone, Copy)]
pub struct JobSource {
    pub conn: ConnectionId,
    pub serial: Serial,
}

/// Variant-specific job payload.
///
/// The engine drives jobs only through the [`Job`] methods and never reaches
/// into these fields.
pub enum JobSpec {
    IsolateAll {
        target: String,
        outstanding: u32,
        failures: u32,
        timeouts: u32,
        calls: Vec<AbortHandle>,
    },
}

impl JobSpec {
    pub fn isolate_all(target: impl Into<String>) -> Self {
        JobSpec::IsolateAll {
            target: target.into(),
            outstanding: 0,
            failures: 0,
            timeouts: 0,
            calls: Vec::new(),
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobSpec::IsolateAll { .. } => JobType::IsolateAll,
        }
    }
}

impl Drop for JobSpec {
    fn drop(&mut self) {
        // Outstanding calls must not outlive the job that issued them.
        match self {
            JobSpec::IsolateAll { calls, .. } => {
                for call in calls.drain(..) {
                    call.abort();
                }
            }
        }
    }
}

/// One orchestrated operation.
pub struct Job {
    pub id: JobId,
    pub object_path: String,
    pub state: JobState,
    pub result: JobResult,
    pub source: Option<JobSource>,
    spec: JobSpec,
}

impl Job {
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            object_path: names::job_object_path(id),
            state: JobState::Waiting,
            result: JobResult::Done,
            source: None,
            spec,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.spec.job_type()
    }

    /// The read-only property map published at the job's object path.
    pub fn properties(&self) -> Value {
        json!({
            "JobType": self.job_type().to_string(),
            "State": self.state.to_string(),
        })
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        match name {
            "JobType" => Some(json!(self.job_type().to_string())),
            "State" => Some(json!(self.state.to_string())),
            _ => None,
        }
    }

    /// Begins work on the job. Non-blocking: asynchronous per-node calls are
    /// registered and their completions come back as engine events. Returns
    /// `true` when there is no outstanding work and the job is already
    /// complete.
    pub fn start(
        &mut self,
        nodes: &[(String, PeerConnection)],
        events: &mpsc::UnboundedSender<Event>,
    ) -> bool {
        let id = self.id;
        match &mut self.spec {
            JobSpec::IsolateAll {
                target,
                outstanding,
                calls,
                ..
            } => {
                debug!(job = id, target = %target, nodes = nodes.len(), "starting isolate-all");
                for (name, conn) in nodes {
                    let conn = conn.clone();
                    let node = name.clone();
                    let events = events.clone();
                    let args = json!({ "target": target.as_str() });
                    let task = tokio::spawn(async move {
                        let called = conn
                            .call(
                                names::NODE_PEER_OBJECT_PATH,
                                names::NODE_PEER_IFACE,
                                "Isolate",
                                args,
                                NODE_CALL_TIMEOUT,
                            )
                            .await;
                        let outcome = match called {
                            Ok(_) => CallOutcome::Ok,
                            Err(CorralError::CallTimeout(_)) => CallOutcome::Timeout,
                            Err(e) => {
                                debug!(job = id, node = %node, "isolate call failed: {}", e);
                                CallOutcome::Failed
                            }
                        };
                        let _ = events.send(Event::NodeReply {
                            job: id,
                            node,
                            outcome,
                        });
                    });
                    calls.push(task.abort_handle());
                    *outstanding += 1;
                }
                *outstanding == 0
            }
        }
    }

    /// Records one per-node reply. Every reply decrements the outstanding
    /// counter; failures and timeouts are additionally counted toward the
    /// aggregate result. Returns `true` once no replies are outstanding.
    pub fn note_reply(&mut self, outcome: CallOutcome) -> bool {
        match &mut self.spec {
            JobSpec::IsolateAll {
                outstanding,
                failures,
                timeouts,
                ..
            } => {
                if *outstanding == 0 {
                    // Replies racing a cancellation have nothing left to do.
                    return false;
                }
                *outstanding -= 1;
                match outcome {
                    CallOutcome::Ok => {}
                    CallOutcome::Failed => *failures += 1,
                    CallOutcome::Timeout => *timeouts += 1,
                }
                *outstanding == 0
            }
        }
    }

    /// Aggregate result for a completed fan-out: `timeout` if any call timed
    /// out, else `failed` if any call errored, else `done`.
    pub fn aggregate_result(&self) -> JobResult {
        match &self.spec {
            JobSpec::IsolateAll {
                failures, timeouts, ..
            } => {
                if *timeouts > 0 {
                    JobResult::Timeout
                } else if *failures > 0 {
                    JobResult::Failed
                } else {
                    JobResult::Done
                }
            }
        }
    }

    /// Aborts any outstanding per-node calls and marks the job cancelled.
    ///
    /// Not reachable from the public interface yet; the engine keeps the
    /// hook so a future `CancelJob` method can abort real work.
    pub fn cancel(&mut self) {
        match &mut self.spec {
            JobSpec::IsolateAll {
                outstanding, calls, ..
            } => {
                for call in calls.drain(..) {
                    call.abort();
                }
                *outstanding = 0;
                self.result = JobResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolate_job_with_replies(outstanding: u32) -> Job {
        let mut job = Job::new(1, JobSpec::isolate_all("default.target"));
        match &mut job.spec {
            JobSpec::IsolateAll {
                outstanding: field, ..
            } => *field = outstanding,
        }
        job
    }

    #[test]
    fn test_display_tokens() {
        assert_eq!(JobType::IsolateAll.to_string(), "isolate-all");
        assert_eq!(JobState::Waiting.to_string(), "waiting");
        assert_eq!(JobState::Running.to_string(), "running");
        assert_eq!(JobState::Finished.to_string(), "finished");
        assert_eq!(JobResult::Done.to_string(), "done");
        assert_eq!(JobResult::Cancelled.to_string(), "cancelled");
        assert_eq!(JobResult::Failed.to_string(), "failed");
        assert_eq!(JobResult::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_new_job_shape() {
        let job = Job::new(7, JobSpec::isolate_all("x"));
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.object_path, "/org/corral/orchestrator/jobs/7");
        assert_eq!(job.job_type(), JobType::IsolateAll);
        assert_eq!(
            job.properties(),
            json!({"JobType": "isolate-all", "State": "waiting"})
        );
        assert!(job.property("State").is_some());
        assert!(job.property("Nope").is_none());
    }

    #[tokio::test]
    async fn test_start_with_no_nodes_completes_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut job = Job::new(1, JobSpec::isolate_all("x"));
        assert!(job.start(&[], &tx));
        assert_eq!(job.aggregate_result(), JobResult::Done);
    }

    #[test]
    fn test_replies_decrement_until_done() {
        let mut job = isolate_job_with_replies(3);
        assert!(!job.note_reply(CallOutcome::Ok));
        assert!(!job.note_reply(CallOutcome::Ok));
        assert!(job.note_reply(CallOutcome::Ok));
        assert_eq!(job.aggregate_result(), JobResult::Done);
    }

    #[test]
    fn test_any_failure_fails_the_aggregate() {
        let mut job = isolate_job_with_replies(2);
        assert!(!job.note_reply(CallOutcome::Failed));
        assert!(job.note_reply(CallOutcome::Ok));
        assert_eq!(job.aggregate_result(), JobResult::Failed);
    }

    #[test]
    fn test_timeout_outranks_failure() {
        let mut job = isolate_job_with_replies(3);
        assert!(!job.note_reply(CallOutcome::Failed));
        assert!(!job.note_reply(CallOutcome::Timeout));
        assert!(job.note_reply(CallOutcome::Ok));
        assert_eq!(job.aggregate_result(), JobResult::Timeout);
    }

    #[test]
    fn test_cancel_clears_outstanding_work() {
        let mut job = isolate_job_with_replies(5);
        job.cancel();
        assert_eq!(job.result, JobResult::Cancelled);
        match &job.spec {
            JobSpec::IsolateAll { outstanding, .. } => assert_eq!(*outstanding, 0),
        }
    }
}
