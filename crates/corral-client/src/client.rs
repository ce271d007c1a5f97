use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use corral_common::protocol::error::{CorralError, Result};
use corral_common::protocol::names;
use corral_common::transport::{PeerConnection, PeerEvent};

/// Default deadline for client-issued method calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A job lifecycle event observed over the signal stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job was queued.
    New { id: u32, job: String },
    /// A job completed and left the queue; `result` is one of `done`,
    /// `cancelled`, `failed`, `timeout`.
    Removed {
        id: u32,
        job: String,
        result: String,
    },
    /// Properties changed on a job object (currently only `State`).
    PropertiesChanged {
        job: String,
        changed: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct JobNewArgs {
    id: u32,
    job: String,
}

#[derive(Deserialize)]
struct JobRemovedArgs {
    id: u32,
    job: String,
    result: String,
}

#[derive(Deserialize)]
struct PropertiesChangedArgs {
    changed: Map<String, Value>,
}

impl JobEvent {
    fn parse(path: &str, interface: &str, member: &str, args: Value) -> Option<JobEvent> {
        match (interface, member) {
            (names::ORCHESTRATOR_IFACE, "JobNew") => {
                let args: JobNewArgs = serde_json::from_value(args).ok()?;
                Some(JobEvent::New {
                    id: args.id,
                    job: args.job,
                })
            }
            (names::ORCHESTRATOR_IFACE, "JobRemoved") => {
                let args: JobRemovedArgs = serde_json::from_value(args).ok()?;
                Some(JobEvent::Removed {
                    id: args.id,
                    job: args.job,
                    result: args.result,
                })
            }
            (names::PROPERTIES_IFACE, "PropertiesChanged") => {
                let args: PropertiesChangedArgs = serde_json::from_value(args).ok()?;
                Some(JobEvent::PropertiesChanged {
                    job: path.to_owned(),
                    changed: args.changed,
                })
            }
            _ => None,
        }
    }
}

/// Client for the corral orchestrator API.
///
/// Holds one persistent connection; method calls and the signal stream share
/// it. Dropping the client closes the connection.
pub struct CorralClient {
    conn: PeerConnection,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    call_timeout: Duration,
}

impl CorralClient {
    /// Connects to the orchestrator's API endpoint and performs the `Hello`
    /// handshake.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CorralError::Connection(format!("failed to connect to {}: {}", addr, e)))?;
        let (events_tx, events) = mpsc::unbounded_channel();
        let conn = PeerConnection::start(stream, events_tx)?;

        let client = Self {
            conn,
            events,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        };
        let unique_name = client
            .conn
            .call(
                names::BUS_OBJECT_PATH,
                names::BUS_IFACE,
                "Hello",
                Value::Null,
                client.call_timeout,
            )
            .await?;
        debug!(addr, name = %unique_name, "connected to orchestrator");
        Ok(client)
    }

    /// Overrides the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Queues an isolate job across the whole fleet. Returns the object path
    /// of the new job.
    pub async fn isolate_all(&self, target: &str) -> Result<String> {
        let body = self
            .conn
            .call(
                names::ORCHESTRATOR_OBJECT_PATH,
                names::ORCHESTRATOR_IFACE,
                "IsolateAll",
                serde_json::json!({ "target": target }),
                self.call_timeout,
            )
            .await?;
        body.as_str().map(str::to_owned).ok_or_else(|| {
            CorralError::InvalidResponse(format!("IsolateAll reply is not an object path: {}", body))
        })
    }

    /// Reads one property of an object published by the orchestrator.
    pub async fn get_property(&self, path: &str, interface: &str, property: &str) -> Result<Value> {
        self.conn
            .call(
                path,
                names::PROPERTIES_IFACE,
                "Get",
                serde_json::json!({ "interface": interface, "property": property }),
                self.call_timeout,
            )
            .await
    }

    /// Reads all properties of an object published by the orchestrator.
    pub async fn get_all_properties(
        &self,
        path: &str,
        interface: &str,
    ) -> Result<Map<String, Value>> {
        let value = self
            .conn
            .call(
                path,
                names::PROPERTIES_IFACE,
                "GetAll",
                serde_json::json!({ "interface": interface }),
                self.call_timeout,
            )
            .await?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(CorralError::InvalidResponse(format!(
                "GetAll reply is not an object: {}",
                other
            ))),
        }
    }

    /// Current `State` of a job object.
    pub async fn job_state(&self, job: &str) -> Result<String> {
        let value = self.get_property(job, names::JOB_IFACE, "State").await?;
        value.as_str().map(str::to_owned).ok_or_else(|| {
            CorralError::InvalidResponse(format!("State is not a string: {}", value))
        })
    }

    /// All properties of a job object.
    pub async fn job_properties(&self, job: &str) -> Result<Map<String, Value>> {
        self.get_all_properties(job, names::JOB_IFACE).await
    }

    /// Waits for the next job lifecycle event. Returns `None` once the
    /// connection is gone. Signals that are not job lifecycle events are
    /// skipped.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        while let Some(event) = self.events.recv().await {
            match event {
                PeerEvent::Signal {
                    path,
                    interface,
                    member,
                    args,
                    ..
                } => {
                    if let Some(parsed) = JobEvent::parse(&path, &interface, &member, args) {
                        return Some(parsed);
                    }
                }
                PeerEvent::Disconnected { .. } => return None,
                // The orchestrator never calls into clients.
                PeerEvent::Call { .. } => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_job_new() {
        let event = JobEvent::parse(
            names::ORCHESTRATOR_OBJECT_PATH,
            names::ORCHESTRATOR_IFACE,
            "JobNew",
            json!({"id": 1, "job": "/org/corral/orchestrator/jobs/1"}),
        );
        assert_eq!(
            event,
            Some(JobEvent::New {
                id: 1,
                job: "/org/corral/orchestrator/jobs/1".into()
            })
        );
    }

    #[test]
    fn test_parse_job_removed() {
        let event = JobEvent::parse(
            names::ORCHESTRATOR_OBJECT_PATH,
            names::ORCHESTRATOR_IFACE,
            "JobRemoved",
            json!({"id": 2, "job": "/org/corral/orchestrator/jobs/2", "result": "done"}),
        );
        match event {
            Some(JobEvent::Removed { id, result, .. }) => {
                assert_eq!(id, 2);
                assert_eq!(result, "done");
            }
            other => panic!("expected removal, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_properties_changed_keeps_path() {
        let event = JobEvent::parse(
            "/org/corral/orchestrator/jobs/3",
            names::PROPERTIES_IFACE,
            "PropertiesChanged",
            json!({"interface": names::JOB_IFACE, "changed": {"State": "running"}}),
        );
        match event {
            Some(JobEvent::PropertiesChanged { job, changed }) => {
                assert_eq!(job, "/org/corral/orchestrator/jobs/3");
                assert_eq!(changed.get("State"), Some(&json!("running")));
            }
            other => panic!("expected property change, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignores_unknown_signals() {
        let event = JobEvent::parse("/p", "some.other.Interface", "Whatever", json!({}));
        assert!(event.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_args() {
        let event = JobEvent::parse(
            names::ORCHESTRATOR_OBJECT_PATH,
            names::ORCHESTRATOR_IFACE,
            "JobNew",
            json!({"id": "not a number"}),
        );
        assert!(event.is_none());
    }
}
