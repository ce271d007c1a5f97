//! The orchestrator engine: listeners, registry, scheduler and public facade.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use corral_common::protocol::error::Result;
use corral_common::protocol::{names, Serial};
use corral_common::transport::{ConnectionId, PeerConnection, PeerEvent};

use crate::job::{CallOutcome, Job, JobId, JobResult, JobSource, JobSpec, JobState};
use crate::node::{Node, NodeRegistry, RegisterError};
use crate::queue::JobQueue;

/// Listen backlog for both listeners.
const LISTEN_BACKLOG: u32 = 1024;

/// Default port nodes connect to.
pub const DEFAULT_NODE_PORT: u16 = 1999;

/// Default port external clients connect to.
pub const DEFAULT_API_PORT: u16 = 2000;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address the node listener binds to.
    pub node_bind: SocketAddr,
    /// Address the public API listener binds to.
    pub api_bind: SocketAddr,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            node_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_NODE_PORT)),
            api_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
        }
    }
}

/// Events processed by the engine task.
#[derive(Debug)]
pub enum Event {
    /// Completion of one per-node call issued by the running job.
    NodeReply {
        job: JobId,
        node: String,
        outcome: CallOutcome,
    },
    /// One-shot deferred work, processed at the top of a later engine turn.
    Deferred(Deferral),
}

/// The two deferrals of the job lifecycle. Deferring (rather than calling
/// directly) keeps completions that fire inside a start routine from
/// starting the next job within the previous one's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// Take the queue head and start it.
    StartNext,
    /// Complete the given job and schedule its successor.
    Finish(JobId),
}

/// The orchestrator server.
///
/// [`Orchestrator::bind`] claims both listening sockets (fatal on failure);
/// [`Orchestrator::run`] drives the engine until the process is stopped.
pub struct Orchestrator {
    config: OrchestratorConfig,
    node_listener: TcpListener,
    api_listener: TcpListener,
}

impl Orchestrator {
    /// Binds the node and API listeners. A failure here is a startup
    /// failure: the caller is expected to exit non-zero.
    pub async fn bind(config: OrchestratorConfig) -> Result<Self> {
        let node_listener = listen(config.node_bind)?;
        let api_listener = listen(config.api_bind)?;
        info!(
            name = names::ORCHESTRATOR_BUS_NAME,
            nodes = %node_listener.local_addr()?,
            api = %api_listener.local_addr()?,
            "orchestrator listening"
        );
        Ok(Self {
            config,
            node_listener,
            api_listener,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Actual address of the node listener.
    pub fn node_addr(&self) -> Result<SocketAddr> {
        Ok(self.node_listener.local_addr()?)
    }

    /// Actual address of the API listener.
    pub fn api_addr(&self) -> Result<SocketAddr> {
        Ok(self.api_listener.local_addr()?)
    }

    /// Runs the engine until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut engine = Engine {
            registry: NodeRegistry::new(),
            queue: JobQueue::new(),
            current_job: None,
            deferral_pending: false,
            clients: HashMap::new(),
            peer_tx,
            event_tx,
        };
        engine
            .run(self.node_listener, self.api_listener, peer_rx, event_rx)
            .await
    }
}

fn listen(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// All orchestrator state, owned by one task. Peer traffic, call
/// completions and deferrals arrive as events, so every transition happens
/// at the top of an engine turn and nothing here needs locking.
struct Engine {
    registry: NodeRegistry,
    queue: JobQueue,
    current_job: Option<JobId>,
    /// At most one deferral is in flight; shared by scheduler and finisher.
    deferral_pending: bool,
    clients: HashMap<ConnectionId, PeerConnection>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl Engine {
    async fn run(
        &mut self,
        node_listener: TcpListener,
        api_listener: TcpListener,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = node_listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_node(stream, addr),
                    Err(e) => warn!("failed to accept node connection: {}", e),
                },
                accepted = api_listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_client(stream, addr),
                    Err(e) => warn!("failed to accept client connection: {}", e),
                },
                Some(event) = peer_rx.recv() => self.handle_peer_event(event),
                Some(event) = event_rx.recv() => self.handle_event(event),
            }
        }
    }

    fn accept_node(&mut self, stream: TcpStream, addr: SocketAddr) {
        // Direct connections are trusted as-is; there is only one peer on
        // each socket and no bus-level authentication.
        match PeerConnection::start(stream, self.peer_tx.clone()) {
            Ok(conn) => {
                let server_id = Uuid::new_v4();
                info!(peer = %addr, server_id = %server_id, "accepted node connection");
                self.registry.add(Node::new(conn, server_id));
            }
            Err(e) => warn!(peer = %addr, "failed to start node connection: {}", e),
        }
    }

    fn accept_client(&mut self, stream: TcpStream, addr: SocketAddr) {
        match PeerConnection::start(stream, self.peer_tx.clone()) {
            Ok(conn) => {
                debug!(peer = %addr, "accepted client connection");
                self.clients.insert(conn.id(), conn);
            }
            Err(e) => warn!(peer = %addr, "failed to start client connection: {}", e),
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Call {
                conn,
                serial,
                path,
                interface,
                member,
                args,
            } => {
                if self.registry.contains(conn) {
                    self.dispatch_node_call(conn, serial, &path, &interface, &member, args);
                } else if self.clients.contains_key(&conn) {
                    self.dispatch_client_call(conn, serial, &path, &interface, &member, args);
                } else {
                    trace!(conn = %conn, "call from unknown connection");
                }
            }
            PeerEvent::Signal {
                conn,
                path,
                interface,
                member,
                ..
            } => {
                trace!(conn = %conn, %path, %interface, %member, "ignoring unsolicited signal");
            }
            PeerEvent::Disconnected { conn } => self.handle_disconnect(conn),
        }
    }

    fn handle_disconnect(&mut self, conn: ConnectionId) {
        if let Some(node) = self.registry.remove(conn) {
            match node.name() {
                Some(name) => info!(node = name, "node disconnected"),
                None => info!("unregistered node disconnected"),
            }
            node.conn().close();
        } else if self.clients.remove(&conn).is_some() {
            debug!(conn = %conn, "client disconnected");
        }
    }

    fn dispatch_node_call(
        &mut self,
        conn: ConnectionId,
        serial: Serial,
        path: &str,
        interface: &str,
        member: &str,
        args: Value,
    ) {
        let Some(node) = self.registry.get(conn) else {
            return;
        };
        let reply_conn = node.conn().clone();
        match (path, interface, member) {
            (names::BUS_OBJECT_PATH, names::BUS_IFACE, "Hello") => {
                let _ = reply_conn.reply(serial, json!(names::PEER_UNIQUE_NAME));
            }
            (names::ORCHESTRATOR_OBJECT_PATH, names::ORCHESTRATOR_PEER_IFACE, "Register") => {
                self.handle_register(conn, reply_conn, serial, args);
            }
            _ => {
                debug!(%path, %interface, %member, "unhandled node call");
                let _ = reply_conn.reply_error(
                    serial,
                    names::error::UNKNOWN_METHOD,
                    format!("no method {} at {} on {}", member, path, interface),
                );
            }
        }
    }

    fn handle_register(
        &mut self,
        conn: ConnectionId,
        reply_conn: PeerConnection,
        serial: Serial,
        args: Value,
    ) {
        let name = match args.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => {
                let _ = reply_conn.reply_error(
                    serial,
                    names::error::INVALID_ARGUMENT,
                    "Register expects a non-empty string name",
                );
                return;
            }
        };
        match self.registry.register(conn, &name) {
            Ok(node) => {
                info!(
                    peer = %reply_conn.peer_addr(),
                    server_id = %node.server_id(),
                    node = %name,
                    path = node.object_path().unwrap_or_default(),
                    "registered node"
                );
                let _ = reply_conn.reply(serial, Value::Null);
            }
            Err(RegisterError::AlreadyRegistered) => {
                let _ = reply_conn.reply_error(
                    serial,
                    names::error::ADDRESS_IN_USE,
                    "Can't register twice",
                );
            }
            Err(RegisterError::NameTaken) => {
                let _ = reply_conn.reply_error(
                    serial,
                    names::error::ADDRESS_IN_USE,
                    "Node name already registered",
                );
            }
            Err(RegisterError::UnknownConnection) => {
                let _ = reply_conn.reply_error(
                    serial,
                    names::error::TRANSPORT_FAILURE,
                    "connection is gone",
                );
            }
        }
    }

    fn dispatch_client_call(
        &mut self,
        conn: ConnectionId,
        serial: Serial,
        path: &str,
        interface: &str,
        member: &str,
        args: Value,
    ) {
        let Some(client) = self.clients.get(&conn) else {
            return;
        };
        let client = client.clone();
        match (path, interface, member) {
            (names::BUS_OBJECT_PATH, names::BUS_IFACE, "Hello") => {
                let _ = client.reply(serial, json!(names::PEER_UNIQUE_NAME));
            }
            (names::ORCHESTRATOR_OBJECT_PATH, names::ORCHESTRATOR_IFACE, "IsolateAll") => {
                self.handle_isolate_all(conn, client, serial, args);
            }
            (_, names::PROPERTIES_IFACE, "Get") => {
                self.handle_property_get(client, serial, path, args);
            }
            (_, names::PROPERTIES_IFACE, "GetAll") => {
                self.handle_property_get_all(client, serial, path);
            }
            _ => {
                debug!(%path, %interface, %member, "unhandled client call");
                let _ = client.reply_error(
                    serial,
                    names::error::UNKNOWN_METHOD,
                    format!("no method {} at {} on {}", member, path, interface),
                );
            }
        }
    }

    fn handle_isolate_all(
        &mut self,
        conn: ConnectionId,
        client: PeerConnection,
        serial: Serial,
        args: Value,
    ) {
        let target = match args.get("target").and_then(Value::as_str) {
            Some(target) if !target.is_empty() => target.to_owned(),
            _ => {
                let _ = client.reply_error(
                    serial,
                    names::error::INVALID_ARGUMENT,
                    "IsolateAll expects a non-empty string target",
                );
                return;
            }
        };

        let id = self.queue_job(JobSpec::isolate_all(target), JobSource { conn, serial });

        // The reply goes through the request the job retained as its source.
        if let Some(job) = self.queue.get(id) {
            if let Some(source) = &job.source {
                if let Some(origin) = self.clients.get(&source.conn) {
                    let _ = origin.reply(source.serial, json!(job.object_path));
                }
            }
        }
    }

    /// Allocates an id, publishes the job object, queues the job, emits
    /// `JobNew` and kicks the scheduler.
    fn queue_job(&mut self, spec: JobSpec, source: JobSource) -> JobId {
        let id = self.queue.allocate_id();
        let mut job = Job::new(id, spec);
        job.source = Some(source);
        let object_path = job.object_path.clone();
        info!(job = id, kind = %job.job_type(), "queued job");
        self.queue.push(job);
        self.broadcast_signal(
            names::ORCHESTRATOR_OBJECT_PATH,
            names::ORCHESTRATOR_IFACE,
            "JobNew",
            json!({ "id": id, "job": object_path }),
        );
        self.schedule_job();
        id
    }

    /// One rule: defer a start when nothing is running, nothing is already
    /// deferred, and the queue is non-empty.
    fn schedule_job(&mut self) {
        if self.current_job.is_some() || self.deferral_pending {
            return;
        }
        if self.queue.is_empty() {
            return;
        }
        self.deferral_pending = true;
        let _ = self.event_tx.send(Event::Deferred(Deferral::StartNext));
        debug!("scheduled job start");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::NodeReply { job, node, outcome } => self.handle_node_reply(job, node, outcome),
            Event::Deferred(Deferral::StartNext) => self.start_next_job(),
            Event::Deferred(Deferral::Finish(id)) => self.complete_job(id),
        }
    }

    fn start_next_job(&mut self) {
        self.deferral_pending = false;
        if self.current_job.is_some() {
            return;
        }

        // Snapshot of the registered fleet; nodes joining later are not
        // part of this job's fan-out.
        let nodes: Vec<(String, PeerConnection)> = self
            .registry
            .registered()
            .filter_map(|n| n.name().map(|name| (name.to_owned(), n.conn().clone())))
            .collect();

        let Some(job) = self.queue.front_mut() else {
            return;
        };
        let id = job.id;
        let object_path = job.object_path.clone();
        job.state = JobState::Running;
        self.current_job = Some(id);

        self.emit_state_change(&object_path, JobState::Running);

        let events = self.event_tx.clone();
        let Some(job) = self.queue.get_mut(id) else {
            return;
        };
        let finished = job.start(&nodes, &events);
        if finished {
            self.finish_job(id);
        }
    }

    fn handle_node_reply(&mut self, id: JobId, node: String, outcome: CallOutcome) {
        // A late reply to a removed job is a no-op.
        let Some(job) = self.queue.get_mut(id) else {
            trace!(job = id, node = %node, "reply for a job no longer queued");
            return;
        };
        if job.state != JobState::Running {
            trace!(job = id, node = %node, "reply for a job that is not running");
            return;
        }
        debug!(job = id, node = %node, outcome = ?outcome, "node reply");
        if job.note_reply(outcome) {
            self.finish_job(id);
        }
    }

    /// Defers completion so the transition runs at the top of an engine turn.
    fn finish_job(&mut self, id: JobId) {
        debug_assert_eq!(self.current_job, Some(id));
        debug_assert!(!self.deferral_pending);
        self.deferral_pending = true;
        let _ = self.event_tx.send(Event::Deferred(Deferral::Finish(id)));
    }

    fn complete_job(&mut self, id: JobId) {
        self.deferral_pending = false;
        if self.current_job != Some(id) {
            warn!(job = id, "finisher fired for a job that is not current");
            return;
        }
        self.current_job = None;

        let Some(job) = self.queue.get_mut(id) else {
            return;
        };
        job.state = JobState::Finished;
        if job.result != JobResult::Cancelled {
            job.result = job.aggregate_result();
        }
        let object_path = job.object_path.clone();
        self.emit_state_change(&object_path, JobState::Finished);

        let Some(job) = self.queue.remove(id) else {
            return;
        };
        info!(job = id, result = %job.result, "job finished");
        self.broadcast_signal(
            names::ORCHESTRATOR_OBJECT_PATH,
            names::ORCHESTRATOR_IFACE,
            "JobRemoved",
            json!({ "id": id, "job": job.object_path, "result": job.result.to_string() }),
        );

        self.schedule_job();
    }

    fn handle_property_get(
        &self,
        client: PeerConnection,
        serial: Serial,
        path: &str,
        args: Value,
    ) {
        let property = match args.get("property").and_then(Value::as_str) {
            Some(property) => property,
            None => {
                let _ = client.reply_error(
                    serial,
                    names::error::INVALID_ARGUMENT,
                    "Get expects a property name",
                );
                return;
            }
        };

        if let Some(job) = self.queue.find_by_object_path(path) {
            match job.property(property) {
                Some(value) => {
                    let _ = client.reply(serial, value);
                }
                None => {
                    let _ = client.reply_error(
                        serial,
                        names::error::UNKNOWN_PROPERTY,
                        format!("no property {} at {}", property, path),
                    );
                }
            }
        } else if self.registry.find_by_object_path(path).is_some() {
            // Node objects are reserved and expose no properties yet.
            let _ = client.reply_error(
                serial,
                names::error::UNKNOWN_PROPERTY,
                format!("no property {} at {}", property, path),
            );
        } else {
            let _ = client.reply_error(
                serial,
                names::error::UNKNOWN_OBJECT,
                format!("no object at {}", path),
            );
        }
    }

    fn handle_property_get_all(&self, client: PeerConnection, serial: Serial, path: &str) {
        if let Some(job) = self.queue.find_by_object_path(path) {
            let _ = client.reply(serial, job.properties());
        } else if self.registry.find_by_object_path(path).is_some() {
            let _ = client.reply(serial, json!({}));
        } else {
            let _ = client.reply_error(
                serial,
                names::error::UNKNOWN_OBJECT,
                format!("no object at {}", path),
            );
        }
    }

    fn emit_state_change(&self, object_path: &str, state: JobState) {
        self.broadcast_signal(
            object_path,
            names::PROPERTIES_IFACE,
            "PropertiesChanged",
            json!({
                "interface": names::JOB_IFACE,
                "changed": { "State": state.to_string() },
            }),
        );
    }

    /// Sends a signal to every connected API client.
    fn broadcast_signal(&self, path: &str, interface: &str, member: &str, args: Value) {
        for client in self.clients.values() {
            let _ = client.emit_signal(path, interface, member, args.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_ports() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.node_bind.port(), DEFAULT_NODE_PORT);
        assert_eq!(config.api_bind.port(), DEFAULT_API_PORT);
    }

    #[tokio::test]
    async fn test_bind_reports_actual_addresses() {
        let config = OrchestratorConfig {
            node_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            api_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let orchestrator = Orchestrator::bind(config).await.unwrap();
        assert_ne!(orchestrator.node_addr().unwrap().port(), 0);
        assert_ne!(orchestrator.api_addr().unwrap().port(), 0);
        assert_ne!(
            orchestrator.node_addr().unwrap(),
            orchestrator.api_addr().unwrap()
        );
    }

    #[tokio::test]
    async fn test_bind_fails_on_occupied_port() {
        let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap();
        let config = OrchestratorConfig {
            node_bind: taken,
            api_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        assert!(Orchestrator::bind(config).await.is_err());
    }
}
