//! Well-known names shared by the node protocol and the public API.
//!
//! The orchestrator publishes one object per job under
//! [`JOBS_OBJECT_PATH_PREFIX`] and one per registered node under
//! [`NODES_OBJECT_PATH_PREFIX`]. Node connections see the peer interface at
//! the orchestrator object path, plus the handshake stub that keeps them
//! uniform with ordinary bus clients.

/// Well-known name the orchestrator answers under.
pub const ORCHESTRATOR_BUS_NAME: &str = "org.corral.Orchestrator";

/// The orchestrator's own object.
pub const ORCHESTRATOR_OBJECT_PATH: &str = "/org/corral/orchestrator";

/// Public interface: `IsolateAll`, `JobNew`, `JobRemoved`.
pub const ORCHESTRATOR_IFACE: &str = "org.corral.Orchestrator";

/// Interface exposed to nodes over their control connection: `Register`.
pub const ORCHESTRATOR_PEER_IFACE: &str = "org.corral.Orchestrator.Peer";

/// Interface of the per-job objects: `JobType` and `State` properties.
pub const JOB_IFACE: &str = "org.corral.Orchestrator.Job";

/// Interface of the per-node objects. Reserved, no members yet.
pub const NODE_IFACE: &str = "org.corral.Orchestrator.Node";

pub const JOBS_OBJECT_PATH_PREFIX: &str = "/org/corral/orchestrator/jobs";
pub const NODES_OBJECT_PATH_PREFIX: &str = "/org/corral/orchestrator/nodes";

/// Object the orchestrator calls on the node side of a control connection.
pub const NODE_PEER_OBJECT_PATH: &str = "/org/corral/node";

/// Node-side peer interface: `Isolate`.
pub const NODE_PEER_IFACE: &str = "org.corral.Node.Peer";

/// Handshake stub satisfying a peer's initial `Hello`.
pub const BUS_OBJECT_PATH: &str = "/org/freedesktop/DBus";
pub const BUS_IFACE: &str = "org.freedesktop.DBus";

/// Property access: `Get`, `GetAll`, `PropertiesChanged`.
pub const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Constant unique name handed to every peer by the `Hello` stub.
pub const PEER_UNIQUE_NAME: &str = ":1.0";

/// Object path of the job with the given id.
pub fn job_object_path(id: u32) -> String {
    format!("{}/{}", JOBS_OBJECT_PATH_PREFIX, id)
}

/// Object path of the registered node with the given name.
pub fn node_object_path(name: &str) -> String {
    format!("{}/{}", NODES_OBJECT_PATH_PREFIX, name)
}

/// Error names used in wire-level error replies.
pub mod error {
    pub const INVALID_ARGUMENT: &str = "org.corral.Error.InvalidArgument";
    pub const ADDRESS_IN_USE: &str = "org.corral.Error.AddressInUse";
    pub const CALL_TIMEOUT: &str = "org.corral.Error.CallTimeout";
    pub const TRANSPORT_FAILURE: &str = "org.corral.Error.TransportFailure";
    pub const UNKNOWN_OBJECT: &str = "org.corral.Error.UnknownObject";
    pub const UNKNOWN_METHOD: &str = "org.corral.Error.UnknownMethod";
    pub const UNKNOWN_PROPERTY: &str = "org.corral.Error.UnknownProperty";
}
