//! Connected nodes and the registry tracking them.

use corral_common::protocol::names;
use corral_common::transport::{ConnectionId, PeerConnection};
use uuid::Uuid;

/// One connected node.
///
/// A node is created on accept with no name; it becomes **registered** once
/// its `Register` call succeeds, at which point its public object path is
/// derived from the name. Only registered nodes participate in fan-out.
#[derive(Debug)]
pub struct Node {
    conn: PeerConnection,
    server_id: Uuid,
    name: Option<String>,
    object_path: Option<String>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.conn.id() == other.conn.id()
            && self.server_id == other.server_id
            && self.name == other.name
            && self.object_path == other.object_path
    }
}

impl Node {
    pub fn new(conn: PeerConnection, server_id: Uuid) -> Self {
        Self {
            conn,
            server_id,
            name: None,
            object_path: None,
        }
    }

    pub fn conn(&self) -> &PeerConnection {
        &self.conn
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Random server id assigned when the connection was accepted.
    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Public object path, present once the node is registered.
    pub fn object_path(&self) -> Option<&str> {
        self.object_path.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.name.is_some()
    }
}

/// Why a `Register` call was refused.
///
/// Both name-related failures surface as `AddressInUse` on the wire, with
/// distinct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// This node already registered a name; only one `Register` succeeds.
    AlreadyRegistered,
    /// Another registered node holds the requested name.
    NameTaken,
    /// The connection is not (or no longer) in the registry.
    UnknownConnection,
}

/// The set of connected nodes.
///
/// Lookups are linear scans; the registry is O(fleet) and the name-unique
/// invariant makes every answer unambiguous.
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Removes the node owning the given connection, returning it so the
    /// caller can close the connection handle.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.conn_id() == conn)?;
        Some(self.nodes.remove(idx))
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.conn_id() == conn)
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.get(conn).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == Some(name))
    }

    pub fn find_by_object_path(&self, path: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.object_path() == Some(path))
    }

    /// Runs the registration protocol for the given connection.
    ///
    /// Fails if the node already has a name or the name is held by another
    /// node; otherwise records the name and derives the public object path.
    pub fn register(
        &mut self,
        conn: ConnectionId,
        name: &str,
    ) -> Result<&Node, RegisterError> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.conn_id() == conn)
            .ok_or(RegisterError::UnknownConnection)?;

        if self.nodes[idx].name.is_some() {
            return Err(RegisterError::AlreadyRegistered);
        }
        if self.nodes.iter().any(|n| n.name() == Some(name)) {
            return Err(RegisterError::NameTaken);
        }

        let node = &mut self.nodes[idx];
        node.name = Some(name.to_owned());
        node.object_path = Some(names::node_object_path(name));
        Ok(&self.nodes[idx])
    }

    /// Iterates over registered nodes only; these are the fan-out targets.
    pub fn registered(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_registered())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
