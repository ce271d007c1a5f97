//! Bidirectional peer connection.
//!
//! A [`PeerConnection`] wraps one TCP socket and gives either end the full
//! message surface: asynchronous method calls with per-call timeouts,
//! replies, and signals. Incoming calls and signals are delivered as
//! [`PeerEvent`]s on a channel supplied at start, followed by a terminal
//! [`PeerEvent::Disconnected`] when the socket closes or fails. Reply frames
//! never reach that channel; they resolve the pending call they belong to.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::protocol::error::{CorralError, Result};
use crate::protocol::{Message, Serial};
use crate::transport::codec::JsonCodec;
use crate::transport::framed::{read_frame, write_frame};

/// Identifier of one peer connection, unique within the process.
pub type ConnectionId = Uuid;

/// Traffic delivered to the owner of a [`PeerConnection`].
#[derive(Debug)]
pub enum PeerEvent {
    /// An incoming method call addressed to an object published on this side.
    Call {
        conn: ConnectionId,
        serial: Serial,
        path: String,
        interface: String,
        member: String,
        args: Value,
    },
    /// An incoming signal.
    Signal {
        conn: ConnectionId,
        path: String,
        interface: String,
        member: String,
        args: Value,
    },
    /// The socket closed or failed. No further events follow.
    Disconnected { conn: ConnectionId },
}

enum Outbound {
    Frame(Message),
    Close,
}

type PendingMap = Arc<Mutex<HashMap<Serial, oneshot::Sender<Result<Value>>>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<Serial, oneshot::Sender<Result<Value>>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// One end of a corral socket.
///
/// Cheap to clone; all clones share the underlying connection. The
/// connection stays open until [`PeerConnection::close`] is called, the peer
/// hangs up, or every clone (and the reader) has been dropped.
#[derive(Clone)]
#[derive(Debug)]
pub struct PeerConnection {
    id: ConnectionId,
    addr: SocketAddr,
    outbox: mpsc::UnboundedSender<Outbound>,
    pending: PendingMap,
    next_serial: Arc<AtomicU64>,
}

impl PeerConnection {
    /// Takes ownership of a connected stream and spawns its reader and
    /// writer tasks. Events are delivered on `events` until the terminal
    /// [`PeerEvent::Disconnected`].
    pub fn start(stream: TcpStream, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Self> {
        let addr = stream
            .peer_addr()
            .map_err(|e| CorralError::Connection(format!("failed to read peer address: {}", e)))?;
        let id = Uuid::new_v4();
        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(writer_loop(id, write_half, outbox_rx));
        tokio::spawn(reader_loop(id, read_half, events, Arc::clone(&pending)));

        Ok(Self {
            id,
            addr,
            outbox,
            pending,
            next_serial: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Issues an asynchronous method call and waits for the reply.
    ///
    /// Fails with [`CorralError::CallTimeout`] once `timeout` elapses. If the
    /// connection drops while the call is pending the call is not failed
    /// eagerly; a reply that will never arrive is mopped up by its own
    /// deadline.
    pub async fn call(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(serial, tx);

        let message = Message::method_call(serial, path, interface, member, args);
        if self.outbox.send(Outbound::Frame(message)).is_err() {
            lock_pending(&self.pending).remove(&serial);
            return Err(CorralError::Connection("connection closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(CorralError::Connection(
                "connection dropped before reply".into(),
            )),
            Err(_) => {
                lock_pending(&self.pending).remove(&serial);
                Err(CorralError::CallTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Sends the successful reply to an incoming call.
    pub fn reply(&self, serial: Serial, body: Value) -> Result<()> {
        self.send(Message::method_return(serial, body))
    }

    /// Sends the failure reply to an incoming call.
    pub fn reply_error(
        &self,
        serial: Serial,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.send(Message::error(serial, name, message))
    }

    /// Emits a signal addressed by object path and interface.
    pub fn emit_signal(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Value,
    ) -> Result<()> {
        self.send(Message::signal(path, interface, member, args))
    }

    /// Asks the writer to shut the socket down. Idempotent and safe to call
    /// from any context; the terminal event still arrives through the reader.
    pub fn close(&self) {
        let _ = self.outbox.send(Outbound::Close);
    }

    fn send(&self, message: Message) -> Result<()> {
        self.outbox
            .send(Outbound::Frame(message))
            .map_err(|_| CorralError::Connection("connection closed".into()))
    }
}

async fn writer_loop(
    id: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbox.recv().await {
        match item {
            Outbound::Frame(message) => {
                let encoded = match JsonCodec::encode(&message) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        warn!(conn = %id, "failed to encode outgoing message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut write_half, &encoded).await {
                    debug!(conn = %id, "write failed: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    // Dropping the write half sends FIN; the reader observes the close.
}

async fn reader_loop(
    id: ConnectionId,
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<PeerEvent>,
    pending: PendingMap,
) {
    loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!(conn = %id, "connection lost: {}", e);
                break;
            }
        };

        let message = match JsonCodec::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn = %id, "discarding undecodable frame: {}", e);
                continue;
            }
        };

        match message {
            Message::MethodReturn { reply_serial, body } => {
                match lock_pending(&pending).remove(&reply_serial) {
                    Some(tx) => {
                        let _ = tx.send(Ok(body));
                    }
                    None => trace!(conn = %id, serial = reply_serial, "reply with no pending call"),
                }
            }
            Message::Error {
                reply_serial,
                name,
                message,
            } => match lock_pending(&pending).remove(&reply_serial) {
                Some(tx) => {
                    let _ = tx.send(Err(CorralError::from_wire(&name, &message)));
                }
                None => {
                    trace!(conn = %id, serial = reply_serial, "error reply with no pending call")
                }
            },
            Message::MethodCall {
                serial,
                path,
                interface,
                member,
                args,
            } => {
                trace!(conn = %id, %path, %interface, %member, "incoming call");
                let delivered = events.send(PeerEvent::Call {
                    conn: id,
                    serial,
                    path,
                    interface,
                    member,
                    args,
                });
                if delivered.is_err() {
                    break;
                }
            }
            Message::Signal {
                path,
                interface,
                member,
                args,
            } => {
                trace!(conn = %id, %path, %interface, %member, "incoming signal");
                let delivered = events.send(PeerEvent::Signal {
                    conn: id,
                    path,
                    interface,
                    member,
                    args,
                });
                if delivered.is_err() {
                    break;
                }
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected { conn: id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (
        (PeerConnection, mpsc::UnboundedReceiver<PeerEvent>),
        (PeerConnection, mpsc::UnboundedReceiver<PeerEvent>),
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let client = PeerConnection::start(client_stream, client_tx).unwrap();
        let server = PeerConnection::start(server_stream, server_tx).unwrap();

        ((client, client_rx), (server, server_rx))
    }

    #[tokio::test]
    async fn test_call_and_reply() {
        let ((client, _client_rx), (server, mut server_rx)) = connected_pair().await;

        tokio::spawn(async move {
            if let Some(PeerEvent::Call { serial, member, .. }) = server_rx.recv().await {
                assert_eq!(member, "Ping");
                server.reply(serial, json!("pong")).unwrap();
            }
        });

        let reply = client
            .call("/p", "i.face", "Ping", Value::Null, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, json!("pong"));
    }

    #[tokio::test]
    async fn test_error_reply_maps_to_variant() {
        let ((client, _client_rx), (server, mut server_rx)) = connected_pair().await;

        tokio::spawn(async move {
            if let Some(PeerEvent::Call { serial, .. }) = server_rx.recv().await {
                server
                    .reply_error(
                        serial,
                        crate::protocol::names::error::ADDRESS_IN_USE,
                        "taken",
                    )
                    .unwrap();
            }
        });

        let err = client
            .call("/p", "i.face", "Register", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CorralError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn test_call_times_out_without_reply() {
        let ((client, _client_rx), (_server, _server_rx)) = connected_pair().await;

        let err = client
            .call("/p", "i.face", "Ping", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CorralError::CallTimeout(50)));
    }

    #[tokio::test]
    async fn test_signal_delivery() {
        let ((client, mut client_rx), (server, _server_rx)) = connected_pair().await;

        server
            .emit_signal("/p", "i.face", "Changed", json!({"State": "running"}))
            .unwrap();

        match client_rx.recv().await.unwrap() {
            PeerEvent::Signal { member, args, .. } => {
                assert_eq!(member, "Changed");
                assert_eq!(args, json!({"State": "running"}));
            }
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_produces_disconnected_on_the_far_side() {
        let ((client, _client_rx), (_server, mut server_rx)) = connected_pair().await;

        client.close();

        match server_rx.recv().await.unwrap() {
            PeerEvent::Disconnected { .. } => {}
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let _server = PeerConnection::start(server_stream, server_tx).unwrap();

        write_frame(&mut raw, b"not json").await.unwrap();
        let good = JsonCodec::encode(&Message::signal("/p", "i", "Ok", Value::Null)).unwrap();
        write_frame(&mut raw, &good).await.unwrap();

        // The garbage frame is logged and dropped; the next frame still lands.
        match server_rx.recv().await.unwrap() {
            PeerEvent::Signal { member, .. } => assert_eq!(member, "Ok"),
            other => panic!("expected signal, got {:?}", other),
        }
    }
}
