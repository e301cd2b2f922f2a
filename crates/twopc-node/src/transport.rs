//! # transport
//!
//! why: move protocol messages between named nodes without the state machines caring how
//! relations: used by coordinator.rs and participant.rs; server.rs is the tcp receiving side
//! what: Transport and MessageHandler traits, TcpTransport, LocalNetwork for testing

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;
use twopc_core::{Message, MessageError, NodeId};

/// connection failures; never fatal to the protocol
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("no address known for node {0}")]
    UnknownPeer(NodeId),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(NodeId),

    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("malformed reply: {0}")]
    Malformed(#[from] MessageError),
}

/// reliable point-to-point exchange: one message out, at most one reply back
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &NodeId, message: Message) -> Result<Option<Message>, TransportError>;
}

/// receiving side of an exchange
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// handle one inbound message, returning the reply to send back (if any)
    async fn handle(&self, message: Message) -> Option<Message>;
}

// -- tcp transport --

/// tcp transport: one short-lived connection per message, newline framed
pub struct TcpTransport {
    peers: HashMap<NodeId, SocketAddr>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(peers: HashMap<NodeId, SocketAddr>, connect_timeout: Duration) -> Self {
        Self {
            peers,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, to: &NodeId, message: Message) -> Result<Option<Message>, TransportError> {
        let addr = self
            .peers
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(to.clone()))??;

        let (reader, mut writer) = stream.into_split();
        writer.write_all(message.encode().as_bytes()).await?;
        writer.flush().await?;
        trace!(peer = %to, message = %message, "sent");

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(line.parse()?))
    }
}

// -- in-process network --

/// in-process network for testing
///
/// routes messages straight to registered handlers, passing them through
/// the text codec on the way. nodes can be taken down to simulate crashes
/// and lost messages.
#[derive(Default)]
pub struct LocalNetwork {
    handlers: RwLock<HashMap<NodeId, Arc<dyn MessageHandler>>>,
    down: RwLock<HashSet<NodeId>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// attach (or replace) the handler reachable under `id`
    pub fn register(&self, id: NodeId, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().insert(id, handler);
    }

    /// every send to `id` fails until `bring_up` is called
    pub fn take_down(&self, id: &NodeId) {
        self.down.write().insert(id.clone());
    }

    pub fn bring_up(&self, id: &NodeId) {
        self.down.write().remove(id);
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn send(&self, to: &NodeId, message: Message) -> Result<Option<Message>, TransportError> {
        if self.down.read().contains(to) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        let handler = self
            .handlers
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;

        let inbound: Message = message.encode().parse()?;
        let reply = handler.handle(inbound).await;

        // a node that went down mid-exchange never gets its reply out
        if self.down.read().contains(to) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        match reply {
            Some(reply) => Ok(Some(reply.encode().parse()?)),
            None => Ok(None),
        }
    }
}
