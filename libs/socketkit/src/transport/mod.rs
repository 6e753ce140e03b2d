//! Transport contracts.
//!
//! The realtime transport is an external collaborator; socketkit only needs the
//! operations below. [`LocalTransport`] is an in-process implementation used by the
//! demo binary and the test-suite.

mod local;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::SocketError;

pub use local::{Emission, LocalNamespace, LocalSocket, LocalTransport};

/// Server-level event fired once per accepted connection.
pub const CONNECTION_EVENT: &str = "connection";
/// Socket-level event fired after the connection is gone.
pub const DISCONNECT_EVENT: &str = "disconnect";
/// Socket-level event fired right before rooms are left.
pub const DISCONNECTING_EVENT: &str = "disconnecting";
/// Namespace used when nothing else is declared.
pub const DEFAULT_NAMESPACE: &str = "/";

pub type SocketRef = Arc<dyn Socket>;

/// One event as delivered by the transport, before any normalization.
#[derive(Clone)]
pub struct RawEvent {
    pub event: String,
    pub args: Vec<Value>,
    pub socket: Option<SocketRef>,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, args: Vec<Value>, socket: Option<SocketRef>) -> Self {
        Self {
            event: event.into(),
            args,
            socket,
        }
    }
}

impl fmt::Debug for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEvent")
            .field("event", &self.event)
            .field("args", &self.args)
            .field("socket", &self.socket.as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

/// Callback attached to a transport event.
pub type EventHandler =
    Arc<dyn Fn(RawEvent) -> BoxFuture<'static, Result<(), SocketError>> + Send + Sync>;

/// Connection-level middleware (`io.use`): runs before `connection` fires.
pub type ConnectMiddleware =
    Arc<dyn Fn(SocketRef) -> BoxFuture<'static, Result<(), SocketError>> + Send + Sync>;

/// Packet-level middleware (`socket.use`): runs before every inbound event of a socket.
pub type PacketMiddleware =
    Arc<dyn Fn(SocketRef, RawEvent) -> BoxFuture<'static, Result<(), SocketError>> + Send + Sync>;

/// Per-connection key/value bag shared by every handler of that connection.
#[derive(Clone, Default)]
pub struct SessionData(Arc<RwLock<HashMap<String, Value>>>);

impl SessionData {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.write().remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.0.read().clone()
    }
}

impl fmt::Debug for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.read().iter()).finish()
    }
}

/// A single client connection.
#[async_trait]
pub trait Socket: Send + Sync {
    fn id(&self) -> &str;
    fn namespace(&self) -> &str;
    fn data(&self) -> &SessionData;

    fn on(&self, event: &str, handler: EventHandler);
    fn once(&self, event: &str, handler: EventHandler);
    fn on_any(&self, handler: EventHandler);
    fn on_any_outgoing(&self, handler: EventHandler);
    fn use_middleware(&self, middleware: PacketMiddleware);

    fn join(&self, room: &str);
    fn leave(&self, room: &str);
    fn rooms(&self) -> Vec<String>;

    /// Emit to this connection only.
    async fn emit(&self, event: &str, data: Value) -> Result<(), SocketError>;

    /// Emit to every connection of the namespace (or of `room`) except this one.
    async fn broadcast(&self, room: Option<&str>, event: &str, data: Value)
        -> Result<(), SocketError>;
}

/// A partition of the connection space.
#[async_trait]
pub trait Namespace: Send + Sync {
    fn name(&self) -> &str;

    fn on(&self, event: &str, handler: EventHandler);
    fn once(&self, event: &str, handler: EventHandler);
    fn use_middleware(&self, middleware: ConnectMiddleware);

    /// Emit to every connection of the namespace, or only to members of `room`.
    async fn emit(&self, room: Option<&str>, event: &str, data: Value) -> Result<(), SocketError>;
}

/// The underlying connection server.
pub trait Transport: Send + Sync {
    fn of(&self, namespace: &str) -> Arc<dyn Namespace>;
}
