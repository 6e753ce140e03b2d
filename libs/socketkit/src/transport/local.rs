//! In-process transport.
//!
//! Connections are plain objects driven by [`LocalSocket::dispatch`]; every emission a
//! connection receives is recorded so callers can inspect it. Errors that no error
//! middleware handled end up in [`LocalTransport::take_unhandled_errors`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use super::{
    ConnectMiddleware, EventHandler, Namespace, PacketMiddleware, RawEvent, SessionData, Socket,
    SocketRef, Transport, CONNECTION_EVENT, DISCONNECTING_EVENT, DISCONNECT_EVENT,
};
use crate::error::SocketError;

type UnhandledSink = Arc<Mutex<Vec<SocketError>>>;

fn report_unhandled(sink: &UnhandledSink, event: &str, err: SocketError) {
    tracing::error!(event, kind = err.kind(), error = %err, "Unhandled error in event handler");
    sink.lock().push(err);
}

#[derive(Clone)]
struct Listener {
    handler: EventHandler,
    once: bool,
}

#[derive(Default)]
struct ListenerTable(RwLock<HashMap<String, Vec<Listener>>>);

impl ListenerTable {
    fn add(&self, event: &str, handler: EventHandler, once: bool) {
        self.0
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Listener { handler, once });
    }

    /// Handlers to run for `event`, in registration order; `once` entries are consumed.
    fn take(&self, event: &str) -> Vec<EventHandler> {
        let mut table = self.0.write();
        let Some(list) = table.get_mut(event) else {
            return Vec::new();
        };
        let handlers = list.iter().map(|l| l.handler.clone()).collect();
        list.retain(|l| !l.once);
        handlers
    }

    fn count(&self, event: &str) -> usize {
        self.0.read().get(event).map(Vec::len).unwrap_or(0)
    }
}

/// Something a connection received from the server side.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub event: String,
    pub data: Value,
}

/// In-process transport holding any number of namespaces.
#[derive(Default)]
pub struct LocalTransport {
    namespaces: DashMap<String, Arc<LocalNamespace>>,
    unhandled: UnhandledSink,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a namespace.
    pub fn namespace(&self, name: &str) -> Arc<LocalNamespace> {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| LocalNamespace::new(name, self.unhandled.clone()))
            .clone()
    }

    /// Open a new client connection on `namespace`.
    pub async fn connect(&self, namespace: &str) -> Result<Arc<LocalSocket>, SocketError> {
        self.namespace(namespace).accept().await
    }

    /// Look a live connection up by id across all namespaces.
    pub fn find_socket(&self, id: &str) -> Option<Arc<LocalSocket>> {
        self.namespaces
            .iter()
            .find_map(|ns| ns.value().sockets().into_iter().find(|s| s.id == id))
    }

    /// Drain the errors that reached the unhandled path.
    pub fn take_unhandled_errors(&self) -> Vec<SocketError> {
        std::mem::take(&mut *self.unhandled.lock())
    }
}

impl Transport for LocalTransport {
    fn of(&self, namespace: &str) -> Arc<dyn Namespace> {
        self.namespace(namespace)
    }
}

pub struct LocalNamespace {
    name: String,
    me: Weak<LocalNamespace>,
    sockets: RwLock<Vec<Arc<LocalSocket>>>,
    listeners: ListenerTable,
    middlewares: RwLock<Vec<ConnectMiddleware>>,
    unhandled: UnhandledSink,
}

impl LocalNamespace {
    fn new(name: &str, unhandled: UnhandledSink) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            me: me.clone(),
            sockets: RwLock::new(Vec::new()),
            listeners: ListenerTable::default(),
            middlewares: RwLock::new(Vec::new()),
            unhandled,
        })
    }

    pub fn sockets(&self) -> Vec<Arc<LocalSocket>> {
        self.sockets.read().clone()
    }

    /// Number of handlers attached to a server-level event.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    async fn accept(&self) -> Result<Arc<LocalSocket>, SocketError> {
        let socket = LocalSocket::new(&self.name, self.me.clone(), self.unhandled.clone());
        let socket_ref: SocketRef = socket.clone();

        let middlewares = self.middlewares.read().clone();
        for middleware in middlewares {
            if let Err(err) = middleware(socket_ref.clone()).await {
                tracing::debug!(
                    namespace = %self.name,
                    socket_id = %socket.id,
                    error = %err,
                    "Connection rejected by middleware"
                );
                socket.connected.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }

        self.sockets.write().push(socket.clone());
        tracing::debug!(namespace = %self.name, socket_id = %socket.id, "Connection accepted");

        self.fire(RawEvent::new(CONNECTION_EVENT, Vec::new(), Some(socket_ref)))
            .await;
        Ok(socket)
    }

    async fn fire(&self, raw: RawEvent) {
        for handler in self.listeners.take(&raw.event) {
            if let Err(err) = handler(raw.clone()).await {
                report_unhandled(&self.unhandled, &raw.event, err);
            }
        }
    }

    fn remove(&self, id: &str) {
        self.sockets.write().retain(|s| s.id != id);
    }

    fn targets(&self, room: Option<&str>, except: Option<&str>) -> Vec<Arc<LocalSocket>> {
        self.sockets
            .read()
            .iter()
            .filter(|s| room.map_or(true, |r| s.in_room(r)))
            .filter(|s| except.map_or(true, |id| s.id != id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Namespace for LocalNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.listeners.add(event, handler, false);
    }

    fn once(&self, event: &str, handler: EventHandler) {
        self.listeners.add(event, handler, true);
    }

    fn use_middleware(&self, middleware: ConnectMiddleware) {
        self.middlewares.write().push(middleware);
    }

    async fn emit(&self, room: Option<&str>, event: &str, data: Value) -> Result<(), SocketError> {
        for socket in self.targets(room, None) {
            socket.deliver(event, data.clone()).await;
        }
        Ok(())
    }
}

pub struct LocalSocket {
    id: String,
    namespace: String,
    me: Weak<LocalSocket>,
    ns: Weak<LocalNamespace>,
    data: SessionData,
    rooms: RwLock<BTreeSet<String>>,
    listeners: ListenerTable,
    any: RwLock<Vec<EventHandler>>,
    any_outgoing: RwLock<Vec<EventHandler>>,
    middlewares: RwLock<Vec<PacketMiddleware>>,
    received: Mutex<Vec<Emission>>,
    connected: AtomicBool,
    unhandled: UnhandledSink,
}

impl LocalSocket {
    fn new(namespace: &str, ns: Weak<LocalNamespace>, unhandled: UnhandledSink) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        let mut rooms = BTreeSet::new();
        // every connection sits in a room named after itself
        rooms.insert(id.clone());
        Arc::new_cyclic(|me| Self {
            id,
            namespace: namespace.to_string(),
            me: me.clone(),
            ns,
            data: SessionData::default(),
            rooms: RwLock::new(rooms),
            listeners: ListenerTable::default(),
            any: RwLock::new(Vec::new()),
            any_outgoing: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            unhandled,
        })
    }

    fn socket_ref(&self) -> Result<SocketRef, SocketError> {
        self.me
            .upgrade()
            .map(|s| s as SocketRef)
            .ok_or_else(|| SocketError::Transport(format!("socket '{}' was dropped", self.id)))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn in_room(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }

    /// Deliver a client-sent event: packet middlewares first, then catch-all handlers,
    /// then the handlers of `event` in registration order.
    ///
    /// A middleware rejection is returned to the caller; handler failures go to the
    /// unhandled-error path and do not stop the remaining handlers.
    pub async fn dispatch(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::Transport(format!(
                "socket '{}' is disconnected",
                self.id
            )));
        }
        let me = self.socket_ref()?;
        let raw = RawEvent::new(event, args, Some(me.clone()));

        let middlewares = self.middlewares.read().clone();
        for middleware in middlewares {
            middleware(me.clone(), raw.clone()).await?;
        }

        let any = self.any.read().clone();
        for handler in any {
            if let Err(err) = handler(raw.clone()).await {
                report_unhandled(&self.unhandled, event, err);
            }
        }

        self.fire(raw).await;
        Ok(())
    }

    /// Close the connection: `disconnecting` runs while rooms are still joined,
    /// `disconnect` after they are left.
    pub async fn disconnect(&self, reason: &str) -> Result<(), SocketError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let me = self.socket_ref()?;
        let args = vec![Value::String(reason.to_string())];

        self.fire(RawEvent::new(DISCONNECTING_EVENT, args.clone(), Some(me.clone())))
            .await;
        self.rooms.write().clear();
        if let Some(ns) = self.ns.upgrade() {
            ns.remove(&self.id);
        }
        self.fire(RawEvent::new(DISCONNECT_EVENT, args, Some(me)))
            .await;
        tracing::debug!(namespace = %self.namespace, socket_id = %self.id, reason, "Disconnected");
        Ok(())
    }

    /// Everything this connection received, in order.
    pub fn received(&self) -> Vec<Emission> {
        self.received.lock().clone()
    }

    /// Payloads received for one event name.
    pub fn received_for(&self, event: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.data.clone())
            .collect()
    }

    /// Number of handlers attached to `event` on this connection.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    async fn fire(&self, raw: RawEvent) {
        for handler in self.listeners.take(&raw.event) {
            if let Err(err) = handler(raw.clone()).await {
                report_unhandled(&self.unhandled, &raw.event, err);
            }
        }
    }

    async fn deliver(&self, event: &str, data: Value) {
        if !self.is_connected() {
            return;
        }
        self.received.lock().push(Emission {
            event: event.to_string(),
            data: data.clone(),
        });

        let outgoing = self.any_outgoing.read().clone();
        if outgoing.is_empty() {
            return;
        }
        let Ok(me) = self.socket_ref() else {
            return;
        };
        let raw = RawEvent::new(event, vec![data], Some(me));
        for handler in outgoing {
            if let Err(err) = handler(raw.clone()).await {
                report_unhandled(&self.unhandled, event, err);
            }
        }
    }
}

#[async_trait]
impl Socket for LocalSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn data(&self) -> &SessionData {
        &self.data
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.listeners.add(event, handler, false);
    }

    fn once(&self, event: &str, handler: EventHandler) {
        self.listeners.add(event, handler, true);
    }

    fn on_any(&self, handler: EventHandler) {
        self.any.write().push(handler);
    }

    fn on_any_outgoing(&self, handler: EventHandler) {
        self.any_outgoing.write().push(handler);
    }

    fn use_middleware(&self, middleware: PacketMiddleware) {
        self.middlewares.write().push(middleware);
    }

    fn join(&self, room: &str) {
        self.rooms.write().insert(room.to_string());
    }

    fn leave(&self, room: &str) {
        self.rooms.write().remove(room);
    }

    fn rooms(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }

    async fn emit(&self, event: &str, data: Value) -> Result<(), SocketError> {
        self.deliver(event, data).await;
        Ok(())
    }

    async fn broadcast(
        &self,
        room: Option<&str>,
        event: &str,
        data: Value,
    ) -> Result<(), SocketError> {
        let ns = self
            .ns
            .upgrade()
            .ok_or_else(|| {
                SocketError::Transport(format!("namespace '{}' is gone", self.namespace))
            })?;
        for socket in ns.targets(room, Some(&self.id)) {
            socket.deliver(event, data.clone()).await;
        }
        Ok(())
    }
}
