//! In-process application event bus, independent of any connection.
//!
//! Listeners are keyed by event name. `emit` dispatches every matching listener on its
//! own task, so a slow listener never delays the others and no ordering holds between
//! them.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::container::ComponentKey;
use crate::error::SocketError;
use crate::transport::SocketRef;

/// Transport context of the socket-bound handler that published an event.
#[derive(Clone)]
pub struct IoContext {
    pub socket: Option<SocketRef>,
    pub event_name: String,
    pub args: Vec<Value>,
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("socket", &self.socket.as_ref().map(|s| s.id().to_string()))
            .field("event_name", &self.event_name)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppEventContext {
    pub event_name: String,
    pub data: Value,
    pub io_context: Option<IoContext>,
}

impl AppEventContext {
    pub fn new(event_name: impl Into<String>, data: Value) -> Self {
        Self {
            event_name: event_name.into(),
            data,
            io_context: None,
        }
    }

    pub fn with_io_context(mut self, io_context: IoContext) -> Self {
        self.io_context = Some(io_context);
        self
    }
}

pub type AppEventHandler =
    Arc<dyn Fn(AppEventContext) -> BoxFuture<'static, Result<(), SocketError>> + Send + Sync>;

/// One registration: an event name bound to a controller method.
#[derive(Clone)]
pub struct AppListener {
    pub event: String,
    pub controller: ComponentKey,
    pub method: &'static str,
    handler: AppEventHandler,
}

impl AppListener {
    pub fn new(
        event: impl Into<String>,
        controller: ComponentKey,
        method: &'static str,
        handler: AppEventHandler,
    ) -> Self {
        Self {
            event: event.into(),
            controller,
            method,
            handler,
        }
    }

    fn matches(&self, event: &str, controller: TypeId, method: &str) -> bool {
        self.event == event && self.controller.type_id == controller && self.method == method
    }
}

impl fmt::Debug for AppListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppListener")
            .field("event", &self.event)
            .field("controller", &self.controller.type_name)
            .field("method", &self.method)
            .finish()
    }
}

/// Tasks started by one `emit`.
#[derive(Debug)]
pub struct Dispatch {
    tasks: Vec<JoinHandle<Result<(), SocketError>>>,
}

impl Dispatch {
    /// Number of listeners the event was dispatched to.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every listener and collect their outcomes.
    pub async fn wait(self) -> Vec<Result<(), SocketError>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            results.push(match task.await {
                Ok(result) => result,
                Err(e) => Err(SocketError::Handler(anyhow::anyhow!(
                    "application event listener panicked: {e}"
                ))),
            });
        }
        results
    }
}

#[derive(Default)]
pub struct AppEventBus {
    listeners: RwLock<HashMap<String, Vec<AppListener>>>,
}

impl fmt::Debug for AppEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> =
            listeners.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("AppEventBus")
            .field("listeners", &counts)
            .finish()
    }
}

impl AppEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, listener: AppListener) {
        tracing::debug!(
            event = %listener.event,
            controller = listener.controller.type_name,
            method = listener.method,
            "Application event listener registered"
        );
        self.listeners
            .write()
            .entry(listener.event.clone())
            .or_default()
            .push(listener);
    }

    /// Remove the exact (event, controller, method) registration. Returns whether one existed.
    pub fn off(&self, event: &str, controller: TypeId, method: &str) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !l.matches(event, controller, method));
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Remove every registration for `event`. Returns how many were removed.
    pub fn off_all(&self, event: &str) -> usize {
        self.listeners
            .write()
            .remove(event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Dispatch `ctx` to every listener of `ctx.event_name`. Unknown events are a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn emit(&self, ctx: AppEventContext) -> Dispatch {
        let handlers: Vec<(AppEventHandler, &'static str)> = self
            .listeners
            .read()
            .get(&ctx.event_name)
            .map(|list| list.iter().map(|l| (l.handler.clone(), l.method)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(event = %ctx.event_name, "No application event listeners");
        }

        let tasks = handlers
            .into_iter()
            .map(|(handler, method)| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let event = ctx.event_name.clone();
                    let result = handler(ctx).await;
                    if let Err(err) = &result {
                        tracing::error!(
                            %event,
                            method,
                            kind = err.kind(),
                            error = %err,
                            "Application event listener failed"
                        );
                    }
                    result
                })
            })
            .collect();

        Dispatch { tasks }
    }
}
