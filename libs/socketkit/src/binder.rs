//! Attaches wrapped handlers to the transport.
//!
//! Server-scope listeners are bound immediately. Socket-scope listeners become hooks
//! collected per namespace; [`EventBinder::flush`] registers one `connection` listener
//! per namespace that runs every hook, in order, for the connection that just arrived.

use std::sync::Arc;

use futures::FutureExt;

use crate::error::{ConfigError, SocketError};
use crate::metadata::{ListenerAction, ListenerMetadata, ListenerScope};
use crate::transport::{
    EventHandler, Namespace, PacketMiddleware, RawEvent, Socket, SocketRef, Transport,
    CONNECTION_EVENT,
};

type SocketHook = Arc<dyn Fn(&SocketRef) + Send + Sync>;

struct ConnectionGroup {
    event: &'static str,
    namespace: String,
    /// Leading hooks that install packet middlewares.
    middlewares: usize,
    hooks: Vec<SocketHook>,
}

pub(crate) struct EventBinder {
    transport: Arc<dyn Transport>,
    groups: Vec<ConnectionGroup>,
}

impl EventBinder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            groups: Vec::new(),
        }
    }

    fn group(&mut self, namespace: &str) -> &mut ConnectionGroup {
        let pos = match self.groups.iter().position(|g| g.namespace == namespace) {
            Some(pos) => pos,
            None => {
                self.groups.push(ConnectionGroup {
                    event: CONNECTION_EVENT,
                    namespace: namespace.to_string(),
                    middlewares: 0,
                    hooks: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[pos]
    }

    /// Bind `handler` according to one listener declaration.
    pub fn bind_listener(
        &mut self,
        namespace: &str,
        listener: &ListenerMetadata,
        handler: EventHandler,
    ) -> Result<(), ConfigError> {
        let unsupported = || ConfigError::UnsupportedListener {
            scope: listener.scope.as_str(),
            action: listener.action.as_str(),
        };

        match listener.scope {
            ListenerScope::Server => {
                let event = listener.event.as_deref().ok_or_else(unsupported)?;
                let ns = self.transport.of(namespace);
                match listener.action {
                    ListenerAction::On => ns.on(event, handler),
                    ListenerAction::Once => ns.once(event, handler),
                    ListenerAction::OnAny | ListenerAction::OnAnyOutgoing => {
                        return Err(unsupported());
                    }
                }
                tracing::debug!(
                    namespace,
                    listener = %listener.describe(),
                    "Server listener bound"
                );
            }
            ListenerScope::Socket => {
                let hook: SocketHook = match (listener.action, listener.event.clone()) {
                    (ListenerAction::On, Some(event)) => {
                        Arc::new(move |socket: &SocketRef| socket.on(&event, handler.clone()))
                    }
                    (ListenerAction::Once, Some(event)) => {
                        Arc::new(move |socket: &SocketRef| socket.once(&event, handler.clone()))
                    }
                    (ListenerAction::OnAny, _) => {
                        Arc::new(move |socket: &SocketRef| socket.on_any(handler.clone()))
                    }
                    (ListenerAction::OnAnyOutgoing, _) => {
                        Arc::new(move |socket: &SocketRef| socket.on_any_outgoing(handler.clone()))
                    }
                    (ListenerAction::On | ListenerAction::Once, None) => return Err(unsupported()),
                };
                self.group(namespace).hooks.push(hook);
                tracing::debug!(
                    namespace,
                    listener = %listener.describe(),
                    "Socket listener deferred"
                );
            }
        }
        Ok(())
    }

    /// Install a packet middleware on every connection of `namespace`, ahead of the listeners.
    pub fn add_socket_middleware(&mut self, namespace: &str, middleware: PacketMiddleware) {
        let group = self.group(namespace);
        let hook: SocketHook =
            Arc::new(move |socket: &SocketRef| socket.use_middleware(middleware.clone()));
        group.hooks.insert(group.middlewares, hook);
        group.middlewares += 1;
    }

    /// Register one `connection` listener per namespace. Returns how many were registered.
    pub fn flush(self) -> usize {
        let count = self.groups.len();
        for group in self.groups {
            let hooks = Arc::new(group.hooks);
            let namespace = group.namespace.clone();
            let handler: EventHandler = Arc::new(move |raw: RawEvent| {
                let result = match &raw.socket {
                    Some(socket) => {
                        tracing::trace!(
                            namespace = %namespace,
                            socket_id = socket.id(),
                            hooks = hooks.len(),
                            "Attaching socket listeners"
                        );
                        hooks.iter().for_each(|hook| hook(socket));
                        Ok(())
                    }
                    None => Err(SocketError::Transport(format!(
                        "'{}' fired without a connection",
                        raw.event
                    ))),
                };
                async move { result }.boxed()
            });
            self.transport.of(&group.namespace).on(group.event, handler);
            tracing::debug!(namespace = %group.namespace, "Connection listener registered");
        }
        count
    }
}
