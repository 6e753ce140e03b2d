//! Middleware contracts and the explicit `next` continuation.
//!
//! A middleware receives a [`Next`] and must consume it exactly once: [`Next::proceed`]
//! lets the event through, [`Next::fail`] / [`Next::reject`] stop it with an error.
//! Returning `Err` from the middleware itself behaves like `fail`. Dropping `Next`
//! without calling it halts the chain silently.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::container::{default_factory, AnyInstance, Component};
use crate::error::SocketError;
use crate::transport::SocketRef;

/// `[event, ...args]` as seen by socket middlewares.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub event: String,
    pub args: Vec<Value>,
}

impl Packet {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// The packet flattened into a single tuple.
    pub fn to_tuple(&self) -> Vec<Value> {
        std::iter::once(Value::String(self.event.clone()))
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Continuation handed to every middleware.
#[derive(Debug)]
pub struct Next {
    middleware: &'static str,
    tx: oneshot::Sender<Result<(), SocketError>>,
}

impl Next {
    pub(crate) fn channel(
        middleware: &'static str,
    ) -> (Self, oneshot::Receiver<Result<(), SocketError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { middleware, tx }, rx)
    }

    pub fn proceed(self) {
        let _ = self.tx.send(Ok(()));
    }

    pub fn fail(self, err: impl Into<SocketError>) {
        let _ = self.tx.send(Err(err.into()));
    }

    /// Fail with a [`SocketError::Middleware`] naming this middleware.
    pub fn reject(self, reason: impl Into<String>) {
        let err = SocketError::Middleware {
            middleware: self.middleware.to_string(),
            reason: reason.into(),
        };
        self.fail(err);
    }
}

/// What a middleware decided.
#[derive(Debug)]
pub(crate) enum Outcome {
    Continue,
    Halt,
    Failed(SocketError),
}

/// Run one middleware call and read its continuation.
pub(crate) async fn drive<F>(
    call: F,
    rx: oneshot::Receiver<Result<(), SocketError>>,
) -> Outcome
where
    F: Future<Output = Result<(), SocketError>>,
{
    if let Err(err) = call.await {
        return Outcome::Failed(err);
    }
    match rx.await {
        Ok(Ok(())) => Outcome::Continue,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(_) => Outcome::Halt,
    }
}

/// Runs once per accepted connection, before `connection` fires.
#[async_trait]
pub trait ServerMiddleware: Send + Sync {
    async fn handle(&self, socket: SocketRef, next: Next) -> Result<(), SocketError>;
}

/// Runs before an inbound packet reaches its handlers.
///
/// Used both as a transport-level packet middleware and as a declarative
/// per-class / per-method middleware.
#[async_trait]
pub trait SocketMiddleware: Send + Sync {
    async fn handle(&self, socket: SocketRef, packet: Packet, next: Next)
        -> Result<(), SocketError>;
}

/// Receives every per-event error caught by the controller error wrapper.
#[async_trait]
pub trait ErrorMiddleware: Send + Sync {
    async fn handle_error(&self, error: SocketError, socket: Option<SocketRef>);
}

fn as_socket_middleware<M: SocketMiddleware + 'static>(
    instance: AnyInstance,
) -> Option<Arc<dyn SocketMiddleware>> {
    instance
        .downcast::<M>()
        .ok()
        .map(|m| m as Arc<dyn SocketMiddleware>)
}

fn as_server_middleware<M: ServerMiddleware + 'static>(
    instance: AnyInstance,
) -> Option<Arc<dyn ServerMiddleware>> {
    instance
        .downcast::<M>()
        .ok()
        .map(|m| m as Arc<dyn ServerMiddleware>)
}

fn as_error_middleware<M: ErrorMiddleware + 'static>(
    instance: AnyInstance,
) -> Option<Arc<dyn ErrorMiddleware>> {
    instance
        .downcast::<M>()
        .ok()
        .map(|m| m as Arc<dyn ErrorMiddleware>)
}

/// Component for a socket middleware built with `M::default()` when no container is set.
pub fn socket_middleware<M>() -> Component<dyn SocketMiddleware>
where
    M: SocketMiddleware + Default + 'static,
{
    Component::from_parts::<M>(Some(default_factory::<M>()), as_socket_middleware::<M>)
}

/// Socket middleware that only an external container can provide.
pub fn external_socket_middleware<M>() -> Component<dyn SocketMiddleware>
where
    M: SocketMiddleware + 'static,
{
    Component::from_parts::<M>(None, as_socket_middleware::<M>)
}

pub fn server_middleware<M>() -> Component<dyn ServerMiddleware>
where
    M: ServerMiddleware + Default + 'static,
{
    Component::from_parts::<M>(Some(default_factory::<M>()), as_server_middleware::<M>)
}

pub fn error_middleware<M>() -> Component<dyn ErrorMiddleware>
where
    M: ErrorMiddleware + Default + 'static,
{
    Component::from_parts::<M>(Some(default_factory::<M>()), as_error_middleware::<M>)
}
