//! The uniform calling convention every wrapper stage and handler body sees.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SocketError;
use crate::events::AppEventContext;
use crate::metadata::{ListenerMetadata, ListenerScope, MethodMetadata};
use crate::transport::{RawEvent, SessionData, SocketRef};

/// Where an invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationSource {
    Server,
    Socket,
    AppEvent,
}

impl From<ListenerScope> for InvocationSource {
    fn from(scope: ListenerScope) -> Self {
        match scope {
            ListenerScope::Server => Self::Server,
            ListenerScope::Socket => Self::Socket,
        }
    }
}

/// Connection session bag, optionally narrowed to one key.
#[derive(Debug, Clone)]
pub struct SessionView {
    data: SessionData,
    key: Option<String>,
}

impl SessionView {
    pub fn new(data: SessionData, key: Option<String>) -> Self {
        Self { data, key }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The narrowed value, or the whole bag as an object when not narrowed.
    pub fn value(&self) -> Option<Value> {
        match &self.key {
            Some(key) => self.data.get(key),
            None => Some(Value::Object(self.data.snapshot().into_iter().collect())),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.set(key, value);
    }

    /// Write the narrowed key; no-op when not narrowed.
    pub fn replace(&self, value: Value) {
        if let Some(key) = &self.key {
            self.data.set(key.clone(), value);
        }
    }
}

/// One injected handler parameter.
#[derive(Clone)]
pub enum Param {
    Socket(SocketRef),
    Data(Value),
    EventName(String),
    CurrentUser(Value),
    Session(SessionView),
    /// Position with no declared injection, or nothing available to inject.
    Missing,
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(s) => write!(f, "Socket({})", s.id()),
            Self::Data(v) => write!(f, "Data({v})"),
            Self::EventName(e) => write!(f, "EventName({e})"),
            Self::CurrentUser(u) => write!(f, "CurrentUser({u})"),
            Self::Session(s) => write!(f, "Session({:?})", s.key()),
            Self::Missing => f.write_str("Missing"),
        }
    }
}

/// A normalized call of one controller method.
#[derive(Clone)]
pub struct Invocation {
    pub event: String,
    pub args: Vec<Value>,
    pub socket: Option<SocketRef>,
    pub source: InvocationSource,
    /// The listener record that matched; `None` for application events.
    pub listener: Option<ListenerMetadata>,
    pub method: Arc<MethodMetadata>,
    pub controller: &'static str,
    pub namespace: String,
    /// Filled by the argument injector; `None` in raw pass-through mode.
    pub params: Option<Vec<Param>>,
    pub app_event: Option<AppEventContext>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("controller", &self.controller)
            .field("method", &self.method.name)
            .field("event", &self.event)
            .field("source", &self.source)
            .field("namespace", &self.namespace)
            .field("socket", &self.socket.as_ref().map(|s| s.id().to_string()))
            .field("args", &self.args)
            .field("params", &self.params)
            .finish()
    }
}

impl Invocation {
    pub(crate) fn from_raw(
        raw: RawEvent,
        listener: &ListenerMetadata,
        method: Arc<MethodMetadata>,
        controller: &'static str,
        namespace: &str,
    ) -> Self {
        Self {
            event: raw.event,
            args: raw.args,
            socket: raw.socket,
            source: listener.scope.into(),
            listener: Some(listener.clone()),
            method,
            controller,
            namespace: namespace.to_string(),
            params: None,
            app_event: None,
        }
    }

    pub(crate) fn from_app_event(
        ctx: AppEventContext,
        method: Arc<MethodMetadata>,
        controller: &'static str,
        namespace: &str,
    ) -> Self {
        Self {
            event: ctx.event_name.clone(),
            args: vec![ctx.data.clone()],
            socket: ctx.io_context.as_ref().and_then(|io| io.socket.clone()),
            source: InvocationSource::AppEvent,
            listener: None,
            method,
            controller,
            namespace: namespace.to_string(),
            params: None,
            app_event: Some(ctx),
        }
    }

    pub fn params(&self) -> &[Param] {
        self.params.as_deref().unwrap_or(&[])
    }

    pub fn param(&self, index: usize) -> Option<&Param> {
        self.params().get(index)
    }

    /// Payload at `index`: the injected data parameter when injection ran, the raw
    /// argument otherwise.
    pub fn data(&self, index: usize) -> Option<&Value> {
        match &self.params {
            Some(params) => match params.get(index) {
                Some(Param::Data(v)) => Some(v),
                _ => None,
            },
            None => self.args.get(index),
        }
    }

    /// [`Invocation::data`] deserialized into `T`.
    pub fn payload<T: DeserializeOwned>(&self, index: usize) -> Result<T, SocketError> {
        let value = self.data(index).ok_or_else(|| {
            SocketError::InvalidArgument(format!("no payload at position {index}"))
        })?;
        T::deserialize(value).map_err(|e| {
            SocketError::InvalidArgument(format!("payload at position {index}: {e}"))
        })
    }

    pub fn current_user(&self) -> Option<&Value> {
        self.params().iter().find_map(|p| match p {
            Param::CurrentUser(user) => Some(user),
            _ => None,
        })
    }

    pub fn session(&self, index: usize) -> Option<&SessionView> {
        match self.param(index) {
            Some(Param::Session(view)) => Some(view),
            _ => None,
        }
    }

    pub fn require_socket(&self) -> Result<&SocketRef, SocketError> {
        self.socket.as_ref().ok_or_else(|| {
            SocketError::InvalidArgument(format!(
                "'{}::{}' was invoked without a connection",
                self.controller, self.method.name
            ))
        })
    }

    /// The connection, if this invocation came in through a socket listener.
    pub(crate) fn inbound_socket(&self) -> Option<SocketRef> {
        match self.source {
            InvocationSource::Socket => self.socket.clone(),
            _ => None,
        }
    }
}

/// Description of one outbound emission returned by a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitterOption {
    pub to: Option<String>,
    pub message: Option<String>,
    pub data: Value,
    pub disable_emit: bool,
    /// Deliver to the connection of this user, found through the user socket locator.
    pub to_user: Option<Value>,
}

impl EmitterOption {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn to(mut self, room: impl Into<String>) -> Self {
        self.to = Some(room.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn to_user(mut self, user: Value) -> Self {
        self.to_user = Some(user);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disable_emit = true;
        self
    }
}

/// What a handler produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Reply {
    #[default]
    None,
    Value(Value),
    Emit(EmitterOption),
    EmitMany(Vec<EmitterOption>),
}

impl Reply {
    /// Every emission this reply describes, with unset fields left for the emitter defaults.
    pub fn emissions(&self) -> Vec<EmitterOption> {
        match self {
            Self::None => Vec::new(),
            Self::Value(v) => vec![EmitterOption::new(v.clone())],
            Self::Emit(option) => vec![option.clone()],
            Self::EmitMany(options) => options.clone(),
        }
    }

    /// The data carried by this reply.
    pub fn data(&self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Emit(option) => option.data.clone(),
            Self::EmitMany(options) => {
                Value::Array(options.iter().map(|o| o.data.clone()).collect())
            }
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<EmitterOption> for Reply {
    fn from(option: EmitterOption) -> Self {
        Self::Emit(option)
    }
}

impl From<Vec<EmitterOption>> for Reply {
    fn from(options: Vec<EmitterOption>) -> Self {
        Self::EmitMany(options)
    }
}

/// `null`, `false`, `0`, `""`.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

pub type HandlerResult = Result<Reply, SocketError>;

/// A controller method as seen by the wrapper chain.
pub type MethodHandler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
