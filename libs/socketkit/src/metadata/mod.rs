//! Structured records produced by decorators.

mod store;

use std::fmt;

use crate::container::{Component, ComponentKey};
use crate::middleware::SocketMiddleware;
use crate::throttle::ThrottleSpec;
use crate::transport::{DEFAULT_NAMESPACE, DISCONNECTING_EVENT, DISCONNECT_EVENT};
use crate::validation::ParamType;

pub use store::{ControllerRef, MetadataScope, MetadataStore};

/// Where a listener or emitter is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// The namespace itself.
    Server,
    /// Each connection of the namespace.
    Socket,
}

impl ListenerScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Socket => "socket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerAction {
    On,
    Once,
    OnAny,
    OnAnyOutgoing,
}

impl ListenerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Once => "once",
            Self::OnAny => "onAny",
            Self::OnAnyOutgoing => "onAnyOutgoing",
        }
    }
}

/// No payload is delivered for these events, so they are never validated.
pub fn is_payloadless_event(event: &str) -> bool {
    event == DISCONNECT_EVENT || event == DISCONNECTING_EVENT
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerMetadata {
    pub scope: ListenerScope,
    pub action: ListenerAction,
    /// `None` for the catch-all actions.
    pub event: Option<String>,
    pub data_check: bool,
}

impl ListenerMetadata {
    pub fn new(
        scope: ListenerScope,
        action: ListenerAction,
        event: Option<String>,
        data_check: bool,
    ) -> Self {
        let data_check = data_check && !event.as_deref().is_some_and(is_payloadless_event);
        Self {
            scope,
            action,
            event,
            data_check,
        }
    }

    /// Turn validation off; it can never be turned back on for payloadless events.
    pub fn with_data_check(mut self, data_check: bool) -> Self {
        self.data_check = data_check && !self.event.as_deref().is_some_and(is_payloadless_event);
        self
    }

    pub fn describe(&self) -> String {
        match &self.event {
            Some(event) => format!("{}.{}({event})", self.scope.as_str(), self.action.as_str()),
            None => format!("{}.{}", self.scope.as_str(), self.action.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterAction {
    /// Emit to a room (or the whole namespace).
    EmitTo,
    /// Emit back to the originating side.
    EmitSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterMetadata {
    pub scope: ListenerScope,
    pub action: EmitterAction,
    /// Default outbound event name; may be empty when every reply names its own.
    pub message: String,
    pub to: Option<String>,
}

/// What to inject at one handler parameter position.
#[derive(Debug, Clone)]
pub enum MethodArgMetadata {
    Socket {
        index: usize,
    },
    Data {
        index: usize,
        data_index: usize,
        param_type: ParamType,
    },
    EventName {
        index: usize,
    },
    CurrentUser {
        index: usize,
    },
    SocketDataAttribute {
        index: usize,
        data_key: Option<String>,
    },
}

impl MethodArgMetadata {
    pub fn index(&self) -> usize {
        match self {
            Self::Socket { index }
            | Self::Data { index, .. }
            | Self::EventName { index }
            | Self::CurrentUser { index }
            | Self::SocketDataAttribute { index, .. } => *index,
        }
    }

    pub fn value_type(&self) -> &'static str {
        match self {
            Self::Socket { .. } => "socket",
            Self::Data { .. } => "data",
            Self::EventName { .. } => "eventName",
            Self::CurrentUser { .. } => "currentUser",
            Self::SocketDataAttribute { .. } => "socketDataAttribute",
        }
    }
}

#[derive(Clone)]
pub struct MethodMetadata {
    pub name: &'static str,
    pub listeners: Vec<ListenerMetadata>,
    pub emitters: Vec<EmitterMetadata>,
    /// Sorted by parameter index.
    pub args: Vec<MethodArgMetadata>,
    pub middlewares: Vec<Component<dyn SocketMiddleware>>,
    pub throttle: Option<ThrottleSpec>,
    pub skip_validation: bool,
    /// Application events this method listens to.
    pub app_listeners: Vec<String>,
    /// Application events this method's result is published as.
    pub app_emitters: Vec<String>,
}

impl MethodMetadata {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Vec::new(),
            emitters: Vec::new(),
            args: Vec::new(),
            middlewares: Vec::new(),
            throttle: None,
            skip_validation: false,
            app_listeners: Vec::new(),
            app_emitters: Vec::new(),
        }
    }

    pub fn has_data_args(&self) -> bool {
        self.args
            .iter()
            .any(|a| matches!(a, MethodArgMetadata::Data { .. }))
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middlewares: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("MethodMetadata")
            .field("name", &self.name)
            .field("listeners", &self.listeners)
            .field("emitters", &self.emitters)
            .field("args", &self.args)
            .field("middlewares", &middlewares)
            .field("throttle", &self.throttle)
            .field("skip_validation", &self.skip_validation)
            .field("app_listeners", &self.app_listeners)
            .field("app_emitters", &self.app_emitters)
            .finish()
    }
}

#[derive(Clone)]
pub struct ControllerMetadata {
    pub key: ComponentKey,
    pub name: &'static str,
    pub namespace: String,
    pub methods: Vec<MethodMetadata>,
    pub middlewares: Vec<Component<dyn SocketMiddleware>>,
    pub throttle: Option<ThrottleSpec>,
}

impl ControllerMetadata {
    pub fn new(key: ComponentKey, name: &'static str) -> Self {
        Self {
            key,
            name,
            namespace: DEFAULT_NAMESPACE.to_string(),
            methods: Vec::new(),
            middlewares: Vec::new(),
            throttle: None,
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodMetadata> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl fmt::Debug for ControllerMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middlewares: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("ControllerMetadata")
            .field("name", &self.name)
            .field("type", &self.key.type_name)
            .field("namespace", &self.namespace)
            .field("methods", &self.methods)
            .field("middlewares", &middlewares)
            .field("throttle", &self.throttle)
            .finish()
    }
}
