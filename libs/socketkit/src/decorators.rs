//! Declarative annotations for controller classes, methods and parameters.
//!
//! A decorator only records intent: applying one appends a record to the
//! [`MetadataStore`] and nothing else. Application order between decorators does not
//! matter; class-level and method-level middlewares merge.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::container::Component;
use crate::error::ConfigError;
use crate::metadata::{
    ControllerRef, EmitterAction, EmitterMetadata, ListenerAction, ListenerMetadata,
    ListenerScope, MetadataScope, MetadataStore, MethodArgMetadata,
};
use crate::middleware::{socket_middleware, SocketMiddleware};
use crate::throttle::ThrottleSpec;
use crate::transport::{CONNECTION_EVENT, DISCONNECTING_EVENT, DISCONNECT_EVENT};
use crate::validation::ParamType;

#[derive(Debug, Clone)]
pub enum Decorator {
    Namespace(String),
    Middleware(Component<dyn SocketMiddleware>),
    Throttle(ThrottleSpec),
    Listener(ListenerMetadata),
    Emitter(EmitterMetadata),
    Param(MethodArgMetadata),
    SkipValidation,
    AppOn(String),
    AppEmit(String),
}

impl Decorator {
    fn name(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "namespace",
            Self::Middleware(_) => "use_middleware",
            Self::Throttle(_) => "throttle",
            Self::Listener(_) => "listener",
            Self::Emitter(_) => "emitter",
            Self::Param(_) => "parameter",
            Self::SkipValidation => "skip_validation",
            Self::AppOn(_) => "app_on",
            Self::AppEmit(_) => "app_emit",
        }
    }

    /// Disable incoming-data validation for a listener. No effect on other decorators.
    pub fn without_validation(self) -> Self {
        match self {
            Self::Listener(listener) => Self::Listener(listener.with_data_check(false)),
            other => other,
        }
    }

    /// Record this decorator for `owner` at `scope`.
    pub fn apply(
        self,
        store: &mut MetadataStore,
        owner: ControllerRef,
        scope: MetadataScope,
    ) -> Result<(), ConfigError> {
        let misplaced = ConfigError::InvalidPlacement {
            decorator: self.name(),
            target: scope.describe(),
        };
        match (self, scope) {
            (Self::Namespace(ns), MetadataScope::Class) => store.set_namespace(owner, &ns),
            (Self::Middleware(m), scope) => {
                store.add_middleware(owner, scope, m);
                Ok(())
            }
            (Self::Throttle(spec), scope) => {
                store.add_throttle(owner, scope, spec);
                Ok(())
            }
            (Self::Listener(l), MetadataScope::Method(method)) => {
                store.add_listener(owner, method, l);
                Ok(())
            }
            (Self::Emitter(e), MetadataScope::Method(method)) => {
                store.add_emitter(owner, method, e);
                Ok(())
            }
            (Self::Param(arg), MetadataScope::Method(method)) => store.add_arg(owner, method, arg),
            (Self::SkipValidation, MetadataScope::Method(method)) => {
                store.skip_validation(owner, method);
                Ok(())
            }
            (Self::AppOn(event), MetadataScope::Method(method)) => {
                store.add_app_listener(owner, method, &event);
                Ok(())
            }
            (Self::AppEmit(event), MetadataScope::Method(method)) => {
                store.add_app_emitter(owner, method, &event);
                Ok(())
            }
            _ => Err(misplaced),
        }
    }
}

// ---- class ----

/// Bind the controller to a namespace; must start with `/`.
pub fn namespace(ns: impl Into<String>) -> Decorator {
    Decorator::Namespace(ns.into())
}

// ---- class or method ----

pub fn use_middleware<M>() -> Decorator
where
    M: SocketMiddleware + Default + 'static,
{
    Decorator::Middleware(socket_middleware::<M>())
}

/// Middleware given as a component, e.g. one only a container can build.
pub fn use_middleware_component(component: Component<dyn SocketMiddleware>) -> Decorator {
    Decorator::Middleware(component)
}

pub fn throttle(limit: u32, window: Duration) -> Decorator {
    Decorator::Throttle(ThrottleSpec::new(limit, window))
}

// ---- listeners ----

fn listener(scope: ListenerScope, action: ListenerAction, event: Option<&str>) -> Decorator {
    Decorator::Listener(ListenerMetadata::new(
        scope,
        action,
        event.map(str::to_string),
        true,
    ))
}

pub fn socket_on(event: &str) -> Decorator {
    listener(ListenerScope::Socket, ListenerAction::On, Some(event))
}

pub fn socket_once(event: &str) -> Decorator {
    listener(ListenerScope::Socket, ListenerAction::Once, Some(event))
}

pub fn socket_on_any() -> Decorator {
    listener(ListenerScope::Socket, ListenerAction::OnAny, None)
}

pub fn socket_on_any_outgoing() -> Decorator {
    listener(ListenerScope::Socket, ListenerAction::OnAnyOutgoing, None)
}

pub fn server_on(event: &str) -> Decorator {
    listener(ListenerScope::Server, ListenerAction::On, Some(event))
}

pub fn server_once(event: &str) -> Decorator {
    listener(ListenerScope::Server, ListenerAction::Once, Some(event))
}

/// Every new connection of the controller's namespace.
pub fn on_connect() -> Decorator {
    server_on(CONNECTION_EVENT).without_validation()
}

pub fn on_disconnect() -> Decorator {
    socket_on(DISCONNECT_EVENT)
}

pub fn on_disconnecting() -> Decorator {
    socket_on(DISCONNECTING_EVENT)
}

/// Skip validation for every listener of the method.
pub fn skip_validation() -> Decorator {
    Decorator::SkipValidation
}

// ---- emitters ----

fn emitter(
    scope: ListenerScope,
    action: EmitterAction,
    message: &str,
    to: Option<&str>,
) -> Decorator {
    Decorator::Emitter(EmitterMetadata {
        scope,
        action,
        message: message.to_string(),
        to: to.map(str::to_string),
    })
}

/// Emit the result back to the calling connection.
pub fn socket_emit_self(message: &str) -> Decorator {
    emitter(ListenerScope::Socket, EmitterAction::EmitSelf, message, None)
}

/// Emit the result to a room, excluding the calling connection.
pub fn socket_emit_to(room: &str, message: &str) -> Decorator {
    emitter(ListenerScope::Socket, EmitterAction::EmitTo, message, Some(room))
}

/// Emit the result to every connection of the namespace.
pub fn server_emit(message: &str) -> Decorator {
    emitter(ListenerScope::Server, EmitterAction::EmitSelf, message, None)
}

/// Emit the result to every member of a room.
pub fn server_emit_to(room: &str, message: &str) -> Decorator {
    emitter(ListenerScope::Server, EmitterAction::EmitTo, message, Some(room))
}

// ---- parameters ----

pub fn connected_socket(index: usize) -> Decorator {
    Decorator::Param(MethodArgMetadata::Socket { index })
}

/// The first payload argument, untyped.
pub fn message_body(index: usize) -> Decorator {
    message_body_at(index, 0, ParamType::Any)
}

/// Payload argument `data_index`, checked against `param_type`.
pub fn message_body_at(index: usize, data_index: usize, param_type: ParamType) -> Decorator {
    Decorator::Param(MethodArgMetadata::Data {
        index,
        data_index,
        param_type,
    })
}

/// Payload argument `data_index`, which must deserialize into `T`.
pub fn message_body_typed<T: DeserializeOwned + 'static>(
    index: usize,
    data_index: usize,
) -> Decorator {
    message_body_at(index, data_index, ParamType::typed::<T>())
}

pub fn event_name(index: usize) -> Decorator {
    Decorator::Param(MethodArgMetadata::EventName { index })
}

pub fn current_user(index: usize) -> Decorator {
    Decorator::Param(MethodArgMetadata::CurrentUser { index })
}

/// The whole session bag of the connection.
pub fn socket_data(index: usize) -> Decorator {
    Decorator::Param(MethodArgMetadata::SocketDataAttribute {
        index,
        data_key: None,
    })
}

/// One session key of the connection.
pub fn socket_data_key(index: usize, key: &str) -> Decorator {
    Decorator::Param(MethodArgMetadata::SocketDataAttribute {
        index,
        data_key: Some(key.to_string()),
    })
}

// ---- application events ----

pub fn app_on(event: &str) -> Decorator {
    Decorator::AppOn(event.to_string())
}

/// Publish the method's result as an application event.
pub fn app_emit(event: &str) -> Decorator {
    Decorator::AppEmit(event.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Next, Packet};
    use crate::error::SocketError;
    use crate::transport::SocketRef;
    use async_trait::async_trait;

    struct Chat;

    #[derive(Default)]
    struct Audit;

    #[async_trait]
    impl SocketMiddleware for Audit {
        async fn handle(
            &self,
            _socket: SocketRef,
            _packet: Packet,
            next: Next,
        ) -> Result<(), SocketError> {
            next.proceed();
            Ok(())
        }
    }

    fn owner() -> ControllerRef {
        ControllerRef::of::<Chat>("Chat")
    }

    #[test]
    fn disconnect_listeners_never_validate() {
        let mut store = MetadataStore::new();
        on_disconnect()
            .apply(&mut store, owner(), MetadataScope::Method("bye"))
            .unwrap();
        on_disconnecting()
            .apply(&mut store, owner(), MetadataScope::Method("bye"))
            .unwrap();

        let method = store.method(&owner().key, "bye").unwrap();
        assert_eq!(method.listeners.len(), 2);
        assert!(method.listeners.iter().all(|l| !l.data_check));
    }

    #[test]
    fn without_validation_turns_the_check_off() {
        let mut store = MetadataStore::new();
        socket_on("message")
            .without_validation()
            .apply(&mut store, owner(), MetadataScope::Method("send"))
            .unwrap();
        socket_on("shout")
            .apply(&mut store, owner(), MetadataScope::Method("send"))
            .unwrap();

        let method = store.method(&owner().key, "send").unwrap();
        assert!(!method.listeners[0].data_check);
        assert!(method.listeners[1].data_check);
    }

    #[test]
    fn namespace_on_a_method_is_misplaced() {
        let mut store = MetadataStore::new();
        let err = namespace("/chat")
            .apply(&mut store, owner(), MetadataScope::Method("send"))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidPlacement {
                decorator: "namespace",
                target: "a method"
            }
        );
    }

    #[test]
    fn method_decorators_on_a_class_are_misplaced() {
        let mut store = MetadataStore::new();
        for decorator in [socket_on("x"), server_emit("y"), message_body(0), app_on("z")] {
            let err = decorator
                .apply(&mut store, owner(), MetadataScope::Class)
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidPlacement { target: "a class", .. }));
        }
    }

    #[test]
    fn bad_namespace_fails_immediately() {
        let mut store = MetadataStore::new();
        let err = namespace("chat")
            .apply(&mut store, owner(), MetadataScope::Class)
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidNamespace("chat".into()));
    }

    #[test]
    fn class_and_method_middlewares_merge() {
        let mut store = MetadataStore::new();
        use_middleware::<Audit>()
            .apply(&mut store, owner(), MetadataScope::Class)
            .unwrap();
        use_middleware::<Audit>()
            .apply(&mut store, owner(), MetadataScope::Method("send"))
            .unwrap();

        let controller = store.controller(&owner().key).unwrap();
        assert_eq!(controller.middlewares.len(), 1);
        assert_eq!(controller.method("send").unwrap().middlewares.len(), 1);
    }

    #[test]
    fn emitter_factories_record_scope_and_target() {
        let mut store = MetadataStore::new();
        for decorator in [
            socket_emit_self("ack"),
            socket_emit_to("lobby", "said"),
            server_emit("news"),
            server_emit_to("lobby", "joined"),
        ] {
            decorator
                .apply(&mut store, owner(), MetadataScope::Method("send"))
                .unwrap();
        }

        let emitters = &store.method(&owner().key, "send").unwrap().emitters;
        assert_eq!(emitters[0].scope, ListenerScope::Socket);
        assert_eq!(emitters[0].action, EmitterAction::EmitSelf);
        assert_eq!(emitters[1].to.as_deref(), Some("lobby"));
        assert_eq!(emitters[2].scope, ListenerScope::Server);
        assert_eq!(emitters[3].action, EmitterAction::EmitTo);
        assert_eq!(emitters[3].message, "joined");
    }

    #[test]
    fn connect_shortcut_is_a_server_listener() {
        let mut store = MetadataStore::new();
        on_connect()
            .apply(&mut store, owner(), MetadataScope::Method("hello"))
            .unwrap();
        let listener = &store.method(&owner().key, "hello").unwrap().listeners[0];
        assert_eq!(listener.scope, ListenerScope::Server);
        assert_eq!(listener.event.as_deref(), Some(CONNECTION_EVENT));
    }
}
