use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::SocketKitConfig;
use crate::container::{Component, DiContainer};
use crate::controller::ControllerClass;
use crate::error::SocketError;
use crate::events::AppEventBus;
use crate::metadata::MetadataStore;
use crate::middleware::{ErrorMiddleware, ServerMiddleware, SocketMiddleware};
use crate::throttle::ThrottleOptions;
use crate::transport::{SocketRef, Transport};
use crate::validation::{PayloadValidator, SchemaValidator};

/// Resolves the user behind a connection for `current_user` parameters.
pub type CurrentUserProvider =
    Arc<dyn Fn(SocketRef) -> BoxFuture<'static, Result<Value, SocketError>> + Send + Sync>;

/// Finds the connection of a user for `to_user` emissions. `None` skips the emission.
pub type UserSocketLocator =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Option<SocketRef>> + Send + Sync>;

/// A transport-level middleware, optionally limited to one namespace.
pub(crate) struct Scoped<T: ?Sized> {
    pub component: Component<T>,
    pub namespace: Option<String>,
}

/// Everything the runtime needs to bind controllers to a transport.
///
/// When no controllers are given explicitly, the ones submitted with
/// `inventory::submit!` are discovered at start.
pub struct SocketControllersOptions {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) container: Option<Arc<dyn DiContainer>>,
    pub(crate) controllers: Option<(MetadataStore, Vec<ControllerClass>)>,
    pub(crate) server_middlewares: Vec<Scoped<dyn ServerMiddleware>>,
    pub(crate) socket_middlewares: Vec<Scoped<dyn SocketMiddleware>>,
    pub(crate) error_middleware: Option<Component<dyn ErrorMiddleware>>,
    pub(crate) data_validation: bool,
    pub(crate) argument_injection: bool,
    pub(crate) throttle: ThrottleOptions,
    pub(crate) current_user: Option<CurrentUserProvider>,
    pub(crate) user_locator: Option<UserSocketLocator>,
    pub(crate) validator: Arc<dyn PayloadValidator>,
    pub(crate) app_events: Arc<AppEventBus>,
}

impl SocketControllersOptions {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            container: None,
            controllers: None,
            server_middlewares: Vec::new(),
            socket_middlewares: Vec::new(),
            error_middleware: None,
            data_validation: true,
            argument_injection: true,
            throttle: ThrottleOptions::default(),
            current_user: None,
            user_locator: None,
            validator: Arc::new(SchemaValidator),
            app_events: Arc::new(AppEventBus::new()),
        }
    }

    /// External container consulted before any built-in factory.
    pub fn container(mut self, container: Arc<dyn DiContainer>) -> Self {
        self.container = Some(container);
        self
    }

    /// Bind exactly these controllers, registered into `store`.
    pub fn controllers(mut self, store: MetadataStore, controllers: Vec<ControllerClass>) -> Self {
        self.controllers = Some((store, controllers));
        self
    }

    /// Connection middleware for every controller namespace.
    pub fn server_middleware(mut self, component: Component<dyn ServerMiddleware>) -> Self {
        self.server_middlewares.push(Scoped {
            component,
            namespace: None,
        });
        self
    }

    pub fn server_middleware_in(
        mut self,
        namespace: impl Into<String>,
        component: Component<dyn ServerMiddleware>,
    ) -> Self {
        self.server_middlewares.push(Scoped {
            component,
            namespace: Some(namespace.into()),
        });
        self
    }

    /// Packet middleware installed on every connection of every controller namespace.
    pub fn socket_middleware(mut self, component: Component<dyn SocketMiddleware>) -> Self {
        self.socket_middlewares.push(Scoped {
            component,
            namespace: None,
        });
        self
    }

    pub fn socket_middleware_in(
        mut self,
        namespace: impl Into<String>,
        component: Component<dyn SocketMiddleware>,
    ) -> Self {
        self.socket_middlewares.push(Scoped {
            component,
            namespace: Some(namespace.into()),
        });
        self
    }

    pub fn error_middleware(mut self, component: Component<dyn ErrorMiddleware>) -> Self {
        self.error_middleware = Some(component);
        self
    }

    pub fn data_validation(mut self, enabled: bool) -> Self {
        self.data_validation = enabled;
        self
    }

    /// `false` hands raw positional arguments to every handler.
    pub fn argument_injection(mut self, enabled: bool) -> Self {
        self.argument_injection = enabled;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleOptions) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn current_user(mut self, provider: CurrentUserProvider) -> Self {
        self.current_user = Some(provider);
        self
    }

    pub fn user_socket_locator(mut self, locator: UserSocketLocator) -> Self {
        self.user_locator = Some(locator);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Share an application event bus with code outside the runtime.
    pub fn app_events(mut self, bus: Arc<AppEventBus>) -> Self {
        self.app_events = bus;
        self
    }

    /// Apply loaded settings. Throttle store and client identifier are kept.
    pub fn with_config(mut self, config: &SocketKitConfig) -> Self {
        self.data_validation = config.data_validation;
        self.argument_injection = config.argument_injection;
        config.throttle.apply(&mut self.throttle);
        self
    }
}

impl fmt::Debug for SocketControllersOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketControllersOptions")
            .field("container", &self.container.is_some())
            .field(
                "controllers",
                &self.controllers.as_ref().map(|(_, classes)| classes.len()),
            )
            .field("server_middlewares", &self.server_middlewares.len())
            .field("socket_middlewares", &self.socket_middlewares.len())
            .field("error_middleware", &self.error_middleware.as_ref().map(|c| c.name()))
            .field("data_validation", &self.data_validation)
            .field("argument_injection", &self.argument_injection)
            .field("throttle", &self.throttle)
            .field("current_user", &self.current_user.is_some())
            .field("user_locator", &self.user_locator.is_some())
            .finish()
    }
}
