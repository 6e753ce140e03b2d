//! Socket runtime - resolves controllers, builds the wrapper chain and binds it.
//!
//! Phase order: resolve → wrap → bind → app_events → middlewares → flush → cleanup.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::options::SocketControllersOptions;
use crate::binder::EventBinder;
use crate::chain::{
    app_event_handler, guard_connect_middleware, guard_packet_middleware, listener_handler,
    AppEmitWrap, ArgumentInjector, DataValidation, DeclarativeMiddleware, EmitContext,
    EmitterWrap, ErrorWrap, MethodTable, MethodWrapper, ThrottleWrap,
};
use crate::container::Resolver;
use crate::controller::ControllerClass;
use crate::error::{ConfigError, SocketError};
use crate::events::{AppEventBus, AppListener};
use crate::metadata::MetadataStore;
use crate::throttle::ThrottleStore;
use crate::transport::{Namespace, Transport, DEFAULT_NAMESPACE};

/// Owns the startup of one set of controllers on one transport.
pub struct SocketRuntime {
    opts: SocketControllersOptions,
    cancel: CancellationToken,
}

impl SocketRuntime {
    pub fn new(opts: SocketControllersOptions, cancel: CancellationToken) -> Self {
        Self { opts, cancel }
    }

    /// Bind every controller. Must be called from within a tokio runtime.
    ///
    /// Fails on the first configuration, resolution or metadata error; nothing is
    /// partially bound to the transport unless binding itself fails midway.
    pub fn start(self) -> Result<RunningSockets, SocketError> {
        let SocketControllersOptions {
            transport,
            container,
            controllers,
            server_middlewares,
            socket_middlewares,
            error_middleware,
            data_validation,
            argument_injection,
            throttle,
            current_user,
            user_locator,
            validator,
            app_events,
        } = self.opts;

        tracing::info!("Phase: resolve");
        let (store, classes) = match controllers {
            Some(explicit) => explicit,
            None => MetadataStore::discover()?,
        };
        let resolver = Arc::new(Resolver::new(container));
        let error_middleware = error_middleware
            .map(|component| resolver.resolve(&component))
            .transpose()?;

        let mut table = MethodTable::default();
        for class in &classes {
            let instance = resolver.resolve_any(&class.key(), class.factory())?;
            table.add_controller(&store, class, &instance)?;
            tracing::debug!(controller = class.name(), "Controller resolved");
        }

        tracing::info!(
            controllers = classes.len(),
            methods = table.entries().len(),
            "Phase: wrap"
        );
        let emit = Arc::new(EmitContext {
            transport: transport.clone(),
            locator: user_locator,
        });
        let cleanup_store = throttle.store.clone();
        let cleanup_interval = throttle.cleanup_interval;
        let stages: [Box<dyn MethodWrapper>; 8] = [
            Box::new(ArgumentInjector::new(argument_injection, current_user)),
            Box::new(DataValidation::new(data_validation, validator)),
            Box::new(EmitterWrap::server(emit.clone())),
            Box::new(EmitterWrap::socket(emit)),
            Box::new(DeclarativeMiddleware::new(resolver.clone())),
            Box::new(ThrottleWrap::new(throttle)),
            Box::new(AppEmitWrap::new(app_events.clone())),
            Box::new(ErrorWrap::new(error_middleware.clone())),
        ];
        for stage in &stages {
            table.apply(stage.as_ref())?;
        }

        tracing::info!("Phase: bind");
        let mut binder = EventBinder::new(transport.clone());
        for entry in table.entries() {
            for listener in &entry.method.listeners {
                binder.bind_listener(
                    &entry.controller.namespace,
                    listener,
                    listener_handler(entry, listener),
                )?;
            }
        }

        tracing::info!("Phase: app_events");
        for entry in table.entries() {
            if entry.method.app_listeners.is_empty() {
                continue;
            }
            let handler = app_event_handler(entry);
            for event in &entry.method.app_listeners {
                app_events.on(AppListener::new(
                    event.clone(),
                    entry.controller.key,
                    entry.method.name,
                    handler.clone(),
                ));
            }
        }

        tracing::info!("Phase: middlewares");
        let namespaces = controller_namespaces(&store, &classes);
        for scoped in server_middlewares {
            let middleware = resolver.resolve(&scoped.component)?;
            for namespace in targets(scoped.namespace, &namespaces)? {
                transport.of(&namespace).use_middleware(guard_connect_middleware(
                    scoped.component.name(),
                    middleware.clone(),
                    error_middleware.clone(),
                ));
                tracing::debug!(
                    middleware = scoped.component.name(),
                    %namespace,
                    "Server middleware registered"
                );
            }
        }
        for scoped in socket_middlewares {
            let middleware = resolver.resolve(&scoped.component)?;
            for namespace in targets(scoped.namespace, &namespaces)? {
                binder.add_socket_middleware(
                    &namespace,
                    guard_packet_middleware(
                        scoped.component.name(),
                        middleware.clone(),
                        error_middleware.clone(),
                    ),
                );
                tracing::debug!(
                    middleware = scoped.component.name(),
                    %namespace,
                    "Socket middleware registered"
                );
            }
        }
        let groups = binder.flush();
        tracing::info!(namespaces = groups, "Phase: flush");

        let cleanup = spawn_cleanup(cleanup_store, cleanup_interval, self.cancel.child_token());
        tracing::info!("Socket controllers bound");

        Ok(RunningSockets {
            store: Arc::new(store),
            resolver,
            app_events,
            cancel: self.cancel,
            cleanup,
        })
    }
}

fn controller_namespaces(store: &MetadataStore, classes: &[ControllerClass]) -> Vec<String> {
    let mut namespaces: Vec<String> = Vec::new();
    for controller in classes.iter().filter_map(|class| store.controller(&class.key())) {
        if !namespaces.contains(&controller.namespace) {
            namespaces.push(controller.namespace.clone());
        }
    }
    if namespaces.is_empty() {
        namespaces.push(DEFAULT_NAMESPACE.to_string());
    }
    namespaces
}

fn targets(namespace: Option<String>, all: &[String]) -> Result<Vec<String>, ConfigError> {
    match namespace {
        Some(ns) if !ns.starts_with('/') => Err(ConfigError::InvalidNamespace(ns)),
        Some(ns) => Ok(vec![ns]),
        None => Ok(all.to_vec()),
    }
}

fn spawn_cleanup(
    store: Arc<dyn ThrottleStore>,
    every: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::warn!("Throttle cleanup disabled: zero interval");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => store.cleanup().await,
            }
        }
        tracing::debug!("Throttle cleanup stopped");
    }))
}

/// Handle to a bound runtime.
pub struct RunningSockets {
    store: Arc<MetadataStore>,
    resolver: Arc<Resolver>,
    app_events: Arc<AppEventBus>,
    cancel: CancellationToken,
    cleanup: Option<JoinHandle<()>>,
}

impl RunningSockets {
    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn app_events(&self) -> &Arc<AppEventBus> {
        &self.app_events
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop background work. Transport listeners stay attached; the transport owns them.
    pub async fn shutdown(mut self) {
        tracing::info!("Phase: stop");
        self.cancel.cancel();
        if let Some(cleanup) = self.cleanup.take() {
            if let Err(e) = cleanup.await {
                tracing::warn!(error = %e, "Throttle cleanup task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::decorators::{namespace, socket_emit_self, socket_on};
    use crate::invocation::Invocation;
    use crate::throttle::{InMemoryThrottleStore, ThrottleEntry, ThrottleOptions};
    use crate::transport::LocalTransport;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct Ping;

    impl Ping {
        async fn ping(self: Arc<Self>, _call: Invocation) -> anyhow::Result<Value> {
            Ok(json!("pong"))
        }
    }

    fn options(transport: Arc<LocalTransport>) -> SocketControllersOptions {
        let mut store = MetadataStore::new();
        let class = Controller::<Ping>::new("Ping")
            .decorate(namespace("/ping"))
            .method("ping", Ping::ping, [socket_on("ping"), socket_emit_self("pong")])
            .register(&mut store)
            .unwrap();
        SocketControllersOptions::new(transport).controllers(store, vec![class])
    }

    #[tokio::test]
    async fn start_binds_controllers_to_their_namespace() {
        let transport = Arc::new(LocalTransport::new());
        let running = SocketRuntime::new(options(transport.clone()), CancellationToken::new())
            .start()
            .unwrap();

        let socket = transport.connect("/ping").await.unwrap();
        socket.dispatch("ping", vec![]).await.unwrap();
        assert_eq!(socket.received_for("pong"), vec![json!("pong")]);
        assert_eq!(running.resolver().len(), 1);
        assert!(running.metadata().controllers().iter().any(|c| c.name == "Ping"));
        running.shutdown().await;
    }

    #[tokio::test]
    async fn namespaced_middleware_must_start_with_a_slash() {
        #[derive(Default)]
        struct Pass;

        #[async_trait::async_trait]
        impl crate::middleware::ServerMiddleware for Pass {
            async fn handle(
                &self,
                _: crate::transport::SocketRef,
                next: crate::middleware::Next,
            ) -> Result<(), SocketError> {
                next.proceed();
                Ok(())
            }
        }

        let transport = Arc::new(LocalTransport::new());
        let opts = options(transport)
            .server_middleware_in("chat", crate::middleware::server_middleware::<Pass>());
        let err = SocketRuntime::new(opts, CancellationToken::new())
            .start()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SocketError::Config(ConfigError::InvalidNamespace(ref ns)) if ns == "chat"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_until_shutdown() {
        let store = Arc::new(InMemoryThrottleStore::new());
        store
            .set(
                "client",
                "event",
                ThrottleEntry {
                    count: 1,
                    reset_at: tokio::time::Instant::now() + Duration::from_secs(1),
                },
            )
            .await;
        let throttle = ThrottleOptions {
            cleanup_interval: Duration::from_secs(5),
            store: store.clone(),
            ..ThrottleOptions::default()
        };
        let transport = Arc::new(LocalTransport::new());
        let opts = options(transport).throttle(throttle);
        let running = SocketRuntime::new(opts, CancellationToken::new())
            .start()
            .unwrap();

        assert_eq!(store.len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.len(), 0);
        running.shutdown().await;
    }
}
