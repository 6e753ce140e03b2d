use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::container::Resolver;
use crate::error::SocketError;
use crate::invocation::{Invocation, MethodHandler, Reply};
use crate::middleware::{drive, Next, Outcome, Packet, SocketMiddleware};

/// Runs class then method `use_middleware` declarations before the handler.
///
/// Only socket-sourced invocations pass through them; server and application events
/// go straight to the handler.
pub(crate) struct DeclarativeMiddleware {
    resolver: Arc<Resolver>,
}

impl DeclarativeMiddleware {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

impl MethodWrapper for DeclarativeMiddleware {
    fn stage(&self) -> &'static str {
        "declarative_middleware"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let chain = target
            .controller
            .middlewares
            .iter()
            .chain(target.method.middlewares.iter())
            .map(|component| {
                self.resolver
                    .resolve(component)
                    .map(|instance| (component.name(), instance))
            })
            .collect::<Result<Vec<(&'static str, Arc<dyn SocketMiddleware>)>, _>>()?;
        if chain.is_empty() {
            return Ok(inner);
        }
        let chain = Arc::new(chain);

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let chain = chain.clone();
            async move {
                let Some(socket) = call.inbound_socket() else {
                    return inner(call).await;
                };
                for &(name, ref middleware) in chain.iter() {
                    let packet = Packet::new(call.event.clone(), call.args.clone());
                    let (next, rx) = Next::channel(name);
                    match drive(middleware.handle(socket.clone(), packet, next), rx).await {
                        Outcome::Continue => {}
                        Outcome::Halt => {
                            tracing::debug!(
                                middleware = name,
                                event = %call.event,
                                "Middleware halted the event"
                            );
                            return Ok(Reply::None);
                        }
                        Outcome::Failed(err) => return Err(err),
                    }
                }
                inner(call).await
            }
            .boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{controller, invocation, recording, wrap};
    use crate::invocation::InvocationSource;
    use crate::container::{Component, DiContainer, TypeContainer};
    use crate::metadata::{ControllerMetadata, MethodMetadata};
    use crate::middleware::socket_middleware;
    use crate::transport::{LocalTransport, SocketRef};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    static TRAIL: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    #[derive(Default)]
    struct ClassLevel;

    #[async_trait]
    impl SocketMiddleware for ClassLevel {
        async fn handle(&self, _: SocketRef, _: Packet, next: Next) -> Result<(), SocketError> {
            TRAIL.lock().push("class");
            next.proceed();
            Ok(())
        }
    }

    #[derive(Default)]
    struct MethodLevel;

    #[async_trait]
    impl SocketMiddleware for MethodLevel {
        async fn handle(
            &self,
            _: SocketRef,
            packet: Packet,
            next: Next,
        ) -> Result<(), SocketError> {
            TRAIL.lock().push("method");
            if packet.args.first() == Some(&json!("forbidden")) {
                next.reject("forbidden payload");
            } else {
                next.proceed();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Swallow;

    #[async_trait]
    impl SocketMiddleware for Swallow {
        async fn handle(&self, _: SocketRef, _: Packet, _next: Next) -> Result<(), SocketError> {
            Ok(())
        }
    }

    fn targets(
        class: Vec<Component<dyn SocketMiddleware>>,
        method: Vec<Component<dyn SocketMiddleware>>,
    ) -> (Arc<ControllerMetadata>, Arc<MethodMetadata>) {
        let mut c = (*controller()).clone();
        c.middlewares = class;
        let mut m = MethodMetadata::new("probe");
        m.middlewares = method;
        (Arc::new(c), Arc::new(m))
    }

    async fn socket() -> (LocalTransport, SocketRef) {
        let transport = LocalTransport::new();
        let socket: SocketRef = transport.connect("/").await.unwrap();
        (transport, socket)
    }

    // Both scenarios share TRAIL, so they run in one test.
    #[tokio::test]
    async fn class_runs_before_method_and_rejection_stops_the_handler() {
        let (_t, socket) = socket().await;
        let (c, m) = targets(
            vec![socket_middleware::<ClassLevel>()],
            vec![socket_middleware::<MethodLevel>()],
        );
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(
            &DeclarativeMiddleware::new(Arc::new(Resolver::new(None))),
            &c,
            &m,
            inner,
        );

        handler(invocation(&m, "send", vec![json!("ok")], Some(socket.clone())))
            .await
            .unwrap();
        assert_eq!(*TRAIL.lock(), vec!["class", "method"]);
        assert_eq!(calls.lock().len(), 1);

        let err = handler(invocation(&m, "send", vec![json!("forbidden")], Some(socket)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocketError::Middleware { ref reason, .. } if reason == "forbidden payload"
        ));
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn dropping_next_halts_silently() {
        let (_t, socket) = socket().await;
        let (c, m) = targets(Vec::new(), vec![socket_middleware::<Swallow>()]);
        let (inner, calls) = recording(Reply::Value(json!("never")));
        let handler = wrap(
            &DeclarativeMiddleware::new(Arc::new(Resolver::new(None))),
            &c,
            &m,
            inner,
        );

        let reply = handler(invocation(&m, "send", vec![], Some(socket)))
            .await
            .unwrap();
        assert_eq!(reply, Reply::None);
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn server_sourced_calls_skip_middlewares() {
        let (_t, socket) = socket().await;
        let (c, m) = targets(Vec::new(), vec![socket_middleware::<Swallow>()]);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(
            &DeclarativeMiddleware::new(Arc::new(Resolver::new(None))),
            &c,
            &m,
            inner,
        );

        let mut call = invocation(&m, "connection", vec![], Some(socket));
        call.source = InvocationSource::Server;
        handler(call).await.unwrap();
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn unresolvable_middleware_fails_at_wrap_time() {
        let (c, m) = targets(
            Vec::new(),
            vec![crate::middleware::external_socket_middleware::<Swallow>()],
        );
        let (inner, _) = recording(Reply::None);
        let container: Arc<dyn DiContainer> = Arc::new(TypeContainer::new());
        let err = DeclarativeMiddleware::new(Arc::new(Resolver::new(Some(container))))
            .wrap(
                &WrapTarget {
                    controller: &c,
                    method: &m,
                },
                inner,
            )
            .err()
            .unwrap();
        assert_eq!(err.kind(), "container");
    }
}
