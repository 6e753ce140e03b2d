use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::error::SocketError;
use crate::invocation::{Invocation, MethodHandler, Reply};
use crate::middleware::{
    drive, ErrorMiddleware, Next, Outcome, Packet, ServerMiddleware, SocketMiddleware,
};
use crate::transport::{ConnectMiddleware, PacketMiddleware, RawEvent, SocketRef};

/// Outermost stage: hands per-event failures to the error middleware.
///
/// Without an error middleware every error propagates to the transport. Startup-class
/// errors (configuration, metadata lookup, resolution, container) always propagate.
pub(crate) struct ErrorWrap {
    handler: Option<Arc<dyn ErrorMiddleware>>,
}

impl ErrorWrap {
    pub fn new(handler: Option<Arc<dyn ErrorMiddleware>>) -> Self {
        Self { handler }
    }
}

impl MethodWrapper for ErrorWrap {
    fn stage(&self) -> &'static str {
        "error_handling"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let Some(handler) = self.handler.clone() else {
            return Ok(inner);
        };
        let controller = target.controller.name;

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let handler = handler.clone();
            async move {
                let socket = call.socket.clone();
                let event = call.event.clone();
                let method = call.method.name;
                match inner(call).await {
                    Err(err) if err.is_per_event() => {
                        tracing::debug!(
                            controller,
                            method,
                            %event,
                            kind = err.kind(),
                            error = %err,
                            "Handing event error to error middleware"
                        );
                        handler.handle_error(err, socket).await;
                        Ok(Reply::None)
                    }
                    other => other,
                }
            }
            .boxed()
        }))
    }
}

async fn settle(
    name: &'static str,
    outcome: Outcome,
    socket: SocketRef,
    errors: Option<&Arc<dyn ErrorMiddleware>>,
) -> Result<(), SocketError> {
    match outcome {
        Outcome::Continue => Ok(()),
        Outcome::Halt => {
            tracing::debug!(middleware = name, "Middleware dropped its continuation");
            Err(SocketError::Middleware {
                middleware: name.to_string(),
                reason: "halted without calling next".to_string(),
            })
        }
        Outcome::Failed(err) => {
            let rejection = SocketError::Middleware {
                middleware: name.to_string(),
                reason: err.to_string(),
            };
            match errors {
                Some(handler) => handler.handle_error(err, Some(socket)).await,
                None => tracing::warn!(middleware = name, error = %err, "Middleware failed"),
            }
            Err(rejection)
        }
    }
}

/// Adapt a [`ServerMiddleware`] to the transport's connection hook.
pub(crate) fn guard_connect_middleware(
    name: &'static str,
    middleware: Arc<dyn ServerMiddleware>,
    errors: Option<Arc<dyn ErrorMiddleware>>,
) -> ConnectMiddleware {
    Arc::new(move |socket: SocketRef| {
        let middleware = middleware.clone();
        let errors = errors.clone();
        async move {
            let (next, rx) = Next::channel(name);
            let outcome = drive(middleware.handle(socket.clone(), next), rx).await;
            settle(name, outcome, socket, errors.as_ref()).await
        }
        .boxed()
    })
}

/// Adapt a [`SocketMiddleware`] to the transport's per-packet hook.
pub(crate) fn guard_packet_middleware(
    name: &'static str,
    middleware: Arc<dyn SocketMiddleware>,
    errors: Option<Arc<dyn ErrorMiddleware>>,
) -> PacketMiddleware {
    Arc::new(move |socket: SocketRef, raw: RawEvent| {
        let middleware = middleware.clone();
        let errors = errors.clone();
        async move {
            let (next, rx) = Next::channel(name);
            let packet = Packet::new(raw.event, raw.args);
            let outcome = drive(middleware.handle(socket.clone(), packet, next), rx).await;
            settle(name, outcome, socket, errors.as_ref()).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{controller, failing, invocation, recording, wrap};
    use crate::error::ConfigError;
    use crate::metadata::MethodMetadata;
    use crate::transport::{LocalTransport, Namespace, Socket, Transport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(&'static str, Option<String>)>>);

    #[async_trait]
    impl ErrorMiddleware for Collect {
        async fn handle_error(&self, error: SocketError, socket: Option<SocketRef>) {
            self.0
                .lock()
                .push((error.kind(), socket.map(|s| s.id().to_string())));
        }
    }

    struct Gate(bool);

    #[async_trait]
    impl ServerMiddleware for Gate {
        async fn handle(&self, _: SocketRef, next: Next) -> Result<(), SocketError> {
            if self.0 {
                next.proceed();
            } else {
                next.reject("not allowed");
            }
            Ok(())
        }
    }

    struct DropNext;

    #[async_trait]
    impl SocketMiddleware for DropNext {
        async fn handle(&self, _: SocketRef, _: Packet, _next: Next) -> Result<(), SocketError> {
            Ok(())
        }
    }

    struct FailDirectly;

    #[async_trait]
    impl SocketMiddleware for FailDirectly {
        async fn handle(&self, _: SocketRef, _: Packet, _next: Next) -> Result<(), SocketError> {
            Err(SocketError::InvalidArgument("bad packet".into()))
        }
    }

    fn method() -> Arc<MethodMetadata> {
        Arc::new(MethodMetadata::new("probe"))
    }

    #[tokio::test]
    async fn per_event_errors_reach_the_error_middleware() {
        let collect = Arc::new(Collect::default());
        let m = method();
        let handler = wrap(
            &ErrorWrap::new(Some(collect.clone())),
            &controller(),
            &m,
            failing(|| SocketError::incoming_data("send", "bad")),
        );

        let reply = handler(invocation(&m, "send", vec![], None)).await.unwrap();
        assert_eq!(reply, Reply::None);
        assert_eq!(*collect.0.lock(), vec![("incoming_data", None)]);
    }

    #[tokio::test]
    async fn failed_emits_reach_the_error_middleware() {
        let transport = LocalTransport::new();
        let socket: SocketRef = transport.connect("/").await.unwrap();
        let collect = Arc::new(Collect::default());
        let m = method();
        let handler = wrap(
            &ErrorWrap::new(Some(collect.clone())),
            &controller(),
            &m,
            failing(|| SocketError::Transport("socket is disconnected".into())),
        );

        let reply = handler(invocation(&m, "send", vec![], Some(socket.clone())))
            .await
            .unwrap();
        assert_eq!(reply, Reply::None);
        assert_eq!(
            *collect.0.lock(),
            vec![("transport", Some(socket.id().to_string()))]
        );
    }

    #[tokio::test]
    async fn startup_errors_are_not_caught() {
        let collect = Arc::new(Collect::default());
        let m = method();
        let handler = wrap(
            &ErrorWrap::new(Some(collect.clone())),
            &controller(),
            &m,
            failing(|| ConfigError::MissingUserSocketLocator.into()),
        );

        assert!(handler(invocation(&m, "send", vec![], None)).await.is_err());
        assert!(collect.0.lock().is_empty());
    }

    #[tokio::test]
    async fn without_error_middleware_errors_propagate() {
        let m = method();
        let handler = wrap(
            &ErrorWrap::new(None),
            &controller(),
            &m,
            failing(|| SocketError::InvalidArgument("x".into())),
        );
        assert_eq!(
            handler(invocation(&m, "send", vec![], None))
                .await
                .unwrap_err()
                .kind(),
            "invalid_argument"
        );
    }

    #[tokio::test]
    async fn successful_replies_are_untouched() {
        let collect = Arc::new(Collect::default());
        let m = method();
        let (inner, _) = recording(Reply::Value(json!(1)));
        let wrapper = ErrorWrap::new(Some(collect.clone()));
        let handler = wrap(&wrapper, &controller(), &m, inner);
        assert_eq!(
            handler(invocation(&m, "send", vec![], None)).await.unwrap(),
            Reply::Value(json!(1))
        );
    }

    #[tokio::test]
    async fn rejected_connection_is_reported_and_refused() {
        let transport = LocalTransport::new();
        let collect = Arc::new(Collect::default());
        let errors: Arc<dyn ErrorMiddleware> = collect.clone();
        let gate = guard_connect_middleware("Gate", Arc::new(Gate(false)), Some(errors));
        transport.of("/").use_middleware(gate);

        let err = transport.connect("/").await.err().unwrap();
        assert!(
            matches!(err, SocketError::Middleware { ref middleware, .. } if middleware == "Gate")
        );
        let seen = collect.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "middleware");
    }

    #[tokio::test]
    async fn accepted_connection_passes_the_gate() {
        let transport = LocalTransport::new();
        transport
            .of("/")
            .use_middleware(guard_connect_middleware("Gate", Arc::new(Gate(true)), None));
        assert!(transport.connect("/").await.is_ok());
    }

    #[tokio::test]
    async fn packet_middleware_halt_and_failure_reject_the_packet() {
        let transport = LocalTransport::new();
        let collect = Arc::new(Collect::default());
        let errors: Arc<dyn ErrorMiddleware> = collect.clone();

        let socket = transport.connect("/").await.unwrap();
        socket.use_middleware(guard_packet_middleware("DropNext", Arc::new(DropNext), None));
        assert!(socket.dispatch("send", vec![]).await.is_err());

        let other = transport.connect("/").await.unwrap();
        other.use_middleware(guard_packet_middleware(
            "FailDirectly",
            Arc::new(FailDirectly),
            Some(errors),
        ));
        let err = other.dispatch("send", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("bad packet"), "{err}");
        assert_eq!(
            *collect.0.lock(),
            vec![("invalid_argument", Some(other.id().to_string()))]
        );
    }
}
