use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::error::SocketError;
use crate::invocation::{Invocation, MethodHandler};
use crate::throttle::{ThrottleDecision, ThrottleOptions};

/// Fixed-window rate limiting per client, event and handler.
///
/// The limit is the method's own, else the controller's, else the global default.
/// Every handler keeps its own counter, so controllers sharing an event do not eat
/// into each other's budget. Only socket-sourced invocations are counted.
pub(crate) struct ThrottleWrap {
    options: Arc<ThrottleOptions>,
}

impl ThrottleWrap {
    pub fn new(options: ThrottleOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl MethodWrapper for ThrottleWrap {
    fn stage(&self) -> &'static str {
        "throttle"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let Some(spec) = target
            .method
            .throttle
            .or(target.controller.throttle)
            .or(self.options.rate_limit)
        else {
            return Ok(inner);
        };
        let options = self.options.clone();
        let handler: Arc<str> =
            format!("{}::{}", target.controller.name, target.method.name).into();

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let options = options.clone();
            let handler = handler.clone();
            async move {
                let Some(socket) = call.inbound_socket() else {
                    return inner(call).await;
                };
                let client = options.identify(&socket);
                let key = counter_key(&call.event, &handler);
                match options.store.hit(&client, &key, spec).await {
                    ThrottleDecision::Allowed { .. } => inner(call).await,
                    ThrottleDecision::Limited { retry_in } => {
                        tracing::debug!(
                            %client,
                            event = %call.event,
                            retry_in = ?retry_in,
                            "Event throttled"
                        );
                        Err(SocketError::Throttle {
                            event: call.event.clone(),
                            remaining: retry_in,
                        })
                    }
                }
            }
            .boxed()
        }))
    }
}

/// Store key for one handler's counter of `event`.
fn counter_key(event: &str, handler: &str) -> String {
    format!("{event}#{handler}")
}
