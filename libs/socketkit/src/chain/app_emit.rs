use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::error::SocketError;
use crate::events::{AppEventBus, AppEventContext, IoContext};
use crate::invocation::{Invocation, InvocationSource, MethodHandler, Reply};

/// Publishes the handler's result on the application event bus for every `app_emit`.
///
/// Listeners are dispatched in the background; the handler's reply is returned as-is.
pub(crate) struct AppEmitWrap {
    bus: Arc<AppEventBus>,
}

impl AppEmitWrap {
    pub fn new(bus: Arc<AppEventBus>) -> Self {
        Self { bus }
    }
}

impl MethodWrapper for AppEmitWrap {
    fn stage(&self) -> &'static str {
        "app_emit"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        if target.method.app_emitters.is_empty() {
            return Ok(inner);
        }
        let events = Arc::new(target.method.app_emitters.clone());
        let bus = self.bus.clone();

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let events = events.clone();
            let bus = bus.clone();
            async move {
                let io_context = match call.source {
                    InvocationSource::AppEvent => {
                        call.app_event.as_ref().and_then(|ctx| ctx.io_context.clone())
                    }
                    _ => Some(IoContext {
                        socket: call.socket.clone(),
                        event_name: call.event.clone(),
                        args: call.args.clone(),
                    }),
                };
                let reply = inner(call).await?;
                if reply == Reply::None {
                    return Ok(reply);
                }
                let data = reply.data();
                for event in events.iter() {
                    let mut ctx = AppEventContext::new(event.clone(), data.clone());
                    ctx.io_context = io_context.clone();
                    let dispatch = bus.emit(ctx);
                    tracing::debug!(
                        %event,
                        listeners = dispatch.len(),
                        "Application event published"
                    );
                }
                Ok(reply)
            }
            .boxed()
        }))
    }
}
