//! Adapters from the wrapped method handlers to what the transport and the event bus call.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::MethodEntry;
use crate::error::SocketError;
use crate::events::{AppEventContext, AppEventHandler};
use crate::invocation::{Invocation, MethodHandler};
use crate::metadata::{ListenerMetadata, MethodMetadata};
use crate::transport::{EventHandler, RawEvent};

/// Transport callback for one listener declaration of `entry`.
pub(crate) fn listener_handler(entry: &MethodEntry, listener: &ListenerMetadata) -> EventHandler {
    let handler = entry.handler.clone();
    let method = entry.method.clone();
    let controller = entry.controller.name;
    let namespace = entry.controller.namespace.clone();
    let listener = listener.clone();

    Arc::new(move |raw: RawEvent| {
        let call = Invocation::from_raw(raw, &listener, method.clone(), controller, &namespace);
        run(&handler, call)
    })
}

/// Event bus callback for the `app_on` declarations of `entry`.
pub(crate) fn app_event_handler(entry: &MethodEntry) -> AppEventHandler {
    let handler = entry.handler.clone();
    let method: Arc<MethodMetadata> = entry.method.clone();
    let controller = entry.controller.name;
    let namespace = entry.controller.namespace.clone();

    Arc::new(move |ctx: AppEventContext| {
        let call = Invocation::from_app_event(ctx, method.clone(), controller, &namespace);
        run(&handler, call)
    })
}

fn run(handler: &MethodHandler, call: Invocation) -> BoxFuture<'static, Result<(), SocketError>> {
    let fut = handler(call);
    async move { fut.await.map(|_| ()) }.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{controller, recording, socket_listener};
    use crate::events::IoContext;
    use crate::invocation::{InvocationSource, Reply};
    use crate::transport::{LocalTransport, SocketRef};
    use serde_json::json;

    fn entry(handler: MethodHandler) -> MethodEntry {
        MethodEntry {
            controller: controller(),
            method: Arc::new(MethodMetadata::new("probe")),
            handler,
        }
    }

    #[tokio::test]
    async fn raw_events_become_socket_invocations() {
        let transport = LocalTransport::new();
        let socket: SocketRef = transport.connect("/").await.unwrap();
        let (inner, calls) = recording(Reply::Value(json!("discarded")));
        let callback = listener_handler(&entry(inner), &socket_listener("send"));

        callback(RawEvent::new("send", vec![json!(1), json!(2)], Some(socket)))
            .await
            .unwrap();

        let call = calls.lock()[0].clone();
        assert_eq!(call.source, InvocationSource::Socket);
        assert_eq!(call.args, vec![json!(1), json!(2)]);
        assert_eq!(call.controller, "Probe");
        assert_eq!(call.namespace, "/");
        assert_eq!(call.listener.unwrap().event.as_deref(), Some("send"));
    }

    #[tokio::test]
    async fn app_events_carry_data_and_io_context() {
        let transport = LocalTransport::new();
        let socket: SocketRef = transport.connect("/").await.unwrap();
        let (inner, calls) = recording(Reply::None);
        let callback = app_event_handler(&entry(inner));

        let ctx = AppEventContext::new("user.joined", json!({"name": "ann"})).with_io_context(
            IoContext {
                socket: Some(socket.clone()),
                event_name: "join".into(),
                args: vec![],
            },
        );
        callback(ctx).await.unwrap();

        let call = calls.lock()[0].clone();
        assert_eq!(call.source, InvocationSource::AppEvent);
        assert_eq!(call.event, "user.joined");
        assert_eq!(call.data(0), Some(&json!({"name": "ann"})));
        assert!(call.socket.is_some());
        assert!(call.listener.is_none());
    }
}
