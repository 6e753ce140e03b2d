//! A small chat: every connection gets a guest name, joins the lobby and can talk or whisper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use socketkit::middleware::{error_middleware, server_middleware};
use socketkit::prelude::*;
use socketkit::transport::LocalTransport;
use socketkit::{CurrentUserProvider, SocketControllersOptions, UserSocketLocator};

pub const LOBBY: &str = "lobby";
const USER_KEY: &str = "user";

#[derive(Debug, Deserialize)]
pub struct Whisper {
    pub to: String,
    pub text: String,
}

#[derive(Default)]
pub struct ChatController;

impl ChatController {
    async fn join(self: Arc<Self>, call: Invocation) -> anyhow::Result<Value> {
        call.require_socket()?.join(LOBBY);
        let user = call.current_user().cloned().unwrap_or_default();
        Ok(json!({ "user": user, "room": LOBBY }))
    }

    async fn say(self: Arc<Self>, call: Invocation) -> anyhow::Result<Value> {
        let text: String = call.payload(1)?;
        let user = call.current_user().cloned().unwrap_or_default();
        Ok(json!({ "from": user, "text": text }))
    }

    async fn whisper(self: Arc<Self>, call: Invocation) -> anyhow::Result<EmitterOption> {
        let whisper: Whisper = call.payload(1)?;
        let from = call.current_user().cloned().unwrap_or_default();
        let data = json!({ "from": from, "text": whisper.text });
        Ok(EmitterOption::new(data).to_user(json!(whisper.to)))
    }

    async fn leave(self: Arc<Self>, call: Invocation) -> anyhow::Result<()> {
        let reason: String = call.payload(0).unwrap_or_default();
        tracing::info!(socket_id = %call.require_socket()?.id(), %reason, "Guest left");
        Ok(())
    }
}

/// Register the chat controller on `ns`.
pub fn chat_controller(
    store: &mut MetadataStore,
    ns: &str,
) -> Result<ControllerClass, ConfigError> {
    Controller::<ChatController>::new("ChatController")
        .decorate(namespace(ns))
        .decorate(use_middleware::<PacketLog>())
        .method(
            "join",
            ChatController::join,
            [on_connect(), connected_socket(0), current_user(1), server_emit_to(LOBBY, "joined")],
        )
        .method(
            "say",
            ChatController::say,
            [
                socket_on("say"),
                current_user(0),
                message_body_at(1, 0, socketkit::validation::ParamType::String),
                socket_emit_to(LOBBY, "said"),
                throttle(5, Duration::from_secs(10)),
            ],
        )
        .method(
            "whisper",
            ChatController::whisper,
            [
                socket_on("whisper"),
                current_user(0),
                message_body_typed::<Whisper>(1, 0),
                socket_emit_self("whispered"),
            ],
        )
        .method("leave", ChatController::leave, [on_disconnect(), message_body(0)])
        .register(store)
}

/// Names every new connection `guest-N`.
#[derive(Default)]
pub struct GuestNames {
    next: AtomicUsize,
}

#[async_trait]
impl ServerMiddleware for GuestNames {
    async fn handle(&self, socket: SocketRef, next: Next) -> Result<(), SocketError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        socket.data().set(USER_KEY, json!(format!("guest-{n}")));
        next.proceed();
        Ok(())
    }
}

/// Traces every inbound packet of the chat controller.
#[derive(Default)]
pub struct PacketLog;

#[async_trait]
impl SocketMiddleware for PacketLog {
    async fn handle(
        &self,
        socket: SocketRef,
        packet: Packet,
        next: Next,
    ) -> Result<(), SocketError> {
        tracing::debug!(socket_id = %socket.id(), event = %packet.event, "Packet");
        next.proceed();
        Ok(())
    }
}

#[derive(Default)]
pub struct LogErrors;

#[async_trait]
impl ErrorMiddleware for LogErrors {
    async fn handle_error(&self, error: SocketError, socket: Option<SocketRef>) {
        tracing::warn!(
            socket_id = %socket.as_ref().map(|s| s.id().to_string()).unwrap_or_default(),
            kind = error.kind(),
            error = %error,
            "Chat event failed"
        );
    }
}

fn current_user_provider() -> CurrentUserProvider {
    Arc::new(|socket: SocketRef| {
        async move {
            socket
                .data()
                .get(USER_KEY)
                .ok_or_else(|| SocketError::InvalidArgument("connection has no user".into()))
        }
        .boxed()
    })
}

fn guest_locator(transport: Arc<LocalTransport>, ns: String) -> UserSocketLocator {
    Arc::new(move |user: Value| {
        let found = transport
            .namespace(&ns)
            .sockets()
            .into_iter()
            .find(|s| s.data().get(USER_KEY).as_ref() == Some(&user))
            .map(|s| s as SocketRef);
        async move { found }.boxed()
    })
}

/// Options wiring the chat controller, its middlewares and the user hooks onto `transport`.
pub fn chat_options(
    transport: Arc<LocalTransport>,
    ns: &str,
) -> Result<SocketControllersOptions, ConfigError> {
    let mut store = MetadataStore::new();
    let class = chat_controller(&mut store, ns)?;
    Ok(SocketControllersOptions::new(transport.clone())
        .controllers(store, vec![class])
        .server_middleware(server_middleware::<GuestNames>())
        .error_middleware(error_middleware::<LogErrors>())
        .current_user(current_user_provider())
        .user_socket_locator(guest_locator(transport, ns.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use socketkit::SocketRuntime;
    use tokio_util::sync::CancellationToken;

    async fn start() -> Arc<LocalTransport> {
        let transport = Arc::new(LocalTransport::new());
        let opts = chat_options(transport.clone(), "/chat").unwrap();
        SocketRuntime::new(opts, CancellationToken::new())
            .start()
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn guests_are_announced_and_talk_in_the_lobby() {
        let transport = start().await;
        let alice = transport.connect("/chat").await.unwrap();
        let bob = transport.connect("/chat").await.unwrap();

        assert_eq!(alice.data().get(USER_KEY), Some(json!("guest-1")));
        assert_eq!(
            alice.received_for("joined"),
            vec![
                json!({ "user": "guest-1", "room": LOBBY }),
                json!({ "user": "guest-2", "room": LOBBY }),
            ]
        );

        bob.dispatch("say", vec![json!("hello")]).await.unwrap();
        assert_eq!(
            alice.received_for("said"),
            vec![json!({ "from": "guest-2", "text": "hello" })]
        );
        assert!(bob.received_for("said").is_empty());
    }

    #[tokio::test]
    async fn whispers_reach_only_the_named_guest() {
        let transport = start().await;
        let alice = transport.connect("/chat").await.unwrap();
        let bob = transport.connect("/chat").await.unwrap();
        let carol = transport.connect("/chat").await.unwrap();

        alice
            .dispatch("whisper", vec![json!({ "to": "guest-3", "text": "psst" })])
            .await
            .unwrap();

        assert_eq!(
            carol.received_for("whispered"),
            vec![json!({ "from": "guest-1", "text": "psst" })]
        );
        assert!(alice.received_for("whispered").is_empty());
        assert!(bob.received_for("whispered").is_empty());
    }

    #[tokio::test]
    async fn malformed_whispers_are_swallowed_by_the_error_middleware() {
        let transport = start().await;
        let alice = transport.connect("/chat").await.unwrap();

        alice.dispatch("whisper", vec![json!({ "to": 1 })]).await.unwrap();
        assert!(alice.received_for("whispered").is_empty());
        assert!(transport.take_unhandled_errors().is_empty());
    }
}
