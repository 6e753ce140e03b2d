use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::error::{ConfigError, SocketError};
use crate::invocation::{is_falsy, EmitterOption, Invocation, MethodHandler};
use crate::metadata::{EmitterAction, EmitterMetadata, ListenerScope};
use crate::runtime::UserSocketLocator;
use crate::transport::{Namespace, Socket, SocketRef, Transport};

/// What emitters need to reach connections.
pub(crate) struct EmitContext {
    pub transport: Arc<dyn Transport>,
    pub locator: Option<UserSocketLocator>,
}

/// Sends the handler's result through the method's emitters of one scope.
pub(crate) struct EmitterWrap {
    scope: ListenerScope,
    ctx: Arc<EmitContext>,
}

impl EmitterWrap {
    pub fn server(ctx: Arc<EmitContext>) -> Self {
        Self {
            scope: ListenerScope::Server,
            ctx,
        }
    }

    pub fn socket(ctx: Arc<EmitContext>) -> Self {
        Self {
            scope: ListenerScope::Socket,
            ctx,
        }
    }
}

impl MethodWrapper for EmitterWrap {
    fn stage(&self) -> &'static str {
        match self.scope {
            ListenerScope::Server => "server_emitter",
            ListenerScope::Socket => "socket_emitter",
        }
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let emitters: Arc<Vec<EmitterMetadata>> = Arc::new(
            target
                .method
                .emitters
                .iter()
                .filter(|e| e.scope == self.scope)
                .cloned()
                .collect(),
        );
        if emitters.is_empty() {
            return Ok(inner);
        }
        let ctx = self.ctx.clone();
        let method = target.method.name;

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let emitters = emitters.clone();
            let ctx = ctx.clone();
            async move {
                let socket = call.socket.clone();
                let namespace = call.namespace.clone();
                let reply = inner(call).await?;
                for emitter in emitters.iter() {
                    for option in reply.emissions() {
                        emit_one(&ctx, emitter, option, &namespace, socket.as_ref(), method).await?;
                    }
                }
                Ok(reply)
            }
            .boxed()
        }))
    }
}

async fn emit_one(
    ctx: &EmitContext,
    emitter: &EmitterMetadata,
    option: EmitterOption,
    namespace: &str,
    socket: Option<&SocketRef>,
    method: &'static str,
) -> Result<(), SocketError> {
    if option.disable_emit || is_falsy(&option.data) {
        tracing::debug!(method, "Emission skipped: disabled or empty payload");
        return Ok(());
    }

    let message = option
        .message
        .clone()
        .unwrap_or_else(|| emitter.message.clone());
    if message.is_empty() {
        return Err(SocketError::InvalidArgument(format!(
            "emission of '{method}' resolved to an empty message name"
        )));
    }
    let room = option.to.clone().or_else(|| emitter.to.clone());

    if let Some(user) = option.to_user {
        let locator = ctx
            .locator
            .as_ref()
            .ok_or(ConfigError::MissingUserSocketLocator)?;
        return match locator(user.clone()).await {
            Some(target) => target.emit(&message, option.data).await,
            None => {
                tracing::debug!(method, %user, "Emission skipped: user has no connection");
                Ok(())
            }
        };
    }

    match emitter.scope {
        ListenerScope::Server => {
            ctx.transport
                .of(namespace)
                .emit(room.as_deref(), &message, option.data)
                .await
        }
        ListenerScope::Socket => {
            let Some(socket) = socket else {
                tracing::warn!(method, %message, "Emission skipped: no connection to emit from");
                return Ok(());
            };
            match (emitter.action, room) {
                (EmitterAction::EmitSelf, None) => socket.emit(&message, option.data).await,
                (_, room) => socket.broadcast(room.as_deref(), &message, option.data).await,
            }
        }
    }
}
