use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::{MethodWrapper, WrapTarget};
use crate::error::{ConfigError, SocketError};
use crate::invocation::{Invocation, MethodHandler, Param, SessionView};
use crate::metadata::MethodArgMetadata;
use crate::runtime::CurrentUserProvider;
use crate::transport::Socket;

/// Builds the positional parameter list from the method's argument metadata.
///
/// Disabled injection, or a method without argument metadata, passes raw arguments
/// through untouched.
pub(crate) struct ArgumentInjector {
    enabled: bool,
    current_user: Option<CurrentUserProvider>,
}

impl ArgumentInjector {
    pub fn new(enabled: bool, current_user: Option<CurrentUserProvider>) -> Self {
        Self {
            enabled,
            current_user,
        }
    }
}

impl MethodWrapper for ArgumentInjector {
    fn stage(&self) -> &'static str {
        "argument_injection"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let method = target.method.clone();
        if !self.enabled || method.args.is_empty() {
            return Ok(inner);
        }

        let wants_user = method
            .args
            .iter()
            .any(|a| matches!(a, MethodArgMetadata::CurrentUser { .. }));
        if wants_user && self.current_user.is_none() {
            return Err(ConfigError::MissingCurrentUserProvider.into());
        }
        let provider = self.current_user.clone();

        Ok(Arc::new(move |mut call: Invocation| {
            let inner = inner.clone();
            let method = method.clone();
            let provider = provider.clone();
            async move {
                call.params = Some(build_params(&method.args, &call, provider.as_ref()).await?);
                inner(call).await
            }
            .boxed()
        }))
    }
}

async fn build_params(
    args: &[MethodArgMetadata],
    call: &Invocation,
    provider: Option<&CurrentUserProvider>,
) -> Result<Vec<Param>, SocketError> {
    let len = args.iter().map(|a| a.index() + 1).max().unwrap_or(0);
    let mut params = vec![Param::Missing; len];

    for arg in args {
        let param = match arg {
            MethodArgMetadata::Socket { .. } => {
                call.socket.clone().map_or(Param::Missing, Param::Socket)
            }
            MethodArgMetadata::Data { data_index, .. } => {
                Param::Data(call.args.get(*data_index).cloned().unwrap_or(Value::Null))
            }
            MethodArgMetadata::EventName { .. } => Param::EventName(call.event.clone()),
            MethodArgMetadata::CurrentUser { .. } => {
                let provider = provider.ok_or(ConfigError::MissingCurrentUserProvider)?;
                match &call.socket {
                    Some(socket) => Param::CurrentUser(provider(socket.clone()).await?),
                    None => Param::Missing,
                }
            }
            MethodArgMetadata::SocketDataAttribute { data_key, .. } => match &call.socket {
                Some(socket) => {
                    Param::Session(SessionView::new(socket.data().clone(), data_key.clone()))
                }
                None => Param::Missing,
            },
        };
        params[arg.index()] = param;
    }
    Ok(params)
}
