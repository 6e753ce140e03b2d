//! Error taxonomy for decoration, startup and per-event processing.

use std::time::Duration;

use thiserror::Error;

/// Raised while decorators are applied or while the runtime is assembled.
///
/// These are never caught internally: they fail startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("namespace '{0}' must start with '/'")]
    InvalidNamespace(String),
    #[error("decorator '{decorator}' cannot be applied to {target}")]
    InvalidPlacement {
        decorator: &'static str,
        target: &'static str,
    },
    #[error("parameter index {index} of '{controller}::{method}' is declared twice")]
    DuplicateParameter {
        controller: &'static str,
        method: &'static str,
        index: usize,
    },
    #[error("controller '{0}' is already registered")]
    DuplicateController(&'static str),
    #[error("listener {action} is not supported for {scope} scope")]
    UnsupportedListener {
        scope: &'static str,
        action: &'static str,
    },
    #[error("a current-user parameter was requested but no current user provider is configured")]
    MissingCurrentUserProvider,
    #[error("an emission targets a user but no user socket locator is configured")]
    MissingUserSocketLocator,
    #[error("invalid configuration:\n{errors:#?}")]
    Invalid { errors: Vec<String> },
}

/// Errors flowing through the wrapper chain.
///
/// Per-event kinds (`IncomingData`, `InvalidArgument`, `Throttle`, `Handler`, `Middleware`)
/// are caught once by the controller-level error wrapper when an error middleware is
/// configured; everything else surfaces to the caller.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("incoming data rejected for '{event}': {reason}")]
    IncomingData { event: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("too many requests for '{event}', retry in {remaining:?}")]
    Throttle { event: String, remaining: Duration },

    #[error("no metadata recorded for '{controller}::{method}'")]
    MetadataLookup {
        controller: String,
        method: String,
    },

    #[error("failed to resolve component '{component}': {reason}")]
    Resolution { component: String, reason: String },

    /// Raised by an external DI container; passed through untouched.
    #[error(transparent)]
    Container(anyhow::Error),

    #[error("middleware '{middleware}' rejected the event: {reason}")]
    Middleware { middleware: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Handler bodies usually return `anyhow::Result`; a `SocketError` raised inside one
/// keeps its kind instead of becoming a generic handler failure.
impl From<anyhow::Error> for SocketError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SocketError>() {
            Ok(inner) => inner,
            Err(err) => Self::Handler(err),
        }
    }
}

impl SocketError {
    pub fn incoming_data(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncomingData {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used in logs and by error middlewares.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::IncomingData { .. } => "incoming_data",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Throttle { .. } => "throttle",
            Self::MetadataLookup { .. } => "metadata_lookup",
            Self::Resolution { .. } => "resolution",
            Self::Container(_) => "container",
            Self::Middleware { .. } => "middleware",
            Self::Transport(_) => "transport",
            Self::Handler(_) => "handler",
        }
    }

    /// Whether the controller-level error wrapper may hand this error to the error middleware.
    ///
    /// Transport failures raised while an event runs (a failed emit) count as per-event.
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            Self::IncomingData { .. }
                | Self::InvalidArgument(_)
                | Self::Throttle { .. }
                | Self::Middleware { .. }
                | Self::Transport(_)
                | Self::Handler(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_error_reports_remaining_time() {
        let err = SocketError::Throttle {
            event: "message".into(),
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(err.kind(), "throttle");
        assert!(err.to_string().contains("message"));
        assert!(err.to_string().contains("1.5s"));
    }

    #[test]
    fn config_error_converts_into_socket_error() {
        let err: SocketError = ConfigError::InvalidNamespace("chat".into()).into();
        assert_eq!(err.kind(), "config");
        assert_eq!(err.to_string(), "namespace 'chat' must start with '/'");
    }

    #[test]
    fn handler_errors_are_transparent() {
        let err: SocketError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), "handler");
        assert_eq!(err.to_string(), "boom");
        assert!(err.is_per_event());
    }

    #[test]
    fn socket_errors_survive_an_anyhow_round_trip() {
        let wrapped = anyhow::Error::new(SocketError::InvalidArgument("bad".into()));
        let err: SocketError = wrapped.into();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn lookup_and_config_errors_are_not_per_event() {
        let lookup = SocketError::MetadataLookup {
            controller: "Chat".into(),
            method: "send".into(),
        };
        assert!(!lookup.is_per_event());
        assert!(!SocketError::from(ConfigError::MissingUserSocketLocator).is_per_event());
    }

    #[test]
    fn failed_emits_are_per_event() {
        assert!(SocketError::Transport("socket 'a' is disconnected".into()).is_per_event());
    }
}
