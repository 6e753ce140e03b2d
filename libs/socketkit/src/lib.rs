//! # SocketKit - declarative controllers for realtime socket events
//!
//! Controllers are plain types whose methods are declared with decorators: which event
//! they listen to, which parameters they take, where their result is emitted, how they
//! are throttled and guarded. At start the runtime resolves one instance per controller,
//! wraps every method in a fixed chain of stages and binds the result to the transport.
//!
//! ## Stage order
//!
//! Applied inside out: argument injection → payload validation → server emitter →
//! socket emitter → declarative middleware → throttle → application event publishing →
//! error middleware. At call time the outer stages run first.
//!
//! ## Example
//!
//! ```rust,ignore
//! use socketkit::prelude::*;
//!
//! #[derive(Default)]
//! struct Chat;
//!
//! impl Chat {
//!     async fn send(self: Arc<Self>, call: Invocation) -> anyhow::Result<Value> {
//!         let text: String = call.payload(0)?;
//!         Ok(json!({ "text": text }))
//!     }
//! }
//!
//! fn chat(store: &mut MetadataStore) -> Result<ControllerClass, ConfigError> {
//!     Controller::<Chat>::new("Chat")
//!         .decorate(namespace("/chat"))
//!         .method(
//!             "send",
//!             Chat::send,
//!             [socket_on("message"), message_body(0), socket_emit_to("lobby", "said")],
//!         )
//!         .register(store)
//! }
//!
//! inventory::submit! { ControllerRegistrator(chat) }
//! ```

pub use async_trait::async_trait;
pub use inventory;

pub mod config;
pub mod container;
pub mod controller;
pub mod decorators;
pub mod error;
pub mod events;
pub mod invocation;
pub mod metadata;
pub mod middleware;
pub mod runtime;
pub mod throttle;
pub mod transport;
pub mod validation;

mod binder;
mod chain;

pub use config::{SocketKitConfig, ThrottleConfig};
pub use container::{Component, ComponentKey, DiContainer, Resolver, TypeContainer};
pub use controller::{Controller, ControllerClass, ControllerRegistrator};
pub use error::{ConfigError, SocketError};
pub use events::{AppEventBus, AppEventContext, AppListener, IoContext};
pub use invocation::{EmitterOption, Invocation, Param, Reply, SessionView};
pub use metadata::MetadataStore;
pub use runtime::{
    run, wait_for_shutdown, CurrentUserProvider, RunningSockets, ShutdownOptions,
    SocketControllersOptions, SocketRuntime, UserSocketLocator,
};

/// Everything a controller module usually needs.
pub mod prelude {
    pub use std::sync::Arc;

    pub use serde_json::{json, Value};

    pub use crate::controller::{Controller, ControllerClass, ControllerRegistrator};
    pub use crate::decorators::*;
    pub use crate::error::{ConfigError, SocketError};
    pub use crate::invocation::{EmitterOption, Invocation, Reply};
    pub use crate::metadata::MetadataStore;
    pub use crate::middleware::{ErrorMiddleware, Next, Packet, ServerMiddleware, SocketMiddleware};
    pub use crate::transport::{Socket, SocketRef};
    pub use async_trait::async_trait;
}
