//! The wrapper chain.
//!
//! Each stage takes every method handler as left by the previous stage and replaces it
//! with a wrapped one, so the final handler is `errors(app_emit(throttle(middleware(
//! socket_emit(server_emit(validate(inject(original))))))))`. At call time the outer
//! layers run first.

mod app_emit;
mod emit;
mod errors;
mod inject;
mod middleware;
mod normalize;
mod throttle;
mod validate;

use std::sync::Arc;

use crate::container::AnyInstance;
use crate::controller::ControllerClass;
use crate::error::SocketError;
use crate::invocation::MethodHandler;
use crate::metadata::{ControllerMetadata, MetadataStore, MethodMetadata};

pub(crate) use app_emit::AppEmitWrap;
pub(crate) use emit::{EmitContext, EmitterWrap};
pub(crate) use errors::{guard_connect_middleware, guard_packet_middleware, ErrorWrap};
pub(crate) use inject::ArgumentInjector;
pub(crate) use middleware::DeclarativeMiddleware;
pub(crate) use normalize::{app_event_handler, listener_handler};
pub(crate) use throttle::ThrottleWrap;
pub(crate) use validate::DataValidation;

/// What a stage sees of the method it wraps.
pub(crate) struct WrapTarget<'a> {
    pub controller: &'a Arc<ControllerMetadata>,
    pub method: &'a Arc<MethodMetadata>,
}

pub(crate) trait MethodWrapper: Send + Sync {
    fn stage(&self) -> &'static str;

    /// Wrap `inner`, or return it untouched when the stage does not apply.
    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError>;
}

pub(crate) struct MethodEntry {
    pub controller: Arc<ControllerMetadata>,
    pub method: Arc<MethodMetadata>,
    pub handler: MethodHandler,
}

/// Current handler of every bound method, in controller then declaration order.
#[derive(Default)]
pub(crate) struct MethodTable {
    entries: Vec<MethodEntry>,
}

impl MethodTable {
    /// Add every method of `class`, bound to `instance`.
    pub fn add_controller(
        &mut self,
        store: &MetadataStore,
        class: &ControllerClass,
        instance: &AnyInstance,
    ) -> Result<(), SocketError> {
        let key = class.key();
        let controller = store
            .controller(&key)
            .ok_or_else(|| SocketError::MetadataLookup {
                controller: class.name().to_string(),
                method: "*".to_string(),
            })?;
        let controller = Arc::new(controller.clone());

        for (name, handler) in class.bind(instance) {
            let method = controller
                .method(name)
                .ok_or_else(|| SocketError::MetadataLookup {
                    controller: class.name().to_string(),
                    method: name.to_string(),
                })?;
            self.entries.push(MethodEntry {
                controller: controller.clone(),
                method: Arc::new(method.clone()),
                handler,
            });
        }
        Ok(())
    }

    pub fn apply(&mut self, wrapper: &dyn MethodWrapper) -> Result<(), SocketError> {
        tracing::debug!(stage = wrapper.stage(), "Applying wrapper stage");
        for entry in &mut self.entries {
            let target = WrapTarget {
                controller: &entry.controller,
                method: &entry.method,
            };
            entry.handler = wrapper.wrap(&target, entry.handler.clone())?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[MethodEntry] {
        &self.entries
    }
}
