//! Controller definition: a type, its decorated methods, and how to build it.
//!
//! ```ignore
//! let chat = Controller::<Chat>::new("Chat")
//!     .decorate(namespace("/chat"))
//!     .method(
//!         "send",
//!         Chat::send,
//!         [socket_on("message"), message_body(0), socket_emit_to("lobby", "said")],
//!     )
//!     .register(&mut store)?;
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::container::{default_factory, AnyInstance, ComponentKey, Factory};
use crate::decorators::Decorator;
use crate::error::{ConfigError, SocketError};
use crate::invocation::{HandlerResult, Invocation, MethodHandler, Reply};
use crate::metadata::{ControllerRef, MetadataScope, MetadataStore};

/// Type-erased method: downcasts the instance and calls the user function.
type ErasedMethod =
    Arc<dyn Fn(AnyInstance, Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Submitted with `inventory::submit!` to make a controller discoverable.
pub struct ControllerRegistrator(
    pub fn(&mut MetadataStore) -> Result<ControllerClass, ConfigError>,
);

inventory::collect!(ControllerRegistrator);

/// A registered controller: what the runtime resolves and binds.
#[derive(Clone)]
pub struct ControllerClass {
    owner: ControllerRef,
    factory: Option<Factory>,
    methods: Vec<(&'static str, ErasedMethod)>,
}

impl fmt::Debug for ControllerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods.iter().map(|(name, _)| *name).collect();
        f.debug_struct("ControllerClass")
            .field("name", &self.owner.name)
            .field("type", &self.owner.key.type_name)
            .field("methods", &methods)
            .finish()
    }
}

impl ControllerClass {
    pub fn key(&self) -> ComponentKey {
        self.owner.key
    }

    pub fn name(&self) -> &'static str {
        self.owner.name
    }

    pub(crate) fn factory(&self) -> Option<&Factory> {
        self.factory.as_ref()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.iter().map(|(name, _)| *name)
    }

    /// Attach every method to a resolved instance.
    pub(crate) fn bind(&self, instance: &AnyInstance) -> Vec<(&'static str, MethodHandler)> {
        self.methods
            .iter()
            .map(|(name, method)| {
                let method = method.clone();
                let instance = instance.clone();
                let handler: MethodHandler =
                    Arc::new(move |call: Invocation| method(instance.clone(), call));
                (*name, handler)
            })
            .collect()
    }
}

struct MethodDecl {
    name: &'static str,
    method: ErasedMethod,
    decorators: Vec<Decorator>,
}

/// Builder collecting a controller's decorators.
pub struct Controller<C> {
    owner: ControllerRef,
    factory: Option<Factory>,
    decorators: Vec<Decorator>,
    methods: Vec<MethodDecl>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> Controller<C> {
    /// Controller built with `C::default()` when no container is configured.
    pub fn new(name: &'static str) -> Self
    where
        C: Default,
    {
        Self::with_parts(name, Some(default_factory::<C>()))
    }

    pub fn with_factory<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as AnyInstance);
        Self::with_parts(name, Some(factory))
    }

    /// Controller that only an external container can provide.
    pub fn external(name: &'static str) -> Self {
        Self::with_parts(name, None)
    }

    fn with_parts(name: &'static str, factory: Option<Factory>) -> Self {
        Self {
            owner: ControllerRef::of::<C>(name),
            factory,
            decorators: Vec::new(),
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Class-level decorator.
    pub fn decorate(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Declare a method with its decorators.
    pub fn method<F, Fut, R, E>(
        mut self,
        name: &'static str,
        handler: F,
        decorators: impl IntoIterator<Item = Decorator>,
    ) -> Self
    where
        F: Fn(Arc<C>, Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<Reply> + 'static,
        E: Into<SocketError> + 'static,
    {
        let controller = self.owner.name;
        let method: ErasedMethod = Arc::new(move |instance: AnyInstance, call: Invocation| {
            match instance.downcast::<C>() {
                Ok(this) => handler(this, call)
                    .map(|result: Result<R, E>| -> HandlerResult {
                        result.map(Into::into).map_err(Into::into)
                    })
                    .boxed(),
                Err(_) => futures::future::ready(Err(SocketError::Resolution {
                    component: controller.to_string(),
                    reason: format!("instance is not a {}", std::any::type_name::<C>()),
                }))
                .boxed(),
            }
        });
        self.methods.push(MethodDecl {
            name,
            method,
            decorators: decorators.into_iter().collect(),
        });
        self
    }

    /// Record every decorator into `store` and produce the bindable class.
    pub fn register(self, store: &mut MetadataStore) -> Result<ControllerClass, ConfigError> {
        store.claim(self.owner)?;
        for decorator in self.decorators {
            decorator.apply(store, self.owner, MetadataScope::Class)?;
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for decl in self.methods {
            store.get_or_create_method(self.owner, decl.name);
            for decorator in decl.decorators {
                decorator.apply(store, self.owner, MetadataScope::Method(decl.name))?;
            }
            methods.push((decl.name, decl.method));
        }

        tracing::debug!(
            controller = self.owner.name,
            methods = methods.len(),
            "Controller registered"
        );
        Ok(ControllerClass {
            owner: self.owner,
            factory: self.factory,
            methods,
        })
    }
}
