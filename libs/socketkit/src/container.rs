//! Component resolution: one instance per type for the lifetime of the process.
//!
//! Controllers and middlewares are described by a [`Component`]; the [`Resolver`] turns a
//! component into a live instance either through an external [`DiContainer`] or, when none
//! is configured, through the component's own factory. Either way the first instance
//! produced for a type is cached and handed out from then on.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::SocketError;

pub type AnyInstance = Arc<dyn Any + Send + Sync>;
pub type Factory = Arc<dyn Fn() -> AnyInstance + Send + Sync>;

/// Stable identity of a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl ComponentKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// A resolvable type, viewed as `T` (a concrete type or a trait object).
pub struct Component<T: ?Sized> {
    key: ComponentKey,
    factory: Option<Factory>,
    cast: fn(AnyInstance) -> Option<Arc<T>>,
}

impl<T: ?Sized> Clone for Component<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            factory: self.factory.clone(),
            cast: self.cast,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("key", &self.key.type_name)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

impl<T: ?Sized> Component<T> {
    /// Build a component for the concrete type `C`, exposed as `T` through `cast`.
    pub fn from_parts<C: Send + Sync + 'static>(
        factory: Option<Factory>,
        cast: fn(AnyInstance) -> Option<Arc<T>>,
    ) -> Self {
        Self {
            key: ComponentKey::of::<C>(),
            factory,
            cast,
        }
    }

    pub fn key(&self) -> ComponentKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.type_name
    }

    pub(crate) fn factory(&self) -> Option<&Factory> {
        self.factory.as_ref()
    }

    pub(crate) fn cast(&self, instance: AnyInstance) -> Option<Arc<T>> {
        (self.cast)(instance)
    }
}

fn cast_concrete<C: Send + Sync + 'static>(instance: AnyInstance) -> Option<Arc<C>> {
    instance.downcast::<C>().ok()
}

pub(crate) fn default_factory<C: Default + Send + Sync + 'static>() -> Factory {
    Arc::new(|| Arc::new(C::default()) as AnyInstance)
}

impl<C: Send + Sync + 'static> Component<C> {
    /// Component built with `C::default()` when no container is configured.
    pub fn of() -> Self
    where
        C: Default,
    {
        Self::from_parts::<C>(Some(default_factory::<C>()), cast_concrete::<C>)
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as AnyInstance);
        Self::from_parts::<C>(Some(factory), cast_concrete::<C>)
    }

    /// Component that can only come from an external container.
    pub fn external() -> Self {
        Self::from_parts::<C>(None, cast_concrete::<C>)
    }
}

/// External dependency-injection container.
pub trait DiContainer: Send + Sync {
    /// Produce the instance registered for `key`. Errors are surfaced to the caller as-is.
    fn resolve(&self, key: &ComponentKey) -> anyhow::Result<AnyInstance>;
}

/// Type-keyed container: register ready-made instances, look them up by type.
#[derive(Default)]
pub struct TypeContainer {
    items: DashMap<TypeId, AnyInstance>,
}

impl TypeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the instance for `T`.
    pub fn register<T: Send + Sync + 'static>(&self, instance: Arc<T>) {
        self.items.insert(TypeId::of::<T>(), instance);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .get(&TypeId::of::<T>())
            .and_then(|e| e.value().clone().downcast::<T>().ok())
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> bool {
        self.items.remove(&TypeId::of::<T>()).is_some()
    }
}

impl DiContainer for TypeContainer {
    fn resolve(&self, key: &ComponentKey) -> anyhow::Result<AnyInstance> {
        self.items
            .get(&key.type_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow::anyhow!("component '{}' is not registered", key.type_name))
    }
}

/// Produces and caches component instances.
#[derive(Default)]
pub struct Resolver {
    container: Option<Arc<dyn DiContainer>>,
    instances: Mutex<HashMap<TypeId, AnyInstance>>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("has_container", &self.container.is_some())
            .field("instances", &self.instances.lock().len())
            .finish()
    }
}

impl Resolver {
    pub fn new(container: Option<Arc<dyn DiContainer>>) -> Self {
        Self {
            container,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve<T: ?Sized>(&self, component: &Component<T>) -> Result<Arc<T>, SocketError> {
        let instance = self.resolve_any(&component.key(), component.factory())?;
        component
            .cast(instance)
            .ok_or_else(|| SocketError::Resolution {
                component: component.name().to_string(),
                reason: "resolved instance has an unexpected type".to_string(),
            })
    }

    pub(crate) fn resolve_any(
        &self,
        key: &ComponentKey,
        factory: Option<&Factory>,
    ) -> Result<AnyInstance, SocketError> {
        if let Some(found) = self.instances.lock().get(&key.type_id) {
            return Ok(found.clone());
        }

        // The lock is released while producing: factories may resolve other components.
        let produced = match (&self.container, factory) {
            (Some(container), _) => container.resolve(key).map_err(SocketError::Container)?,
            (None, Some(factory)) => factory(),
            (None, None) => {
                return Err(SocketError::Resolution {
                    component: key.type_name.to_string(),
                    reason: "no container configured and the component has no factory"
                        .to_string(),
                })
            }
        };

        let mut instances = self.instances.lock();
        let instance = instances.entry(key.type_id).or_insert(produced).clone();
        tracing::debug!(component = key.type_name, "Component resolved");
        Ok(instance)
    }

    /// Number of cached instances.
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached instance.
    pub fn reset(&self) {
        self.instances.lock().clear();
    }
}
