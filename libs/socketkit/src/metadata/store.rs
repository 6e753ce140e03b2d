use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use crate::container::{Component, ComponentKey};
use crate::controller::{ControllerClass, ControllerRegistrator};
use crate::error::ConfigError;
use crate::middleware::SocketMiddleware;
use crate::throttle::ThrottleSpec;

use super::{
    ControllerMetadata, EmitterMetadata, ListenerMetadata, MethodArgMetadata, MethodMetadata,
};

/// Identity of the controller a decorator is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerRef {
    pub key: ComponentKey,
    pub name: &'static str,
}

impl ControllerRef {
    pub fn of<C: 'static>(name: &'static str) -> Self {
        Self {
            key: ComponentKey::of::<C>(),
            name,
        }
    }
}

/// Target of a class-or-method decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataScope {
    Class,
    Method(&'static str),
}

impl MetadataScope {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Class => "a class",
            Self::Method(_) => "a method",
        }
    }
}

/// Registry of decorator intent, keyed by controller type.
///
/// Mutated only while controllers are defined; the runtime takes it by value and
/// reads it from then on.
#[derive(Debug, Default)]
pub struct MetadataStore {
    controllers: Vec<ControllerMetadata>,
    index: HashMap<TypeId, usize>,
    registered: HashSet<TypeId>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every `inventory`-submitted controller registrator against a fresh store.
    ///
    /// All failures are collected before reporting. The order of the returned classes
    /// follows link order and is not otherwise guaranteed.
    pub fn discover() -> Result<(Self, Vec<ControllerClass>), ConfigError> {
        let mut store = Self::new();
        let mut classes = Vec::new();
        let mut errors = Vec::new();
        for registrator in ::inventory::iter::<ControllerRegistrator> {
            match (registrator.0)(&mut store) {
                Ok(class) => classes.push(class),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::Invalid { errors });
        }
        tracing::debug!(controllers = classes.len(), "Controllers discovered");
        Ok((store, classes))
    }

    pub fn controllers(&self) -> &[ControllerMetadata] {
        &self.controllers
    }

    pub fn controller(&self, key: &ComponentKey) -> Option<&ControllerMetadata> {
        self.index.get(&key.type_id).map(|&i| &self.controllers[i])
    }

    pub fn method(&self, key: &ComponentKey, method: &str) -> Option<&MethodMetadata> {
        self.controller(key).and_then(|c| c.method(method))
    }

    pub fn get_or_create_controller(&mut self, owner: ControllerRef) -> &mut ControllerMetadata {
        let next = self.controllers.len();
        let i = *self.index.entry(owner.key.type_id).or_insert(next);
        if i == next {
            self.controllers
                .push(ControllerMetadata::new(owner.key, owner.name));
        }
        &mut self.controllers[i]
    }

    pub fn get_or_create_method(
        &mut self,
        owner: ControllerRef,
        method: &'static str,
    ) -> &mut MethodMetadata {
        let controller = self.get_or_create_controller(owner);
        let pos = match controller.methods.iter().position(|m| m.name == method) {
            Some(pos) => pos,
            None => {
                controller.methods.push(MethodMetadata::new(method));
                controller.methods.len() - 1
            }
        };
        &mut controller.methods[pos]
    }

    /// Mark a controller class as registered; each class may be registered once.
    pub(crate) fn claim(&mut self, owner: ControllerRef) -> Result<(), ConfigError> {
        if !self.registered.insert(owner.key.type_id) {
            return Err(ConfigError::DuplicateController(owner.name));
        }
        self.get_or_create_controller(owner);
        Ok(())
    }

    pub fn set_namespace(
        &mut self,
        owner: ControllerRef,
        namespace: &str,
    ) -> Result<(), ConfigError> {
        if !namespace.starts_with('/') {
            return Err(ConfigError::InvalidNamespace(namespace.to_string()));
        }
        self.get_or_create_controller(owner).namespace = namespace.to_string();
        Ok(())
    }

    pub fn add_listener(
        &mut self,
        owner: ControllerRef,
        method: &'static str,
        listener: ListenerMetadata,
    ) {
        // re-normalize: payloadless events can never validate
        let requested = listener.data_check;
        let listener = listener.with_data_check(requested);
        self.get_or_create_method(owner, method)
            .listeners
            .push(listener);
    }

    pub fn add_emitter(
        &mut self,
        owner: ControllerRef,
        method: &'static str,
        emitter: EmitterMetadata,
    ) {
        self.get_or_create_method(owner, method)
            .emitters
            .push(emitter);
    }

    pub fn add_arg(
        &mut self,
        owner: ControllerRef,
        method: &'static str,
        arg: MethodArgMetadata,
    ) -> Result<(), ConfigError> {
        let record = self.get_or_create_method(owner, method);
        let index = arg.index();
        match record.args.binary_search_by_key(&index, MethodArgMetadata::index) {
            Ok(_) => Err(ConfigError::DuplicateParameter {
                controller: owner.name,
                method,
                index,
            }),
            Err(pos) => {
                record.args.insert(pos, arg);
                Ok(())
            }
        }
    }

    /// Method-level entries are added after class-level ones; neither replaces the other.
    pub fn add_middleware(
        &mut self,
        owner: ControllerRef,
        scope: MetadataScope,
        middleware: Component<dyn SocketMiddleware>,
    ) {
        match scope {
            MetadataScope::Class => self
                .get_or_create_controller(owner)
                .middlewares
                .push(middleware),
            MetadataScope::Method(method) => self
                .get_or_create_method(owner, method)
                .middlewares
                .push(middleware),
        }
    }

    pub fn add_throttle(&mut self, owner: ControllerRef, scope: MetadataScope, spec: ThrottleSpec) {
        match scope {
            MetadataScope::Class => self.get_or_create_controller(owner).throttle = Some(spec),
            MetadataScope::Method(method) => {
                self.get_or_create_method(owner, method).throttle = Some(spec)
            }
        }
    }

    pub fn skip_validation(&mut self, owner: ControllerRef, method: &'static str) {
        self.get_or_create_method(owner, method).skip_validation = true;
    }

    pub fn add_app_listener(&mut self, owner: ControllerRef, method: &'static str, event: &str) {
        self.get_or_create_method(owner, method)
            .app_listeners
            .push(event.to_string());
    }

    pub fn add_app_emitter(&mut self, owner: ControllerRef, method: &'static str, event: &str) {
        self.get_or_create_method(owner, method)
            .app_emitters
            .push(event.to_string());
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.controllers.clear();
        self.index.clear();
        self.registered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ListenerAction, ListenerScope};
    use crate::validation::ParamType;
    use std::time::Duration;

    struct Chat;
    struct Lobby;

    fn chat() -> ControllerRef {
        ControllerRef::of::<Chat>("Chat")
    }

    fn on(event: &str) -> ListenerMetadata {
        ListenerMetadata::new(
            ListenerScope::Socket,
            ListenerAction::On,
            Some(event.into()),
            true,
        )
    }

    #[test]
    fn get_or_create_returns_the_same_record() {
        let mut store = MetadataStore::new();

        let first: *const ControllerMetadata = store.get_or_create_controller(chat());
        let second: *const ControllerMetadata = store.get_or_create_controller(chat());
        assert_eq!(first, second);

        let m1: *const MethodMetadata = store.get_or_create_method(chat(), "send");
        let m2: *const MethodMetadata = store.get_or_create_method(chat(), "send");
        assert_eq!(m1, m2);

        assert_eq!(store.controllers().len(), 1);
        assert_eq!(store.controllers()[0].methods.len(), 1);
    }

    #[test]
    fn controllers_are_keyed_by_type_identity() {
        let mut store = MetadataStore::new();
        store.get_or_create_controller(chat());
        store.get_or_create_controller(ControllerRef::of::<Lobby>("Chat"));
        assert_eq!(store.controllers().len(), 2);
    }

    #[test]
    fn several_listeners_accumulate_on_one_method() {
        let mut store = MetadataStore::new();
        store.add_listener(chat(), "send", on("message"));
        store.add_listener(chat(), "send", on("shout"));

        let method = store.method(&chat().key, "send").unwrap();
        let events: Vec<_> = method
            .listeners
            .iter()
            .filter_map(|l| l.event.as_deref())
            .collect();
        assert_eq!(events, ["message", "shout"]);
    }

    #[test]
    fn disconnect_listener_is_stored_without_validation() {
        let mut store = MetadataStore::new();
        let mut listener = on("disconnect");
        listener.data_check = true;
        store.add_listener(chat(), "bye", listener);

        let method = store.method(&chat().key, "bye").unwrap();
        assert!(!method.listeners[0].data_check);
    }

    #[test]
    fn namespace_must_start_with_a_slash() {
        let mut store = MetadataStore::new();
        assert_eq!(
            store.set_namespace(chat(), "chat"),
            Err(ConfigError::InvalidNamespace("chat".into()))
        );
        store.set_namespace(chat(), "/chat").unwrap();
        assert_eq!(store.controller(&chat().key).unwrap().namespace, "/chat");
    }

    #[test]
    fn args_are_sorted_and_unique_per_index() {
        let mut store = MetadataStore::new();
        store
            .add_arg(chat(), "send", MethodArgMetadata::EventName { index: 2 })
            .unwrap();
        store
            .add_arg(
                chat(),
                "send",
                MethodArgMetadata::Data {
                    index: 0,
                    data_index: 0,
                    param_type: ParamType::String,
                },
            )
            .unwrap();

        let err = store
            .add_arg(chat(), "send", MethodArgMetadata::Socket { index: 2 })
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateParameter { index: 2, .. }));

        let indexes: Vec<_> = store
            .method(&chat().key, "send")
            .unwrap()
            .args
            .iter()
            .map(MethodArgMetadata::index)
            .collect();
        assert_eq!(indexes, [0, 2]);
    }

    #[test]
    fn throttle_is_recorded_per_scope() {
        let mut store = MetadataStore::new();
        let class = ThrottleSpec::new(10, Duration::from_secs(60));
        let method = ThrottleSpec::new(2, Duration::from_secs(1));
        store.add_throttle(chat(), MetadataScope::Class, class);
        store.add_throttle(chat(), MetadataScope::Method("send"), method);

        let controller = store.controller(&chat().key).unwrap();
        assert_eq!(controller.throttle, Some(class));
        assert_eq!(controller.method("send").unwrap().throttle, Some(method));
    }

    #[test]
    fn claiming_twice_is_a_duplicate() {
        let mut store = MetadataStore::new();
        store.claim(chat()).unwrap();
        assert_eq!(
            store.claim(chat()),
            Err(ConfigError::DuplicateController("Chat"))
        );
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = MetadataStore::new();
        store.claim(chat()).unwrap();
        store.add_listener(chat(), "send", on("message"));
        store.reset();

        assert!(store.controllers().is_empty());
        assert!(store.controller(&chat().key).is_none());
        store.claim(chat()).unwrap();
    }
}
