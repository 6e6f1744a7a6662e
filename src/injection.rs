//! Dependency injection.
//!
//! A [`FactoryRegistry`] maps an abstract capability (usually a `dyn Trait`) to a factory
//! producing instances of it. A function wrapped by [`inject`] declares its [`Dependency`]
//! parameters; the ones not supplied by the caller are created by the registered factories at
//! the time of the call.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use appframe::injection::{inject_from, Args, Dependency, FactoryRegistry, Injected};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Hello(String);
//!
//! impl Greeter for Hello {
//!     fn greet(&self) -> String {
//!         format!("Hello {}", self.0)
//!     }
//! }
//!
//! let registry = Arc::new(FactoryRegistry::new());
//! registry.register::<dyn Greeter, _>(|args: &Args| {
//!     let name = args.get_str("name").unwrap_or("world").to_owned();
//!     Ok(Arc::new(Hello(name)) as Arc<dyn Greeter>)
//! });
//!
//! let greet = inject_from(
//!     &registry,
//!     vec![Dependency::new::<dyn Greeter>("greeter").args(Args::new().kwarg("name", "there"))],
//!     |injected: Injected| injected.get::<dyn Greeter>("greeter").map(|g| g.greet()),
//! )
//! .unwrap();
//! assert_eq!(Some("Hello there".to_owned()), greet.call(Injected::new()).unwrap());
//! ```

use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use log::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use crate::conf::helpers::Kwargs;
use crate::AnyError;

/// Arguments passed to a factory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Kwargs,
}

impl Args {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a positional argument.
    pub fn arg<V: Into<Value>>(mut self, value: V) -> Self {
        self.args.push(value.into());
        self
    }

    /// Adds a keyword argument.
    pub fn kwarg<N: Into<String>, V: Into<Value>>(mut self, name: N, value: V) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// A keyword argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// A keyword argument, if it is a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

type ErasedFactory = Arc<dyn Fn(&Args) -> Result<Box<dyn Any + Send + Sync>, AnyError> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    type_name: &'static str,
    factory: ErasedFactory,
}

/// The registry of factories.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<TypeId, Registered>>,
}

fn erase<T, F>(factory: F) -> Registered
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&Args) -> Result<Arc<T>, AnyError> + Send + Sync + 'static,
{
    Registered {
        type_name: any::type_name::<T>(),
        factory: Arc::new(move |args: &Args| {
            factory(args).map(|instance| Box::new(instance) as Box<dyn Any + Send + Sync>)
        }),
    }
}

impl FactoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory of the abstract type `T`, replacing any previous one.
    pub fn register<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Args) -> Result<Arc<T>, AnyError> + Send + Sync + 'static,
    {
        debug!("Registering factory of {}", any::type_name::<T>());
        self.factories.write().insert(TypeId::of::<T>(), erase(factory));
    }

    /// Is there a factory of `T`?
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.contains_id(TypeId::of::<T>())
    }

    fn contains_id(&self, type_id: TypeId) -> bool {
        self.factories.read().contains_key(&type_id)
    }

    fn factory(&self, type_id: TypeId) -> Option<ErasedFactory> {
        self.factories
            .read()
            .get(&type_id)
            .map(|registered| Arc::clone(&registered.factory))
    }

    /// Creates an instance of `T` by its factory.
    ///
    /// Returns `None` if there's no factory registered.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(
        &self,
        args: &Args,
    ) -> Option<Result<Arc<T>, AnyError>> {
        let factory = self.factory(TypeId::of::<T>())?;
        Some(factory(args).and_then(|instance| {
            instance
                .downcast::<Arc<T>>()
                .map(|instance| *instance)
                .map_err(|_| AnyError::from(format!("Factory produced other than {}", any::type_name::<T>())))
        }))
    }

    /// Starts a scoped modification of the registry.
    ///
    /// All the changes are reverted when the returned guard is dropped. Meant for tests.
    pub fn modify(&self) -> ModifyFactoryRegistry<'_> {
        ModifyFactoryRegistry {
            registry: self,
            rollback: Vec::new(),
        }
    }
}

impl Debug for FactoryRegistry {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let factories = self.factories.read();
        let mut names = factories.values().map(|r| r.type_name).collect::<Vec<_>>();
        names.sort_unstable();
        fmt.debug_struct("FactoryRegistry")
            .field("factories", &names)
            .finish()
    }
}

/// Temporary changes of a [`FactoryRegistry`], reverted on drop.
pub struct ModifyFactoryRegistry<'a> {
    registry: &'a FactoryRegistry,
    rollback: Vec<(TypeId, Option<Registered>)>,
}

impl ModifyFactoryRegistry<'_> {
    fn replace(&mut self, type_id: TypeId, registered: Option<Registered>) {
        let mut factories = self.registry.factories.write();
        let previous = match registered {
            Some(registered) => factories.insert(type_id, registered),
            None => factories.remove(&type_id),
        };
        self.rollback.push((type_id, previous));
    }

    /// Replaces the factory of `T`.
    pub fn set<T, F>(&mut self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Args) -> Result<Arc<T>, AnyError> + Send + Sync + 'static,
    {
        self.replace(TypeId::of::<T>(), Some(erase(factory)));
    }

    /// Replaces the factory of `T` by one always returning the given instance.
    pub fn set_instance<T: ?Sized + Send + Sync + 'static>(&mut self, instance: Arc<T>) {
        self.set::<T, _>(move |_| Ok(Arc::clone(&instance)));
    }

    /// Removes the factory of `T`.
    pub fn remove<T: ?Sized + 'static>(&mut self) {
        self.replace(TypeId::of::<T>(), None);
    }
}

impl Drop for ModifyFactoryRegistry<'_> {
    fn drop(&mut self) {
        let mut factories = self.registry.factories.write();
        for (type_id, previous) in self.rollback.drain(..).rev() {
            match previous {
                Some(registered) => factories.insert(type_id, registered),
                None => factories.remove(&type_id),
            };
        }
    }
}

static REGISTRY: Lazy<Arc<FactoryRegistry>> = Lazy::new(|| Arc::new(FactoryRegistry::new()));

/// The process-wide factory registry.
pub fn registry() -> &'static Arc<FactoryRegistry> {
    &REGISTRY
}

/// Registers a factory in the process-wide registry.
pub fn register_factory<T, F>(factory: F)
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&Args) -> Result<Arc<T>, AnyError> + Send + Sync + 'static,
{
    registry().register(factory);
}

/// A parameter of an injected function.
#[derive(Clone, Debug)]
pub struct Dependency {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    keyword_only: bool,
    marker: Option<Args>,
}

impl Dependency {
    /// A keyword-only parameter of type `T`, marked for injection.
    pub fn new<T: ?Sized + 'static>(name: &str) -> Self {
        Dependency {
            name: name.to_owned(),
            type_id: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
            keyword_only: true,
            marker: Some(Args::new()),
        }
    }

    /// Arguments passed to the factory.
    pub fn args(self, args: Args) -> Self {
        Dependency {
            marker: Some(args),
            ..self
        }
    }

    /// Makes the parameter positional (can't be injected when marked).
    pub fn positional(self) -> Self {
        Dependency {
            keyword_only: false,
            ..self
        }
    }

    /// Removes the marker; the parameter is then injected only if `T` has a factory.
    pub fn unmarked(self) -> Self {
        Dependency {
            marker: None,
            ..self
        }
    }

    /// Name of the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Problems found when wrapping a function for injection.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum InjectionSetupError {
    /// Only keyword-only parameters can be injected.
    #[error("Only keyword-only arguments can be injected, `{0}` is not")]
    NotKeywordOnly(String),
    /// The type of a marked parameter has no factory.
    #[error("No factory registered for `{type_name}` of argument `{name}`")]
    NotRegistered {
        /// The parameter.
        name: String,
        /// Its type.
        type_name: &'static str,
    },
}

/// A dependency couldn't be provided.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InjectionError {
    /// The factory failed.
    #[error("Unable to instantiate argument `{name}`")]
    Factory {
        /// The parameter.
        name: String,
        /// What the factory returned.
        #[source]
        source: AnyError,
    },
    /// The factory was removed since the function was wrapped.
    #[error("No factory registered for `{type_name}` of argument `{name}`")]
    NotRegistered {
        /// The parameter.
        name: String,
        /// Its type.
        type_name: &'static str,
    },
}

/// The values of the dependencies, passed to the injected function.
#[derive(Default)]
pub struct Injected {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Injected {
    /// Nothing supplied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a value explicitly, the factory is then not called.
    pub fn insert<T: ?Sized + Send + Sync + 'static>(&mut self, name: &str, value: Arc<T>) {
        self.values.insert(name.to_owned(), Box::new(value));
    }

    /// Supplies a value explicitly (builder style).
    pub fn with<T: ?Sized + Send + Sync + 'static>(mut self, name: &str, value: Arc<T>) -> Self {
        self.insert(name, value);
        self
    }

    /// The value of a dependency.
    ///
    /// Returns `None` if missing or of a different type.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.values
            .get(name)
            .and_then(|value| value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Is the value present?
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// A function with its dependencies injected.
pub struct Injectable<F> {
    registry: Arc<FactoryRegistry>,
    dependencies: Vec<Dependency>,
    func: F,
}

impl<F> Injectable<F> {
    /// The parameters being injected.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Calls the function.
    ///
    /// Dependencies not supplied by the caller are created by their factories.
    pub fn call<R>(&self, mut supplied: Injected) -> Result<R, InjectionError>
    where
        F: Fn(Injected) -> R,
    {
        for dependency in &self.dependencies {
            if supplied.contains(&dependency.name) {
                continue;
            }
            let factory = self.registry.factory(dependency.type_id).ok_or_else(|| {
                InjectionError::NotRegistered {
                    name: dependency.name.clone(),
                    type_name: dependency.type_name,
                }
            })?;
            trace!("Injecting {} into {}", dependency.type_name, dependency.name);
            let args = dependency.marker.clone().unwrap_or_default();
            let value = factory(&args).map_err(|source| InjectionError::Factory {
                name: dependency.name.clone(),
                source,
            })?;
            supplied.values.insert(dependency.name.clone(), value);
        }
        Ok((self.func)(supplied))
    }
}

/// Wraps a function for injection from the process-wide registry.
pub fn inject<F>(dependencies: Vec<Dependency>, func: F) -> Result<Injectable<F>, InjectionSetupError> {
    inject_from(registry(), dependencies, func)
}

/// Wraps a function for injection from the given registry.
///
/// Marked dependencies are validated right away; unmarked ones are kept only if their type has a
/// factory.
pub fn inject_from<F>(
    registry: &Arc<FactoryRegistry>,
    dependencies: Vec<Dependency>,
    func: F,
) -> Result<Injectable<F>, InjectionSetupError> {
    let mut resolved = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        let registered = registry.contains_id(dependency.type_id);
        if dependency.marker.is_some() {
            if !dependency.keyword_only {
                return Err(InjectionSetupError::NotKeywordOnly(dependency.name));
            }
            if !registered {
                return Err(InjectionSetupError::NotRegistered {
                    name: dependency.name,
                    type_name: dependency.type_name,
                });
            }
        } else if !registered {
            continue;
        }
        resolved.push(dependency);
    }
    Ok(Injectable {
        registry: Arc::clone(registry),
        dependencies: resolved,
        func,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use err_context::prelude::*;

    use super::*;

    trait Store: Send + Sync {
        fn name(&self) -> String;
    }

    struct Named(String);

    impl Store for Named {
        fn name(&self) -> String {
            self.0.clone()
        }
    }

    trait Unregistered: Send + Sync {}

    fn registry() -> Arc<FactoryRegistry> {
        let registry = Arc::new(FactoryRegistry::new());
        registry.register::<dyn Store, _>(|args| {
            let name = args.get_str("name").unwrap_or("default").to_owned();
            Ok(Arc::new(Named(name)) as Arc<dyn Store>)
        });
        registry
    }

    fn store_name(injected: Injected) -> Option<String> {
        injected.get::<dyn Store>("store").map(|s| s.name())
    }

    #[test]
    fn injects() {
        let registry = registry();
        let f = inject_from(&registry, vec![Dependency::new::<dyn Store>("store")], store_name).unwrap();
        assert_eq!(Some("default".to_owned()), f.call(Injected::new()).unwrap());
        let f = inject_from(
            &registry,
            vec![Dependency::new::<dyn Store>("store").args(Args::new().kwarg("name", "second"))],
            store_name,
        )
        .unwrap();
        assert_eq!(Some("second".to_owned()), f.call(Injected::new()).unwrap());
    }

    #[test]
    fn supplied_wins() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);
        let registry = Arc::new(FactoryRegistry::new());
        registry.register::<dyn Store, _>(|_| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Named("factory".to_owned())) as Arc<dyn Store>)
        });
        let f = inject_from(&registry, vec![Dependency::new::<dyn Store>("store")], store_name).unwrap();
        let supplied = Injected::new().with::<dyn Store>("store", Arc::new(Named("mine".to_owned())));
        assert_eq!(Some("mine".to_owned()), f.call(supplied).unwrap());
        assert_eq!(0, CREATED.load(Ordering::SeqCst));
    }

    #[test]
    fn setup_errors() {
        let registry = registry();
        let positional = Dependency::new::<dyn Store>("store").positional();
        assert_eq!(
            InjectionSetupError::NotKeywordOnly("store".to_owned()),
            inject_from(&registry, vec![positional], store_name).err().unwrap()
        );
        let missing = Dependency::new::<dyn Unregistered>("other");
        assert!(matches!(
            inject_from(&registry, vec![missing], store_name),
            Err(InjectionSetupError::NotRegistered { .. })
        ));
    }

    #[test]
    fn unmarked() {
        let registry = registry();
        let f = inject_from(
            &registry,
            vec![
                Dependency::new::<dyn Store>("store").unmarked().positional(),
                Dependency::new::<dyn Unregistered>("other").unmarked(),
            ],
            store_name,
        )
        .unwrap();
        assert_eq!(vec!["store"], f.dependencies().iter().map(Dependency::name).collect::<Vec<_>>());
        assert_eq!(Some("default".to_owned()), f.call(Injected::new()).unwrap());
    }

    #[test]
    fn no_dependencies() {
        let f = inject_from(&registry(), Vec::new(), |injected: Injected| injected.contains("x")).unwrap();
        assert!(f.dependencies().is_empty());
        assert!(!f.call(Injected::new()).unwrap());
    }

    #[test]
    fn factory_error() {
        let registry = Arc::new(FactoryRegistry::new());
        registry.register::<dyn Store, _>(|_| Err("Connection refused".into()));
        let f = inject_from(&registry, vec![Dependency::new::<dyn Store>("store")], store_name).unwrap();
        let err = f.call(Injected::new()).unwrap_err();
        assert_eq!(
            "Unable to instantiate argument `store`; Connection refused",
            err.display("; ").to_string()
        );
    }

    #[test]
    fn modify_rollback() {
        let registry = registry();
        let f = inject_from(&registry, vec![Dependency::new::<dyn Store>("store")], store_name).unwrap();
        {
            let mut modify = registry.modify();
            modify.set_instance::<dyn Store>(Arc::new(Named("mock".to_owned())));
            modify.set::<dyn Unregistered, _>(|_| Err("Not really".into()));
            assert!(registry.contains::<dyn Unregistered>());
            assert_eq!(Some("mock".to_owned()), f.call(Injected::new()).unwrap());
            modify.remove::<dyn Store>();
            assert!(matches!(
                f.call(Injected::new()),
                Err(InjectionError::NotRegistered { .. })
            ));
        }
        assert!(!registry.contains::<dyn Unregistered>());
        assert_eq!(Some("default".to_owned()), f.call(Injected::new()).unwrap());
    }

    #[test]
    fn resolve() {
        let registry = registry();
        let store = registry.resolve::<dyn Store>(&Args::new()).unwrap().unwrap();
        assert_eq!("default", store.name());
        assert!(registry.resolve::<dyn Unregistered>(&Args::new()).is_none());
    }
}
