//! Plugin factories.
//!
//! A plugin factory creates instances from named definitions in the settings. Each definition is
//! a `[type, kwargs]` pair, where the type is a reference (`module.Type`) into a [`TypeRegistry`]
//! and the kwargs are handed to the constructor of the type:
//!
//! ```json
//! {
//!     "STORAGE": {
//!         "default": ["storage.Disk", {"path": "/var/lib/app"}],
//!         "scratch": ["storage.Memory", {"limit": 1024}],
//!         "backup": ["alias", {"name": "default"}]
//!     }
//! }
//! ```
//!
//! A definition with the type `alias` (in any case) points to another definition by its name.
//!
//! Rust has no way to import a type by its name at runtime, therefore the types are registered
//! upfront. Each [`PluginType`] knows how to construct the type and which capabilities (usually
//! trait objects) it can be turned into:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use appframe::conf::Settings;
//! use appframe::conf::helpers::{NamedPluginFactory, PluginType, TypeRegistry};
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! trait Storage {
//!     fn limit(&self) -> usize;
//! }
//!
//! #[derive(Deserialize)]
//! struct Memory {
//!     limit: usize,
//! }
//!
//! impl Storage for Memory {
//!     fn limit(&self) -> usize {
//!         self.limit
//!     }
//! }
//!
//! let types = Arc::new(TypeRegistry::new());
//! types.register(
//!     "storage.Memory",
//!     PluginType::from_kwargs::<Memory>().implements::<dyn Storage>(|m| m),
//! );
//!
//! let settings = Arc::new(Settings::new());
//! let mut modify = settings.modify();
//! modify.set("STORAGE", json!({"default": ["storage.Memory", {"limit": 1024}]})).unwrap();
//!
//! let factory = NamedPluginFactory::<dyn Storage>::new("STORAGE")
//!     .unwrap()
//!     .with_settings(Arc::clone(&settings))
//!     .with_types(types);
//! assert_eq!(1024, factory.create(None).unwrap().limit());
//! ```

use std::any::{self, Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, RwLock};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{check_mapping, entry_obj, DefaultName, FactoryError, Kwargs, MappingCheck};
use crate::checks::{CheckMessage, CheckProvider, CheckResult};
use crate::conf::{Settings, SettingsError};
use crate::utils::{is_upper_key, split_type_reference};
use crate::{AnyError, Value};

/// The type name marking an alias definition.
pub const ALIAS: &str = "alias";

/// Constructs an instance of a plugin, as the capability `T`.
pub type Constructor<T> = Arc<dyn Fn(&Kwargs) -> Result<Box<T>, AnyError> + Send + Sync>;

/// A type reference can't be resolved.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ImportError {
    /// The reference has no module part.
    #[error("Invalid type reference `{0}`, expected `module.Type`")]
    InvalidReference(String),
    /// No type is registered in the module.
    #[error("No module named `{0}`")]
    NoModule(String),
    /// The module exists, but not the type.
    #[error("Module `{module}` has no type `{name}`")]
    NoType {
        /// The module part of the reference.
        module: String,
        /// The type part of the reference.
        name: String,
    },
}

/// A registered plugin type.
///
/// It holds a constructor for each capability the type provides.
pub struct PluginType {
    type_name: &'static str,
    constructors: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PluginType {
    /// Starts building a plugin type constructed by a function.
    ///
    /// The type itself and `dyn Any` are always available as capabilities.
    pub fn of<C, F>(make: F) -> PluginTypeBuilder<C>
    where
        C: 'static,
        F: Fn(&Kwargs) -> Result<C, AnyError> + Send + Sync + 'static,
    {
        PluginTypeBuilder {
            make: Arc::new(make),
            constructors: HashMap::new(),
        }
    }

    /// Starts building a plugin type deserialized from the kwargs.
    pub fn from_kwargs<C: DeserializeOwned + 'static>() -> PluginTypeBuilder<C> {
        Self::of(|kwargs: &Kwargs| {
            serde_json::from_value(Value::Object(kwargs.clone())).map_err(AnyError::from)
        })
    }

    /// The Rust name of the type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Can the type be turned into `T`?
    pub fn provides<T: ?Sized + 'static>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<T>())
    }

    /// The constructor of the capability `T`, if the type provides it.
    pub fn constructor<T: ?Sized + 'static>(&self) -> Option<Constructor<T>> {
        self.constructors
            .get(&TypeId::of::<T>())
            .and_then(|c| c.downcast_ref::<Constructor<T>>())
            .cloned()
    }
}

/// Builder of the [`PluginType`].
pub struct PluginTypeBuilder<C> {
    make: Arc<dyn Fn(&Kwargs) -> Result<C, AnyError> + Send + Sync>,
    constructors: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl<C: 'static> PluginTypeBuilder<C> {
    /// Declares the type can be turned into `T`.
    ///
    /// The `cast` is usually just `|c| c`, coercing the box into a trait object.
    pub fn implements<T: ?Sized + 'static>(mut self, cast: fn(Box<C>) -> Box<T>) -> Self {
        let make = Arc::clone(&self.make);
        let constructor: Constructor<T> =
            Arc::new(move |kwargs: &Kwargs| make(kwargs).map(|instance| cast(Box::new(instance))));
        self.constructors
            .insert(TypeId::of::<T>(), Box::new(constructor));
        self
    }

    /// Finishes the type.
    pub fn build(self) -> PluginType {
        let this = self.implements::<C>(|c| c).implements::<dyn Any>(|c| c);
        PluginType {
            type_name: any::type_name::<C>(),
            constructors: this.constructors,
        }
    }
}

impl<C: 'static> From<PluginTypeBuilder<C>> for PluginType {
    fn from(builder: PluginTypeBuilder<C>) -> Self {
        builder.build()
    }
}

/// A directory of plugin types by their references.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<PluginType>>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type under a `module.Type` reference, replacing any previous one.
    pub fn register<P: Into<PluginType>>(&self, reference: &str, plugin: P) {
        debug!("Registering plugin type {}", reference);
        self.types
            .write()
            .insert(reference.to_owned(), Arc::new(plugin.into()));
    }

    /// Looks the type up by its reference.
    pub fn import(&self, reference: &str) -> Result<Arc<PluginType>, ImportError> {
        let (module, name) = split_type_reference(reference)
            .ok_or_else(|| ImportError::InvalidReference(reference.to_owned()))?;
        let types = self.types.read();
        if let Some(plugin) = types.get(reference) {
            return Ok(Arc::clone(plugin));
        }
        let module_exists = types
            .keys()
            .filter_map(|r| split_type_reference(r))
            .any(|(m, _)| m == module);
        if module_exists {
            Err(ImportError::NoType {
                module: module.to_owned(),
                name: name.to_owned(),
            })
        } else {
            Err(ImportError::NoModule(module.to_owned()))
        }
    }
}

static TYPES: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

/// The process-wide type registry.
pub fn type_registry() -> &'static Arc<TypeRegistry> {
    &TYPES
}

/// A definition entry is malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum DefinitionError {
    /// Not a list.
    #[error("Instance definition is not a list/tuple.")]
    NotSequence,
    /// Not a pair.
    #[error("Instance definition is not a type name, kwarg (dict) pair.")]
    NotPair,
    /// The type name is not a string.
    #[error("Instance type name is not a string.")]
    TypeName,
    /// The kwargs are not a mapping.
    #[error("Instance kwargs is not a dict.")]
    KwargsNotMapping,
    /// An alias doesn't name its target.
    #[error("Name of alias target not defined")]
    AliasTarget,
    /// A named configuration entry is not a mapping.
    #[error("Config definition entry is not a dict.")]
    NotMapping,
}

fn is_alias(type_name: &str) -> bool {
    type_name.eq_ignore_ascii_case(ALIAS)
}

/// A parsed plugin definition.
#[derive(Clone, Debug, PartialEq)]
pub enum NamedDefinition {
    /// A type with its constructor arguments.
    Direct {
        /// Reference of the type.
        type_name: String,
        /// The constructor arguments.
        kwargs: Kwargs,
    },
    /// Another definition.
    Alias {
        /// Name of the other definition.
        target: String,
    },
}

impl NamedDefinition {
    /// Parses a `[type, kwargs]` pair.
    pub fn parse(value: &Value) -> Result<Self, DefinitionError> {
        let pair = value.as_array().ok_or(DefinitionError::NotSequence)?;
        let (type_name, kwargs) = match pair.as_slice() {
            [type_name, kwargs] => (type_name, kwargs),
            _ => return Err(DefinitionError::NotPair),
        };
        let type_name = type_name.as_str().ok_or(DefinitionError::TypeName)?;
        let kwargs = kwargs
            .as_object()
            .ok_or(DefinitionError::KwargsNotMapping)?;
        if is_alias(type_name) {
            match kwargs.get("name").and_then(Value::as_str) {
                Some(target) if !target.is_empty() => Ok(NamedDefinition::Alias {
                    target: target.to_owned(),
                }),
                _ => Err(DefinitionError::AliasTarget),
            }
        } else {
            Ok(NamedDefinition::Direct {
                type_name: type_name.to_owned(),
                kwargs: kwargs.clone(),
            })
        }
    }
}

struct Resolved<T: ?Sized> {
    type_name: String,
    constructor: Constructor<T>,
    kwargs: Arc<Kwargs>,
}

impl<T: ?Sized> Clone for Resolved<T> {
    fn clone(&self) -> Self {
        Resolved {
            type_name: self.type_name.clone(),
            constructor: Arc::clone(&self.constructor),
            kwargs: Arc::clone(&self.kwargs),
        }
    }
}

struct Cache<T: ?Sized> {
    definitions: Option<Arc<Kwargs>>,
    types: HashMap<String, Resolved<T>>,
}

/// A factory of plugin instances.
///
/// The definitions are read from the settings on the first use and the resolved types are
/// cached. Every call to [`create`][NamedPluginFactory::create] produces a new instance.
///
/// The factory is safe to use from multiple threads.
pub struct NamedPluginFactory<T: ?Sized + 'static> {
    setting: String,
    default_name: DefaultName,
    settings: Arc<Settings>,
    types: Arc<TypeRegistry>,
    cache: ReentrantMutex<RefCell<Cache<T>>>,
}

impl<T: ?Sized + 'static> NamedPluginFactory<T> {
    /// Creates a factory reading the given (upper-case) setting.
    ///
    /// It uses the global settings and the global [type registry][type_registry].
    pub fn new<S: Into<String>>(setting: S) -> Result<Self, SettingsError> {
        let setting = setting.into();
        if !is_upper_key(&setting) {
            return Err(SettingsError::InvalidKey(setting));
        }
        Ok(NamedPluginFactory {
            setting,
            default_name: DefaultName::default(),
            settings: Arc::clone(Settings::global()),
            types: Arc::clone(type_registry()),
            cache: ReentrantMutex::new(RefCell::new(Cache {
                definitions: None,
                types: HashMap::new(),
            })),
        })
    }

    /// Reads a different settings container.
    pub fn with_settings(self, settings: Arc<Settings>) -> Self {
        NamedPluginFactory { settings, ..self }
    }

    /// Resolves the types in a different registry.
    pub fn with_types(self, types: Arc<TypeRegistry>) -> Self {
        NamedPluginFactory { types, ..self }
    }

    /// The name used when none is given to [`create`][NamedPluginFactory::create].
    pub fn default_name<D: Into<DefaultName>>(self, default_name: D) -> Self {
        NamedPluginFactory {
            default_name: default_name.into(),
            ..self
        }
    }

    /// The name of the setting.
    pub fn setting(&self) -> &str {
        &self.setting
    }

    fn definitions(&self, cache: &mut Cache<T>) -> Result<Arc<Kwargs>, FactoryError> {
        if let Some(definitions) = &cache.definitions {
            return Ok(Arc::clone(definitions));
        }
        let definitions = match self.settings.get(&self.setting) {
            Ok(Value::Object(definitions)) => definitions,
            Ok(Value::Null) | Err(_) => Kwargs::new(),
            Ok(_) => {
                return Err(FactoryError::InvalidDefinition {
                    name: self.setting.clone(),
                    source: DefinitionError::NotMapping,
                })
            }
        };
        let definitions = Arc::new(definitions);
        cache.definitions = Some(Arc::clone(&definitions));
        Ok(definitions)
    }

    /// Names of the defined entries.
    pub fn available(&self) -> Vec<String> {
        let lock = self.cache.lock();
        let mut cache = lock.borrow_mut();
        self.definitions(&mut cache)
            .map(|definitions| definitions.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn resolve(&self, name: Option<&str>) -> Result<(String, Resolved<T>), FactoryError> {
        let name = self
            .default_name
            .pick(name)
            .ok_or_else(|| FactoryError::NotProvided(self.setting.clone()))?
            .to_owned();
        let lock = self.cache.lock();
        let mut cache = lock.borrow_mut();
        if let Some(resolved) = cache.types.get(&name) {
            return Ok((name, resolved.clone()));
        }
        let definitions = self.definitions(&mut cache)?;

        let mut seen = HashSet::new();
        let mut current = name.clone();
        let (type_name, kwargs) = loop {
            if !seen.insert(current.clone()) {
                return Err(FactoryError::BadAlias(format!(
                    "Circular alias defined for `{}`",
                    name
                )));
            }
            let value = definitions
                .get(&current)
                .ok_or_else(|| FactoryError::NotFound(current.clone()))?;
            match NamedDefinition::parse(value) {
                Ok(NamedDefinition::Direct { type_name, kwargs }) => break (type_name, kwargs),
                Ok(NamedDefinition::Alias { target }) => {
                    trace!("Definition {} is an alias of {}", current, target);
                    current = target;
                }
                Err(DefinitionError::AliasTarget) => {
                    return Err(FactoryError::BadAlias(format!(
                        "Name of alias target not defined in `{}`",
                        current
                    )))
                }
                Err(source) => {
                    return Err(FactoryError::InvalidDefinition {
                        name: current,
                        source,
                    })
                }
            }
        };

        let plugin = self
            .types
            .import(&type_name)
            .map_err(|source| FactoryError::CannotImport {
                type_name: type_name.clone(),
                source,
            })?;
        let constructor = plugin
            .constructor::<T>()
            .ok_or_else(|| FactoryError::InvalidSubType {
                type_name: type_name.clone(),
                capability: any::type_name::<T>(),
            })?;
        debug!("Resolved {}[{}] to {}", self.setting, name, type_name);
        let resolved = Resolved {
            type_name,
            constructor,
            kwargs: Arc::new(kwargs),
        };
        cache.types.insert(name.clone(), resolved.clone());
        Ok((name, resolved))
    }

    fn create_resolved(
        &self,
        name: &str,
        resolved: &Resolved<T>,
    ) -> Result<Box<T>, FactoryError> {
        (resolved.constructor)(&resolved.kwargs).map_err(|source| FactoryError::Create {
            name: format!("{} ({})", name, resolved.type_name),
            source,
        })
    }

    /// Creates a new instance of the named definition (or the default one).
    pub fn create(&self, name: Option<&str>) -> Result<Box<T>, FactoryError> {
        let (name, resolved) = self.resolve(name)?;
        self.create_resolved(&name, &resolved)
    }

    fn check_definition(
        &self,
        definitions: &Kwargs,
        name: &str,
        definition: &Value,
    ) -> Vec<CheckMessage> {
        let obj = entry_obj(&self.setting, name);
        let pair_hint = "Change definition to be a list/tuple (type_name, kwargs) in settings.";
        let (type_name, kwargs) = match definition.as_array().map(Vec::as_slice) {
            None => {
                return vec![CheckMessage::critical(DefinitionError::NotSequence.to_string())
                    .hint(pair_hint)
                    .obj(obj)]
            }
            Some([type_name, kwargs]) => (type_name, kwargs),
            Some(_) => {
                return vec![CheckMessage::critical(DefinitionError::NotPair.to_string())
                    .hint(pair_hint)
                    .obj(obj)]
            }
        };

        let mut messages = Vec::new();
        let kwargs = kwargs.as_object();
        match (type_name.as_str(), kwargs) {
            (Some(type_name), Some(kwargs)) if is_alias(type_name) => {
                match kwargs.get("name").and_then(Value::as_str) {
                    Some(target) if !target.is_empty() => {
                        if !definitions.contains_key(target) {
                            messages.push(
                                CheckMessage::critical("Alias target not defined")
                                    .obj(format!("{}[{}]", obj, target)),
                            );
                        }
                    }
                    _ => messages.push(
                        CheckMessage::critical("Name of alias target not defined")
                            .obj(obj.clone()),
                    ),
                }
                if kwargs.keys().any(|key| key != "name") {
                    messages.push(
                        CheckMessage::warn("Alias contains unknown arguments").obj(obj.clone()),
                    );
                }
            }
            (Some(type_name), _) if is_alias(type_name) => (),
            (Some(type_name), _) => {
                if self.types.import(type_name).is_err() {
                    messages.push(
                        CheckMessage::error(format!("Unable to import type `{}`.", type_name))
                            .hint("Check the type name in definition.")
                            .obj(obj.clone()),
                    );
                }
            }
            (None, _) => messages.push(
                CheckMessage::error(format!("Unable to import type `{}`.", type_name))
                    .hint("Check the type name in definition.")
                    .obj(obj.clone()),
            ),
        }
        if kwargs.is_none() {
            messages.push(
                CheckMessage::critical(DefinitionError::KwargsNotMapping.to_string())
                    .hint("Change kwargs definition to be a dict.")
                    .obj(obj),
            );
        }
        messages
    }

    /// Checks the definitions in the given settings.
    ///
    /// While the checks run, the definitions of the given settings replace the ones the factory
    /// uses (and the cache of resolved types is cleared). The original definitions are put back
    /// afterwards.
    pub fn checks(&self, settings: &Settings) -> Vec<CheckMessage> {
        let value = settings.get(&self.setting).ok();
        let default_hint = match &self.default_name {
            DefaultName::Name(name) => {
                format!("The default instance type `{}` is not defined.", name)
            }
            DefaultName::NoDefault => String::new(),
        };
        let checked = check_mapping(
            value.as_ref(),
            &self.setting,
            &self.default_name,
            "Instance",
            default_hint,
        );
        let (definitions, mut messages) = match checked {
            MappingCheck::Done(messages) => return messages,
            MappingCheck::Entries(definitions, messages) => (definitions, messages),
        };

        let lock = self.cache.lock();
        let _swap = SwapDefinitions::new(&lock, Arc::new(definitions.clone()));
        for (name, definition) in definitions {
            messages.extend(self.check_definition(definitions, name, definition));
        }
        messages
    }
}

/// Puts the checked definitions in place for the duration of the checks.
struct SwapDefinitions<'a, T: ?Sized> {
    cache: &'a RefCell<Cache<T>>,
    original: Option<Arc<Kwargs>>,
    original_types: HashMap<String, Resolved<T>>,
}

impl<'a, T: ?Sized> SwapDefinitions<'a, T> {
    fn new(cache: &'a RefCell<Cache<T>>, definitions: Arc<Kwargs>) -> Self {
        let mut borrowed = cache.borrow_mut();
        let original = borrowed.definitions.replace(definitions);
        let original_types = std::mem::take(&mut borrowed.types);
        drop(borrowed);
        SwapDefinitions {
            cache,
            original,
            original_types,
        }
    }
}

impl<T: ?Sized> Drop for SwapDefinitions<'_, T> {
    fn drop(&mut self) {
        let mut cache = self.cache.borrow_mut();
        cache.definitions = self.original.take();
        cache.types = std::mem::take(&mut self.original_types);
    }
}

impl<T: ?Sized + 'static> CheckProvider for NamedPluginFactory<T> {
    fn check_name(&self) -> String {
        format!("{}.check_configuration", self.setting)
    }

    fn checks(&self, settings: &Settings) -> CheckResult {
        Ok(NamedPluginFactory::checks(self, settings))
    }
}

/// A [`NamedPluginFactory`] creating a single instance per name.
///
/// Useful for types that need only one instance, like connection pools. The instances are shared
/// between threads, so they need to be thread safe. See
/// [`ThreadLocalNamedSingletonPluginFactory`] for the alternative.
pub struct NamedSingletonPluginFactory<T: ?Sized + 'static> {
    factory: NamedPluginFactory<T>,
    instances: ReentrantMutex<RefCell<HashMap<String, Arc<T>>>>,
}

impl<T: ?Sized + 'static> NamedSingletonPluginFactory<T> {
    /// Wraps a plain factory.
    pub fn new(factory: NamedPluginFactory<T>) -> Self {
        NamedSingletonPluginFactory {
            factory,
            instances: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// The wrapped factory.
    pub fn factory(&self) -> &NamedPluginFactory<T> {
        &self.factory
    }

    /// Provides the instance of the named definition (or the default one), creating it on the
    /// first use.
    pub fn create(&self, name: Option<&str>) -> Result<Arc<T>, FactoryError> {
        let instances = self.instances.lock();
        let (name, resolved) = self.factory.resolve(name)?;
        if let Some(instance) = instances.borrow().get(&name) {
            return Ok(Arc::clone(instance));
        }
        // The borrow is not held while constructing, the constructor may use the factory too.
        let instance = Arc::from(self.factory.create_resolved(&name, &resolved)?);
        let mut instances = instances.borrow_mut();
        Ok(Arc::clone(instances.entry(name).or_insert(instance)))
    }
}

impl<T: ?Sized + 'static> CheckProvider for NamedSingletonPluginFactory<T>
where
    T: Send + Sync,
{
    fn check_name(&self) -> String {
        self.factory.check_name()
    }

    fn checks(&self, settings: &Settings) -> CheckResult {
        Ok(self.factory.checks(settings))
    }
}

thread_local! {
    static THREAD_INSTANCES: RefCell<HashMap<(usize, String), Box<dyn Any>>> =
        RefCell::new(HashMap::new());
}

static NEXT_FACTORY_ID: AtomicUsize = AtomicUsize::new(0);

/// A [`NamedPluginFactory`] creating a single instance per name and thread.
///
/// Useful for types that are not thread safe.
///
/// Dropping the factory releases only the instances created in the dropping thread. Instances
/// created in other threads live until those threads exit.
pub struct ThreadLocalNamedSingletonPluginFactory<T: ?Sized + 'static> {
    id: usize,
    factory: NamedPluginFactory<T>,
}

impl<T: ?Sized + 'static> ThreadLocalNamedSingletonPluginFactory<T> {
    /// Wraps a plain factory.
    pub fn new(factory: NamedPluginFactory<T>) -> Self {
        ThreadLocalNamedSingletonPluginFactory {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            factory,
        }
    }

    /// The wrapped factory.
    pub fn factory(&self) -> &NamedPluginFactory<T> {
        &self.factory
    }

    /// Provides the instance of the named definition (or the default one) for the current
    /// thread, creating it on the first use in the thread.
    pub fn create(&self, name: Option<&str>) -> Result<Rc<T>, FactoryError> {
        let (name, resolved) = self.factory.resolve(name)?;
        let key = (self.id, name);
        let existing = THREAD_INSTANCES.with(|instances| {
            instances
                .borrow()
                .get(&key)
                .and_then(|instance| instance.downcast_ref::<Rc<T>>())
                .cloned()
        });
        if let Some(instance) = existing {
            return Ok(instance);
        }
        let instance: Rc<T> = Rc::from(self.factory.create_resolved(&key.1, &resolved)?);
        Ok(THREAD_INSTANCES.with(|instances| {
            let mut instances = instances.borrow_mut();
            let stored = instances
                .entry(key)
                .or_insert_with(|| Box::new(Rc::clone(&instance)));
            stored.downcast_ref::<Rc<T>>().cloned().unwrap_or(instance)
        }))
    }
}

impl<T: ?Sized + 'static> Drop for ThreadLocalNamedSingletonPluginFactory<T> {
    fn drop(&mut self) {
        // Only the instances of the current thread can be reached.
        let _ = THREAD_INSTANCES.try_with(|instances| {
            instances.borrow_mut().retain(|(id, _), _| *id != self.id);
        });
    }
}
