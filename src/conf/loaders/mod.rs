//! Settings loaders.
//!
//! A loader reads one settings *source* (a module registered in the [`SettingsModules`]
//! directory, a file, any serializable object, an HTTP resource...) and yields its key/value
//! pairs. Only upper-case keys (see [`is_upper_key`]) ever get out of a loader, anything else in
//! the source is skipped.
//!
//! Every loader has a stable string representation (`scheme:locator`) through its [`Display`]
//! implementation. The [`Settings`][crate::conf::Settings] container uses it to refuse loading
//! the same source twice.
//!
//! Sources are usually referenced by URIs. The [`LoaderRegistry`] turns them into loaders,
//! according to their scheme:
//!
//! * `python:<dotted.path>` (or the `module:` alias, or no scheme at all) ‒ [`ModuleLoader`].
//! * `file://<path>?type=<mime>` ‒ [`FileLoader`].
//! * Further schemes can be [registered][LoaderRegistry::register] (the `appframe-http` crate
//!   adds `http` and `https`).

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fallible_iterator::FallibleIterator;
use log::trace;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use url::{ParseError, Url};

use crate::utils::is_upper_key;
use crate::{AnyError, Value};

pub mod content_types;
mod file;

pub use self::file::FileLoader;

/// The scheme of the [`ModuleLoader`], also used in its identity.
pub const MODULE_SCHEME: &str = "python";

/// An alternative name of the [`MODULE_SCHEME`].
pub const MODULE_SCHEME_ALIAS: &str = "module";

/// Problems with loading settings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The settings source is missing, unreadable or has the wrong shape.
    #[error("{msg}: {source_id}")]
    InvalidConfiguration {
        /// What went wrong.
        msg: String,
        /// The identity of the offending source.
        source_id: String,
        /// The underlying problem, if any.
        #[source]
        cause: Option<AnyError>,
    },

    /// No parser is known for the content type.
    #[error("No parser for `{0}`")]
    UnsupportedContentType(String),
}

impl ConfigError {
    /// Creates the [`InvalidConfiguration`][ConfigError::InvalidConfiguration] variant.
    pub fn invalid<S: Display>(msg: impl Into<String>, source: S) -> Self {
        ConfigError::InvalidConfiguration {
            msg: msg.into(),
            source_id: source.to_string(),
            cause: None,
        }
    }

    /// Creates the [`InvalidConfiguration`][ConfigError::InvalidConfiguration] variant caused by
    /// another error.
    pub fn invalid_caused<S, E>(msg: impl Into<String>, source: S, cause: E) -> Self
    where
        S: Display,
        E: Into<AnyError>,
    {
        ConfigError::InvalidConfiguration {
            msg: msg.into(),
            source_id: source.to_string(),
            cause: Some(cause.into()),
        }
    }
}

/// The settings produced by a loader.
pub type Entries<'a> = Box<dyn FallibleIterator<Item = (String, Value), Error = ConfigError> + 'a>;

/// Turns an object-shaped document into entries.
///
/// Non-object documents are refused, keys that are not upper-case are skipped.
pub fn object_entries<S: Display>(
    source: S,
    document: Value,
) -> Result<Entries<'static>, ConfigError> {
    match document {
        Value::Object(map) => Ok(Box::new(fallible_iterator::convert(
            map.into_iter()
                .filter(|(key, _)| is_upper_key(key))
                .map(Ok::<_, ConfigError>),
        ))),
        _ => Err(ConfigError::invalid(
            "Invalid root object, expected an Object",
            source,
        )),
    }
}

/// A source of settings.
///
/// The [`Display`] implementation is the identity of the source. It must be stable, two loaders
/// reading the same source should display the same.
pub trait Loader: Display + Send {
    /// Opens the source and provides its settings.
    ///
    /// Any resources acquired here are kept until [`close`][Loader::close] is called.
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError>;

    /// Releases any resources held by the loader.
    ///
    /// Called whenever the loader is done, whether loading succeeded or not. It may be called
    /// even if [`entries`][Loader::entries] was never called or failed.
    fn close(&mut self) {}
}

impl<L: Loader + ?Sized> Loader for Box<L> {
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        (**self).entries()
    }
    fn close(&mut self) {
        (**self).close()
    }
}

/// Scope of one use of a [`Loader`].
///
/// The loader gets [closed][Loader::close] when this is dropped, on every path out of the scope.
pub struct LoaderGuard<'a> {
    loader: &'a mut dyn Loader,
}

impl<'a> LoaderGuard<'a> {
    /// Starts using the loader.
    pub fn new(loader: &'a mut dyn Loader) -> Self {
        LoaderGuard { loader }
    }

    /// Opens the loader and reads its settings.
    pub fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        self.loader.entries()
    }
}

impl Drop for LoaderGuard<'_> {
    fn drop(&mut self) {
        trace!("Closing settings source {}", self.loader);
        self.loader.close();
    }
}

/// A settings module.
///
/// Rust has no runtime module import, so the modules are functions producing the (object-shaped)
/// settings document, registered under a dotted path in [`SettingsModules`].
pub type SettingsModule = Arc<dyn Fn() -> Value + Send + Sync>;

/// A directory of settings modules.
#[derive(Default)]
pub struct SettingsModules {
    modules: RwLock<HashMap<String, SettingsModule>>,
}

impl SettingsModules {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module under the dotted path.
    ///
    /// The function is called every time the module is loaded.
    pub fn register<F>(&self, path: &str, module: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.modules.write().insert(path.to_owned(), Arc::new(module));
    }

    /// Registers a module with fixed content.
    pub fn register_value<S: Serialize>(&self, path: &str, content: S) -> Result<(), AnyError> {
        let content = serde_json::to_value(content)?;
        self.register(path, move || content.clone());
        Ok(())
    }

    /// Looks up a module.
    pub fn get(&self, path: &str) -> Option<SettingsModule> {
        self.modules.read().get(path).cloned()
    }

    /// Is there a module of this path?
    pub fn contains(&self, path: &str) -> bool {
        self.modules.read().contains_key(path)
    }
}

static MODULES: Lazy<Arc<SettingsModules>> = Lazy::new(|| Arc::new(SettingsModules::new()));

/// The process-wide settings module directory.
pub fn settings_modules() -> &'static Arc<SettingsModules> {
    &MODULES
}

/// Loads settings from a module of the [`SettingsModules`] directory.
///
/// ```rust
/// use std::sync::Arc;
///
/// use appframe::conf::loaders::{ModuleLoader, SettingsModules};
/// use serde_json::json;
///
/// let modules = Arc::new(SettingsModules::new());
/// modules.register("app.default_settings", || json!({ "FOO": "bar", "ignored": 1 }));
/// let loader = ModuleLoader::new("app.default_settings", modules);
/// assert_eq!("python:app.default_settings", loader.to_string());
/// ```
pub struct ModuleLoader {
    module: String,
    modules: Arc<SettingsModules>,
}

impl ModuleLoader {
    /// Creates the loader of the module of given dotted path.
    pub fn new<P: Into<String>>(module: P, modules: Arc<SettingsModules>) -> Self {
        ModuleLoader {
            module: module.into(),
            modules,
        }
    }

    /// The dotted path of the module.
    pub fn module(&self) -> &str {
        &self.module
    }
}

impl Display for ModuleLoader {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "{}:{}", MODULE_SCHEME, self.module)
    }
}

impl Loader for ModuleLoader {
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        let module = self
            .modules
            .get(&self.module)
            .ok_or_else(|| ConfigError::invalid("Unable to load module", &*self))?;
        object_entries(&*self, module())
    }
}

static OBJECT_ID: AtomicUsize = AtomicUsize::new(0);

/// Loads settings from any serializable object.
///
/// The object must serialize into a map (a struct or a map). Every object loader has its own
/// identity, unless [named][ObjectLoader::named].
pub struct ObjectLoader {
    name: String,
    document: Value,
}

impl ObjectLoader {
    /// Creates the loader.
    pub fn new<S: Serialize>(obj: &S) -> Result<Self, ConfigError> {
        let name = format!("#{}", OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        let document = serde_json::to_value(obj)
            .map_err(|e| ConfigError::invalid_caused("Unable to serialize object", &name, e))?;
        Ok(ObjectLoader { name, document })
    }

    /// Names the object.
    ///
    /// Two loaders of the same name are the same source.
    pub fn named<N: Into<String>>(self, name: N) -> Self {
        ObjectLoader {
            name: name.into(),
            ..self
        }
    }
}

impl Display for ObjectLoader {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "object:{}", self.name)
    }
}

impl Loader for ObjectLoader {
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        object_entries(&*self, self.document.clone())
    }
}

/// Constructor of a loader from its source URI.
pub type LoaderFactory = Arc<dyn Fn(&Url) -> Result<Box<dyn Loader>, ConfigError> + Send + Sync>;

/// The registry of loaders, by the URI scheme.
pub struct LoaderRegistry {
    schemes: RwLock<HashMap<String, LoaderFactory>>,
    modules: Arc<SettingsModules>,
}

impl LoaderRegistry {
    /// Creates a registry with the built-in schemes.
    ///
    /// The module loaders look their modules up in the passed directory.
    pub fn new(modules: Arc<SettingsModules>) -> Self {
        let registry = LoaderRegistry {
            schemes: RwLock::new(HashMap::new()),
            modules: Arc::clone(&modules),
        };
        registry.register(&[MODULE_SCHEME, MODULE_SCHEME_ALIAS], move |url| {
            Ok(Box::new(ModuleLoader::new(url.path(), Arc::clone(&modules))))
        });
        registry.register(&[file::SCHEME], |url| Ok(Box::new(FileLoader::from_url(url))));
        registry
    }

    /// Registers a loader for one or more schemes.
    pub fn register<F>(&self, schemes: &[&str], factory: F)
    where
        F: Fn(&Url) -> Result<Box<dyn Loader>, ConfigError> + Send + Sync + 'static,
    {
        let factory: LoaderFactory = Arc::new(factory);
        let mut registered = self.schemes.write();
        for scheme in schemes {
            registered.insert(scheme.to_ascii_lowercase(), Arc::clone(&factory));
        }
    }

    /// The module directory used by module loaders of this registry.
    pub fn modules(&self) -> &Arc<SettingsModules> {
        &self.modules
    }

    /// Creates a loader of the settings source.
    ///
    /// A reference without a scheme is a module path.
    pub fn factory(&self, source: &str) -> Result<Box<dyn Loader>, ConfigError> {
        let url = match Url::parse(source) {
            Ok(url) => url,
            Err(ParseError::RelativeUrlWithoutBase) => {
                trace!("No scheme in {}, assuming a module", source);
                return Ok(Box::new(ModuleLoader::new(source, Arc::clone(&self.modules))));
            }
            Err(e) => {
                return Err(ConfigError::invalid_caused(
                    "Invalid settings URI",
                    source,
                    e,
                ))
            }
        };
        let factory = self.schemes.read().get(url.scheme()).cloned();
        match factory {
            Some(factory) => factory(&url),
            None => Err(ConfigError::invalid(
                format!("Unknown scheme `{}` in settings URI", url.scheme()),
                source,
            )),
        }
    }
}

static REGISTRY: Lazy<Arc<LoaderRegistry>> =
    Lazy::new(|| Arc::new(LoaderRegistry::new(Arc::clone(settings_modules()))));

/// The process-wide loader registry.
///
/// Its module loaders use the [`settings_modules`] directory.
pub fn registry() -> &'static Arc<LoaderRegistry> {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    use serde_json::json;

    use super::*;

    fn modules() -> Arc<SettingsModules> {
        let modules = Arc::new(SettingsModules::new());
        modules.register("tests.settings", || {
            json!({"UPPER_VALUE": "foo", "lower_value": "bar", "mixed_VALUE": "eek"})
        });
        modules.register("tests.broken", || json!(["not", "an", "object"]));
        modules
    }

    fn collect(loader: &mut dyn Loader) -> Result<BTreeMap<String, Value>, ConfigError> {
        let mut guard = LoaderGuard::new(loader);
        let entries = guard.entries()?;
        entries.collect()
    }

    #[test]
    fn module_loader() {
        let mut loader = ModuleLoader::new("tests.settings", modules());
        let settings = collect(&mut loader).unwrap();
        assert_eq!(1, settings.len());
        assert_eq!(json!("foo"), settings["UPPER_VALUE"]);
        assert_eq!("python:tests.settings", loader.to_string());
    }

    #[test]
    fn module_loader_missing_module() {
        let mut loader = ModuleLoader::new("tests.unknown.settings", modules());
        match collect(&mut loader).unwrap_err() {
            ConfigError::InvalidConfiguration { source_id, .. } => {
                assert_eq!("python:tests.unknown.settings", source_id)
            }
            e => panic!("Unexpected error {}", e),
        }
    }

    #[test]
    fn module_loader_not_object() {
        let mut loader = ModuleLoader::new("tests.broken", modules());
        assert!(matches!(
            collect(&mut loader).unwrap_err(),
            ConfigError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn object_loader() {
        #[derive(Serialize)]
        #[allow(non_snake_case)]
        struct Source {
            FOO: &'static str,
            BAR: u32,
            eek: bool,
        }

        let source = Source {
            FOO: "foo",
            BAR: 42,
            eek: true,
        };
        let mut loader = ObjectLoader::new(&source).unwrap();
        let settings = collect(&mut loader).unwrap();
        assert_eq!(2, settings.len());
        assert_eq!(json!(42), settings["BAR"]);

        let other = ObjectLoader::new(&source).unwrap();
        assert_ne!(loader.to_string(), other.to_string());
        assert_eq!("object:django", other.named("django").to_string());
    }

    struct Tracking<'a> {
        closed: &'a AtomicBool,
    }

    impl Display for Tracking<'_> {
        fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
            write!(fmt, "tracking:")
        }
    }

    impl Loader for Tracking<'_> {
        fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
            Err(ConfigError::invalid("Broken on purpose", &*self))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn guard_closes_on_error() {
        let closed = AtomicBool::new(false);
        let mut loader = Tracking { closed: &closed };
        assert!(collect(&mut loader).is_err());
        assert!(closed.load(Ordering::Relaxed));
    }

    #[test]
    fn registry_schemes() {
        let registry = LoaderRegistry::new(modules());
        let loader = registry.factory("tests.settings").unwrap();
        assert_eq!("python:tests.settings", loader.to_string());
        let loader = registry.factory("module:tests.settings").unwrap();
        assert_eq!("python:tests.settings", loader.to_string());
        let loader = registry.factory("file:///etc/app.json").unwrap();
        assert_eq!("file:///etc/app.json?type=application/json", loader.to_string());
    }

    #[test]
    fn registry_unknown_scheme() {
        let registry = LoaderRegistry::new(modules());
        match registry.factory("eek://settings").err().unwrap() {
            ConfigError::InvalidConfiguration { msg, .. } => {
                assert_eq!("Unknown scheme `eek` in settings URI", msg)
            }
            e => panic!("Unexpected error {}", e),
        }
    }
}
