//! Settings.
//!
//! *A single, layered, read-mostly store of the application settings.*
//!
//! The settings are loaded from an ordered list of sources (see [`loaders`]), later sources
//! overriding the earlier ones. Every setting is an upper-case key mapped to a dynamic [`Value`];
//! anything else found in a source is ignored.
//!
//! ```rust
//! use appframe::conf::Settings;
//! use appframe::conf::loaders::settings_modules;
//! use serde_json::json;
//!
//! settings_modules().register("my_app.default_settings", || json!({ "MY_CONFIG_VALUE": "foo" }));
//!
//! let settings = Settings::new();
//! settings.configure(&["my_app.default_settings"]).load().unwrap();
//! assert_eq!(json!("foo"), settings.get("MY_CONFIG_VALUE").unwrap());
//!
//! {
//!     let mut patch = settings.modify();
//!     patch.set("MY_CONFIG_VALUE", "bar").unwrap();
//!     assert_eq!(json!("bar"), settings.get("MY_CONFIG_VALUE").unwrap());
//! }
//! assert_eq!(json!("foo"), settings.get("MY_CONFIG_VALUE").unwrap());
//! ```
//!
//! # Includes
//!
//! A source may set the `INCLUDE_SETTINGS` key to a list of further source URIs. These are loaded
//! right after the source that named them, depth first, and the key itself never stays in the
//! settings.
//!
//! # Reading and writing
//!
//! Reads are lock-free, they work on an immutable snapshot. The only ways to change the settings
//! are [loading][Settings::load] and the [`ModifySettings`] guard, which is meant for tests. Every
//! load is atomic ‒ if any of the sources (including the included ones) fails, none of the changes
//! are published.

use std::collections::BTreeMap;
use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Read, Write};
use std::sync::Arc;

use arc_swap::ArcSwap;
use fallible_iterator::FallibleIterator;
use log::{debug, info, trace, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;

use self::loaders::{ConfigError, Loader, LoaderGuard, LoaderRegistry, ModuleLoader};
use crate::utils::is_upper_key;
use crate::{AnyError, Value};

pub mod helpers;
pub mod loaders;
pub mod report;

/// The environment variable holding the runtime settings source, if not passed explicitly.
pub const DEFAULT_ENV_KEY: &str = "APPFRAME_SETTINGS";

/// The setting recording identities of all loaded sources.
pub const SETTINGS_SOURCES: &str = "SETTINGS_SOURCES";

/// The setting naming further sources to load.
pub const INCLUDE_SETTINGS: &str = "INCLUDE_SETTINGS";

/// All the settings, sorted by the key.
pub type Values = BTreeMap<String, Value>;

/// The settings every container starts with.
///
/// * `DEBUG`: `false`
/// * `LOGGING`: `{}`
/// * `CHECK_LOCATIONS`: `[]`
/// * `SETTINGS_SOURCES`: `[]`
pub fn base_settings() -> Values {
    let mut values = Values::new();
    values.insert("DEBUG".to_owned(), Value::Bool(false));
    values.insert("LOGGING".to_owned(), Value::Object(Default::default()));
    values.insert("CHECK_LOCATIONS".to_owned(), Value::Array(Vec::new()));
    values.insert(SETTINGS_SOURCES.to_owned(), Value::Array(Vec::new()));
    values
}

/// Problems with reading or changing settings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    /// Reading a key that doesn't exist.
    #[error("Setting not defined {0:?}")]
    NotDefined(String),

    /// Setting a key that isn't an upper-case identifier.
    #[error("Setting name {0:?} is not an upper-case identifier")]
    InvalidKey(String),

    /// The setting doesn't have the requested shape.
    #[error("Setting {key} has unexpected shape")]
    Deserialize {
        /// The setting.
        key: String,
        /// Where and what went wrong.
        #[source]
        source: serde_path_to_error::Error<serde_json::Error>,
    },
}

/// How to treat settings that already exist when loading.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ApplyMode {
    /// Newly loaded values replace existing ones.
    Override,
    /// Existing values are kept, only missing ones are added.
    KeepExisting,
}

impl ApplyMode {
    fn apply(self, values: &mut Values, key: String, value: Value) {
        match self {
            ApplyMode::Override => {
                values.insert(key, value);
            }
            ApplyMode::KeepExisting => {
                values.entry(key).or_insert(value);
            }
        }
    }
}

fn sources_of(values: &Values) -> impl Iterator<Item = &str> {
    values
        .get(SETTINGS_SOURCES)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn record_source(values: &mut Values, source: String) {
    let sources = values
        .entry(SETTINGS_SOURCES.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    match sources {
        Value::Array(sources) => sources.push(Value::String(source)),
        other => *other = Value::Array(vec![Value::String(source)]),
    }
}

/// The settings container.
///
/// There's one [process-wide instance][Settings::global], but independent containers can be
/// created (which is handy in tests).
pub struct Settings {
    values: ArcSwap<Values>,
    write_lock: Mutex<()>,
    loaders: Arc<LoaderRegistry>,
}

static GLOBAL: Lazy<Arc<Settings>> = Lazy::new(|| Arc::new(Settings::new()));

impl Settings {
    /// Creates a container with the [base settings][base_settings].
    ///
    /// Sources are resolved through the process-wide [loader registry][loaders::registry].
    pub fn new() -> Self {
        Self::with_registry(Arc::clone(loaders::registry()))
    }

    /// Creates a container resolving sources through a specific loader registry.
    pub fn with_registry(loaders: Arc<LoaderRegistry>) -> Self {
        Settings {
            values: ArcSwap::from_pointee(base_settings()),
            write_lock: Mutex::new(()),
            loaders,
        }
    }

    /// The process-wide settings.
    pub fn global() -> &'static Arc<Settings> {
        &GLOBAL
    }

    /// The registry used to resolve source URIs (both in includes and in
    /// [`configure`][Settings::configure]).
    pub fn loader_registry(&self) -> &Arc<LoaderRegistry> {
        &self.loaders
    }

    /// A consistent snapshot of all the settings.
    pub fn snapshot(&self) -> Arc<Values> {
        self.values.load_full()
    }

    /// Reads a setting.
    pub fn get(&self, key: &str) -> Result<Value, SettingsError> {
        self.values
            .load()
            .get(key)
            .cloned()
            .ok_or_else(|| SettingsError::NotDefined(key.to_owned()))
    }

    /// Reads a setting, deserializing it into a specific type.
    ///
    /// Fields the type doesn't know about are logged as warnings.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, SettingsError> {
        let value = self.get(key)?;
        let mut unused = |path: serde_ignored::Path| {
            warn!("Unused setting {}.{}", key, path);
        };
        let deserializer = serde_ignored::Deserializer::new(value, &mut unused);
        serde_path_to_error::deserialize(deserializer).map_err(|source| {
            SettingsError::Deserialize {
                key: key.to_owned(),
                source,
            }
        })
    }

    /// Is the setting defined?
    pub fn contains(&self, key: &str) -> bool {
        self.values.load().contains_key(key)
    }

    /// All the setting names, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.values.load().keys().cloned().collect()
    }

    /// All the settings, sorted by their names.
    pub fn items(&self) -> Vec<(String, Value)> {
        self.values
            .load()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Identities of the loaded sources, in the order they were loaded.
    pub fn sources(&self) -> Vec<String> {
        sources_of(&self.values.load()).map(str::to_owned).collect()
    }

    /// Has any source been loaded?
    pub fn is_configured(&self) -> bool {
        sources_of(&self.values.load()).next().is_some()
    }

    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Values) -> Result<R, E>,
    {
        let _lock = self.write_lock.lock();
        let mut staged = Values::clone(&self.values.load());
        let result = f(&mut staged)?;
        self.values.store(Arc::new(staged));
        Ok(result)
    }

    fn write<R, F: FnOnce(&mut Values) -> R>(&self, f: F) -> R {
        let _lock = self.write_lock.lock();
        let mut staged = Values::clone(&self.values.load());
        let result = f(&mut staged);
        self.values.store(Arc::new(staged));
        result
    }

    /// Loads settings from a source, overriding existing values.
    ///
    /// A source that was already loaded is skipped (with a warning). Any includes named by the
    /// source are loaded right after it.
    pub fn load(&self, loader: &mut dyn Loader) -> Result<(), ConfigError> {
        self.load_with(loader, ApplyMode::Override)
    }

    /// Loads settings from a source.
    pub fn load_with(&self, loader: &mut dyn Loader, mode: ApplyMode) -> Result<(), ConfigError> {
        self.transaction(|staged| self.load_into(staged, loader, mode))
    }

    /// Loads settings from multiple sources, in order.
    ///
    /// With [`ApplyMode::KeepExisting`], the first source defining a setting wins (including
    /// settings that existed before this call).
    pub fn load_from_loaders<I>(&self, loaders: I, mode: ApplyMode) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = Box<dyn Loader>>,
    {
        self.transaction(|staged| {
            for mut loader in loaders {
                self.load_into(staged, &mut *loader, mode)?;
            }
            Ok(())
        })
    }

    fn load_into(
        &self,
        staged: &mut Values,
        loader: &mut dyn Loader,
        mode: ApplyMode,
    ) -> Result<(), ConfigError> {
        let loader_key = loader.to_string();
        if sources_of(staged).any(|source| source == loader_key) {
            // Also what stops circular includes
            warn!("Settings already loaded: {}", loader_key);
            return Ok(());
        }

        info!("Loading settings from: {}", loader_key);
        {
            let mut guard = LoaderGuard::new(loader);
            let mut entries = guard.entries()?;
            while let Some((key, value)) = entries.next()? {
                debug!("Importing setting: {}", key);
                mode.apply(staged, key, value);
            }
        }
        record_source(staged, loader_key.clone());

        let includes = match staged.remove(INCLUDE_SETTINGS) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(include)) => vec![include],
            Some(Value::Array(includes)) => includes
                .into_iter()
                .map(|include| match include {
                    Value::String(include) => Ok(include),
                    _ => Err(ConfigError::invalid(
                        "INCLUDE_SETTINGS must contain settings URIs",
                        &loader_key,
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ConfigError::invalid(
                    "INCLUDE_SETTINGS must be a list of settings URIs",
                    &loader_key,
                ))
            }
        };
        for include in includes {
            trace!("Source {} includes {}", loader_key, include);
            let mut loader = self.loaders.factory(&include)?;
            self.load_into(staged, &mut *loader, mode)?;
        }
        Ok(())
    }

    /// Configures the settings from the usual layers of sources.
    ///
    /// The layers are, from the weakest:
    ///
    /// * The default settings modules (usually of the application and its extensions).
    /// * The runtime settings source (from the command line) or, if not provided, the source
    ///   named by the environment variable ([`DEFAULT_ENV_KEY`] by default).
    /// * Any additional loaders.
    pub fn configure<I, S>(&self, default_settings: I) -> Configure<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Configure {
            settings: self,
            default_settings: default_settings
                .into_iter()
                .map(|s| s.as_ref().to_owned())
                .collect(),
            runtime_settings: None,
            additional_loaders: Vec::new(),
            env_key: DEFAULT_ENV_KEY.to_owned(),
        }
    }

    /// Starts a set of temporary modifications.
    ///
    /// All the changes done through the returned guard are reverted once it is dropped. This is
    /// meant for tests, concurrent modifications of the same settings are not coordinated.
    pub fn modify(&self) -> ModifySettings<'_> {
        ModifySettings {
            settings: self,
            rollback: Vec::new(),
        }
    }

    /// Writes all the settings as a JSON document.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), AnyError> {
        serde_json::to_writer_pretty(writer, &**self.values.load())?;
        Ok(())
    }

    /// Replaces all the settings by a document previously [exported][Settings::export].
    pub fn restore<R: Read>(&self, reader: R) -> Result<(), AnyError> {
        let restored: Values = serde_json::from_reader(reader)?;
        if let Some(key) = restored.keys().find(|key| !is_upper_key(key)) {
            return Err(SettingsError::InvalidKey(key.clone()).into());
        }
        self.write(|values| *values = restored);
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let sources = self.sources();
        if sources.is_empty() {
            write!(fmt, "Settings(UN-CONFIGURED)")
        } else {
            write!(fmt, "Settings({})", sources.join(", "))
        }
    }
}

/// Builder of the layered configuration.
///
/// Created by [`Settings::configure`].
pub struct Configure<'a> {
    settings: &'a Settings,
    default_settings: Vec<String>,
    runtime_settings: Option<String>,
    additional_loaders: Vec<Box<dyn Loader>>,
    env_key: String,
}

impl Configure<'_> {
    /// Sets the runtime settings source URI.
    ///
    /// Takes precedence over the environment variable.
    pub fn runtime_settings<S: Into<String>>(self, source: Option<S>) -> Self {
        Configure {
            runtime_settings: source.map(Into::into),
            ..self
        }
    }

    /// Adds another loader, loaded last.
    pub fn additional_loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.additional_loaders.push(loader);
        self
    }

    /// Changes the environment variable consulted for the runtime settings.
    pub fn env_key<K: Into<String>>(self, key: K) -> Self {
        Configure {
            env_key: key.into(),
            ..self
        }
    }

    /// Loads all the layers.
    pub fn load(self) -> Result<(), ConfigError> {
        debug!("Configuring settings...");
        let registry = &self.settings.loaders;
        let mut loader_list = self
            .default_settings
            .iter()
            .map(|module| {
                Box::new(ModuleLoader::new(module.as_str(), Arc::clone(registry.modules())))
                    as Box<dyn Loader>
            })
            .collect::<Vec<_>>();

        let env_key = self.env_key;
        let runtime_settings = self
            .runtime_settings
            .or_else(|| env::var(&env_key).ok())
            .filter(|source| !source.is_empty());
        if let Some(source) = runtime_settings {
            loader_list.push(registry.factory(&source)?);
        }
        loader_list.extend(self.additional_loaders);

        self.settings
            .load_from_loaders(loader_list, ApplyMode::Override)?;
        debug!("Settings loaded {:?}", self.settings.sources());
        Ok(())
    }
}

enum Rollback {
    Restore(String, Value),
    Remove(String),
    ReplaceAll(Arc<Values>),
}

/// Temporary modifications of [`Settings`].
///
/// Every change made through this guard is recorded and undone, in reverse order, when the guard
/// is dropped (including when unwinding from a panic).
///
/// Note that only whole settings are restored. Don't mutate the values returned from
/// [`get`][ModifySettings::get] in place and expect the rollback to undo it, set a new value
/// instead.
pub struct ModifySettings<'a> {
    settings: &'a Settings,
    rollback: Vec<Rollback>,
}

impl ModifySettings<'_> {
    /// Reads a setting (including the modifications done so far).
    pub fn get(&self, key: &str) -> Result<Value, SettingsError> {
        self.settings.get(key)
    }

    /// Sets a setting, adding it if it doesn't exist.
    pub fn set<K, V>(&mut self, key: K, value: V) -> Result<(), SettingsError>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let key = key.into();
        if !is_upper_key(&key) {
            return Err(SettingsError::InvalidKey(key));
        }
        let value = value.into();
        let previous = self
            .settings
            .write(|values| values.insert(key.clone(), value));
        self.rollback.push(match previous {
            Some(previous) => Rollback::Restore(key, previous),
            None => Rollback::Remove(key),
        });
        Ok(())
    }

    /// Removes a setting.
    ///
    /// Removing a setting that doesn't exist is a no-op. Returns the removed value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let previous = self.settings.write(|values| values.remove(key));
        if let Some(previous) = &previous {
            self.rollback
                .push(Rollback::Restore(key.to_owned(), previous.clone()));
        }
        previous
    }

    /// Resets the settings into the pristine state, with only the base settings.
    ///
    /// Useful to let an application configure itself again in a test. The original settings are
    /// restored with the rest of the modifications.
    pub fn reset_settings(&mut self) {
        let saved = self
            .settings
            .write(|values| Arc::new(std::mem::replace(values, base_settings())));
        self.rollback.push(Rollback::ReplaceAll(saved));
    }
}

impl Drop for ModifySettings<'_> {
    fn drop(&mut self) {
        let rollback = std::mem::take(&mut self.rollback);
        trace!("Rolling back {} settings modifications", rollback.len());
        self.settings.write(|values| {
            for action in rollback.into_iter().rev() {
                match action {
                    Rollback::Restore(key, value) => {
                        values.insert(key, value);
                    }
                    Rollback::Remove(key) => {
                        values.remove(&key);
                    }
                    Rollback::ReplaceAll(saved) => {
                        *values = Values::clone(&saved);
                    }
                }
            }
        });
    }
}
