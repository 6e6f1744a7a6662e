//! Helpers for building structures out of the settings.
//!
//! Both helpers read a single mapping setting of *named* entries, for example:
//!
//! ```json
//! {
//!     "DATABASES": {
//!         "default": {"host": "localhost", "port": 5432},
//!         "reporting": {"host": "reports.local", "port": 5432}
//!     }
//! }
//! ```
//!
//! The [`NamedConfiguration`] hands out the entries as keyword maps, while the
//! [`plugins`] factories turn `(type, kwargs)` entries into instances.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use super::{Settings, SettingsError};
use crate::checks::{CheckMessage, CheckProvider, CheckResult};
use crate::utils::is_upper_key;
use crate::{AnyError, Value};

pub mod plugins;

pub use self::plugins::{
    type_registry, Constructor, DefinitionError, ImportError, NamedDefinition, NamedPluginFactory,
    NamedSingletonPluginFactory, PluginType, PluginTypeBuilder,
    ThreadLocalNamedSingletonPluginFactory, TypeRegistry,
};

/// Keyword arguments of a named entry.
pub type Kwargs = serde_json::Map<String, Value>;

/// The name used when none is asked for explicitly.
pub const DEFAULT_NAME: &str = "default";

/// What name to use when the caller doesn't provide one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DefaultName {
    /// Use this name.
    Name(String),
    /// A name must always be provided.
    NoDefault,
}

impl DefaultName {
    /// Picks the requested name, or the default one.
    pub fn pick<'a>(&'a self, name: Option<&'a str>) -> Option<&'a str> {
        match (name, self) {
            (Some(name), _) => Some(name),
            (None, DefaultName::Name(name)) => Some(name),
            (None, DefaultName::NoDefault) => None,
        }
    }
}

impl Default for DefaultName {
    fn default() -> Self {
        DefaultName::Name(DEFAULT_NAME.to_owned())
    }
}

impl From<&str> for DefaultName {
    fn from(name: &str) -> Self {
        DefaultName::Name(name.to_owned())
    }
}

impl From<String> for DefaultName {
    fn from(name: String) -> Self {
        DefaultName::Name(name)
    }
}

/// Problems resolving a named entry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FactoryError {
    /// No name was given and there's no default name.
    #[error("No name provided for `{0}` and no default is set")]
    NotProvided(String),

    /// The named entry doesn't exist.
    #[error("Setting definition `{0}` not found")]
    NotFound(String),

    /// An alias is missing its target or is part of a cycle.
    #[error("{0}")]
    BadAlias(String),

    /// The type reference of an entry doesn't resolve to a registered type.
    #[error("Unable to import type `{type_name}`")]
    CannotImport {
        /// The type reference.
        type_name: String,
        /// Why.
        #[source]
        source: ImportError,
    },

    /// The type exists, but doesn't provide the capability the factory produces.
    #[error("Setting definition `{type_name}` is not a `{capability}`")]
    InvalidSubType {
        /// The type reference.
        type_name: String,
        /// The capability the factory produces.
        capability: &'static str,
    },

    /// The entry is malformed.
    #[error("Invalid definition `{name}`")]
    InvalidDefinition {
        /// The name of the entry.
        name: String,
        /// What's wrong with it.
        #[source]
        source: DefinitionError,
    },

    /// The constructor of the type failed.
    #[error("Unable to create `{name}`")]
    Create {
        /// The name of the entry.
        name: String,
        /// The error of the constructor.
        #[source]
        source: AnyError,
    },
}

pub(crate) fn entry_obj(setting: &str, name: &str) -> String {
    format!("settings.{}[{}]", setting, name)
}

/// Outcome of the common part of the checks of a mapping setting.
pub(crate) enum MappingCheck<'a> {
    /// There's nothing more to check.
    Done(Vec<CheckMessage>),
    /// The mapping to go through, with the messages found so far.
    Entries(&'a Kwargs, Vec<CheckMessage>),
}

/// Checks the setting exists, is a mapping and contains the default entry.
pub(crate) fn check_mapping<'a>(
    value: Option<&'a Value>,
    setting: &str,
    default_name: &DefaultName,
    kind: &str,
    default_hint: String,
) -> MappingCheck<'a> {
    let obj = format!("settings.{}", setting);
    let definitions = match value {
        None => {
            return MappingCheck::Done(vec![CheckMessage::critical(format!(
                "{} definitions missing from settings.",
                kind
            ))
            .hint(format!("Add a {} entry into settings.", setting))
            .obj(obj)])
        }
        Some(Value::Null) => return MappingCheck::Done(Vec::new()),
        Some(Value::Object(definitions)) => definitions,
        Some(_) => {
            return MappingCheck::Done(vec![CheckMessage::critical(format!(
                "{} definitions defined in settings not a dict instance.",
                kind
            ))
            .hint(format!("Change setting {} to be a dict in settings file.", setting))
            .obj(obj)])
        }
    };
    let mut messages = Vec::new();
    if let DefaultName::Name(default) = default_name {
        if !definitions.contains_key(default) {
            messages.push(
                CheckMessage::warn("Default definition not defined.")
                    .hint(default_hint)
                    .obj(obj),
            );
        }
    }
    MappingCheck::Entries(definitions, messages)
}

/// Named sets of values from the settings.
///
/// The setting is a mapping of names to mappings of values. If any of the defaults, required keys
/// or optional keys are declared, only those keys are taken from the entries and unknown keys are
/// reported by the checks.
///
/// ```rust
/// use std::sync::Arc;
///
/// use appframe::conf::Settings;
/// use appframe::conf::helpers::NamedConfiguration;
/// use serde_json::json;
///
/// let settings = Arc::new(Settings::new());
/// let mut modify = settings.modify();
/// modify.set("DATABASES", json!({"default": {"host": "localhost"}})).unwrap();
///
/// let databases = NamedConfiguration::new("DATABASES")
///     .unwrap()
///     .settings(Arc::clone(&settings))
///     .defaults(json!({"port": 5432}).as_object().unwrap().clone());
/// let default = databases.get(None).unwrap();
/// assert_eq!(json!({"host": "localhost", "port": 5432}), json!(default));
/// ```
pub struct NamedConfiguration {
    setting: String,
    defaults: Kwargs,
    required_keys: Vec<String>,
    optional_keys: Vec<String>,
    default_name: DefaultName,
    settings: Arc<Settings>,
}

impl NamedConfiguration {
    /// Creates the configuration reading the given (upper-case) setting of the global settings.
    pub fn new<S: Into<String>>(setting: S) -> Result<Self, SettingsError> {
        let setting = setting.into();
        if !is_upper_key(&setting) {
            return Err(SettingsError::InvalidKey(setting));
        }
        Ok(NamedConfiguration {
            setting,
            defaults: Kwargs::new(),
            required_keys: Vec::new(),
            optional_keys: Vec::new(),
            default_name: DefaultName::default(),
            settings: Arc::clone(Settings::global()),
        })
    }

    /// Reads a different settings container.
    pub fn settings(self, settings: Arc<Settings>) -> Self {
        NamedConfiguration { settings, ..self }
    }

    /// Values used when the entry doesn't provide them.
    pub fn defaults(self, defaults: Kwargs) -> Self {
        NamedConfiguration { defaults, ..self }
    }

    /// Keys each entry must contain.
    pub fn required_keys(self, keys: &[&str]) -> Self {
        NamedConfiguration {
            required_keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            ..self
        }
    }

    /// Keys an entry may contain.
    pub fn optional_keys(self, keys: &[&str]) -> Self {
        NamedConfiguration {
            optional_keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            ..self
        }
    }

    /// The name used when none is given to [`get`][NamedConfiguration::get].
    pub fn default_name<D: Into<DefaultName>>(self, default_name: D) -> Self {
        NamedConfiguration {
            default_name: default_name.into(),
            ..self
        }
    }

    /// The name of the setting.
    pub fn setting(&self) -> &str {
        &self.setting
    }

    fn known_keys(&self) -> BTreeSet<&str> {
        self.required_keys
            .iter()
            .chain(&self.optional_keys)
            .chain(self.defaults.keys())
            .map(String::as_str)
            .collect()
    }

    /// Names of all the entries.
    pub fn available(&self) -> Vec<String> {
        match self.settings.get(&self.setting) {
            Ok(Value::Object(definitions)) => definitions.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// The named entry, merged over the defaults.
    pub fn get(&self, name: Option<&str>) -> Result<Kwargs, FactoryError> {
        let name = self
            .default_name
            .pick(name)
            .ok_or_else(|| FactoryError::NotProvided(self.setting.clone()))?;
        let entry = match self.settings.get(&self.setting) {
            Ok(Value::Object(mut definitions)) => definitions.remove(name),
            _ => None,
        };
        let entry = match entry {
            Some(Value::Object(entry)) => entry,
            Some(_) => {
                return Err(FactoryError::InvalidDefinition {
                    name: name.to_owned(),
                    source: DefinitionError::NotMapping,
                })
            }
            None => return Err(FactoryError::NotFound(name.to_owned())),
        };
        let known = self.known_keys();
        let mut config = self.defaults.clone();
        config.extend(
            entry
                .into_iter()
                .filter(|(key, _)| known.is_empty() || known.contains(key.as_str())),
        );
        Ok(config)
    }

    /// Checks the definitions in the given settings.
    pub fn checks(&self, settings: &Settings) -> Vec<CheckMessage> {
        let value = settings.get(&self.setting).ok();
        let default_hint = match &self.default_name {
            DefaultName::Name(name) => format!("Add a `{}` entry.", name),
            DefaultName::NoDefault => String::new(),
        };
        let checked = check_mapping(
            value.as_ref(),
            &self.setting,
            &self.default_name,
            "Config",
            default_hint,
        );
        let (definitions, mut messages) = match checked {
            MappingCheck::Done(messages) => return messages,
            MappingCheck::Entries(definitions, messages) => (definitions, messages),
        };
        let known = self.known_keys();
        for (name, definition) in definitions {
            let obj = entry_obj(&self.setting, name);
            let definition = match definition {
                Value::Object(definition) => definition,
                _ => {
                    messages.push(
                        CheckMessage::critical("Config definition entry is not a dict.")
                            .hint("Change definition to be a dict in settings.")
                            .obj(obj),
                    );
                    continue;
                }
            };
            for key in &self.required_keys {
                if !definition.contains_key(key) {
                    messages.push(
                        CheckMessage::critical(format!(
                            "Config definition entry does not contain `{}` value.",
                            key
                        ))
                        .obj(obj.clone()),
                    );
                }
            }
            if !known.is_empty() {
                for key in definition.keys().filter(|k| !known.contains(k.as_str())) {
                    messages.push(
                        CheckMessage::warn(format!(
                            "Config definition entry contains unknown value `{}`.",
                            key
                        ))
                        .obj(format!("{}[{}]", obj, key)),
                    );
                }
            }
        }
        messages
    }
}

impl CheckProvider for NamedConfiguration {
    fn check_name(&self) -> String {
        format!("{}.check_configuration", self.setting)
    }

    fn checks(&self, settings: &Settings) -> CheckResult {
        Ok(NamedConfiguration::checks(self, settings))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::checks::Level;
    use crate::conf::loaders::ObjectLoader;

    fn settings() -> Arc<Settings> {
        let settings = Settings::new();
        let mut source = ObjectLoader::new(&json!({
            "TEST_NAMED_CONFIG": {
                "default": {"length": 42, "foo": "bar"},
                "eek": {"length": 24, "foo": "bar"},
            },
        }))
        .unwrap();
        settings.load(&mut source).unwrap();
        Arc::new(settings)
    }

    fn kwargs(value: Value) -> Kwargs {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn target(settings: &Arc<Settings>) -> NamedConfiguration {
        NamedConfiguration::new("TEST_NAMED_CONFIG")
            .unwrap()
            .settings(Arc::clone(settings))
    }

    #[test]
    fn lower_case_setting() {
        assert!(NamedConfiguration::new("test_named_config").is_err());
    }

    #[test]
    fn get_default() {
        let settings = settings();
        let target = target(&settings);
        assert_eq!(json!({"length": 42, "foo": "bar"}), json!(target.get(None).unwrap()));
        let mut available = target.available();
        available.sort();
        assert_eq!(vec!["default", "eek"], available);
    }

    #[test]
    fn get_filtered_with_defaults() {
        let settings = settings();
        let target = target(&settings)
            .defaults(kwargs(json!({"length": 1, "colour": "red"})))
            .optional_keys(&["length"]);
        assert_eq!(
            json!({"length": 24, "colour": "red"}),
            json!(target.get(Some("eek")).unwrap())
        );
    }

    #[test]
    fn not_found() {
        let settings = settings();
        match target(&settings).get(Some("copper")).unwrap_err() {
            FactoryError::NotFound(name) => assert_eq!("copper", name),
            e => panic!("Unexpected error {}", e),
        }
        let no_default = target(&settings).default_name(DefaultName::NoDefault);
        assert!(matches!(no_default.get(None), Err(FactoryError::NotProvided(_))));
    }

    #[test]
    fn checks_missing_and_invalid() {
        let settings = settings();
        let missing = NamedConfiguration::new("UNKNOWN").unwrap();
        let messages = missing.checks(&settings);
        assert_eq!(1, messages.len());
        assert_eq!(Level::Critical, messages[0].level);
        assert_eq!(Some("settings.UNKNOWN"), messages[0].obj.as_deref());

        let mut modify = settings.modify();
        modify.set("UNKNOWN", Value::Null).unwrap();
        assert!(missing.checks(&settings).is_empty());
        modify.set("UNKNOWN", json!([])).unwrap();
        let messages = missing.checks(&settings);
        assert!(messages[0].msg.contains("not a dict instance"));
    }

    #[test]
    fn checks_entries() {
        let settings = settings();
        let mut modify = settings.modify();
        modify
            .set(
                "CONFIG",
                json!({"other": {"length": 1, "colour": "red"}, "broken": []}),
            )
            .unwrap();
        let target = NamedConfiguration::new("CONFIG")
            .unwrap()
            .required_keys(&["length", "foo"]);
        let mut messages = target.checks(&settings);
        messages.sort_by(|a, b| a.msg.cmp(&b.msg));
        let summary = messages
            .iter()
            .map(|m| (m.level, m.msg.as_str(), m.obj.as_deref().unwrap_or("")))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                (
                    Level::Warning,
                    "Config definition entry contains unknown value `colour`.",
                    "settings.CONFIG[other][colour]",
                ),
                (
                    Level::Critical,
                    "Config definition entry does not contain `foo` value.",
                    "settings.CONFIG[other]",
                ),
                (
                    Level::Critical,
                    "Config definition entry is not a dict.",
                    "settings.CONFIG[broken]",
                ),
                (
                    Level::Warning,
                    "Default definition not defined.",
                    "settings.CONFIG",
                ),
            ],
            summary
        );
    }
}
