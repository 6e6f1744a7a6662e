//! Content types understood by the file (and other byte-oriented) loaders.
//!
//! A settings file is parsed according to its MIME type. The type is either given explicitly (the
//! `?type=` query of the source URI) or guessed from the file extension. JSON is always
//! available, TOML and YAML depend on the `toml-format` and `yaml` features.
//!
//! Further formats can be added at runtime:
//!
//! ```rust
//! use std::io::Read;
//!
//! use appframe::conf::loaders::content_types;
//!
//! content_types::registry().register(&["text/plain"], |input: &mut dyn Read| {
//!     let mut text = String::new();
//!     input.read_to_string(&mut text)?;
//!     Ok(serde_json::json!({ "TEXT": text }))
//! });
//! assert!(content_types::registry().supports("text/plain"));
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{AnyError, Value};

/// The MIME type of JSON.
pub const JSON_MIME_TYPE: &str = "application/json";

/// The MIME type of TOML (<https://toml.io/en/v1.0.0#mime-type>).
pub const TOML_MIME_TYPE: &str = "application/toml";

/// The (unofficial, but most common) MIME type of YAML.
pub const YAML_MIME_TYPE: &str = "application/x-yaml";

/// Used when nothing better can be guessed.
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

const EXTENSIONS: &[(&str, &str)] = &[
    ("json", JSON_MIME_TYPE),
    ("toml", TOML_MIME_TYPE),
    ("yaml", YAML_MIME_TYPE),
    ("yml", YAML_MIME_TYPE),
];

/// A parser of one content type.
///
/// Gets the raw input and produces the document.
pub type ContentParser = Arc<dyn Fn(&mut dyn Read) -> Result<Value, AnyError> + Send + Sync>;

/// Guesses the content type of a file from its extension.
pub fn content_type_from_path<P: AsRef<Path>>(path: P) -> Option<&'static str> {
    let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// Picks the content type of a source.
///
/// The explicitly requested type wins, then the one guessed from the extension and
/// [`UNKNOWN_MIME_TYPE`] as the last resort.
pub fn resolve_content_type<P: AsRef<Path>>(explicit: Option<&str>, path: P) -> String {
    explicit
        .filter(|t| !t.is_empty())
        .or_else(|| content_type_from_path(path))
        .unwrap_or(UNKNOWN_MIME_TYPE)
        .to_owned()
}

/// The registry of content parsers, keyed by the MIME type.
pub struct ContentTypeRegistry {
    parsers: RwLock<HashMap<String, ContentParser>>,
}

impl ContentTypeRegistry {
    /// Creates a registry with all the formats compiled in.
    pub fn new() -> Self {
        let registry = ContentTypeRegistry {
            parsers: RwLock::new(HashMap::new()),
        };
        registry.register(&[JSON_MIME_TYPE, "text/json"], |input: &mut dyn Read| {
            Ok(serde_json::from_reader(input)?)
        });
        #[cfg(feature = "toml-format")]
        registry.register(&[TOML_MIME_TYPE, "text/toml"], |input: &mut dyn Read| {
            let mut text = String::new();
            input.read_to_string(&mut text)?;
            Ok(toml::from_str(&text)?)
        });
        #[cfg(feature = "yaml")]
        registry.register(
            &[YAML_MIME_TYPE, "application/yaml", "text/yaml"],
            |input: &mut dyn Read| Ok(serde_yaml::from_reader(input)?),
        );
        registry
    }

    /// Registers a parser for one or more content types.
    ///
    /// Replaces any previous parser of the same types.
    pub fn register<F>(&self, content_types: &[&str], parser: F)
    where
        F: Fn(&mut dyn Read) -> Result<Value, AnyError> + Send + Sync + 'static,
    {
        let parser: ContentParser = Arc::new(parser);
        let mut parsers = self.parsers.write();
        for content_type in content_types {
            parsers.insert((*content_type).to_owned(), Arc::clone(&parser));
        }
    }

    /// Is there a parser for this content type?
    pub fn supports(&self, content_type: &str) -> bool {
        self.parsers.read().contains_key(content_type)
    }

    /// Looks up the parser for a content type.
    pub fn parser(&self, content_type: &str) -> Option<ContentParser> {
        self.parsers.read().get(content_type).cloned()
    }
}

impl Default for ContentTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<ContentTypeRegistry> = Lazy::new(ContentTypeRegistry::new);

/// The process-wide content type registry used by the loaders.
pub fn registry() -> &'static ContentTypeRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn guess_from_extension() {
        assert_eq!(Some(JSON_MIME_TYPE), content_type_from_path("/etc/app.json"));
        assert_eq!(Some(TOML_MIME_TYPE), content_type_from_path("app.TOML"));
        assert_eq!(Some(YAML_MIME_TYPE), content_type_from_path("app.yml"));
        assert_eq!(None, content_type_from_path("app.ini"));
        assert_eq!(None, content_type_from_path("app"));
    }

    #[test]
    fn explicit_type_wins() {
        assert_eq!(
            YAML_MIME_TYPE,
            resolve_content_type(Some(YAML_MIME_TYPE), "settings.json")
        );
        assert_eq!(JSON_MIME_TYPE, resolve_content_type(Some(""), "settings.json"));
        assert_eq!(UNKNOWN_MIME_TYPE, resolve_content_type(None, "settings"));
    }

    #[test]
    fn parse_json() {
        let registry = ContentTypeRegistry::new();
        let parser = registry.parser(JSON_MIME_TYPE).unwrap();
        let mut input: &[u8] = br#"{"FOO": [1, 2]}"#;
        assert_eq!(json!({"FOO": [1, 2]}), parser(&mut input).unwrap());
        let mut broken: &[u8] = b"{";
        assert!(parser(&mut broken).is_err());
    }

    #[cfg(feature = "toml-format")]
    #[test]
    fn parse_toml() {
        let parser = ContentTypeRegistry::new().parser(TOML_MIME_TYPE).unwrap();
        let mut input: &[u8] = b"FOO = \"bar\"\n[DATABASE]\nPORT = 5432\n";
        assert_eq!(
            json!({"FOO": "bar", "DATABASE": {"PORT": 5432}}),
            parser(&mut input).unwrap()
        );
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn parse_yaml() {
        let registry = ContentTypeRegistry::new();
        assert!(registry.supports("text/yaml"));
        let parser = registry.parser(YAML_MIME_TYPE).unwrap();
        let mut input: &[u8] = b"FOO: bar\nITEMS:\n  - 1\n  - 2\n";
        assert_eq!(
            json!({"FOO": "bar", "ITEMS": [1, 2]}),
            parser(&mut input).unwrap()
        );
    }

    #[test]
    fn unknown_type() {
        let registry = ContentTypeRegistry::new();
        assert!(!registry.supports("application/x-ini"));
        assert!(registry.parser("application/x-ini").is_none());
    }
}
