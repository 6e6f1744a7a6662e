use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::trace;
use url::Url;

use super::content_types::{self, resolve_content_type};
use super::{object_entries, ConfigError, Entries, Loader};

pub(super) const SCHEME: &str = "file";

/// Loads settings from a file.
///
/// The content type decides how the file is parsed (see
/// [`content_types`][super::content_types]). The file stays open from the moment the settings
/// are read until the loader is closed.
///
/// ```rust
/// use appframe::conf::loaders::FileLoader;
///
/// let loader = FileLoader::new("/etc/app/settings.yaml");
/// assert_eq!("file:///etc/app/settings.yaml?type=application/x-yaml", loader.to_string());
/// ```
pub struct FileLoader {
    path: PathBuf,
    content_type: String,
    file: Option<File>,
}

impl FileLoader {
    /// Creates a loader, guessing the content type from the file extension.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let content_type = resolve_content_type(None, &path);
        Self::with_content_type(path, content_type)
    }

    /// Creates a loader with an explicit content type.
    pub fn with_content_type<P, C>(path: P, content_type: C) -> Self
    where
        P: Into<PathBuf>,
        C: Into<String>,
    {
        FileLoader {
            path: path.into(),
            content_type: content_type.into(),
            file: None,
        }
    }

    /// Creates the loader from a `file://<path>?type=<mime>` URI.
    ///
    /// `file://settings.json` is understood as a path relative to the current directory.
    pub fn from_url(url: &Url) -> Self {
        let path = match url.host_str() {
            Some(host) => PathBuf::from(format!("{}{}", host, url.path().trim_end_matches('/'))),
            None => url
                .to_file_path()
                .unwrap_or_else(|()| PathBuf::from(url.path())),
        };
        let explicit = url
            .query_pairs()
            .find(|(key, _)| key == "type")
            .map(|(_, value)| value.into_owned());
        let content_type = resolve_content_type(explicit.as_deref(), &path);
        Self::with_content_type(path, content_type)
    }

    /// The path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The content type the file is parsed as.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl Display for FileLoader {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "{}://{}?type={}",
            SCHEME,
            self.path.display(),
            self.content_type
        )
    }
}

impl Loader for FileLoader {
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        let parser = content_types::registry()
            .parser(&self.content_type)
            .ok_or_else(|| ConfigError::UnsupportedContentType(self.content_type.clone()))?;
        trace!("Opening settings file {:?}", self.path);
        let file = File::open(&self.path)
            .map_err(|e| ConfigError::invalid_caused("Unable to load settings", &*self, e))?;
        let document = {
            let mut reader = BufReader::new(self.file.get_or_insert(file));
            parser(&mut reader)
        };
        let document =
            document.map_err(|e| ConfigError::invalid_caused("Unable to parse file", &*self, e))?;
        object_entries(&*self, document)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            trace!("Closed settings file {:?}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use fallible_iterator::FallibleIterator;
    use serde_json::json;
    use tempfile::{Builder, NamedTempFile};

    use super::super::LoaderGuard;
    use super::*;
    use crate::Value;

    fn settings_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn load(loader: &mut FileLoader) -> Result<Vec<(String, Value)>, ConfigError> {
        let mut guard = LoaderGuard::new(loader);
        let mut entries: Vec<_> = guard.entries()?.collect()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    #[test]
    fn load_json() {
        let file = settings_file(".json", r#"{"UPPER": "foo", "lower": "bar", "NUM": 1}"#);
        let mut loader = FileLoader::new(file.path());
        let entries = load(&mut loader).unwrap();
        assert_eq!(
            vec![
                ("NUM".to_owned(), json!(1)),
                ("UPPER".to_owned(), json!("foo")),
            ],
            entries
        );
        assert!(loader.file.is_none(), "File left open");
    }

    #[test]
    fn explicit_type_from_url() {
        let file = settings_file(".txt", r#"{"UPPER": "foo"}"#);
        let url = Url::parse(&format!(
            "file://{}?type=application/json",
            file.path().display()
        ))
        .unwrap();
        let mut loader = FileLoader::from_url(&url);
        assert_eq!(file.path(), loader.path());
        assert_eq!("application/json", loader.content_type());
        assert_eq!(1, load(&mut loader).unwrap().len());
    }

    #[test]
    fn relative_url() {
        let url = Url::parse("file://settings.json").unwrap();
        let loader = FileLoader::from_url(&url);
        assert_eq!(Path::new("settings.json"), loader.path());
        assert_eq!("file://settings.json?type=application/json", loader.to_string());
    }

    #[test]
    fn missing_file() {
        let mut loader = FileLoader::new("/this/does/not/exist.json");
        match load(&mut loader).unwrap_err() {
            ConfigError::InvalidConfiguration { msg, source_id, cause } => {
                assert_eq!("Unable to load settings", msg);
                assert_eq!("file:///this/does/not/exist.json?type=application/json", source_id);
                assert!(cause.is_some());
            }
            e => panic!("Unexpected error {}", e),
        }
    }

    #[test]
    fn broken_content() {
        let file = settings_file(".json", "{ not json");
        let mut loader = FileLoader::new(file.path());
        match load(&mut loader).unwrap_err() {
            ConfigError::InvalidConfiguration { msg, .. } => assert_eq!("Unable to parse file", msg),
            e => panic!("Unexpected error {}", e),
        }
        assert!(loader.file.is_none());
    }

    #[test]
    fn not_an_object() {
        let file = settings_file(".json", "[1, 2, 3]");
        let mut loader = FileLoader::new(file.path());
        assert!(matches!(
            load(&mut loader).unwrap_err(),
            ConfigError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn unsupported_type() {
        let file = settings_file(".ini", "[section]");
        let mut loader = FileLoader::new(file.path());
        assert_eq!("application/octet-stream", loader.content_type());
        match load(&mut loader).unwrap_err() {
            ConfigError::UnsupportedContentType(t) => assert_eq!("application/octet-stream", t),
            e => panic!("Unexpected error {}", e),
        }
    }
}
