#![doc(test(attr(deny(warnings))))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Loading settings over HTTP.
//!
//! This adds the `http://` and `https://` schemes to a [`LoaderRegistry`] of [`appframe`]. The
//! document is fetched with a blocking [`reqwest`] client and parsed according to its content
//! type, which is picked (in this order) from:
//!
//! * The `Content-Type` header of the response.
//! * The `type` query parameter of the URI.
//! * The extension of the path.
//!
//! # Examples
//!
//! ```rust
//! use appframe::conf::loaders;
//!
//! appframe_http::install(loaders::registry());
//! let loader = loaders::registry()
//!     .factory("https://config.example.com/app/settings.json")
//!     .unwrap();
//! assert_eq!("https://config.example.com/app/settings.json", loader.to_string());
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use appframe::conf::loaders::content_types::{self, resolve_content_type, UNKNOWN_MIME_TYPE};
use appframe::conf::loaders::{object_entries, ConfigError, Entries, Loader, LoaderRegistry};
use log::{debug, trace};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// The schemes handled by [`HttpLoader`].
pub const SCHEMES: &[&str] = &["http", "https"];

/// Loads settings from an HTTP(S) URI.
///
/// The response stays open from the moment the settings are read until the loader is closed.
pub struct HttpLoader {
    url: Url,
    client: Client,
    response: Option<Response>,
}

impl HttpLoader {
    /// Creates the loader with a default client.
    pub fn new(url: Url) -> Self {
        Self::with_client(url, Client::new())
    }

    /// Creates the loader with a specific (pre-configured) client.
    pub fn with_client(url: Url, client: Client) -> Self {
        HttpLoader {
            url,
            client,
            response: None,
        }
    }

    /// The URI the settings come from.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The content type of the document, if the server doesn't say otherwise.
    pub fn fallback_content_type(&self) -> String {
        let explicit = self
            .url
            .query_pairs()
            .find(|(key, _)| key == "type")
            .map(|(_, value)| value.into_owned());
        resolve_content_type(explicit.as_deref(), self.url.path())
    }

    /// Picks the content type, preferring the one announced by the server.
    ///
    /// Parameters of the header (`; charset=...`) are ignored, as is the generic binary type.
    pub fn content_type(&self, header: Option<&str>) -> String {
        header
            .and_then(|header| header.split(';').next())
            .map(str::trim)
            .filter(|mime| !mime.is_empty() && *mime != UNKNOWN_MIME_TYPE)
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.fallback_content_type())
    }
}

impl Display for HttpLoader {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "{}", self.url)
    }
}

impl Loader for HttpLoader {
    fn entries(&mut self) -> Result<Entries<'_>, ConfigError> {
        debug!("Fetching settings from {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| ConfigError::invalid_caused("Unable to fetch settings", &*self, e))?;
        let header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_type = self.content_type(header.as_deref());
        trace!("Settings from {} are {}", self.url, content_type);
        let parser = content_types::registry()
            .parser(&content_type)
            .ok_or(ConfigError::UnsupportedContentType(content_type))?;
        let document = parser(self.response.get_or_insert(response))
            .map_err(|e| ConfigError::invalid_caused("Unable to parse document", &*self, e))?;
        object_entries(&*self, document)
    }

    fn close(&mut self) {
        if self.response.take().is_some() {
            trace!("Closed the response from {}", self.url);
        }
    }
}

/// Registers the [`HttpLoader`] for the HTTP schemes.
pub fn install(registry: &LoaderRegistry) {
    registry.register(SCHEMES, |url| Ok(Box::new(HttpLoader::new(url.clone()))));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use appframe::conf::loaders::settings_modules;

    use super::*;

    fn loader(uri: &str) -> HttpLoader {
        HttpLoader::new(Url::parse(uri).unwrap())
    }

    #[test]
    fn content_type_priority() {
        let loader = loader("https://example.com/settings.json?type=application/x-yaml");
        assert_eq!("application/toml", loader.content_type(Some("application/toml")));
        assert_eq!(
            "application/json",
            loader.content_type(Some("Application/JSON; charset=utf-8"))
        );
        assert_eq!("application/x-yaml", loader.content_type(None));
        assert_eq!(
            "application/x-yaml",
            loader.content_type(Some("application/octet-stream"))
        );
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(
            "application/json",
            loader("http://example.com/app/settings.json").content_type(None)
        );
        assert_eq!(
            UNKNOWN_MIME_TYPE,
            loader("http://example.com/app/settings").content_type(None)
        );
    }

    #[test]
    fn installed() {
        let registry = LoaderRegistry::new(Arc::clone(settings_modules()));
        assert!(registry.factory("https://example.com/settings.json").is_err());
        install(&registry);
        let loader = registry.factory("https://example.com/settings.json").unwrap();
        assert_eq!("https://example.com/settings.json", loader.to_string());
        let loader = registry
            .factory("http://example.com/settings?type=application/json")
            .unwrap();
        assert_eq!("http://example.com/settings?type=application/json", loader.to_string());
    }

    #[test]
    fn closed_without_use() {
        let mut loader = loader("http://example.com/settings.json");
        loader.close();
        assert!(loader.response.is_none());
    }
}
