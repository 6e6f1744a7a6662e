//! Various utilities.
//!
//! All the little things that are useful through the crate's or user's code, and don't really fit
//! anywhere else.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use regex::Regex;

use crate::AnyError;

/// Checks the key is a valid setting name.
///
/// Setting names are upper-case identifiers (`DEBUG`, `SETTING_1`, `_PRIVATE_FLAG`). Anything else
/// found in a settings source is silently skipped by the loaders.
///
/// ```rust
/// use appframe::utils::is_upper_key;
///
/// assert!(is_upper_key("DATABASES"));
/// assert!(!is_upper_key("mixed_VALUE"));
/// ```
pub fn is_upper_key(key: &str) -> bool {
    let mut chars = key.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_uppercase() || c == '_');
    first_ok
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && key.chars().any(|c| c.is_ascii_uppercase())
}

/// An error returned when the user passes a key-value option without the equal sign.
///
/// Some options take a key-value pairs on the command line. If such option is expected,
/// but it doesn't contain the equal sign, this is the used error.
#[derive(Copy, Clone, Debug)]
pub struct MissingEquals;

impl Display for MissingEquals {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Expected in the form KEY=VALUE")
    }
}

impl Error for MissingEquals {}

/// A helper for parsing map-like command line arguments.
///
/// The first `=` separates the key from the value, any further ones are part of the value.
pub fn key_val<K, V>(opt: &str) -> Result<(K, V), AnyError>
where
    K: FromStr,
    K::Err: Error + Send + Sync + 'static,
    V: FromStr,
    V::Err: Error + Send + Sync + 'static,
{
    let pos = opt.find('=').ok_or(MissingEquals)?;
    Ok((opt[..pos].parse()?, opt[pos + 1..].parse()?))
}

/// Splits a `module.path.Type` reference into the module and the type name.
///
/// Returns `None` if there's no module part.
pub fn split_type_reference(reference: &str) -> Option<(&str, &str)> {
    let pos = reference.rfind('.')?;
    let (module, name) = (&reference[..pos], &reference[pos + 1..]);
    if module.is_empty() || name.is_empty() {
        None
    } else {
        Some((module, name))
    }
}

fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
}

fn glob_regexes(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| glob_regex(p)).collect()
}

/// Filters names by allow and block lists of glob patterns (`*` and `?` wildcards).
///
/// A blocked name is never allowed. If there's an allow list, only names matching it pass.
///
/// ```rust
/// use appframe::utils::AllowBlockFilter;
///
/// let filter = AllowBlockFilter::default()
///     .allow(&["app-*"])
///     .unwrap()
///     .block(&["app-legacy"])
///     .unwrap();
/// assert!(filter.allows("app-http"));
/// assert!(!filter.allows("app-legacy"));
/// assert!(!filter.allows("other"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AllowBlockFilter {
    allow: Option<Vec<Regex>>,
    block: Option<Vec<Regex>>,
}

impl AllowBlockFilter {
    /// Sets the allow list.
    pub fn allow(self, patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(AllowBlockFilter {
            allow: Some(glob_regexes(patterns)?),
            ..self
        })
    }

    /// Sets the block list.
    pub fn block(self, patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(AllowBlockFilter {
            block: Some(glob_regexes(patterns)?),
            ..self
        })
    }

    /// Is the name allowed?
    pub fn allows(&self, name: &str) -> bool {
        let matching = |patterns: &Vec<Regex>| patterns.iter().any(|p| p.is_match(name));
        if self.block.as_ref().map_or(false, matching) {
            return false;
        }
        self.allow.as_ref().map_or(true, matching)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{AddrParseError, IpAddr};
    use std::num::ParseIntError;

    use super::*;

    #[test]
    fn upper_keys() {
        assert!(is_upper_key("UPPER_VALUE"));
        assert!(is_upper_key("SETTING_1"));
        assert!(is_upper_key("_HIDDEN"));
        assert!(!is_upper_key("lower_value"));
        assert!(!is_upper_key("mixed_VALUE"));
        assert!(!is_upper_key("1_SETTING"));
        assert!(!is_upper_key("___"));
        assert!(!is_upper_key(""));
        assert!(!is_upper_key("WITH-DASH"));
    }

    /// Valid inputs for the key-value parser
    #[test]
    fn key_val_success() {
        assert_eq!(
            ("hello".to_owned(), "world".to_owned()),
            key_val("hello=world").unwrap()
        );
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(("ip".to_owned(), ip), key_val("ip=192.0.2.1").unwrap());
        assert_eq!(("count".to_owned(), 4), key_val("count=4").unwrap());
    }

    /// The extra equals sign go into the value part.
    #[test]
    fn key_val_extra_equals() {
        assert_eq!(
            ("greeting".to_owned(), "hello=world".to_owned()),
            key_val("greeting=hello=world").unwrap(),
        );
    }

    /// Test when the key or value doesn't get parsed.
    #[test]
    fn key_val_parse_fail() {
        key_val::<String, IpAddr>("hello=192.0.2.1.0")
            .unwrap_err()
            .downcast_ref::<AddrParseError>()
            .expect("Different error returned");
        key_val::<usize, String>("hello=world")
            .unwrap_err()
            .downcast_ref::<ParseIntError>()
            .expect("Different error returned");
    }

    #[test]
    fn key_val_missing_eq() {
        key_val::<String, String>("no equal sign")
            .unwrap_err()
            .downcast_ref::<MissingEquals>()
            .expect("Different error returned");
    }

    #[test]
    fn type_references() {
        assert_eq!(Some(("tests.factory", "Bar")), split_type_reference("tests.factory.Bar"));
        assert_eq!(None, split_type_reference("Bar"));
        assert_eq!(None, split_type_reference("module."));
        assert_eq!(None, split_type_reference(".Bar"));
    }

    #[test]
    fn allow_block() {
        let everything = AllowBlockFilter::default();
        assert!(everything.allows("anything"));
        let blocked = AllowBlockFilter::default()
            .block(&["*.internal", "a?c"])
            .unwrap();
        assert!(!blocked.allows("db.internal"));
        assert!(!blocked.allows("abc"));
        assert!(blocked.allows("abbc"));
        assert!(blocked.allows("db.internal.x"));
        let allowed = AllowBlockFilter::default().allow(&["metrics"]).unwrap();
        assert!(allowed.allows("metrics"));
        assert!(!allowed.allows("metrics2"));
    }
}
