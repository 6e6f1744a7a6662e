//! Custom value converters.
//!
//! Anything implementing [`ArgumentType`] can be used as the converter of a single command line
//! value, through [`ArgType::Custom`][super::ArgType::Custom].

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::{File, OpenOptions};

use regex::Regex;
use serde_json::Value;

/// A converter of a single textual command line value.
///
/// The error is a human readable reason, reported by the argument parser together with the name
/// of the offending argument.
pub trait ArgumentType: Send + Sync {
    /// Name of the type, used in error messages.
    fn name(&self) -> String;

    /// Converts (and validates) the value.
    fn convert(&self, value: &str) -> Result<Value, String>;
}

/// Accepts only values matching a regular expression.
///
/// As with the usual command line tools, the expression needs to match at the start of the
/// value, not necessarily the whole of it (use `$` for that).
///
/// ```rust
/// use appframe::arguments::types::{ArgumentType, RegexType};
///
/// let snake = RegexType::new(r"[a-z_]+$").unwrap().message("Expected snake_case");
/// assert!(snake.convert("hello_world").is_ok());
/// assert_eq!(Err("Expected snake_case".to_owned()), snake.convert("HelloWorld"));
/// ```
#[derive(Clone, Debug)]
pub struct RegexType {
    regex: Regex,
    message: String,
}

impl RegexType {
    /// Compiles the expression.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(RegexType {
            regex: Regex::new(pattern)?,
            message: format!("Value does not match {:?}", pattern),
        })
    }

    /// Replaces the error message of a non-matching value.
    pub fn message<M: Into<String>>(self, message: M) -> Self {
        RegexType {
            message: message.into(),
            ..self
        }
    }
}

impl ArgumentType for RegexType {
    fn name(&self) -> String {
        format!("Regex({})", self.regex.as_str())
    }

    fn convert(&self, value: &str) -> Result<Value, String> {
        match self.regex.find(value) {
            Some(m) if m.start() == 0 => Ok(Value::String(value.to_owned())),
            _ => Err(self.message.clone()),
        }
    }
}

/// How a [`FileType`] argument is going to be opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FileMode {
    /// Reading an existing file.
    Read,
    /// Writing, the file is created if missing.
    Write,
    /// Appending, the file is created if missing.
    Append,
}

/// A file name argument.
///
/// The file is checked it can be opened in the given mode, but the value passed to the handler
/// is still the path (the handler opens it itself). The `-` value means the standard input or
/// output and is passed through untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileType {
    mode: FileMode,
}

/// The value standing for stdin/stdout.
pub const STDIO: &str = "-";

impl FileType {
    /// A file of the given mode.
    pub fn new(mode: FileMode) -> Self {
        FileType { mode }
    }

    /// A file opened for reading.
    pub fn read() -> Self {
        Self::new(FileMode::Read)
    }

    /// A file opened for writing.
    pub fn write() -> Self {
        Self::new(FileMode::Write)
    }

    /// The mode.
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    fn open(&self, path: &str) -> std::io::Result<File> {
        match self.mode {
            FileMode::Read => File::open(path),
            FileMode::Write => OpenOptions::new().write(true).create(true).open(path),
            FileMode::Append => OpenOptions::new().append(true).create(true).open(path),
        }
    }
}

impl Display for FileType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mode = match self.mode {
            FileMode::Read => "r",
            FileMode::Write => "w",
            FileMode::Append => "a",
        };
        write!(fmt, "FileType({:?})", mode)
    }
}

impl ArgumentType for FileType {
    fn name(&self) -> String {
        self.to_string()
    }

    fn convert(&self, value: &str) -> Result<Value, String> {
        if value != STDIO {
            self.open(value)
                .map_err(|e| format!("can't open '{}': {}", value, e))?;
        }
        Ok(Value::String(value.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_matches_start() {
        let t = RegexType::new(r"\d+").unwrap();
        assert_eq!(Value::from("123abc"), t.convert("123abc").unwrap());
        assert_eq!(
            Err("Value does not match \"\\\\d+\"".to_owned()),
            t.convert("abc123")
        );
    }

    #[test]
    fn file_read() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(Value::from(path), FileType::read().convert(path).unwrap());
        assert_eq!(Value::from("-"), FileType::read().convert("-").unwrap());
        let err = FileType::read()
            .convert("/this/does/not/exist.txt")
            .unwrap_err();
        assert!(err.starts_with("can't open '/this/does/not/exist.txt'"));
    }

    #[test]
    fn file_write_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();
        FileType::write().convert(path).unwrap();
        assert!(std::path::Path::new(path).exists());
        assert_eq!("FileType(\"w\")", FileType::write().name());
    }
}
