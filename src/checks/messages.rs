use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use thiserror::Error;

/// Importance of a [`CheckMessage`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Only interesting when debugging.
    Debug,
    /// Just letting know.
    Info,
    /// Something is suspicious.
    Warning,
    /// Something is wrong.
    Error,
    /// The application can't work like this.
    Critical,
}

impl Level {
    /// The upper-case name of the level.
    pub fn name(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl Display for Level {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.write_str(self.name())
    }
}

/// An unknown level name.
#[derive(Debug, Error)]
#[error("Unknown check level {0}")]
pub struct LevelParseError(String);

impl FromStr for Level {
    type Err = LevelParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" => Ok(Level::Critical),
            _ => Err(LevelParseError(s.to_owned())),
        }
    }
}

/// A message produced by a check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckMessage {
    /// Importance of the message.
    pub level: Level,
    /// Description of the problem found.
    pub msg: String,
    /// How to fix the problem.
    pub hint: Option<String>,
    /// What the message is about (for example `settings.DATABASES[default]`).
    pub obj: Option<String>,
}

impl CheckMessage {
    /// Creates a message with no hint and object.
    pub fn new<M: Into<String>>(level: Level, msg: M) -> Self {
        CheckMessage {
            level,
            msg: msg.into(),
            hint: None,
            obj: None,
        }
    }

    /// A [`Level::Debug`] message.
    pub fn debug<M: Into<String>>(msg: M) -> Self {
        Self::new(Level::Debug, msg)
    }

    /// An [`Level::Info`] message.
    pub fn info<M: Into<String>>(msg: M) -> Self {
        Self::new(Level::Info, msg)
    }

    /// A [`Level::Warning`] message.
    pub fn warn<M: Into<String>>(msg: M) -> Self {
        Self::new(Level::Warning, msg)
    }

    /// An [`Level::Error`] message.
    pub fn error<M: Into<String>>(msg: M) -> Self {
        Self::new(Level::Error, msg)
    }

    /// A [`Level::Critical`] message.
    pub fn critical<M: Into<String>>(msg: M) -> Self {
        Self::new(Level::Critical, msg)
    }

    /// The message a check that failed on its own produces.
    pub fn unhandled_exception<H: Into<String>>(hint: H) -> Self {
        Self::error("Unhandled Exception").hint(hint)
    }

    /// Attaches a hint.
    pub fn hint<H: Into<String>>(self, hint: H) -> Self {
        CheckMessage {
            hint: Some(hint.into()),
            ..self
        }
    }

    /// Attaches the object the message is about.
    pub fn obj<O: Into<String>>(self, obj: O) -> Self {
        CheckMessage {
            obj: Some(obj.into()),
            ..self
        }
    }

    /// Is the message at least of the given level?
    pub fn is_serious(&self, level: Level) -> bool {
        self.level >= level
    }
}

impl Display for CheckMessage {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "{}: {}", self.obj.as_deref().unwrap_or("?"), self.msg)?;
        if let Some(hint) = &self.hint {
            write!(fmt, "\n\tHINT: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert!(Level::Critical > Level::Error);
        assert!(Level::Debug < Level::Info);
        assert_eq!(Level::Warning, "warn".parse().unwrap());
        assert_eq!(Level::Error, "ERROR".parse().unwrap());
        assert!("eek".parse::<Level>().is_err());
        assert_eq!("CRITICAL", Level::Critical.to_string());
    }

    #[test]
    fn serious() {
        let msg = CheckMessage::warn("Message");
        assert!(!msg.is_serious(Level::Error));
        assert!(msg.is_serious(Level::Warning));
        assert!(CheckMessage::critical("Message").is_serious(Level::Error));
    }

    #[test]
    fn display() {
        assert_eq!("?: Message", CheckMessage::info("Message").to_string());
        let msg = CheckMessage::error("Message")
            .hint("Fix it")
            .obj("settings.FOO");
        assert_eq!("settings.FOO: Message\n\tHINT: Fix it", msg.to_string());
    }
}
