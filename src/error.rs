//! Error handling utilities.
//!
//! The narrow, typed errors live next to the code raising them ([`ConfigError`] in the loaders,
//! [`FactoryError`] in the plugin factories...). This module holds the catch-all [`AnyError`] used
//! by user provided callbacks and helpers to log an error together with all its causes.
//!
//! [`ConfigError`]: crate::conf::loaders::ConfigError
//! [`FactoryError`]: crate::conf::helpers::plugins::FactoryError

use std::error::Error;

use err_context::prelude::*;
use log::{log, Level};

/// A wrapper type for any error.
///
/// This is just a type alias for boxed standard error. Handlers, plugin constructors and injection
/// factories return this, so any error type can be propagated with `?`.
pub type AnyError = Box<dyn Error + Send + Sync>;

/// How to format errors in logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ErrorLogFormat {
    /// Multi-cause error will span multiple log messages.
    MultiLine,

    /// The error is formatted on a single line.
    ///
    /// The causes are separated by semicolons.
    SingleLine,
}

/// Log one error on given log level.
///
/// It is printed to the log with all the causes.
pub fn log_error(level: Level, target: &str, e: &AnyError, format: ErrorLogFormat) {
    match format {
        ErrorLogFormat::MultiLine => {
            for cause in e.chain() {
                log!(target: target, level, "{}", cause);
            }
        }
        ErrorLogFormat::SingleLine => {
            log!(target: target, level, "{}", e.display("; "));
        }
    }
}

/// A convenience macro to log an error.
///
/// Logs the error on given log level as a single line (or multiple lines, with the `multi`
/// prefix). Optionally, a description can be prepended as another layer of context.
///
/// # Examples
///
/// ```rust
/// use appframe::log_error;
///
/// let err: appframe::AnyError = "Something is broken".into();
/// log_error!(Warn, err);
/// ```
#[macro_export]
macro_rules! log_error {
    ($level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err.context($descr).into());
    };
    ($level: ident, $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err);
    };
    (multi $level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err.context($descr).into());
    };
    (multi $level: ident, $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err);
    };
    (@$format: ident, $level: ident, $err: expr) => {
        $crate::error::log_error(
            $crate::macro_support::Level::$level,
            module_path!(),
            &$err,
            $crate::error::ErrorLogFormat::$format,
        );
    };
}

/// A wrapper around a fallible function, logging any returned errors.
///
/// The errors will be logged in the provided target. If the error has multiple levels (causes),
/// they are printed in multi-line fashion, as multiple separate log messages.
pub fn log_errors<R, F>(target: &str, f: F) -> Result<R, AnyError>
where
    F: FnOnce() -> Result<R, AnyError>,
{
    let result = f();
    if let Err(ref e) = result {
        log_error(Level::Error, target, e, ErrorLogFormat::MultiLine);
    }
    result
}

#[cfg(test)]
mod tests {
    use std::fmt::{Display, Formatter, Result as FmtResult};

    use super::*;

    #[derive(Copy, Clone, Debug)]
    struct Dummy;

    impl Display for Dummy {
        fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
            write!(fmt, "Dummy error")
        }
    }

    impl Error for Dummy {}

    #[test]
    fn log_error_macro() {
        let err: AnyError = Box::new(Dummy);
        log_error!(Debug, err);
        log_error!(Debug, "Another level" => Dummy);
        let err: AnyError = Box::new(Dummy.context("Another level"));
        log_error!(multi Info, err);
    }

    #[test]
    fn log_errors_passes_result_through() {
        let ok = log_errors("test", || Ok(42)).unwrap();
        assert_eq!(42, ok);
        let err = log_errors::<(), _>("test", || Err(Box::new(Dummy) as AnyError)).unwrap_err();
        assert_eq!("Dummy error", err.to_string());
    }
}
