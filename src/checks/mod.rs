//! Pre-flight diagnostics of the application configuration.
//!
//! Unlike errors raised when the configuration is used, checks audit it ahead of time and report
//! what they find as leveled [`CheckMessage`]s. They are registered in a [`CheckRegistry`],
//! labeled with tags, and rendered by a [`CheckReport`].
//!
//! ```rust
//! use appframe::checks::{Check, CheckMessage, CheckRegistry, Level};
//! use appframe::conf::Settings;
//!
//! let registry = CheckRegistry::new();
//! registry.register(
//!     Check::function("always_warns", |_| Ok(vec![CheckMessage::warn("Suspicious")])),
//!     &["demo"],
//! );
//! let messages = registry.run_checks(&Settings::new(), &["demo"]);
//! assert_eq!(Level::Warning, messages[0].level);
//! ```

pub mod messages;
pub mod registry;
pub mod report;

pub use self::messages::{CheckMessage, Level, LevelParseError};
pub use self::registry::{registry, Check, CheckFn, CheckOutcome, CheckProvider, CheckRegistry};
pub use self::report::CheckReport;

use crate::AnyError;

/// What a check produces.
pub type CheckResult = Result<Vec<CheckMessage>, AnyError>;

/// Tag of the security related checks.
pub const SECURITY: &str = "security";

mod builtin {
    use super::{Check, CheckMessage, CheckRegistry, CheckResult, SECURITY};
    use crate::conf::Settings;

    pub(super) fn debug_enabled(settings: &Settings) -> CheckResult {
        let debug = settings.get_as::<bool>("DEBUG").unwrap_or(false);
        Ok(if debug {
            vec![
                CheckMessage::warn("You should not have DEBUG set to True in deployment.")
                    .hint("Ensure DEBUG is set to False for deployment in settings.")
                    .obj("settings.DEBUG"),
            ]
        } else {
            Vec::new()
        })
    }

    pub(super) fn register(registry: &CheckRegistry) {
        registry.register(Check::function("debug_enabled", debug_enabled), &[SECURITY]);
    }
}
