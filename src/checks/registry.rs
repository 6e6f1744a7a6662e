use std::any::Any;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use err_context::prelude::*;
use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::messages::CheckMessage;
use super::{builtin, CheckResult};
use crate::conf::Settings;

/// Something with checks attached.
///
/// Usually a component reading its own part of the settings, like the
/// [`NamedPluginFactory`][crate::conf::helpers::plugins::NamedPluginFactory].
pub trait CheckProvider: Send + Sync {
    /// The name shown in the check reports.
    fn check_name(&self) -> String;

    /// Runs the checks.
    fn checks(&self, settings: &Settings) -> CheckResult;
}

/// A check function.
pub type CheckFn = Arc<dyn Fn(&Settings) -> CheckResult + Send + Sync>;

/// A registered check.
#[derive(Clone)]
pub enum Check {
    /// A plain function.
    Function {
        /// The name shown in the reports.
        name: String,
        /// The check itself.
        check: CheckFn,
    },
    /// An object with checks.
    Provider(Arc<dyn CheckProvider>),
}

impl Check {
    /// Creates a [`Check::Function`].
    pub fn function<N, F>(name: N, check: F) -> Self
    where
        N: Into<String>,
        F: Fn(&Settings) -> CheckResult + Send + Sync + 'static,
    {
        Check::Function {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Creates a [`Check::Provider`].
    pub fn provider<P: CheckProvider + 'static>(provider: Arc<P>) -> Self {
        Check::Provider(provider)
    }

    /// The name of the check.
    pub fn name(&self) -> String {
        match self {
            Check::Function { name, .. } => name.clone(),
            Check::Provider(provider) => provider.check_name(),
        }
    }

    /// Runs the check.
    ///
    /// A check that fails (returns an error or panics) produces an "Unhandled Exception" error
    /// message instead.
    pub fn run(&self, settings: &Settings) -> Vec<CheckMessage> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match self {
            Check::Function { check, .. } => check(settings),
            Check::Provider(provider) => provider.checks(settings),
        }));
        match result {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                warn!("Check {} failed", self.name());
                crate::log_error!(Warn, e);
                vec![CheckMessage::unhandled_exception(e.display("; ").to_string())]
            }
            Err(payload) => {
                let reason = panic_reason(&*payload);
                warn!("Check {} panicked: {}", self.name(), reason);
                vec![CheckMessage::unhandled_exception(reason)]
            }
        }
    }
}

impl Debug for Check {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Check({})", self.name())
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "Check panicked".to_owned()
    }
}

/// Messages of one check.
#[derive(Clone, Debug)]
pub struct CheckOutcome {
    /// The check that was run.
    pub check: Check,
    /// What it found.
    pub messages: Vec<CheckMessage>,
}

struct Registered {
    check: Check,
    tags: HashSet<String>,
}

/// The registry of checks.
#[derive(Default)]
pub struct CheckRegistry {
    checks: RwLock<Vec<Registered>>,
}

impl CheckRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a check, labeled with tags.
    ///
    /// Registering a check of the same name again only replaces its tags.
    pub fn register(&self, check: Check, tags: &[&str]) {
        let tags = tags.iter().map(|t| (*t).to_owned()).collect();
        let name = check.name();
        let mut checks = self.checks.write();
        if let Some(existing) = checks.iter_mut().find(|r| r.check.name() == name) {
            debug!("Check {} already registered, updating tags", name);
            existing.tags = tags;
        } else {
            debug!("Registering check {}", name);
            checks.push(Registered { check, tags });
        }
    }

    /// Checks having any of the tags (or all of them if no tags are given).
    pub fn checks_by_tags(&self, tags: &[&str]) -> Vec<Check> {
        self.checks
            .read()
            .iter()
            .filter(|r| tags.is_empty() || tags.iter().any(|t| r.tags.contains(*t)))
            .map(|r| r.check.clone())
            .collect()
    }

    /// Runs the checks one by one, lazily.
    ///
    /// The `pre_callback` is called before each check is run.
    pub fn run_checks_iter<'a, F>(
        &self,
        settings: &'a Settings,
        tags: &[&str],
        mut pre_callback: F,
    ) -> impl Iterator<Item = CheckOutcome> + 'a
    where
        F: FnMut(&Check) + 'a,
    {
        self.checks_by_tags(tags).into_iter().map(move |check| {
            pre_callback(&check);
            let messages = check.run(settings);
            CheckOutcome { check, messages }
        })
    }

    /// Runs all the checks having any of the tags and collects the messages.
    pub fn run_checks(&self, settings: &Settings, tags: &[&str]) -> Vec<CheckMessage> {
        self.run_checks_iter(settings, tags, |_| ())
            .flat_map(|outcome| outcome.messages)
            .collect()
    }
}

static REGISTRY: Lazy<Arc<CheckRegistry>> = Lazy::new(|| {
    let registry = CheckRegistry::new();
    builtin::register(&registry);
    Arc::new(registry)
});

/// The process-wide check registry.
///
/// It comes with the built-in checks already registered.
pub fn registry() -> &'static Arc<CheckRegistry> {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::super::messages::Level;
    use super::*;
    use crate::AnyError;

    struct Provider;

    impl CheckProvider for Provider {
        fn check_name(&self) -> String {
            "FACTORY.check_configuration".to_owned()
        }

        fn checks(&self, _: &Settings) -> CheckResult {
            Ok(vec![CheckMessage::info("From provider")])
        }
    }

    fn registry() -> CheckRegistry {
        let registry = CheckRegistry::new();
        registry.register(
            Check::function("warning", |_| Ok(vec![CheckMessage::warn("Warning")])),
            &["security"],
        );
        registry.register(Check::function("empty", |_| Ok(Vec::new())), &[]);
        registry.register(Check::provider(Arc::new(Provider)), &["factory"]);
        registry
    }

    #[test]
    fn by_tags() {
        let registry = registry();
        assert_eq!(3, registry.checks_by_tags(&[]).len());
        let names = registry
            .checks_by_tags(&["security", "factory"])
            .iter()
            .map(Check::name)
            .collect::<Vec<_>>();
        assert_eq!(vec!["warning", "FACTORY.check_configuration"], names);
        assert!(registry.checks_by_tags(&["eek"]).is_empty());
    }

    #[test]
    fn reregister_replaces_tags() {
        let registry = registry();
        registry.register(Check::function("empty", |_| Ok(Vec::new())), &["security"]);
        assert_eq!(3, registry.checks_by_tags(&[]).len());
        assert_eq!(2, registry.checks_by_tags(&["security"]).len());
    }

    #[test]
    fn run_all() {
        let settings = Settings::new();
        let messages = registry().run_checks(&settings, &[]);
        assert_eq!(
            vec![CheckMessage::warn("Warning"), CheckMessage::info("From provider")],
            messages
        );
    }

    #[test]
    fn pre_callback_and_outcomes() {
        let settings = Settings::new();
        let registry = registry();
        let mut seen = Vec::new();
        let outcomes = registry
            .run_checks_iter(&settings, &[], |check| seen.push(check.name()))
            .collect::<Vec<_>>();
        assert_eq!(3, outcomes.len());
        assert!(outcomes[1].messages.is_empty());
        assert_eq!(vec!["warning", "empty", "FACTORY.check_configuration"], seen);
    }

    #[test]
    fn failing_checks() {
        let settings = Settings::new();
        let registry = CheckRegistry::new();
        registry.register(
            Check::function("error", |_| Err(AnyError::from("Broken check"))),
            &[],
        );
        registry.register(Check::function("panic", |_| panic!("Panicking check")), &[]);
        let messages = registry.run_checks(&settings, &[]);
        assert_eq!(2, messages.len());
        for message in &messages {
            assert_eq!(Level::Error, message.level);
            assert_eq!("Unhandled Exception", message.msg);
        }
        assert_eq!(Some("Broken check"), messages[0].hint.as_deref());
        assert_eq!(Some("Panicking check"), messages[1].hint.as_deref());
    }
}
