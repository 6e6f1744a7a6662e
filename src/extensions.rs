//! Extensions of the application.
//!
//! An extension is a bundle of default settings, checks and commands, usually provided by a
//! library. They are listed in the [`ExtensionRegistry`] explicitly; the application then folds
//! their default settings into its settings sources, their checks into the check registry and
//! their commands into the command line.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{Result as IoResult, Write};
use std::sync::Arc;

use console::Style;
use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::arguments::CommandGroup;
use crate::checks::CheckRegistry;
use crate::utils::AllowBlockFilter;

type ChecksHook = Arc<dyn Fn(&CheckRegistry) + Send + Sync>;
type CommandsHook = Arc<dyn Fn(&mut CommandGroup) + Send + Sync>;
type ReadyHook = Arc<dyn Fn() + Send + Sync>;

/// Description of one extension.
#[derive(Clone)]
pub struct Extension {
    name: String,
    version: Option<String>,
    default_settings: Option<String>,
    checks: Option<ChecksHook>,
    commands: Option<CommandsHook>,
    ready: Option<ReadyHook>,
}

impl Extension {
    /// An extension with nothing in it yet.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Extension {
            name: name.into(),
            version: None,
            default_settings: None,
            checks: None,
            commands: None,
            ready: None,
        }
    }

    /// Sets the version.
    pub fn version<V: Into<String>>(self, version: V) -> Self {
        Extension {
            version: Some(version.into()),
            ..self
        }
    }

    /// Sets the source of the default settings (a settings module path or a source URI).
    pub fn default_settings<S: Into<String>>(self, source: S) -> Self {
        Extension {
            default_settings: Some(source.into()),
            ..self
        }
    }

    /// Sets the hook registering the checks.
    pub fn checks<F: Fn(&CheckRegistry) + Send + Sync + 'static>(self, hook: F) -> Self {
        Extension {
            checks: Some(Arc::new(hook)),
            ..self
        }
    }

    /// Sets the hook registering the commands.
    pub fn commands<F: Fn(&mut CommandGroup) + Send + Sync + 'static>(self, hook: F) -> Self {
        Extension {
            commands: Some(Arc::new(hook)),
            ..self
        }
    }

    /// Sets the hook called once the application is configured.
    pub fn on_ready<F: Fn() + Send + Sync + 'static>(self, hook: F) -> Self {
        Extension {
            ready: Some(Arc::new(hook)),
            ..self
        }
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version, if known.
    pub fn get_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The default settings source, if any.
    pub fn get_default_settings(&self) -> Option<&str> {
        self.default_settings.as_deref()
    }

    /// Does it come with checks?
    pub fn has_checks(&self) -> bool {
        self.checks.is_some()
    }
}

impl Debug for Extension {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Extension")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("default_settings", &self.default_settings)
            .field("has_checks", &self.has_checks())
            .finish()
    }
}

/// The list of extensions used by the application.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Extension>>,
}

impl ExtensionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an extension.
    pub fn register(&self, extension: Extension) {
        debug!("Registering extension {}", extension.name);
        self.extensions.write().push(extension);
    }

    /// Adds the extensions allowed by the filter.
    pub fn load_from<I>(&self, extensions: I, filter: &AllowBlockFilter)
    where
        I: IntoIterator<Item = Extension>,
    {
        for extension in extensions {
            if filter.allows(&extension.name) {
                self.register(extension);
            } else {
                debug!("Extension {} filtered out", extension.name);
            }
        }
    }

    /// The registered extensions.
    pub fn extensions(&self) -> Vec<Extension> {
        self.extensions.read().clone()
    }

    /// Number of the registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    /// The default settings sources, in the order of registration.
    pub fn default_settings(&self) -> Vec<String> {
        self.extensions
            .read()
            .iter()
            .filter_map(|e| e.default_settings.clone())
            .collect()
    }

    /// Lets the extensions register their checks.
    pub fn register_checks(&self, registry: &CheckRegistry) {
        for extension in self.extensions() {
            if let Some(hook) = &extension.checks {
                hook(registry);
            }
        }
    }

    /// Lets the extensions register their commands.
    pub fn register_commands(&self, root: &mut CommandGroup) {
        for extension in self.extensions() {
            if let Some(hook) = &extension.commands {
                hook(root);
            }
        }
    }

    /// Notifies the extensions the application is configured.
    pub fn ready(&self) {
        for extension in self.extensions() {
            if let Some(hook) = &extension.ready {
                info!("Extension {} ready", extension.name);
                hook();
            }
        }
    }

    /// Writes the list of extensions.
    ///
    /// The verbose variant is a table with the version, settings and checks of each extension.
    pub fn report<W: Write>(&self, mut out: W, verbose: bool, no_color: bool) -> IoResult<()> {
        let extensions = self.extensions();
        let paint = |style: Style, text: &str| {
            if no_color {
                text.to_owned()
            } else {
                style.force_styling(true).apply_to(text).to_string()
            }
        };
        if !verbose {
            for extension in &extensions {
                writeln!(out, "{}", extension.name)?;
            }
            return Ok(());
        }
        let rows = extensions
            .iter()
            .map(|e| {
                [
                    e.name.clone(),
                    e.version.clone().unwrap_or_else(|| "Unknown".to_owned()),
                    e.default_settings.clone().unwrap_or_default(),
                    if e.has_checks() { "Yes" } else { "No" }.to_owned(),
                ]
            })
            .collect::<Vec<_>>();
        let header = ["Name", "Version", "Settings", "Has Checks"];
        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        let styles = [
            Style::new().blue().bright(),
            Style::new().cyan(),
            Style::new().yellow(),
            Style::new(),
        ];
        let line = |cells: &[&str]| {
            cells
                .iter()
                .zip(&widths)
                .zip(&styles)
                .map(|((cell, width), style)| paint(style.clone(), &format!("{:w$}", cell, w = width)))
                .collect::<Vec<_>>()
                .join(" | ")
        };
        writeln!(out, "{}", line(&header).trim_end())?;
        writeln!(
            out,
            "{}",
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-")
        )?;
        for row in &rows {
            let cells = row.iter().map(String::as_str).collect::<Vec<_>>();
            writeln!(out, "{}", line(&cells).trim_end())?;
        }
        Ok(())
    }
}

static REGISTRY: Lazy<Arc<ExtensionRegistry>> = Lazy::new(|| Arc::new(ExtensionRegistry::new()));

/// The process-wide extension registry.
pub fn registry() -> &'static Arc<ExtensionRegistry> {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::arguments::CommandProxy;
    use crate::checks::{Check, CheckMessage};

    fn registry() -> ExtensionRegistry {
        let registry = ExtensionRegistry::new();
        registry.register(
            Extension::new("metrics")
                .version("1.2.0")
                .default_settings("metrics.default_settings")
                .checks(|checks| {
                    checks.register(
                        Check::function("metrics_enabled", |_| Ok(vec![CheckMessage::info("On")])),
                        &["metrics"],
                    )
                })
                .commands(|root| {
                    let proxy = CommandProxy::new(&[], |_| Ok(None)).expect("No parameters");
                    root.command("metrics", proxy);
                }),
        );
        registry.register(Extension::new("plain"));
        registry
    }

    #[test]
    fn default_settings() {
        assert_eq!(vec!["metrics.default_settings"], registry().default_settings());
    }

    #[test]
    fn hooks() {
        let registry = registry();
        let checks = CheckRegistry::new();
        registry.register_checks(&checks);
        assert_eq!(1, checks.checks_by_tags(&["metrics"]).len());
        let mut root = CommandGroup::new();
        registry.register_commands(&mut root);
        assert_eq!(
            vec!["metrics"],
            root.entries().map(|e| e.name()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn ready() {
        static READY: AtomicUsize = AtomicUsize::new(0);
        let registry = registry();
        registry.register(Extension::new("ready").on_ready(|| {
            READY.fetch_add(1, Ordering::SeqCst);
        }));
        registry.ready();
        assert_eq!(1, READY.load(Ordering::SeqCst));
    }

    #[test]
    fn filtered() {
        let registry = ExtensionRegistry::new();
        let filter = AllowBlockFilter::default().block(&["legacy-*"]).unwrap();
        registry.load_from(
            vec![Extension::new("legacy-auth"), Extension::new("auth")],
            &filter,
        );
        assert_eq!(1, registry.len());
        assert_eq!("auth", registry.extensions()[0].name());
    }

    #[test]
    fn report() {
        let registry = registry();
        let mut out = Vec::new();
        registry.report(&mut out, false, true).unwrap();
        assert_eq!("metrics\nplain\n", String::from_utf8(out).unwrap());

        let mut out = Vec::new();
        registry.report(&mut out, true, true).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(4, lines.len());
        assert_eq!("Name    | Version | Settings                 | Has Checks", lines[0]);
        assert_eq!("metrics | 1.2.0   | metrics.default_settings | Yes", lines[2]);
        assert_eq!("plain   | Unknown |                          | No", lines[3]);
    }
}
