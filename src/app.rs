//! The command line application.
//!
//! [`CliApplication`] ties the rest of the crate together. On each [dispatch][CliApplication::dispatch]
//! it:
//!
//! * Builds the command line from the registered commands (its own, the built-in ones and the
//!   ones of the extensions) and the global options.
//! * Configures the settings from the application defaults, the extension defaults and the
//!   runtime source (`--settings` or the environment variable).
//! * Sets up logging.
//! * Optionally runs the checks (`--checks`).
//! * Calls the selected handler and turns its result into an exit code.
//!
//! ```rust
//! use appframe::app::CliApplication;
//! use appframe::arguments::{CommandProxy, Parameter, ArgType};
//!
//! let mut app = CliApplication::new("greeter").version("1.0");
//! let greet = CommandProxy::new(&[Parameter::positional("name", ArgType::Str)], |args| {
//!     println!("Hello {}", args.get_as::<String>("name")?);
//!     Ok(None)
//! })
//! .unwrap();
//! app.command("greet", greet).help("Greets someone");
//!
//! assert_eq!(0, app.dispatch(vec!["greeter", "greet", "world"]));
//! ```

use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, error, info, LevelFilter};
use serde_json::json;
use structopt::clap::{App, AppSettings};
use structopt::{StructOpt, StructOptInternal};

use crate::arguments::{
    ArgType, Command, CommandEntry, CommandError, CommandGroup, CommandProxy, HandlerResult,
    Parameter, ParsedOptions, SignatureError, TypeTag,
};
use crate::checks::{self, CheckRegistry, CheckReport, Level};
use crate::conf::report::{ReportFormat, SettingsReport};
use crate::conf::{Settings, DEFAULT_ENV_KEY};
use crate::error::log_errors;
use crate::extensions::{self, ExtensionRegistry};
use crate::AnyError;

/// The environment variable holding the default log level.
pub const DEFAULT_LOGLEVEL_KEY: &str = "APPFRAME_LOGLEVEL";

/// Exit code of a run stopped by serious check messages.
pub const CHECKS_FAILED: i32 = 4;

const NO_COLOR: &str = "nocolor";
const CHECKS_LEVEL: &str = "checks_level";

#[derive(Debug, StructOpt)]
struct GlobalOpts {
    /// Settings to load, overriding the environment variable.
    #[structopt(long = "settings", value_name = "SOURCE")]
    settings: Option<String>,

    /// Log level (off, error, warn, info, debug, trace).
    #[structopt(long = "log-level", value_name = "LEVEL")]
    log_level: Option<LevelFilter>,

    /// Run the checks before the command.
    #[structopt(long = "checks")]
    checks: bool,

    /// The lowest level of check messages to show.
    #[structopt(long = "checks-level", value_name = "LEVEL", default_value = "info")]
    checks_level: Level,

    /// Disable colors in the output.
    #[structopt(long = "nocolor")]
    no_color: bool,
}

/// The command line application.
pub struct CliApplication {
    name: String,
    version: Option<String>,
    description: Option<String>,
    application_settings: Option<String>,
    env_settings_key: String,
    env_loglevel_key: String,
    settings: Arc<Settings>,
    extensions: Arc<ExtensionRegistry>,
    checks: Arc<CheckRegistry>,
    commands: CommandGroup,
    prepared: bool,
}

impl CliApplication {
    /// An application using the process-wide settings, extensions and checks.
    pub fn new<N: Into<String>>(name: N) -> Self {
        CliApplication {
            name: name.into(),
            version: None,
            description: None,
            application_settings: None,
            env_settings_key: DEFAULT_ENV_KEY.to_owned(),
            env_loglevel_key: DEFAULT_LOGLEVEL_KEY.to_owned(),
            settings: Arc::clone(Settings::global()),
            extensions: Arc::clone(extensions::registry()),
            checks: Arc::clone(checks::registry()),
            commands: CommandGroup::new(),
            prepared: false,
        }
    }

    /// Sets the version shown by `--version`.
    pub fn version<V: Into<String>>(self, version: V) -> Self {
        CliApplication {
            version: Some(version.into()),
            ..self
        }
    }

    /// Sets the description shown in the help.
    pub fn description<D: Into<String>>(self, description: D) -> Self {
        CliApplication {
            description: Some(description.into()),
            ..self
        }
    }

    /// Sets the settings module with the defaults of the application.
    pub fn application_settings<S: Into<String>>(self, module: S) -> Self {
        CliApplication {
            application_settings: Some(module.into()),
            ..self
        }
    }

    /// Changes the environment variable naming the runtime settings.
    pub fn env_settings_key<K: Into<String>>(self, key: K) -> Self {
        CliApplication {
            env_settings_key: key.into(),
            ..self
        }
    }

    /// Changes the environment variable holding the default log level.
    pub fn env_loglevel_key<K: Into<String>>(self, key: K) -> Self {
        CliApplication {
            env_loglevel_key: key.into(),
            ..self
        }
    }

    /// Uses a specific settings container.
    pub fn settings(self, settings: Arc<Settings>) -> Self {
        CliApplication { settings, ..self }
    }

    /// Uses a specific extension registry.
    pub fn extensions(self, extensions: Arc<ExtensionRegistry>) -> Self {
        CliApplication { extensions, ..self }
    }

    /// Uses a specific check registry.
    pub fn checks(self, checks: Arc<CheckRegistry>) -> Self {
        CliApplication { checks, ..self }
    }

    /// Adds a command.
    pub fn command<C: Into<Command>>(&mut self, name: &str, command: C) -> &mut CommandEntry {
        self.commands.command(name, command)
    }

    /// Adds a group of sub-commands.
    pub fn group(&mut self, name: &str, group: CommandGroup) -> &mut CommandEntry {
        self.commands.group(name, group)
    }

    /// Sets the handler called when no command is given.
    pub fn default_handler<C: Into<Command>>(&mut self, command: C) {
        self.commands.default_handler(command);
    }

    /// The settings in use.
    pub fn get_settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    fn builtin(&mut self, name: &str, command: CommandProxy, help: &str) {
        if self.commands.entries().all(|entry| entry.name() != name) {
            self.commands.command(name, command).help(help);
        }
    }

    fn register_builtins(&mut self) -> Result<(), SignatureError> {
        let checks = Arc::clone(&self.checks);
        let settings = Arc::clone(&self.settings);
        let run_checks = CommandProxy::new(
            &[
                Parameter::keyword("verbose", TypeTag::Bool),
                Parameter::keyword("table", TypeTag::Bool),
                Parameter::keyword("tag", TypeTag::sequence(ArgType::Str)),
                Parameter::raw_options("opts"),
            ],
            move |args| {
                let options = args.options().cloned().unwrap_or_default();
                let level = options.get_as::<String>(CHECKS_LEVEL)?.parse::<Level>()?;
                let tags = args.get_as::<Option<Vec<String>>>("tag")?.unwrap_or_default();
                let tags = tags.iter().map(String::as_str).collect::<Vec<_>>();
                let serious = CheckReport::new(&checks)
                    .verbose(args.get_as("verbose")?)
                    .tabular(args.get_as("table")?)
                    .no_color(options.get_as(NO_COLOR)?)
                    .header("Checks")
                    .run(&settings, io::stdout().lock(), level, &tags)?;
                Ok(if serious { Some(CHECKS_FAILED) } else { None })
            },
        )?;
        self.builtin("checks", run_checks, "Run a check report");

        let settings = Arc::clone(&self.settings);
        let report_settings = CommandProxy::new(
            &[Parameter::keyword("format", ArgType::Str).default(ReportFormat::default().to_string())],
            move |args| {
                let format = ReportFormat::from_str(&args.get_as::<String>("format")?)?;
                SettingsReport::new(&settings)
                    .format(format)
                    .run(io::stdout().lock())?;
                Ok(None)
            },
        )?;
        self.builtin("settings", report_settings, "Report the current settings");

        let extensions = Arc::clone(&self.extensions);
        let report_extensions = CommandProxy::new(
            &[
                Parameter::keyword("verbose", TypeTag::Bool),
                Parameter::raw_options("opts"),
            ],
            move |args| {
                let no_color = args
                    .options()
                    .map(|options| options.get_as::<bool>(NO_COLOR))
                    .transpose()?
                    .unwrap_or(false);
                extensions.report(io::stdout().lock(), args.get_as("verbose")?, no_color)?;
                Ok(None)
            },
        )?;
        self.builtin("extensions", report_extensions, "Report the loaded extensions");
        Ok(())
    }

    fn app(&self) -> App<'_, '_> {
        let mut app = App::new(self.name.as_str()).setting(AppSettings::VersionlessSubcommands);
        if let Some(version) = &self.version {
            app = app.version(version.as_str());
        }
        if let Some(description) = &self.description {
            app = app.about(description.as_str());
        }
        GlobalOpts::augment_clap(self.commands.augment(app))
    }

    fn configure(&self, opts: &GlobalOpts) -> Result<(), AnyError> {
        let defaults = self
            .application_settings
            .iter()
            .cloned()
            .chain(self.extensions.default_settings())
            .collect::<Vec<_>>();
        self.settings
            .configure(defaults)
            .env_key(self.env_settings_key.as_str())
            .runtime_settings(opts.settings.clone())
            .load()?;
        Ok(())
    }

    fn log_level(&self, opts: &GlobalOpts, options: &ParsedOptions) -> LevelFilter {
        opts.log_level
            .or_else(|| {
                env::var(&self.env_loglevel_key)
                    .ok()
                    .and_then(|level| level.parse().ok())
            })
            .or_else(|| self.commands.log_level(options))
            .unwrap_or_else(|| {
                if self.settings.get_as::<bool>("DEBUG").unwrap_or(false) {
                    LevelFilter::Debug
                } else {
                    LevelFilter::Info
                }
            })
    }

    fn init_logging(level: LevelFilter) {
        let result = env_logger::Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} | {} | {} | {}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init();
        if result.is_err() {
            debug!("Logger already installed, keeping it");
        }
    }

    fn run(&self, opts: &GlobalOpts, options: &ParsedOptions) -> HandlerResult {
        self.extensions.ready();
        if opts.checks {
            let serious = CheckReport::new(&self.checks)
                .no_color(opts.no_color)
                .run(&self.settings, io::stdout().lock(), opts.checks_level, &[])?;
            if serious {
                error!("Check reported serious problems, aborting");
                return Ok(Some(CHECKS_FAILED));
            }
        }
        self.commands.dispatch(options)
    }

    /// Runs the application with the command line arguments of the process.
    ///
    /// Returns the exit code.
    pub fn dispatch_env(&mut self) -> i32 {
        self.dispatch(env::args_os())
    }

    /// Runs the application with the given command line (including the program name).
    ///
    /// Returns the exit code. Invalid command lines exit the process with the help or the error,
    /// as usual for command line tools.
    pub fn dispatch<I, T>(&mut self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        if !self.prepared {
            if let Err(e) = self.register_builtins() {
                return report_error(e.into());
            }
            self.extensions.register_checks(&self.checks);
            self.extensions.register_commands(&mut self.commands);
            self.prepared = true;
        }

        let matches = match self.app().get_matches_from_safe(args) {
            Ok(matches) => matches,
            Err(e) => e.exit(),
        };
        let opts = GlobalOpts::from_clap(&matches);
        let mut options = ParsedOptions::default();
        if let Err(e) = self.commands.parse_matches(&matches, &mut options) {
            return report_error(e.into());
        }
        options.insert(NO_COLOR.to_owned(), json!(opts.no_color));
        options.insert(CHECKS_LEVEL.to_owned(), json!(opts.checks_level.name()));

        // The logger goes up even if the settings are broken, so the failure gets reported.
        let configured = self.configure(&opts);
        Self::init_logging(self.log_level(&opts, &options));
        let result = log_errors(module_path!(), || {
            configured?;
            info!("Starting {} with {}", self.name, self.settings);
            self.run(&opts, &options)
        });
        match result {
            Ok(code) => code.unwrap_or(0),
            Err(e) => exit_code(&e),
        }
    }
}

fn exit_code(e: &AnyError) -> i32 {
    match e.downcast_ref::<CommandError>() {
        Some(CommandError::Parse(_)) => 2,
        _ => 1,
    }
}

fn report_error(e: AnyError) -> i32 {
    match e.downcast_ref::<CommandError>() {
        Some(CommandError::Parse(parse)) => eprintln!("{}", parse.message),
        _ => {
            crate::log_error!(multi Error, e);
        }
    }
    exit_code(&e)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use structopt::clap::{Error as ClapError, ErrorKind};

    use super::*;
    use crate::arguments::AsyncCommandProxy;
    use crate::checks::{Check, CheckMessage};
    use crate::conf::loaders::settings_modules;
    use crate::extensions::Extension;

    fn app() -> CliApplication {
        CliApplication::new("test")
            .settings(Arc::new(Settings::new()))
            .extensions(Arc::new(ExtensionRegistry::new()))
            .checks(Arc::new(CheckRegistry::new()))
            .env_settings_key("APPFRAME_TEST_UNSET_SETTINGS")
    }

    #[test]
    fn exit_codes() {
        let mut app = app();
        let ok = CommandProxy::new(&[], |_| Ok(None)).unwrap();
        let code = CommandProxy::new(&[], |_| Ok(Some(3))).unwrap();
        let fail = CommandProxy::new(&[], |_| Err("Broken".into())).unwrap();
        app.command("ok", ok);
        app.command("code", code);
        app.command("fail", fail);
        assert_eq!(0, app.dispatch(vec!["test", "ok"]));
        assert_eq!(3, app.dispatch(vec!["test", "code"]));
        assert_eq!(1, app.dispatch(vec!["test", "fail"]));
        assert_eq!(1, app.dispatch(vec!["test"]));
    }

    #[test]
    fn error_exit_codes() {
        let parse = ClapError::with_description("Bad value", ErrorKind::InvalidValue);
        assert_eq!(2, report_error(Box::new(CommandError::Parse(parse))));
        assert_eq!(1, report_error("Broken".into()));
        let nested = log_errors::<(), _>("test", || Err("Broken".into())).unwrap_err();
        assert_eq!(1, exit_code(&nested));
    }

    #[test]
    fn async_handler() {
        let mut app = app();
        let sleep = AsyncCommandProxy::new(&[Parameter::positional("code", ArgType::Int)], |args| async move {
            tokio::task::yield_now().await;
            Ok(Some(args.get_as::<i32>("code")?))
        })
        .unwrap();
        app.command("sleep", sleep);
        assert_eq!(5, app.dispatch(vec!["test", "sleep", "5"]));
    }

    #[test]
    fn settings_configured() {
        settings_modules().register("app_test.default_settings", || json!({ "GREETING": "Hi" }));
        settings_modules().register("app_test.extension_settings", || {
            json!({ "GREETING": "Hello", "EXT": true })
        });
        let extensions = Arc::new(ExtensionRegistry::new());
        extensions.register(Extension::new("ext").default_settings("app_test.extension_settings"));
        let mut app = app()
            .application_settings("app_test.default_settings")
            .extensions(extensions);
        let greeting = Arc::new(parking_lot::Mutex::new(String::new()));
        let seen = Arc::clone(&greeting);
        let settings = Arc::clone(app.get_settings());
        let show = CommandProxy::new(&[], move |_| {
            *seen.lock() = settings.get_as("GREETING")?;
            Ok(None)
        })
        .unwrap();
        app.command("show", show);
        assert_eq!(0, app.dispatch(vec!["test", "show"]));
        // Extensions are loaded after the application defaults.
        assert_eq!("Hello", *greeting.lock());
        assert_eq!(json!(true), app.get_settings().get("EXT").unwrap());
    }

    #[test]
    fn bad_runtime_settings() {
        let mut app = app();
        let ok = CommandProxy::new(&[], |_| Ok(None)).unwrap();
        app.command("ok", ok);
        assert_eq!(
            1,
            app.dispatch(vec!["test", "--settings", "file:///does/not/exist.json", "ok"])
        );
    }

    #[test]
    fn checks_abort() {
        static CALLED: AtomicUsize = AtomicUsize::new(0);
        let mut app = app();
        app.checks
            .register(Check::function("broken", |_| Ok(vec![CheckMessage::error("Broken")])), &[]);
        let ok = CommandProxy::new(&[], |_| {
            CALLED.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .unwrap();
        app.command("ok", ok);
        assert_eq!(
            CHECKS_FAILED,
            app.dispatch(vec!["test", "--checks", "--nocolor", "ok"])
        );
        assert_eq!(0, CALLED.load(Ordering::SeqCst));
        assert_eq!(CHECKS_FAILED, app.dispatch(vec!["test", "--nocolor", "checks"]));
        assert_eq!(0, app.dispatch(vec!["test", "ok"]));
        assert_eq!(1, CALLED.load(Ordering::SeqCst));
    }

    #[test]
    fn builtin_reports() {
        let mut app = app();
        assert_eq!(0, app.dispatch(vec!["test", "settings"]));
        assert_eq!(0, app.dispatch(vec!["test", "settings", "--format", "json"]));
        assert_eq!(1, app.dispatch(vec!["test", "settings", "--format", "xml"]));
        assert_eq!(0, app.dispatch(vec!["test", "--nocolor", "extensions", "--verbose"]));
    }

    #[test]
    fn extension_commands() {
        let extensions = Arc::new(ExtensionRegistry::new());
        extensions.register(Extension::new("ext").commands(|root| {
            let proxy = CommandProxy::new(&[], |_| Ok(Some(7))).unwrap();
            root.command("ext-command", proxy);
        }));
        let mut app = app().extensions(extensions);
        assert_eq!(7, app.dispatch(vec!["test", "ext-command"]));
    }
}
