//! Commands, their groups and the dispatch to handlers.
//!
//! ```rust
//! use appframe::arguments::{ArgType, CommandGroup, CommandProxy, Parameter};
//!
//! let mut root = CommandGroup::new();
//! let greet = CommandProxy::new(&[Parameter::positional("name", ArgType::Str)], |args| {
//!     println!("Hello {}", args.get_as::<String>("name")?);
//!     Ok(None)
//! })
//! .unwrap();
//! root.command("greet", greet).alias("hi").help("Greets someone");
//!
//! let options = root.parse_from("app", vec!["app", "hi", "world"]).unwrap();
//! assert_eq!(&["greet".to_owned()], options.command());
//! assert_eq!(None, root.dispatch(&options).unwrap());
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::future::Future;
use std::io::Error as IoError;
use std::iter::FromIterator;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, LevelFilter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use structopt::clap::{App, ArgMatches, Error as ClapError, SubCommand};
use thiserror::Error;

use super::{Parameter, Signature, SignatureError};
use crate::AnyError;

/// Errors around parsing the command line and passing the values to handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The handler signature can't be expressed on the command line.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// The command line is invalid (or help/version was requested).
    #[error(transparent)]
    Parse(#[from] ClapError),
    /// A value failed conversion.
    #[error("Invalid value for `{argument}`: {reason}")]
    InvalidValue {
        /// The argument.
        argument: String,
        /// What's wrong with the value.
        reason: String,
    },
    /// No such argument.
    #[error("Argument `{0}` not defined")]
    NotDefined(String),
    /// The value doesn't fit the requested type.
    #[error("Argument `{name}` has an unexpected value")]
    Deserialize {
        /// The argument.
        name: String,
        /// The reason.
        #[source]
        source: serde_json::Error,
    },
    /// No command of this name.
    #[error("Unknown command `{0}`")]
    UnknownCommand(String),
    /// The runtime for an async handler couldn't be created.
    #[error("Failed to start the async runtime")]
    Runtime(#[source] IoError),
}

fn deserialize<T: DeserializeOwned>(name: &str, value: Option<&Value>) -> Result<T, CommandError> {
    let value = value.ok_or_else(|| CommandError::NotDefined(name.to_owned()))?;
    T::deserialize(value).map_err(|source| CommandError::Deserialize {
        name: name.to_owned(),
        source,
    })
}

/// The parsed command line.
///
/// Holds the value of every argument under its destination name together with the path of the
/// selected (sub)commands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedOptions {
    command: Vec<String>,
    values: BTreeMap<String, Value>,
    usage: Option<String>,
}

impl ParsedOptions {
    /// Names of the selected command and its sub-commands, outermost first.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// A value by its destination name.
    pub fn get(&self, dest: &str) -> Option<&Value> {
        self.values.get(dest)
    }

    /// A value, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, dest: &str) -> Result<T, CommandError> {
        deserialize(dest, self.get(dest))
    }

    /// Is there a value of this name?
    pub fn contains(&self, dest: &str) -> bool {
        self.values.contains_key(dest)
    }

    /// Sets a value.
    pub fn insert(&mut self, dest: String, value: Value) {
        self.values.insert(dest, value);
    }

    /// The usage line of the innermost selected command group.
    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }
}

/// What a handler receives.
///
/// The values are keyed by the parameter names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    values: BTreeMap<String, Value>,
    options: Option<(String, ParsedOptions)>,
}

impl Arguments {
    /// A value by the parameter name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A value, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, CommandError> {
        deserialize(name, self.get(name))
    }

    /// Sets a value.
    pub fn insert<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        self.values.insert(name.into(), value.into());
    }

    /// The whole parsed options, if the handler asked for them.
    pub fn options(&self) -> Option<&ParsedOptions> {
        self.options.as_ref().map(|(_, options)| options)
    }

    /// Name of the parameter receiving the parsed options.
    pub fn options_name(&self) -> Option<&str> {
        self.options.as_ref().map(|(name, _)| name.as_str())
    }

    pub(crate) fn set_options(&mut self, name: String, options: ParsedOptions) {
        self.options = Some((name, options));
    }

    /// Iterates through the values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Arguments {
            values: iter.into_iter().collect(),
            options: None,
        }
    }
}

/// The exit code a handler returns (`None` is success).
pub type HandlerResult = Result<Option<i32>, AnyError>;

type Handler = Arc<dyn Fn(Arguments) -> HandlerResult + Send + Sync>;

type LocalBoxFuture = Pin<Box<dyn Future<Output = HandlerResult>>>;

type AsyncHandler = Arc<dyn Fn(Arguments) -> LocalBoxFuture + Send + Sync>;

/// A handler together with its compiled signature.
#[derive(Clone)]
pub struct CommandProxy {
    signature: Signature,
    handler: Handler,
}

impl CommandProxy {
    /// Compiles the parameters of the handler.
    pub fn new<F>(parameters: &[Parameter], handler: F) -> Result<Self, SignatureError>
    where
        F: Fn(Arguments) -> HandlerResult + Send + Sync + 'static,
    {
        Ok(CommandProxy {
            signature: Signature::compile(parameters)?,
            handler: Arc::new(handler),
        })
    }

    /// The compiled signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Calls the handler with values read from the options.
    pub fn call(&self, options: &ParsedOptions) -> HandlerResult {
        (self.handler)(self.signature.call_arguments(options))
    }
}

/// A handler returning a future.
///
/// Calling it blocks until the future resolves, on a single-threaded runtime created for the
/// call.
#[derive(Clone)]
pub struct AsyncCommandProxy {
    signature: Signature,
    handler: AsyncHandler,
}

impl AsyncCommandProxy {
    /// Compiles the parameters of the handler.
    pub fn new<F, R>(parameters: &[Parameter], handler: F) -> Result<Self, SignatureError>
    where
        F: Fn(Arguments) -> R + Send + Sync + 'static,
        R: Future<Output = HandlerResult> + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |args| -> LocalBoxFuture { Box::pin(handler(args)) });
        Ok(AsyncCommandProxy {
            signature: Signature::compile(parameters)?,
            handler,
        })
    }

    /// The compiled signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Calls the handler and drives its future to completion.
    pub fn call(&self, options: &ParsedOptions) -> HandlerResult {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CommandError::Runtime)?;
        runtime.block_on((self.handler)(self.signature.call_arguments(options)))
    }
}

/// A sync or async handler.
#[derive(Clone)]
pub enum Command {
    /// A plain handler.
    Sync(CommandProxy),
    /// A handler returning a future.
    Async(AsyncCommandProxy),
}

impl Command {
    /// The compiled signature.
    pub fn signature(&self) -> &Signature {
        match self {
            Command::Sync(proxy) => proxy.signature(),
            Command::Async(proxy) => proxy.signature(),
        }
    }

    /// Calls the handler.
    pub fn call(&self, options: &ParsedOptions) -> HandlerResult {
        match self {
            Command::Sync(proxy) => proxy.call(options),
            Command::Async(proxy) => proxy.call(options),
        }
    }
}

impl From<CommandProxy> for Command {
    fn from(proxy: CommandProxy) -> Self {
        Command::Sync(proxy)
    }
}

impl From<AsyncCommandProxy> for Command {
    fn from(proxy: AsyncCommandProxy) -> Self {
        Command::Async(proxy)
    }
}

#[derive(Clone)]
enum Node {
    Command(Command),
    Group(CommandGroup),
}

/// A registered command or command group.
///
/// Returned when registering, to set the details.
#[derive(Clone)]
pub struct CommandEntry {
    name: String,
    aliases: Vec<String>,
    help: Option<String>,
    log_level: Option<LevelFilter>,
    node: Node,
}

impl CommandEntry {
    /// Adds an alternative name.
    pub fn alias<A: Into<String>>(&mut self, alias: A) -> &mut Self {
        self.aliases.push(alias.into());
        self
    }

    /// Sets the help text.
    pub fn help<H: Into<String>>(&mut self, help: H) -> &mut Self {
        self.help = Some(help.into());
        self
    }

    /// Sets the default log level used while running the command.
    pub fn log_level(&mut self, level: LevelFilter) -> &mut Self {
        self.log_level = Some(level);
        self
    }

    /// Name of the command.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// A set of commands, selected by the sub-command name.
///
/// Groups can be nested. A group may have a default handler, called when no sub-command is
/// given; without one the usage is printed and the exit code is `1`.
#[derive(Clone, Default)]
pub struct CommandGroup {
    commands: Vec<CommandEntry>,
    default: Option<Command>,
}

impl CommandGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        CommandGroup {
            commands: Vec::new(),
            default: None,
        }
    }

    fn add(&mut self, name: &str, node: Node) -> &mut CommandEntry {
        debug!("Registering command {}", name);
        self.commands.retain(|entry| entry.name != name);
        self.commands.push(CommandEntry {
            name: name.to_owned(),
            aliases: Vec::new(),
            help: None,
            log_level: None,
            node,
        });
        let last = self.commands.len() - 1;
        &mut self.commands[last]
    }

    /// Registers a command (replacing any of the same name).
    pub fn command<C: Into<Command>>(&mut self, name: &str, command: C) -> &mut CommandEntry {
        self.add(name, Node::Command(command.into()))
    }

    /// Registers a nested group.
    pub fn group(&mut self, name: &str, group: CommandGroup) -> &mut CommandEntry {
        self.add(name, Node::Group(group))
    }

    /// Sets the handler called when no sub-command is selected.
    ///
    /// Its arguments are added to the group itself.
    pub fn default_handler<C: Into<Command>>(&mut self, command: C) -> &mut Self {
        self.default = Some(command.into());
        self
    }

    /// The registered commands.
    pub fn entries(&self) -> impl Iterator<Item = &CommandEntry> {
        self.commands.iter()
    }

    fn find(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.iter().find(|entry| entry.matches(name))
    }

    /// Adds the sub-commands (and the default handler's arguments) to the command line
    /// definition.
    pub fn augment<'s>(&'s self, mut app: App<'s, 's>) -> App<'s, 's> {
        if let Some(default) = &self.default {
            app = default.signature().augment(app);
        }
        for entry in &self.commands {
            let mut sub = SubCommand::with_name(&entry.name);
            if let Some(help) = &entry.help {
                sub = sub.about(help.as_str());
            }
            for alias in &entry.aliases {
                sub = sub.alias(alias.as_str());
            }
            sub = match &entry.node {
                Node::Command(command) => command.signature().augment(sub),
                Node::Group(group) => group.augment(sub),
            };
            app = app.subcommand(sub);
        }
        app
    }

    /// Reads the selected commands and all the values.
    pub fn parse_matches(&self, matches: &ArgMatches, options: &mut ParsedOptions) -> Result<(), CommandError> {
        if let Some(default) = &self.default {
            default.signature().extract(matches, options)?;
        }
        match matches.subcommand() {
            (name, Some(sub_matches)) => {
                let entry = self
                    .find(name)
                    .ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))?;
                options.command.push(entry.name.clone());
                match &entry.node {
                    Node::Command(command) => command.signature().extract(sub_matches, options),
                    Node::Group(group) => group.parse_matches(sub_matches, options),
                }
            }
            _ => {
                options.usage = Some(matches.usage().to_owned());
                Ok(())
            }
        }
    }

    /// Parses the command line.
    pub fn parse_from<I, T>(&self, name: &str, args: I) -> Result<ParsedOptions, CommandError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.augment(App::new(name)).get_matches_from_safe(args)?;
        let mut options = ParsedOptions::default();
        self.parse_matches(&matches, &mut options)?;
        Ok(options)
    }

    fn resolve<'a>(&'a self, path: &[String]) -> Result<(Option<&'a CommandEntry>, &'a CommandGroup), CommandError> {
        let mut group = self;
        let mut entry = None;
        for name in path {
            let found = group
                .find(name)
                .ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;
            entry = Some(found);
            match &found.node {
                Node::Group(inner) => group = inner,
                Node::Command(_) => break,
            }
        }
        Ok((entry, group))
    }

    /// The log level of the selected command, if it has one.
    pub fn log_level(&self, options: &ParsedOptions) -> Option<LevelFilter> {
        self.resolve(options.command())
            .ok()
            .and_then(|(entry, _)| entry)
            .and_then(|entry| entry.log_level)
    }

    /// Calls the handler selected by the options.
    pub fn dispatch(&self, options: &ParsedOptions) -> HandlerResult {
        let (entry, group) = self.resolve(options.command())?;
        match entry.map(|entry| &entry.node) {
            Some(Node::Command(command)) => command.call(options),
            _ => match &group.default {
                Some(default) => default.call(options),
                None => {
                    println!("No command specified!");
                    if let Some(usage) = options.usage() {
                        println!("{}", usage);
                    }
                    Ok(Some(1))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::super::{ArgType, TypeTag};
    use super::*;

    fn group() -> CommandGroup {
        let mut root = CommandGroup::new();
        let add = CommandProxy::new(
            &[
                Parameter::positional("numbers", TypeTag::sequence(ArgType::Int)),
                Parameter::keyword("negate", TypeTag::Bool),
            ],
            |args| {
                let sum = args.get_as::<Vec<i32>>("numbers")?.iter().sum::<i32>();
                Ok(Some(if args.get_as("negate")? { -sum } else { sum }))
            },
        )
        .unwrap();
        root.command("add", add).alias("plus").help("Adds numbers");

        let mut db = CommandGroup::new();
        let migrate = CommandProxy::new(
            &[Parameter::keyword("target", TypeTag::optional(ArgType::Str))],
            |args| Ok(Some(if args.get("target") == Some(&Value::Null) { 10 } else { 11 })),
        )
        .unwrap();
        db.command("migrate", migrate).log_level(LevelFilter::Warn);
        root.group("db", db).help("Database");
        root
    }

    #[test]
    fn dispatch_command() {
        let root = group();
        let options = root.parse_from("test", vec!["test", "add", "1", "2", "3"]).unwrap();
        assert_eq!(&["add".to_owned()], options.command());
        assert_eq!(Some(&json!([1, 2, 3])), options.get("NUMBERS"));
        assert_eq!(Some(6), root.dispatch(&options).unwrap());
        let options = root
            .parse_from("test", vec!["test", "plus", "--negate", "4"])
            .unwrap();
        assert_eq!(&["add".to_owned()], options.command());
        assert_eq!(Some(-4), root.dispatch(&options).unwrap());
    }

    #[test]
    fn nested_group() {
        let root = group();
        let options = root.parse_from("test", vec!["test", "db", "migrate"]).unwrap();
        assert_eq!(&["db".to_owned(), "migrate".to_owned()], options.command());
        assert_eq!(Some(10), root.dispatch(&options).unwrap());
        assert_eq!(Some(LevelFilter::Warn), root.log_level(&options));
        let options = root
            .parse_from("test", vec!["test", "db", "migrate", "--target", "v2"])
            .unwrap();
        assert_eq!(Some(11), root.dispatch(&options).unwrap());
    }

    #[test]
    fn no_command() {
        let root = group();
        let options = root.parse_from("test", vec!["test"]).unwrap();
        assert!(options.command().is_empty());
        assert!(options.usage().is_some());
        assert_eq!(Some(1), root.dispatch(&options).unwrap());
        // A group without its sub-command
        let options = root.parse_from("test", vec!["test", "db"]).unwrap();
        assert_eq!(None, root.log_level(&options));
        assert_eq!(Some(1), root.dispatch(&options).unwrap());
    }

    #[test]
    fn default_handler() {
        let mut root = group();
        let default = CommandProxy::new(&[Parameter::keyword("dry_run", TypeTag::Bool)], |args| {
            Ok(Some(if args.get_as("dry_run")? { 3 } else { 2 }))
        })
        .unwrap();
        root.default_handler(default);
        let options = root.parse_from("test", vec!["test", "--dry-run"]).unwrap();
        assert_eq!(Some(3), root.dispatch(&options).unwrap());
        let options = root.parse_from("test", vec!["test"]).unwrap();
        assert_eq!(Some(2), root.dispatch(&options).unwrap());
    }

    #[test]
    fn invalid_command_line() {
        let root = group();
        assert!(matches!(
            root.parse_from("test", vec!["test", "nope"]),
            Err(CommandError::Parse(_))
        ));
        assert!(matches!(
            root.parse_from("test", vec!["test", "add", "x"]),
            Err(CommandError::Parse(_))
        ));
        assert!(matches!(
            root.dispatch(&ParsedOptions {
                command: vec!["nope".to_owned()],
                ..ParsedOptions::default()
            }),
            Err(_)
        ));
    }

    #[test]
    fn handler_error() {
        let mut root = CommandGroup::new();
        let fail = CommandProxy::new(&[], |_| Err("Broken".into())).unwrap();
        root.command("fail", fail);
        let options = root.parse_from("test", vec!["test", "fail"]).unwrap();
        assert_eq!("Broken", root.dispatch(&options).unwrap_err().to_string());
    }

    #[test]
    fn async_command() {
        let mut root = CommandGroup::new();
        let wait = AsyncCommandProxy::new(
            &[Parameter::keyword("millis", ArgType::Int).default(1)],
            |args| async move {
                let millis = args.get_as::<u64>("millis")?;
                tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                Ok::<_, AnyError>(Some(millis as i32))
            },
        )
        .unwrap();
        root.command("wait", wait);
        let options = root.parse_from("test", vec!["test", "wait", "--millis", "5"]).unwrap();
        assert_eq!(Some(5), root.dispatch(&options).unwrap());
    }

    #[test]
    fn raw_options_passed() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut root = CommandGroup::new();
        let show = CommandProxy::new(
            &[
                Parameter::raw_options("opts"),
                Parameter::keyword("name", ArgType::Str).default("x"),
            ],
            |args| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                assert_eq!(Some("opts"), args.options_name());
                let options = args.options().ok_or("Missing options")?;
                assert_eq!(&["show".to_owned()], options.command());
                assert_eq!(Some(&json!("y")), options.get("name"));
                Ok(None)
            },
        )
        .unwrap();
        root.command("show", show);
        let options = root.parse_from("test", vec!["test", "show", "--name", "y"]).unwrap();
        assert_eq!(None, root.dispatch(&options).unwrap());
        assert_eq!(1, CALLS.load(Ordering::SeqCst));
    }

    #[test]
    fn replace_command() {
        let mut root = group();
        let other = CommandProxy::new(&[], |_| Ok(Some(42))).unwrap();
        root.command("add", other);
        assert_eq!(2, root.entries().count());
        let options = root.parse_from("test", vec!["test", "add"]).unwrap();
        assert_eq!(Some(42), root.dispatch(&options).unwrap());
    }
}
