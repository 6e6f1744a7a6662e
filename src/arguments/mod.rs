//! Command line arguments derived from handler signatures.
//!
//! A handler describes its parameters with [`Parameter`] descriptors: a name, a [`TypeTag`] of
//! the declared type, whether it is keyword-only and an optional default. Each descriptor is
//! compiled into an [`Argument`] once, when the command is registered, and an unsupported
//! declaration is reported right there as a [`SignatureError`].
//!
//! The shape of the argument follows the declaration:
//!
//! * Non keyword-only parameters are positional (`NAME`), the others are options
//!   (`--flag-name`).
//! * `bool` is a switch, mappings take repeated `KEY=VALUE` values, sequences take multiple values
//!   (positional) or can be repeated (options), tuples take exactly as many values as they are
//!   long.
//! * `Optional` positional arguments may be left out, `Optional` options default to `null`.
//! * Enums and literals are constrained to their members.
//! * Keyword-only scalars without a default are required.
//!
//! ```rust
//! use appframe::arguments::{ArgType, Parameter, Signature, TypeTag};
//!
//! let signature = Signature::compile(&[
//!     Parameter::positional("name", TypeTag::optional(ArgType::Str)),
//!     Parameter::keyword("repeat", ArgType::Int).default(1),
//!     Parameter::keyword("verbose", TypeTag::Bool),
//! ])
//! .unwrap();
//! let flags = signature
//!     .arguments()
//!     .map(|arg| arg.flags[0].as_str())
//!     .collect::<Vec<_>>();
//! assert_eq!(vec!["NAME", "--repeat", "--verbose"], flags);
//! ```

pub mod command;
pub mod types;

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use structopt::clap::{App, Arg as ClapArg, ArgMatches};
use thiserror::Error;

pub use self::command::{
    Arguments, AsyncCommandProxy, Command, CommandEntry, CommandError, CommandGroup,
    CommandProxy, HandlerResult, ParsedOptions,
};
use self::types::{ArgumentType, FileType};
use crate::utils::{key_val, MissingEquals};

/// Converter of a single command line value.
#[derive(Clone)]
pub enum ArgType {
    /// Text, as is.
    Str,
    /// A signed integer.
    Int,
    /// A floating point number.
    Float,
    /// A file system path.
    Path,
    /// ISO date (`2020-01-31`).
    Date,
    /// ISO time (`12:30` or `12:30:15`).
    Time,
    /// ISO date and time (`2020-01-31T12:30:15`, with an optional offset).
    DateTime,
    /// Human readable duration (`1h 15m`).
    Duration,
    /// A file name that must be possible to open.
    File(FileType),
    /// A custom converter.
    Custom(Arc<dyn ArgumentType>),
}

fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    value
        .parse()
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
}

fn parse_datetime(value: &str) -> Result<Value, String> {
    if let Ok(dt) = value
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
    {
        return to_value(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return to_value(dt);
    }
    match value.parse::<NaiveDate>().map(|d| d.and_hms_opt(0, 0, 0)) {
        Ok(Some(dt)) => to_value(dt),
        _ => Err(format!("invalid datetime value: '{}'", value)),
    }
}

impl ArgType {
    /// Wraps a custom converter.
    pub fn custom<T: ArgumentType + 'static>(converter: T) -> Self {
        ArgType::Custom(Arc::new(converter))
    }

    // Converter objects are passed through as they are, they don't make the option required.
    fn is_converter(&self) -> bool {
        matches!(self, ArgType::File(_) | ArgType::Custom(_))
    }

    /// Converts one textual value.
    ///
    /// Dates and times are normalized to their ISO form and durations to the `{secs, nanos}`
    /// shape, so they can be deserialized back by [`Arguments::get_as`].
    pub fn convert(&self, value: &str) -> Result<Value, String> {
        match self {
            ArgType::Str | ArgType::Path => Ok(Value::String(value.to_owned())),
            ArgType::Int => value
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("invalid int value: '{}'", value)),
            ArgType::Float => value
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("invalid float value: '{}'", value)),
            ArgType::Date => value
                .parse::<NaiveDate>()
                .map_err(|_| format!("invalid date value: '{}'", value))
                .and_then(to_value),
            ArgType::Time => parse_time(value)
                .map_err(|_| format!("invalid time value: '{}'", value))
                .and_then(to_value),
            ArgType::DateTime => parse_datetime(value),
            ArgType::Duration => humantime::parse_duration(value)
                .map_err(|e| format!("invalid duration value: '{}' ({})", value, e))
                .and_then(to_value),
            ArgType::File(file) => file.convert(value),
            ArgType::Custom(custom) => custom.convert(value),
        }
    }
}

impl Display for ArgType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            ArgType::Str => write!(fmt, "str"),
            ArgType::Int => write!(fmt, "int"),
            ArgType::Float => write!(fmt, "float"),
            ArgType::Path => write!(fmt, "Path"),
            ArgType::Date => write!(fmt, "date"),
            ArgType::Time => write!(fmt, "time"),
            ArgType::DateTime => write!(fmt, "datetime"),
            ArgType::Duration => write!(fmt, "Duration"),
            ArgType::File(file) => write!(fmt, "{}", file),
            ArgType::Custom(custom) => write!(fmt, "{}", custom.name()),
        }
    }
}

impl Debug for ArgType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "ArgType({})", self)
    }
}

/// An enum type, known by the names of its members.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EnumType {
    name: String,
    members: Vec<String>,
}

impl EnumType {
    /// Creates the enum type.
    ///
    /// The handler receives the member name, which deserializes into a unit-variant enum.
    pub fn new<N: Into<String>>(name: N, members: &[&str]) -> Self {
        EnumType {
            name: name.into(),
            members: members.iter().map(|m| (*m).to_owned()).collect(),
        }
    }

    /// Name of the type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the members.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    fn choices(&self) -> Vec<Value> {
        self.members.iter().cloned().map(Value::String).collect()
    }
}

/// The declared type of a parameter.
#[derive(Clone, Debug)]
pub enum TypeTag {
    /// A switch.
    Bool,
    /// A single value.
    Scalar(ArgType),
    /// One of the enum members, by name.
    Enum(EnumType),
    /// One of the values (all strings or all integers).
    Literal(Vec<Value>),
    /// The inner type or nothing.
    Optional(Box<TypeTag>),
    /// The non-null arms of a union.
    ///
    /// Only a single arm is supported (it's the same as [`TypeTag::Optional`]).
    Union(Vec<TypeTag>),
    /// Multiple values of the element type (strings if not given).
    Sequence(Option<Box<TypeTag>>),
    /// Fixed number of values; the first element type is used for all of them.
    Tuple(Vec<TypeTag>),
    /// String to string map.
    Mapping,
    /// The whole [`ParsedOptions`], not a command line argument.
    RawOptions,
    /// Any other type, unsupported on the command line.
    Other(String),
}

impl TypeTag {
    /// `Optional[inner]`.
    pub fn optional<T: Into<TypeTag>>(inner: T) -> Self {
        TypeTag::Optional(Box::new(inner.into()))
    }

    /// `Sequence[element]`.
    pub fn sequence<T: Into<TypeTag>>(element: T) -> Self {
        TypeTag::Sequence(Some(Box::new(element.into())))
    }
}

impl From<ArgType> for TypeTag {
    fn from(arg_type: ArgType) -> Self {
        TypeTag::Scalar(arg_type)
    }
}

impl From<EnumType> for TypeTag {
    fn from(enum_type: EnumType) -> Self {
        TypeTag::Enum(enum_type)
    }
}

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Display for TypeTag {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            TypeTag::Bool => write!(fmt, "bool"),
            TypeTag::Scalar(arg_type) => write!(fmt, "{}", arg_type),
            TypeTag::Enum(enum_type) => write!(fmt, "{}", enum_type.name),
            TypeTag::Literal(values) => write!(fmt, "Literal[{}]", join(values)),
            TypeTag::Optional(inner) => write!(fmt, "Optional[{}]", inner),
            TypeTag::Union(arms) => write!(fmt, "Union[{}, None]", join(arms)),
            TypeTag::Sequence(None) => write!(fmt, "list"),
            TypeTag::Sequence(Some(element)) => write!(fmt, "Sequence[{}]", element),
            TypeTag::Tuple(elements) if elements.is_empty() => write!(fmt, "tuple"),
            TypeTag::Tuple(elements) => write!(fmt, "Tuple[{}]", join(elements)),
            TypeTag::Mapping => write!(fmt, "Dict[str, str]"),
            TypeTag::RawOptions => write!(fmt, "ParsedOptions"),
            TypeTag::Other(name) => write!(fmt, "{}", name),
        }
    }
}

/// Extra command line details of a parameter.
///
/// Used as the default of a [`Parameter`] to add flags, help, choices, metavar or the real
/// default value.
#[derive(Clone, Debug, Default)]
pub struct Arg {
    flags: Vec<String>,
    default: Option<Value>,
    choices: Option<Vec<Value>>,
    help: Option<String>,
    metavar: Option<String>,
}

impl Arg {
    /// An empty descriptor.
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    /// Additional flags (`-o`, `--out`).
    pub fn flags(self, flags: &[&str]) -> Self {
        Arg {
            flags: flags.iter().map(|f| (*f).to_owned()).collect(),
            ..self
        }
    }

    /// The default value.
    pub fn default<V: Into<Value>>(self, default: V) -> Self {
        Arg {
            default: Some(default.into()),
            ..self
        }
    }

    /// Restricts the accepted values.
    pub fn choices<I, V>(self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Arg {
            choices: Some(choices.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    /// The help text.
    pub fn help<H: Into<String>>(self, help: H) -> Self {
        Arg {
            help: Some(help.into()),
            ..self
        }
    }

    /// Name of the value in the help.
    pub fn metavar<M: Into<String>>(self, metavar: M) -> Self {
        Arg {
            metavar: Some(metavar.into()),
            ..self
        }
    }
}

/// The default of a [`Parameter`].
#[derive(Clone, Debug)]
pub enum ParamDefault {
    /// No default.
    Empty,
    /// A plain default value.
    Value(Value),
    /// An argument descriptor (possibly carrying the default value).
    Argument(Arg),
}

/// Description of one handler parameter.
#[derive(Clone, Debug)]
pub struct Parameter {
    /// Name of the parameter.
    pub name: String,
    /// The declared type.
    pub type_tag: TypeTag,
    /// Keyword-only parameters become options, the others positional arguments.
    pub keyword_only: bool,
    /// The default.
    pub default: ParamDefault,
}

impl Parameter {
    fn new<N: Into<String>, T: Into<TypeTag>>(name: N, type_tag: T, keyword_only: bool) -> Self {
        Parameter {
            name: name.into(),
            type_tag: type_tag.into(),
            keyword_only,
            default: ParamDefault::Empty,
        }
    }

    /// A positional parameter.
    pub fn positional<N: Into<String>, T: Into<TypeTag>>(name: N, type_tag: T) -> Self {
        Self::new(name, type_tag, false)
    }

    /// A keyword-only parameter.
    pub fn keyword<N: Into<String>, T: Into<TypeTag>>(name: N, type_tag: T) -> Self {
        Self::new(name, type_tag, true)
    }

    /// A parameter receiving the whole [`ParsedOptions`].
    pub fn raw_options<N: Into<String>>(name: N) -> Self {
        Self::new(name, TypeTag::RawOptions, false)
    }

    /// Sets a plain default value.
    pub fn default<V: Into<Value>>(self, default: V) -> Self {
        Parameter {
            default: ParamDefault::Value(default.into()),
            ..self
        }
    }

    /// Sets an argument descriptor as the default.
    pub fn arg(self, arg: Arg) -> Self {
        Parameter {
            default: ParamDefault::Argument(arg),
            ..self
        }
    }
}

/// A handler signature that can't be expressed on the command line.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum SignatureError {
    /// A union of more than one type.
    #[error("Parameter `{param}`: only Optional[TYPE] or Union[TYPE, None] are supported, not {type_name}")]
    UnsupportedUnion {
        /// The parameter.
        param: String,
        /// The offending type.
        type_name: String,
    },
    /// A literal of other than string or integer values.
    #[error("Parameter `{param}`: only str and int Literal types are supported")]
    LiteralType {
        /// The parameter.
        param: String,
    },
    /// A literal of mixed value types.
    #[error("Parameter `{param}`: all literal values must be the same type")]
    MixedLiteral {
        /// The parameter.
        param: String,
    },
    /// A type with no command line representation.
    #[error("Parameter `{param}`: unsupported type {type_name}")]
    UnsupportedType {
        /// The parameter.
        param: String,
        /// The offending type.
        type_name: String,
    },
    /// A raw options parameter compiled as an argument.
    #[error("Parameter `{0}` receives the parsed options, it is not an argument")]
    RawOptions(String),
    /// More than one raw options parameter.
    #[error("Only one parameter may receive the parsed options, `{0}` is extra")]
    ExtraRawOptions(String),
}

/// How many values an argument takes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Nargs {
    /// Zero or one.
    Optional,
    /// Any number.
    ZeroOrMore,
    /// At least one.
    OneOrMore,
    /// Exactly this many.
    Exact(usize),
}

/// What to do with the values of an argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Store the (converted) value.
    Store,
    /// A switch, `true` when present.
    StoreTrue,
    /// Collect values of a repeated option.
    Append,
    /// Collect `KEY=VALUE` pairs into a map.
    KeyValue,
    /// A member name of the enum.
    EnumName(EnumType),
    /// Collect member names of the enum.
    AppendEnumName(EnumType),
}

impl Action {
    fn is_repeated(&self) -> bool {
        matches!(
            self,
            Action::Append | Action::KeyValue | Action::AppendEnumName(_)
        )
    }
}

fn value_type(param: &str, tag: Option<&TypeTag>) -> Result<Option<ArgType>, SignatureError> {
    match tag {
        None => Ok(None),
        Some(TypeTag::Scalar(arg_type)) => Ok(Some(arg_type.clone())),
        Some(other) => Err(SignatureError::UnsupportedType {
            param: param.to_owned(),
            type_name: other.to_string(),
        }),
    }
}

fn literal_type(param: &str, values: &[Value]) -> Result<ArgType, SignatureError> {
    let is_str = |value: &Value| match value {
        Value::String(_) => Some(true),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(false),
        _ => None,
    };
    let first = values
        .first()
        .and_then(is_str)
        .ok_or_else(|| SignatureError::LiteralType {
            param: param.to_owned(),
        })?;
    if !values.iter().all(|value| is_str(value) == Some(first)) {
        return Err(SignatureError::MixedLiteral {
            param: param.to_owned(),
        });
    }
    Ok(if first { ArgType::Str } else { ArgType::Int })
}

fn convert(raw: &str, value_type: Option<&ArgType>, choices: Option<&[Value]>) -> Result<Value, String> {
    let value = match value_type {
        Some(value_type) => value_type.convert(raw)?,
        None => Value::String(raw.to_owned()),
    };
    match choices {
        Some(choices) if !choices.contains(&value) => {
            let choices = choices
                .iter()
                .map(|c| match c {
                    Value::String(s) => format!("'{}'", s),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>();
            Err(format!(
                "invalid choice: '{}' (choose from {})",
                raw,
                choices.join(", ")
            ))
        }
        _ => Ok(value),
    }
}

/// A compiled command line argument.
#[derive(Clone, Debug)]
pub struct Argument {
    /// `NAME` of a positional argument or the flags of an option, the primary one first.
    pub flags: Vec<String>,
    /// Key of the value in the [`ParsedOptions`].
    pub dest: String,
    /// What to do with the values.
    pub action: Action,
    /// How many values are taken.
    pub nargs: Option<Nargs>,
    /// Converter of the values (strings are kept if not set).
    pub value_type: Option<ArgType>,
    /// The accepted values.
    pub choices: Option<Vec<Value>>,
    /// Value used when the argument is not present.
    pub default: Option<Value>,
    /// Whether the option must be present.
    pub required: bool,
    /// Help text.
    pub help: Option<String>,
    /// Name of the value in the help.
    pub metavar: Option<String>,
}

impl Argument {
    fn new(flag: String) -> Self {
        Argument {
            flags: vec![flag],
            dest: String::new(),
            action: Action::Store,
            nargs: None,
            value_type: None,
            choices: None,
            default: None,
            required: false,
            help: None,
            metavar: None,
        }
    }

    /// Compiles a parameter into an argument.
    pub fn from_parameter(param: &Parameter) -> Result<Self, SignatureError> {
        if let TypeTag::RawOptions = param.type_tag {
            return Err(SignatureError::RawOptions(param.name.clone()));
        }
        let positional = !param.keyword_only;
        let flag = if positional {
            param.name.to_uppercase()
        } else {
            format!("--{}", param.name.replace('_', "-"))
        };
        let mut argument = Argument::new(flag.clone());
        match &param.default {
            ParamDefault::Empty => (),
            ParamDefault::Value(default) => argument.default = Some(default.clone()),
            ParamDefault::Argument(arg) => {
                argument
                    .flags
                    .extend(arg.flags.iter().filter(|f| **f != flag).cloned());
                argument.default = arg.default.clone();
                argument.choices = arg.choices.clone();
                argument.help = arg.help.clone();
                argument.metavar = arg.metavar.clone();
            }
        }
        argument.dest = if positional {
            flag
        } else {
            param.name.clone()
        };
        argument.apply_type(&param.name, &param.type_tag, positional)?;
        Ok(argument)
    }

    fn apply_type(
        &mut self,
        param: &str,
        tag: &TypeTag,
        positional: bool,
    ) -> Result<(), SignatureError> {
        match tag {
            TypeTag::Bool => self.action = Action::StoreTrue,
            TypeTag::Mapping => {
                self.action = Action::KeyValue;
                self.metavar.get_or_insert_with(|| "KEY=VALUE".to_owned());
                if positional {
                    self.nargs = Some(Nargs::OneOrMore);
                }
            }
            TypeTag::Sequence(element) => {
                if let Some(TypeTag::Enum(enum_type)) = element.as_deref() {
                    self.choices = Some(enum_type.choices());
                    self.action = Action::AppendEnumName(enum_type.clone());
                } else {
                    self.value_type = value_type(param, element.as_deref())?;
                    if !positional {
                        self.action = Action::Append;
                    }
                }
                if positional {
                    self.nargs = Some(Nargs::OneOrMore);
                }
            }
            TypeTag::Tuple(elements) if elements.is_empty() => {
                return self.apply_type(param, &TypeTag::Sequence(None), positional);
            }
            TypeTag::Tuple(elements) => {
                self.nargs = Some(Nargs::Exact(elements.len()));
                self.value_type = value_type(param, elements.first())?;
            }
            TypeTag::Optional(inner) => {
                if !positional {
                    self.default.get_or_insert(Value::Null);
                }
                self.apply_type(param, inner, positional)?;
                if positional {
                    self.nargs = match self.nargs {
                        None => Some(Nargs::Optional),
                        Some(Nargs::OneOrMore) => Some(Nargs::ZeroOrMore),
                        other => other,
                    };
                }
            }
            TypeTag::Union(arms) if arms.len() == 1 => {
                return self.apply_type(param, &TypeTag::Optional(Box::new(arms[0].clone())), positional);
            }
            TypeTag::Union(_) => {
                return Err(SignatureError::UnsupportedUnion {
                    param: param.to_owned(),
                    type_name: tag.to_string(),
                });
            }
            TypeTag::Literal(values) => {
                self.value_type = Some(literal_type(param, values)?);
                self.choices = Some(values.clone());
            }
            TypeTag::Enum(enum_type) => {
                self.choices = Some(enum_type.choices());
                self.action = Action::EnumName(enum_type.clone());
            }
            TypeTag::Scalar(arg_type) => {
                if !positional && !arg_type.is_converter() && self.default.is_none() {
                    self.required = true;
                }
                self.value_type = Some(arg_type.clone());
            }
            TypeTag::RawOptions | TypeTag::Other(_) => {
                return Err(SignatureError::UnsupportedType {
                    param: param.to_owned(),
                    type_name: tag.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Is this a positional argument?
    pub fn is_positional(&self) -> bool {
        self.flags.first().map_or(true, |f| !f.starts_with('-'))
    }

    fn is_multi_valued(&self) -> bool {
        matches!(self.action, Action::Append | Action::AppendEnumName(_))
            || matches!(
                self.nargs,
                Some(Nargs::ZeroOrMore) | Some(Nargs::OneOrMore) | Some(Nargs::Exact(_))
            )
    }

    fn clap_arg(&self) -> ClapArg<'_, '_> {
        let positional = self.is_positional();
        let mut arg = ClapArg::with_name(&self.dest);
        if !positional {
            let mut has_long = false;
            for flag in &self.flags {
                if let Some(long) = flag.strip_prefix("--") {
                    arg = if has_long { arg.alias(long) } else { arg.long(long) };
                    has_long = true;
                } else if let Some(short) = flag.strip_prefix('-') {
                    arg = arg.short(short);
                }
            }
            arg = arg
                .takes_value(self.action != Action::StoreTrue)
                .required(self.required);
            if self.action.is_repeated() {
                arg = arg.multiple(true).number_of_values(1);
            }
        }
        arg = match self.nargs {
            Some(Nargs::Optional) => arg.required(false),
            Some(Nargs::ZeroOrMore) => arg.multiple(true).required(false),
            Some(Nargs::OneOrMore) => arg.multiple(true).min_values(1).required(positional),
            Some(Nargs::Exact(n)) if positional => arg
                .multiple(true)
                .min_values(n as u64)
                .max_values(n as u64)
                .required(true),
            Some(Nargs::Exact(n)) => arg.number_of_values(n as u64),
            None => arg.required(positional || self.required),
        };
        if let Some(help) = &self.help {
            arg = arg.help(help);
        }
        if let Some(metavar) = &self.metavar {
            arg = arg.value_name(metavar);
        }
        if self.action == Action::KeyValue {
            arg = arg.validator(|value| match value.find('=') {
                Some(_) => Ok(()),
                None => Err(MissingEquals.to_string()),
            });
        } else if self.value_type.is_some() || self.choices.is_some() {
            let value_type = self.value_type.clone();
            let choices = self.choices.clone();
            arg = arg.validator(move |value| {
                convert(&value, value_type.as_ref(), choices.as_deref()).map(|_| ())
            });
        }
        arg
    }

    /// Reads the value of the argument from the parsed command line.
    pub fn value(&self, matches: &ArgMatches) -> Result<Value, CommandError> {
        let invalid = |reason: String| CommandError::InvalidValue {
            argument: self.dest.clone(),
            reason,
        };
        if !matches.is_present(&self.dest) {
            return Ok(match (&self.action, &self.default) {
                (_, Some(default)) => default.clone(),
                (Action::StoreTrue, None) => Value::Bool(false),
                (Action::KeyValue, None) => Value::Object(Map::new()),
                _ => Value::Null,
            });
        }
        let convert_one = |raw: &str| {
            convert(raw, self.value_type.as_ref(), self.choices.as_deref()).map_err(invalid)
        };
        match self.action {
            Action::StoreTrue => Ok(Value::Bool(true)),
            Action::KeyValue => {
                let mut map = match &self.default {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                for raw in matches.values_of(&self.dest).into_iter().flatten() {
                    let (key, value) = key_val::<String, String>(raw)
                        .map_err(|e| invalid(e.to_string()))?;
                    map.insert(key, Value::String(value));
                }
                Ok(Value::Object(map))
            }
            _ if self.is_multi_valued() => matches
                .values_of(&self.dest)
                .into_iter()
                .flatten()
                .map(convert_one)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => matches.value_of(&self.dest).map_or(Ok(Value::Null), convert_one),
        }
    }
}

/// A compiled handler signature.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    arguments: Vec<(String, Argument)>,
    raw_options: Option<String>,
}

impl Signature {
    /// Compiles the parameters of a handler.
    pub fn compile(parameters: &[Parameter]) -> Result<Self, SignatureError> {
        let mut signature = Signature::default();
        for param in parameters {
            if let TypeTag::RawOptions = param.type_tag {
                if signature.raw_options.is_some() {
                    return Err(SignatureError::ExtraRawOptions(param.name.clone()));
                }
                signature.raw_options = Some(param.name.clone());
            } else {
                let argument = Argument::from_parameter(param)?;
                signature.arguments.push((param.name.clone(), argument));
            }
        }
        Ok(signature)
    }

    /// The compiled arguments.
    pub fn arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().map(|(_, argument)| argument)
    }

    /// Name of the parameter receiving the whole parsed options, if any.
    pub fn raw_options(&self) -> Option<&str> {
        self.raw_options.as_deref()
    }

    /// Adds the arguments to the command line definition.
    pub fn augment<'s>(&'s self, app: App<'s, 's>) -> App<'s, 's> {
        self.arguments()
            .fold(app, |app, argument| app.arg(argument.clap_arg()))
    }

    /// Reads the values of the arguments into the options.
    pub fn extract(&self, matches: &ArgMatches, options: &mut ParsedOptions) -> Result<(), CommandError> {
        for argument in self.arguments() {
            options.insert(argument.dest.clone(), argument.value(matches)?);
        }
        Ok(())
    }

    /// Builds the handler arguments out of the parsed options.
    pub fn call_arguments(&self, options: &ParsedOptions) -> Arguments {
        let mut arguments = self
            .arguments
            .iter()
            .map(|(name, argument)| {
                let value = options.get(&argument.dest).cloned().unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect::<Arguments>();
        if let Some(name) = &self.raw_options {
            arguments.set_options(name.clone(), options.clone());
        }
        arguments
    }
}
