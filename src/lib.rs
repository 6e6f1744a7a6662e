#![doc(test(attr(deny(warnings))))]
#![allow(clippy::type_complexity)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Bootstrapping of command line applications.
//!
//! Most command line tools and services need the same plumbing before they can do anything
//! useful. They read settings from several places, build objects (database connections, clients,
//! caches...) described by those settings and parse the command line. They also have to set up
//! logging and often check their environment is sane before starting. This crate does that
//! plumbing so the application itself doesn't have to.
//!
//! # The parts
//!
//! * [`conf`]: The [`Settings`][conf::Settings] container, layered from settings modules, files
//!   and other [sources][conf::loaders]. On top of it, [named configurations and plugin
//!   factories][conf::helpers] turn blocks of settings into runtime objects.
//! * [`arguments`]: Describes handler parameters and compiles them into command line arguments.
//!   Handlers are organized into (nested) [command groups][arguments::CommandGroup].
//! * [`injection`]: Supplies handlers with objects built by registered factories.
//! * [`checks`]: Pre-flight diagnostics of the settings and the environment.
//! * [`extensions`]: Bundles of default settings, checks and commands provided by libraries.
//! * [`events`]: Events and callbacks with sync or async listeners.
//! * [`app`]: The [`CliApplication`][app::CliApplication] connecting all the above.
//!
//! Each of the registries has a process-wide instance, reachable through a `registry()`
//! function of its module, but all the parts also accept an explicit instance. That makes it
//! possible to use isolated instances in tests.
//!
//! # Examples
//!
//! ```rust
//! use appframe::prelude::*;
//! use serde_json::json;
//!
//! settings_modules().register("shop.default_settings", || {
//!     json!({ "GREETING": "Welcome" })
//! });
//!
//! let mut app = CliApplication::new("shop")
//!     .version("0.1.0")
//!     .application_settings("shop.default_settings");
//! let settings = std::sync::Arc::clone(app.get_settings());
//! let greet = CommandProxy::new(&[Parameter::positional("name", ArgType::Str)], move |args| {
//!     let greeting: String = settings.get_as("GREETING")?;
//!     println!("{} {}", greeting, args.get_as::<String>("name")?);
//!     Ok(None)
//! })
//! .unwrap();
//! app.command("greet", greet);
//!
//! assert_eq!(0, app.dispatch(vec!["shop", "greet", "customer"]));
//! ```
//!
//! # Features
//!
//! * `yaml`: Settings files and reports in YAML.
//! * `toml-format`: Settings files and reports in TOML.
//!
//! Both are on by default. JSON is always available.
//!
//! Loading settings over HTTP lives in the `appframe-http` crate.

pub mod app;
pub mod arguments;
pub mod checks;
pub mod conf;
pub mod error;
pub mod events;
pub mod extensions;
pub mod injection;
pub mod utils;

pub use serde_json::Value;

pub use crate::error::AnyError;

#[doc(hidden)]
pub mod macro_support {
    pub use log::Level;
}

/// The most commonly used types.
pub mod prelude {
    pub use crate::app::CliApplication;
    pub use crate::arguments::{
        Arg, ArgType, Arguments, AsyncCommandProxy, CommandGroup, CommandProxy, HandlerResult,
        Parameter, TypeTag,
    };
    pub use crate::conf::helpers::{NamedConfiguration, NamedPluginFactory};
    pub use crate::conf::loaders::settings_modules;
    pub use crate::conf::Settings;
    pub use crate::extensions::Extension;
    pub use crate::injection::{inject, register_factory, Dependency};
    pub use crate::AnyError;
}
