//! Report of the settings in use.
//!
//! When the settings are collected from multiple modules, files and includes, it is not always
//! clear what exact value is in effect. The report shows the final state.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Write;
use std::str::FromStr;

use thiserror::Error;

use super::{Settings, Values};
use crate::AnyError;

/// An unknown report format was requested.
#[derive(Debug, Error)]
#[error("Invalid settings report format {0}")]
pub struct ReportFormatParseError(String);

/// The format of the settings report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    /// A two-column plain text table.
    Text,
    /// A JSON document.
    Json,
    /// A TOML document.
    #[cfg(feature = "toml-format")]
    Toml,
    /// A YAML document.
    #[cfg(feature = "yaml")]
    Yaml,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::Text
    }
}

impl FromStr for ReportFormat {
    type Err = ReportFormatParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            #[cfg(feature = "toml-format")]
            "toml" => Ok(ReportFormat::Toml),
            #[cfg(feature = "yaml")]
            "yaml" => Ok(ReportFormat::Yaml),
            s => Err(ReportFormatParseError(s.to_owned())),
        }
    }
}

impl Display for ReportFormat {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let name = match self {
            ReportFormat::Text => "text",
            ReportFormat::Json => "json",
            #[cfg(feature = "toml-format")]
            ReportFormat::Toml => "toml",
            #[cfg(feature = "yaml")]
            ReportFormat::Yaml => "yaml",
        };
        fmt.write_str(name)
    }
}

/// Report of all settings.
pub struct SettingsReport<'a> {
    settings: &'a Settings,
    format: ReportFormat,
}

impl<'a> SettingsReport<'a> {
    /// Creates a plain text report of the settings.
    pub fn new(settings: &'a Settings) -> Self {
        SettingsReport {
            settings,
            format: ReportFormat::default(),
        }
    }

    /// Changes the output format.
    pub fn format(self, format: ReportFormat) -> Self {
        SettingsReport { format, ..self }
    }

    fn text<W: Write>(values: &Values, out: &mut W) -> Result<(), AnyError> {
        let width = values.keys().map(String::len).max().unwrap_or(0).max(7);
        writeln!(out, "{:width$} | Value", "Setting", width = width)?;
        writeln!(out, "{:-<width$}-+-{:-<5}", "", "", width = width)?;
        for (key, value) in values {
            writeln!(out, "{:width$} | {}", key, value, width = width)?;
        }
        Ok(())
    }

    /// Writes the report.
    pub fn run<W: Write>(&self, mut out: W) -> Result<(), AnyError> {
        let values = self.settings.snapshot();
        match self.format {
            ReportFormat::Text => Self::text(&values, &mut out)?,
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut out, &*values)?;
                writeln!(out)?;
            }
            #[cfg(feature = "toml-format")]
            ReportFormat::Toml => {
                // The toml serializer doesn't like a scalar value after a table. The `Value`
                // type reorders the output, so go through it.
                let value = toml::Value::try_from(&*values)?;
                write!(out, "{}", toml::to_string_pretty(&value)?)?;
            }
            #[cfg(feature = "yaml")]
            ReportFormat::Yaml => serde_yaml::to_writer(&mut out, &*values)?,
        }
        Ok(())
    }
}
