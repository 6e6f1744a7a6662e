//! Rendering of the check results.

use std::io::{Result as IoResult, Write};

use console::Style;

use super::messages::{CheckMessage, Level};
use super::registry::{Check, CheckRegistry};
use crate::conf::Settings;

const WIDTH: usize = 80;

fn styles(level: Level) -> (Style, Style) {
    // (title, border)
    match level {
        Level::Critical => (Style::new().white().on_red(), Style::new().red()),
        Level::Error => (Style::new().red(), Style::new().red()),
        Level::Warning => (Style::new().yellow(), Style::new().yellow()),
        Level::Info => (Style::new().cyan(), Style::new().cyan()),
        Level::Debug => (Style::new().magenta(), Style::new().magenta()),
    }
}

/// Word-wraps text, indenting the continuation lines.
fn wrap_text(text: &str, indent: usize) -> Vec<String> {
    let limit = WIDTH - 2 - indent;
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > limit {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

/// A report of the checks of a [`CheckRegistry`].
///
/// Each message is rendered as a framed block with its level, object, message and hint. A check
/// producing no (shown) messages is rendered as a single dot. The tabular variant instead outputs
/// one tab separated `name, level, message` line per message (or `name, OK` per passing check),
/// which is easier to process by other tools.
pub struct CheckReport<'a> {
    registry: &'a CheckRegistry,
    verbose: bool,
    no_color: bool,
    tabular: bool,
    header: Option<String>,
}

impl<'a> CheckReport<'a> {
    /// Creates a colored, non-verbose report.
    pub fn new(registry: &'a CheckRegistry) -> Self {
        CheckReport {
            registry,
            verbose: false,
            no_color: false,
            tabular: false,
            header: None,
        }
    }

    /// Shows the name of each check before its results.
    pub fn verbose(self, verbose: bool) -> Self {
        CheckReport { verbose, ..self }
    }

    /// Disables the terminal colors.
    pub fn no_color(self, no_color: bool) -> Self {
        CheckReport { no_color, ..self }
    }

    /// Switches to the tab separated output (colors and verbosity are ignored).
    pub fn tabular(self, tabular: bool) -> Self {
        CheckReport { tabular, ..self }
    }

    /// A header shown before the results in verbose mode.
    pub fn header<H: Into<String>>(self, header: H) -> Self {
        CheckReport {
            header: Some(header.into()),
            ..self
        }
    }

    fn paint<D: std::fmt::Display>(&self, style: &Style, text: D) -> String {
        if self.no_color {
            text.to_string()
        } else {
            style.clone().force_styling(true).apply_to(text).to_string()
        }
    }

    fn render_message<W: Write>(&self, out: &mut W, message: &CheckMessage) -> IoResult<()> {
        let (title_style, border_style) = styles(message.level);
        let border = self.paint(&border_style, "=".repeat(WIDTH));
        let title = match &message.obj {
            Some(obj) => format!("{} - {}", obj, message.msg),
            None => message.msg.clone(),
        };
        let title = wrap_text(&title, 9).join(&format!("\n{:9}", ""));
        writeln!(out, "{}", border)?;
        if self.no_color {
            writeln!(out, " {}: {}", message.level, title)?;
        } else {
            let level = self.paint(&title_style.clone().bold(), format!("{:7}", message.level));
            writeln!(out, "{} {}", level, self.paint(&title_style, title))?;
        }
        if let Some(hint) = &message.hint {
            let hint = hint
                .split("\n\n")
                .map(|paragraph| wrap_text(paragraph, 8).join(&format!("\n{:8}", "")))
                .collect::<Vec<_>>()
                .join("\n\n");
            writeln!(out, "{}", self.paint(&border_style, "-".repeat(WIDTH)))?;
            let hint_label = self.paint(&Style::new().bold(), "HINT:");
            writeln!(out, " {} {}", hint_label, self.paint(&Style::new().dim(), hint))?;
        }
        writeln!(out, "{}", border)?;
        writeln!(out)
    }

    fn render_row<W: Write>(
        out: &mut W,
        check: &Check,
        message: Option<&CheckMessage>,
    ) -> IoResult<()> {
        match message {
            Some(message) => writeln!(out, "{}\t{}\t{}", check.name(), message.level, message.msg),
            None => writeln!(out, "{}\tOK\t", check.name()),
        }
    }

    /// Runs the checks having any of the tags and writes the report.
    ///
    /// Only messages of at least `message_level` are shown. Returns whether any serious message
    /// (error or above) was produced, shown or not.
    pub fn run<W: Write>(
        &self,
        settings: &Settings,
        mut out: W,
        message_level: Level,
        tags: &[&str],
    ) -> IoResult<bool> {
        if let (Some(header), true, false) = (&self.header, self.verbose, self.tabular) {
            writeln!(out, "{}", header)?;
        }
        let mut serious = false;
        for outcome in self.registry.run_checks_iter(settings, tags, |_| ()) {
            if self.verbose && !self.tabular {
                let name = self.paint(&Style::new().cyan(), outcome.check.name());
                writeln!(out, "{} {}", self.paint(&Style::new().yellow(), "+"), name)?;
            }
            let mut shown = false;
            for message in &outcome.messages {
                serious |= message.is_serious(Level::Error);
                if message.level >= message_level {
                    shown = true;
                    if self.tabular {
                        Self::render_row(&mut out, &outcome.check, Some(message))?;
                    } else {
                        self.render_message(&mut out, message)?;
                    }
                }
            }
            if !shown {
                if self.tabular {
                    Self::render_row(&mut out, &outcome.check, None)?;
                } else if !self.verbose {
                    writeln!(out, ".")?;
                }
            }
        }
        Ok(serious)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CheckRegistry {
        let registry = CheckRegistry::new();
        registry.register(Check::function("passing", |_| Ok(Vec::new())), &[]);
        registry.register(
            Check::function("warning", |_| {
                Ok(vec![CheckMessage::warn("Something odd")
                    .hint("Fix the odd thing")
                    .obj("settings.ODD")])
            }),
            &["odd"],
        );
        registry
    }

    fn run(report: CheckReport, level: Level, tags: &[&str]) -> (bool, String) {
        let mut out = Vec::new();
        let serious = report.run(&Settings::new(), &mut out, level, tags).unwrap();
        (serious, String::from_utf8(out).unwrap())
    }

    #[test]
    fn plain_report() {
        let registry = registry();
        let (serious, out) = run(CheckReport::new(&registry).no_color(true), Level::Info, &[]);
        assert!(!serious);
        let border = "=".repeat(WIDTH);
        let expected = format!(
            ".\n{b}\n WARNING: settings.ODD - Something odd\n{d}\n HINT: Fix the odd thing\n{b}\n\n",
            b = border,
            d = "-".repeat(WIDTH)
        );
        assert_eq!(expected, out);
    }

    #[test]
    fn filtered_level() {
        let registry = registry();
        let (_, out) = run(CheckReport::new(&registry).no_color(true), Level::Error, &[]);
        assert_eq!(".\n.\n", out);
    }

    #[test]
    fn verbose_with_header() {
        let registry = registry();
        let report = CheckReport::new(&registry)
            .no_color(true)
            .verbose(true)
            .header("Checks");
        let (_, out) = run(report, Level::Info, &["odd"]);
        assert!(out.starts_with("Checks\n+ warning\n"));
        assert!(!out.contains("+ passing"));
    }

    #[test]
    fn tabular() {
        let registry = registry();
        let (_, out) = run(CheckReport::new(&registry).tabular(true), Level::Info, &[]);
        assert_eq!("passing\tOK\t\nwarning\tWARNING\tSomething odd\n", out);
    }

    #[test]
    fn serious_messages() {
        let registry = registry();
        registry.register(Check::function("broken", |_| Err("Broken".into())), &[]);
        let (serious, out) = run(CheckReport::new(&registry), Level::Critical, &[]);
        assert!(serious);
        assert_eq!(".\n.\n.\n", out);
    }

    #[test]
    fn wrapping() {
        let text = "word ".repeat(40);
        let lines = wrap_text(&text, 9);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= WIDTH - 11));
    }
}
