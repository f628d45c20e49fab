//! Terminal renderers: turn a processed record into one output line.

use std::fmt::Write as _;

use crate::exceptions::resolve_exc_info;
use crate::record::EventRecord;
use crate::value::Value;

/// Serializes a fully processed record into the line handed to a sink.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &EventRecord) -> String;
}

/// One JSON object per line, keys in record order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, record: &EventRecord) -> String {
        record.to_json().to_string()
    }
}

const LEVEL_WIDTH: usize = 8;
const MESSAGE_WIDTH: usize = 30;

/// Fields rendered in fixed positions rather than as `key=value` pairs.
const LAYOUT_KEYS: [&str; 7] = [
    "timestamp",
    "level",
    "message",
    "event",
    "exception",
    "exc_info",
    "stack",
];

/// Human-readable single line:
/// `<timestamp> [<level>] <message> key=value ...`.
///
/// A plain-text `exception` or `stack` field is printed on the following
/// lines.
#[derive(Debug, Clone, Default)]
pub struct ConsoleRenderer {
    colors: bool,
}

impl ConsoleRenderer {
    pub fn new(colors: bool) -> Self {
        Self { colors }
    }

    pub fn colors(&self) -> bool {
        self.colors
    }

    #[cfg(feature = "console")]
    fn paint(&self, text: &str, style: Paint) -> String {
        use console::Style;

        if !self.colors {
            return text.to_string();
        }
        let style = match style {
            Paint::Dim => Style::new().dim(),
            Paint::Key => Style::new().cyan(),
            Paint::Value => Style::new().magenta(),
            Paint::Message => Style::new().bold(),
            Paint::Level(level) => match level {
                "DEBUG" => Style::new().green(),
                "INFO" => Style::new().green().bold(),
                "WARN" => Style::new().yellow().bold(),
                "ERROR" => Style::new().red().bold(),
                "CRITICAL" => Style::new().red().bold().reverse(),
                _ => Style::new(),
            },
        };
        style.force_styling(true).apply_to(text).to_string()
    }

    #[cfg(not(feature = "console"))]
    fn paint(&self, text: &str, _style: Paint) -> String {
        text.to_string()
    }
}

#[derive(Clone, Copy)]
#[cfg_attr(not(feature = "console"), allow(dead_code))]
enum Paint<'a> {
    Dim,
    Key,
    Value,
    Message,
    Level(&'a str),
}

impl Renderer for ConsoleRenderer {
    fn render(&self, record: &EventRecord) -> String {
        let mut line = String::new();

        if let Some(ts) = record.get("timestamp") {
            line.push_str(&self.paint(&ts.to_string(), Paint::Dim));
            line.push(' ');
        }

        let level = record.get_str("level").unwrap_or("");
        let padded = format!("{:<width$}", level, width = LEVEL_WIDTH);
        let _ = write!(line, "[{}] ", self.paint(&padded, Paint::Level(level)));

        let message = record
            .get("message")
            .or_else(|| record.get("event"))
            .map(ToString::to_string)
            .unwrap_or_default();
        let padded = format!("{:<width$}", message, width = MESSAGE_WIDTH);
        line.push_str(&self.paint(&padded, Paint::Message));

        for (key, value) in record.iter() {
            if LAYOUT_KEYS.contains(&key) {
                continue;
            }
            let _ = write!(
                line,
                " {}={}",
                self.paint(key, Paint::Key),
                self.paint(&value.to_string(), Paint::Value)
            );
        }
        let trimmed = line.trim_end().len();
        line.truncate(trimmed);

        for key in ["stack", "exception"] {
            match record.get(key) {
                Some(Value::Str(text)) => {
                    line.push('\n');
                    line.push_str(text);
                }
                Some(other) if key == "exception" => {
                    let _ = write!(line, " exception={}", other);
                }
                _ => {}
            }
        }
        if let Some(err) = record
            .get("exc_info")
            .filter(|v| v.is_truthy())
            .and_then(resolve_exc_info)
        {
            line.push('\n');
            line.push_str(&err.format_traceback());
        }
        line
    }
}

/// Whether stdout is an interactive terminal.
#[cfg(feature = "console")]
pub fn stdout_is_terminal() -> bool {
    console::Term::stdout().is_term()
}

#[cfg(not(feature = "console"))]
pub fn stdout_is_terminal() -> bool {
    false
}

/// Whether stderr is an interactive terminal.
#[cfg(feature = "console")]
pub fn stderr_is_terminal() -> bool {
    console::Term::stderr().is_term()
}

#[cfg(not(feature = "console"))]
pub fn stderr_is_terminal() -> bool {
    false
}
