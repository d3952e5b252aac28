// Error channel: records the outcome of the last operation and emits
// `<timestamp> <caller>: <message>` lines to stderr.
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn emits_errors(self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    pub fn emits_notices(self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

#[derive(Clone, Debug, Default)]
enum Sink {
    #[default]
    Stderr,
    Buffer(Arc<Mutex<Vec<String>>>),
}

#[derive(Clone, Debug, Default)]
struct LastError {
    kind: Option<ErrorKind>,
    code: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ErrorChannel {
    verbosity: Verbosity,
    last: LastError,
    sink: Sink,
}

impl ErrorChannel {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            ..Self::default()
        }
    }

    /// Collects emitted lines into `buffer` instead of writing to stderr.
    pub fn with_buffer(mut self, buffer: Arc<Mutex<Vec<String>>>) -> Self {
        self.sink = Sink::Buffer(buffer);
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn reset(&mut self) {
        self.last = LastError::default();
    }

    pub fn failed(&self) -> bool {
        self.last.kind.is_some()
    }

    pub fn last_kind(&self) -> Option<ErrorKind> {
        self.last.kind
    }

    pub fn last_code(&self) -> Option<&str> {
        self.last.code.as_deref()
    }

    /// Records a failed outcome and emits its lines; success leaves the
    /// channel neutral. Captured diagnostics are dropped from the error.
    pub fn observe<T>(&mut self, caller: &str, result: &mut Result<T, Error>) {
        let Err(err) = result else {
            return;
        };
        self.last = LastError {
            kind: Some(err.kind()),
            code: err.code().map(str::to_string),
        };
        debug!(op = caller, kind = ?err.kind(), code = err.code(), "{err}");
        let lines = format_error(caller, err, &timestamp_now());
        err.take_diagnostics();
        if self.verbosity.emits_errors() {
            self.write_lines(&lines);
        }
    }

    pub fn notice(&self, caller: &str, message: &str) {
        if self.verbosity.emits_notices() {
            self.write_lines(&[format_line(&timestamp_now(), caller, message)]);
        }
    }

    fn write_lines(&self, lines: &[String]) {
        match &self.sink {
            Sink::Stderr => {
                for line in lines {
                    eprintln!("{line}");
                }
            }
            Sink::Buffer(buffer) => {
                if let Ok(mut buffer) = buffer.lock() {
                    buffer.extend(lines.iter().cloned());
                }
            }
        }
    }
}

pub fn format_line(timestamp: &str, caller: &str, message: &str) -> String {
    format!("{timestamp} {caller}: {message}")
}

/// One line per non-blank diagnostic line, or a single summary line when the
/// error carries no diagnostic text.
pub fn format_error(caller: &str, err: &Error, timestamp: &str) -> Vec<String> {
    let diagnostic_lines: Vec<String> = err
        .diagnostics()
        .unwrap_or_default()
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| format_line(timestamp, caller, line))
        .collect();
    if diagnostic_lines.is_empty() {
        return vec![format_line(timestamp, caller, &err.to_string())];
    }
    diagnostic_lines
}

pub fn timestamp_now() -> String {
    use time::format_description::well_known::Rfc3339;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| {
            time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()
        })
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}
