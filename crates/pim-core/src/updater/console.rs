// # Console Attachment
//
// An updater can mirror its log events to an interactive output (a terminal,
// or a buffer returned to a dashboard). The console is only an observer: it
// never changes what the updater does.

use std::sync::Mutex;

/// Severity of an updater event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Step-by-step narration
    Debug,
    /// Routine outcome
    Info,
    /// Something changed
    Notice,
    /// A provider reported a problem or returned an invalid entry
    Error,
    /// The cycle was aborted
    Critical,
}

/// How much a console wants to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Nothing at all
    Quiet,
    /// Everything except debug narration
    Normal,
    /// Everything
    Verbose,
    /// Everything (kept distinct for callers mapping `-vv`)
    Debug,
}

impl Verbosity {
    /// Whether an event of `level` should be shown
    pub fn shows(self, level: LogLevel) -> bool {
        match self {
            Verbosity::Quiet => false,
            _ if level == LogLevel::Debug => self >= Verbosity::Verbose,
            _ => true,
        }
    }

    /// Map a `-v` count, with `quiet` taking precedence
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, 1) => Verbosity::Verbose,
            (false, _) => Verbosity::Debug,
        }
    }
}

/// Output stream attached to an updater
pub trait ConsoleSink: Send + Sync {
    /// Threshold for mirrored events
    fn verbosity(&self) -> Verbosity;

    /// Write one line
    fn write_line(&self, line: &str);
}

/// Console that keeps lines in memory
///
/// Used to hand the narration of a cycle back to a caller (e.g. as the body
/// of a dashboard response).
#[derive(Debug)]
pub struct BufferedConsole {
    verbosity: Verbosity,
    lines: Mutex<Vec<String>>,
}

impl BufferedConsole {
    /// Create an empty buffer
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Take the lines written so far, leaving the buffer empty
    pub fn take(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl ConsoleSink for BufferedConsole {
    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn write_line(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}
