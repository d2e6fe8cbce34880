//! Reporting capability threaded through the pipeline.
//!
//! Stages never reach for a global logger; they receive a `&dyn Reporter`
//! owned by the caller.

use std::cell::RefCell;

pub trait Reporter {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Forwards to the `log` facade (install `env_logger` or any other backend).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, msg: &str) {
        log::info!("{msg}");
    }

    fn warn(&self, msg: &str) {
        log::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        log::error!("{msg}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Keeps every message in memory. Useful in tests and for callers that want to
/// show corrections to a user after the fact.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    entries: RefCell<Vec<(Level, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.borrow().clone()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries.borrow().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn push(&self, level: Level, msg: &str) {
        self.entries.borrow_mut().push((level, msg.to_string()));
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, msg: &str) {
        self.push(Level::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(Level::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(Level::Error, msg);
    }
}
