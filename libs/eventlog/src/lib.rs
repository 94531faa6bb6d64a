//! # verge-eventlog
//!
//! Structured event sink consumed by the reconciliation engine.
//!
//! The log is observational only: the engine writes progress and error
//! events per action, nothing ever reads them back on the hot path. Every
//! record is kept in a shared buffer (so callers and tests can inspect
//! what happened) and mirrored to `tracing` at the matching level.
//!
//! The log is the one shared mutable collaborator in a revision and must
//! be safe under concurrent writes; it is `Clone + Send + Sync` and all
//! clones share the same buffer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured key/value context attached to an event.
pub type Fields = BTreeMap<String, String>;

/// One recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    pub level: Level,
    pub message: String,
    pub fields: Fields,
    pub recorded_at: DateTime<Utc>,
}

/// Thread-safe structured event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an event with structured fields attached.
    pub fn with_fields(&self, fields: Fields) -> EventScope {
        EventScope {
            log: self.clone(),
            fields,
        }
    }

    /// Start an event, adding fields fluently.
    pub fn scope(&self) -> EventScope {
        self.with_fields(Fields::new())
    }

    pub fn debug(&self, message: &str) {
        self.record(Level::Debug, Fields::new(), message);
    }

    pub fn info(&self, message: &str) {
        self.record(Level::Info, Fields::new(), message);
    }

    pub fn warn(&self, message: &str) {
        self.record(Level::Warn, Fields::new(), message);
    }

    pub fn error(&self, message: &str) {
        self.record(Level::Error, Fields::new(), message);
    }

    /// Record an error value at error level.
    pub fn log_error(&self, err: &dyn std::error::Error) {
        self.record(Level::Error, Fields::new(), &err.to_string());
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.buffer().clone()
    }

    /// Take all recorded events, leaving the buffer empty.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.buffer())
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<Event>> {
        // A poisoned buffer still holds valid events.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, level: Level, fields: Fields, message: &str) {
        match level {
            Level::Debug => tracing::debug!(?fields, "{message}"),
            Level::Info => tracing::info!(?fields, "{message}"),
            Level::Warn => tracing::warn!(?fields, "{message}"),
            Level::Error => tracing::error!(?fields, "{message}"),
        }
        self.buffer().push(Event {
            level,
            message: message.to_string(),
            fields,
            recorded_at: Utc::now(),
        });
    }
}

/// Builder for one event carrying structured fields.
pub struct EventScope {
    log: EventLog,
    fields: Fields,
}

impl EventScope {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn debug(self, message: &str) {
        self.log.record(Level::Debug, self.fields, message);
    }

    pub fn info(self, message: &str) {
        self.log.record(Level::Info, self.fields, message);
    }

    pub fn warn(self, message: &str) {
        self.log.record(Level::Warn, self.fields, message);
    }

    pub fn error(self, message: &str) {
        self.log.record(Level::Error, self.fields, message);
    }
}
