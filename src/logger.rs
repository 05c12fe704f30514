//! Asynchronous, severity-filtered logging
//!
//! A [`Logger`] is a cheap cloneable handle given to each connection. Submitting a
//! record never blocks: it is pushed onto an unbounded MPSC queue and a dedicated log
//! thread hands it to the [`LogSink`]. Records from one producer reach the sink in the
//! order they were submitted.
//!
//! [`Logger::shutdown`] is idempotent. It stops accepting records, enqueues a sentinel,
//! and waits for the log thread to drain everything queued ahead of it. Records
//! submitted after shutdown starts are dropped.

use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Log severity, most severe first
///
/// A logger configured at a given level emits records at that level and every more
/// severe one. `Disabled` emits nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Nothing is logged
    Disabled,
    /// Unrecoverable failures
    Critical,
    /// Failures
    Error,
    /// Unexpected but tolerated conditions
    #[default]
    Warn,
    /// Lifecycle events
    Info,
    /// Protocol detail
    Debug,
    /// Everything
    Trace,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Critical => write!(f, "critical"),
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "critical" => Ok(Self::Critical),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(Error::Config(format!("invalid log level '{}'", s))),
        }
    }
}

/// One submitted log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity it was logged at
    pub severity: Severity,
    /// Formatted message
    pub message: String,
    /// Submission time
    pub timestamp: SystemTime,
}

/// Destination for log records, called on the log thread only
pub trait LogSink: Send + 'static {
    /// Handle one record
    fn log(&mut self, record: &LogRecord);

    /// Called once after the last record
    fn flush(&mut self) {}
}

/// Forwards records to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, record: &LogRecord) {
        match record.severity {
            Severity::Disabled => {}
            Severity::Critical => tracing::error!(critical = true, "{}", record.message),
            Severity::Error => tracing::error!("{}", record.message),
            Severity::Warn => tracing::warn!("{}", record.message),
            Severity::Info => tracing::info!("{}", record.message),
            Severity::Debug => tracing::debug!("{}", record.message),
            Severity::Trace => tracing::trace!("{}", record.message),
        }
    }
}

enum Entry {
    Record(LogRecord),
    Disabled,
}

struct Inner {
    level: Severity,
    tx: Option<mpsc::UnboundedSender<Entry>>,
    shutting_down: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the log thread
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    /// Start a log thread feeding `sink`
    pub fn new(level: Severity, sink: impl LogSink) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Entry>();
        let mut sink = sink;

        let thread = std::thread::Builder::new()
            .name("cql-wire-log".into())
            .spawn(move || {
                while let Some(entry) = rx.blocking_recv() {
                    match entry {
                        Entry::Record(record) => sink.log(&record),
                        Entry::Disabled => break,
                    }
                }
                // producers that passed the shutdown check before the sentinel was queued
                while let Ok(Entry::Record(record)) = rx.try_recv() {
                    sink.log(&record);
                }
                sink.flush();
            })
            .map_err(|e| Error::Config(format!("failed to start log thread: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                level,
                tx: Some(tx),
                shutting_down: AtomicBool::new(false),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Logger forwarding to `tracing`
    pub fn tracing(level: Severity) -> Result<Self> {
        Self::new(level, TracingSink)
    }

    /// Logger that drops everything and owns no thread
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                level: Severity::Disabled,
                tx: None,
                shutting_down: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Configured level
    pub fn level(&self) -> Severity {
        self.inner.level
    }

    /// Whether a record at `severity` would be submitted
    pub fn enabled(&self, severity: Severity) -> bool {
        severity != Severity::Disabled
            && severity <= self.inner.level
            && self.inner.tx.is_some()
            && !self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Submit a record
    pub fn log(&self, severity: Severity, args: fmt::Arguments<'_>) {
        if !self.enabled(severity) {
            return;
        }
        if let Some(tx) = &self.inner.tx {
            let _ = tx.send(Entry::Record(LogRecord {
                severity,
                message: args.to_string(),
                timestamp: SystemTime::now(),
            }));
        }
    }

    /// Log at [`Severity::Critical`]
    pub fn critical(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Critical, args);
    }

    /// Log at [`Severity::Error`]
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Error, args);
    }

    /// Log at [`Severity::Warn`]
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Warn, args);
    }

    /// Log at [`Severity::Info`]
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Info, args);
    }

    /// Log at [`Severity::Debug`]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Debug, args);
    }

    /// Log at [`Severity::Trace`]
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Trace, args);
    }

    /// Drain queued records and stop the log thread
    ///
    /// Safe to call more than once and from any clone.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = &self.inner.tx {
            let _ = tx.send(Entry::Disabled);
        }
        let handle = match self.inner.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("log thread panicked");
            }
        }
    }

    /// Whether shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.inner.level)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
