//! Logging setup
//!
//! Human-readable events go to stderr. The same events are written as JSON
//! lines to the run's `events.ndjson` once [`EventLog::open`] has been called;
//! before that the JSON layer discards its output.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Default)]
pub struct EventLog {
    file: Arc<Mutex<Option<File>>>,
}

impl EventLog {
    /// Start appending events to `path`
    pub fn open(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock() = Some(file);
        Ok(())
    }

    /// Flush and stop writing
    pub fn close(&self) -> io::Result<()> {
        if let Some(mut file) = self.file.lock().take() {
            file.flush()?;
        }
        Ok(())
    }
}

pub struct EventLogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for EventLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for EventLog {
    type Writer = EventLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventLogWriter {
            file: self.file.clone(),
        }
    }
}

/// Install the global subscriber and return the run event log handle
pub fn init(verbose: bool) -> EventLog {
    let log_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let events = EventLog::default();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(events.clone()),
        )
        .init();
    events
}
