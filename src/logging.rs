//! Logging setup
//! Records go to `env_logger` as usual and are also published on a broadcast
//! channel, so a display layer can show them without owning the logger.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: String,
}

pub struct LogForwarder {
    inner: env_logger::Logger,
    sender: broadcast::Sender<LogMessage>,
}

impl LogForwarder {
    /// Builds the forwarder. `RUST_LOG` overrides `level` when set.
    pub fn new(level: LevelFilter) -> Self {
        let inner = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .build();
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { inner, sender }
    }

    pub fn sender(&self) -> broadcast::Sender<LogMessage> {
        self.sender.clone()
    }

    pub fn filter(&self) -> LevelFilter {
        self.inner.filter()
    }

    fn emit_log(&self, record: &Record) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        let log_message = LogMessage {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        // Nobody listening is fine; lagging receivers drop old records.
        let _ = self.sender.send(log_message);
    }
}

impl Log for LogForwarder {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.inner.log(record);
            self.emit_log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the global logger and returns the channel its records are published on.
///
/// Only the first call succeeds; later calls return the `SetLoggerError`.
pub fn init(level: LevelFilter) -> Result<broadcast::Sender<LogMessage>, SetLoggerError> {
    let forwarder = LogForwarder::new(level);
    let sender = forwarder.sender();
    let max_level = forwarder.filter();
    log::set_boxed_logger(Box::new(forwarder)).map(|()| log::set_max_level(max_level))?;
    Ok(sender)
}
