use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
    Success,
}

/// A user-facing log line streamed to whatever is displaying the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub message: String,
    pub level: StatusLevel,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget emitter for [`StatusEvent`]s.
///
/// Sending never fails the caller: with no subscribers the event is only
/// written to the tracing log.
#[derive(Clone)]
pub struct StatusSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Info | StatusLevel::Success => info!(target: "webcursor::status", "{message}"),
            StatusLevel::Warn => warn!(target: "webcursor::status", "{message}"),
            StatusLevel::Error => error!(target: "webcursor::status", "{message}"),
        }
        let _ = self.tx.send(StatusEvent {
            message,
            level,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Success, message);
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new(64)
    }
}
