//! Alert sink for soft and critical events
//!
//! Notifications are fire-and-forget: nothing in the node branches on whether
//! an alert was delivered.

use std::fmt;
use std::sync::Arc;

/// Ordered key/value context attached to an alert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(&'static str, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.0.push((key, value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Two-level notification capability
pub trait ErrorNotifier: Send + Sync {
    fn notify_soft(&self, event: &str, message: &str, metadata: &Metadata);

    fn notify_critical(
        &self,
        event: &str,
        message: &str,
        metadata: &Metadata,
        error: &(dyn std::error::Error + Send + Sync),
    );
}

/// Writes alerts to the tracing pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ErrorNotifier for LogNotifier {
    fn notify_soft(&self, event: &str, message: &str, metadata: &Metadata) {
        tracing::warn!(event = %event, metadata = %metadata, "{}", message);
    }

    fn notify_critical(
        &self,
        event: &str,
        message: &str,
        metadata: &Metadata,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        tracing::error!(event = %event, metadata = %metadata, error = %error, "{}", message);
    }
}

/// Forwards every alert to each inner notifier
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn ErrorNotifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ErrorNotifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ErrorNotifier for FanoutNotifier {
    fn notify_soft(&self, event: &str, message: &str, metadata: &Metadata) {
        for sink in &self.sinks {
            sink.notify_soft(event, message, metadata);
        }
    }

    fn notify_critical(
        &self,
        event: &str,
        message: &str,
        metadata: &Metadata,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        for sink in &self.sinks {
            sink.notify_critical(event, message, metadata, error);
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use recording::{Alert, AlertLevel, RecordingNotifier};

#[cfg(any(test, feature = "test-util"))]
mod recording {
    use super::{ErrorNotifier, Metadata};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AlertLevel {
        Soft,
        Critical,
    }

    #[derive(Debug, Clone)]
    pub struct Alert {
        pub level: AlertLevel,
        pub event: String,
        pub message: String,
        pub metadata: Metadata,
        pub error: Option<String>,
    }

    /// Keeps every alert in memory for assertions
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn alerts(&self) -> Vec<Alert> {
            self.alerts.lock().clone()
        }

        pub fn count(&self, level: AlertLevel) -> usize {
            self.alerts.lock().iter().filter(|a| a.level == level).count()
        }
    }

    impl ErrorNotifier for RecordingNotifier {
        fn notify_soft(&self, event: &str, message: &str, metadata: &Metadata) {
            self.alerts.lock().push(Alert {
                level: AlertLevel::Soft,
                event: event.to_string(),
                message: message.to_string(),
                metadata: metadata.clone(),
                error: None,
            });
        }

        fn notify_critical(
            &self,
            event: &str,
            message: &str,
            metadata: &Metadata,
            error: &(dyn std::error::Error + Send + Sync),
        ) {
            self.alerts.lock().push(Alert {
                level: AlertLevel::Critical,
                event: event.to_string(),
                message: message.to_string(),
                metadata: metadata.clone(),
                error: Some(error.to_string()),
            });
        }
    }
}
