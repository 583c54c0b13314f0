use std::sync::Arc;

use tracing::{debug, error, info, warn, Level};

use super::event::{ErrorEvent, FieldValue, Fields, SuccessEvent};

/// Target used for every line the built-in sinks emit.
pub const LOG_TARGET: &str = "request_logger";

/// Number of leading bytes shown when a field holds a non-text body.
pub const BYTES_PREVIEW_LEN: usize = 20;

/// Receives exactly one event per request.
///
/// `on_success` runs after the response body has been handed to the
/// transport. `on_error` runs inline, before the failure is propagated.
pub trait LogSink: Send + Sync + 'static {
    fn on_success(&self, event: &SuccessEvent);
    fn on_error(&self, event: &ErrorEvent);
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn on_success(&self, event: &SuccessEvent) {
        (**self).on_success(event)
    }

    fn on_error(&self, event: &ErrorEvent) {
        (**self).on_error(event)
    }
}

pub type SharedSink = Arc<dyn LogSink>;

/// Severity scheme used by [`render_lines`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Mapping entries at INFO, everything else at DEBUG.
    Normal,
    /// Every line at ERROR.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
}

pub fn render_lines(fields: &Fields<'_>, tier: Tier) -> Vec<LogLine> {
    let level = |normal: Level| match tier {
        Tier::Normal => normal,
        Tier::Error => Level::ERROR,
    };

    let mut lines = Vec::new();
    for (name, value) in fields {
        match value {
            FieldValue::Map(map) => {
                for (key, value) in map.iter() {
                    lines.push(LogLine {
                        level: level(Level::INFO),
                        message: format!("{}: {} = {}", name, key, value),
                    });
                }
            }
            FieldValue::Bytes(bytes) => {
                let preview = &bytes[..bytes.len().min(BYTES_PREVIEW_LEN)];
                lines.push(LogLine {
                    level: level(Level::DEBUG),
                    message: format!("{}: \"{}\"", name, preview.escape_ascii()),
                });
            }
            FieldValue::Text(text) => lines.push(LogLine {
                level: level(Level::DEBUG),
                message: format!("{}: {}", name, text),
            }),
            FieldValue::Integer(number) => lines.push(LogLine {
                level: level(Level::DEBUG),
                message: format!("{}: {}", name, number),
            }),
            FieldValue::Absent => lines.push(LogLine {
                level: level(Level::DEBUG),
                message: format!("{}: None", name),
            }),
        }
    }
    lines
}

fn emit(line: &LogLine) {
    match line.level {
        Level::ERROR => error!(target: LOG_TARGET, "{}", line.message),
        Level::INFO => info!(target: LOG_TARGET, "{}", line.message),
        _ => debug!(target: LOG_TARGET, "{}", line.message),
    }
}

/// Logs every field of a successful exchange.
pub fn default_logger(event: &SuccessEvent) {
    render_lines(&event.fields(), Tier::Normal)
        .iter()
        .for_each(emit);
}

/// Logs every field of a failed exchange at ERROR.
pub fn default_error_logger(event: &ErrorEvent) {
    render_lines(&event.fields(), Tier::Error)
        .iter()
        .for_each(emit);
}

/// Sink backed by [`default_logger`] and [`default_error_logger`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLogSink;

impl LogSink for DefaultLogSink {
    fn on_success(&self, event: &SuccessEvent) {
        default_logger(event)
    }

    fn on_error(&self, event: &ErrorEvent) {
        default_error_logger(event)
    }
}

/// Writes each event as a single JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogSink;

impl LogSink for JsonLogSink {
    fn on_success(&self, event: &SuccessEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: LOG_TARGET, "{}", json),
            Err(e) => warn!(target: LOG_TARGET, error = %e, "Failed to serialize log event"),
        }
    }

    fn on_error(&self, event: &ErrorEvent) {
        match serde_json::to_string(event) {
            Ok(json) => error!(target: LOG_TARGET, "{}", json),
            Err(e) => warn!(target: LOG_TARGET, error = %e, "Failed to serialize log event"),
        }
    }
}

type SuccessCallback = Arc<dyn Fn(&SuccessEvent) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

/// A sink assembled from two optional closures.
///
/// A slot left empty falls back to the matching default logger.
#[derive(Clone, Default)]
pub struct LoggerCallbacks {
    success: Option<SuccessCallback>,
    error: Option<ErrorCallback>,
}

impl LoggerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_success_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&SuccessEvent) + Send + Sync + 'static,
    {
        self.success = Some(Arc::new(logger));
        self
    }

    pub fn with_error_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(logger));
        self
    }
}

impl LogSink for LoggerCallbacks {
    fn on_success(&self, event: &SuccessEvent) {
        match &self.success {
            Some(logger) => logger(event),
            None => default_logger(event),
        }
    }

    fn on_error(&self, event: &ErrorEvent) {
        match &self.error {
            Some(logger) => logger(event),
            None => default_error_logger(event),
        }
    }
}
