// Middleware modules
pub mod deferred;
pub mod event;
pub mod logging;
pub mod sink;

use axum::Router;

pub use event::{CapturedBody, ErrorEvent, FieldValue, LogEvent, RequestFields, ResponseFields, SuccessEvent};
pub use logging::{RequestLogger, RequestLoggerLayer};
pub use sink::{
    default_error_logger, default_logger, DefaultLogSink, JsonLogSink, LogSink, LoggerCallbacks,
};

/// Installs the request logger on `app` and returns it.
///
/// When `disable_default_logging` is set, the framework and server tracing
/// targets are raised to ERROR first; see
/// [`crate::telemetry::disable_default_loggers`].
pub fn add_custom_logger<S, L>(app: Router<S>, sink: L, disable_default_logging: bool) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    L: LogSink,
{
    if disable_default_logging {
        crate::telemetry::disable_default_loggers();
    }

    app.layer(RequestLoggerLayer::new(sink))
}
