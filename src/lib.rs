use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod config;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod telemetry;

use crate::config::{AppConfig, SinkKind};
use crate::middleware::{add_custom_logger, DefaultLogSink, JsonLogSink, LogSink};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
}

/// Builds the demo application with the sink selected in `config.logging`.
pub fn create_app(config: AppConfig) -> Router {
    let sink: Arc<dyn LogSink> = match config.logging.sink {
        SinkKind::Default => Arc::new(DefaultLogSink),
        SinkKind::Json => Arc::new(JsonLogSink),
    };
    create_app_with_sink(config, sink)
}

/// Builds the demo application around a caller-supplied sink.
///
/// The request logger sits directly above the routes. A panic it re-raises
/// is turned into a 500 by `CatchPanicLayer`, the way the stack would
/// without the logger.
pub fn create_app_with_sink<L: LogSink>(config: AppConfig, sink: L) -> Router {
    let timeout = Duration::from_secs(config.server.timeout_seconds);
    let disable_default_loggers = config.logging.disable_default_loggers;
    let state = AppState {
        config: Arc::new(config),
    };

    let routes = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/v1/echo", post(routes::echo::echo))
        .route("/api/v1/fail", get(routes::echo::fail));

    add_custom_logger(routes, sink, disable_default_loggers)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Outside the logger so the timeout also bounds request capture.
                .layer(TimeoutLayer::new(timeout))
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}
