//! Tracing setup and the switch that silences the framework's own loggers.
//!
//! Raising the default logger thresholds is process-wide and permanent:
//! there is no call that restores them.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::{LogFormat, LoggingConfig};

/// Framework-level events.
pub const FRAMEWORK_TARGET: &str = "axum";
/// Per-request access lines from `tower_http::trace::TraceLayer`.
pub const SERVER_ACCESS_TARGET: &str = "tower_http::trace";
/// Connection and protocol errors from the HTTP server.
pub const SERVER_ERROR_TARGET: &str = "hyper";

pub const DEFAULT_LOGGER_TARGETS: [&str; 3] =
    [FRAMEWORK_TARGET, SERVER_ACCESS_TARGET, SERVER_ERROR_TARGET];

/// Highest tier `tracing` knows about.
const SUPPRESSED_LEVEL: &str = "error";

static DEFAULT_LOGGERS_DISABLED: AtomicBool = AtomicBool::new(false);
static FILTER: OnceCell<FilterState> = OnceCell::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

struct FilterState {
    base: String,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl FilterState {
    fn directives(&self) -> String {
        filter_directives(&self.base, default_loggers_disabled())
    }

    fn reload(&self) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_new(self.directives())?;
        self.handle.reload(filter)?;
        Ok(())
    }
}

/// Installs the global subscriber with a reloadable filter.
///
/// `RUST_LOG`, when set, replaces `config.level` as the base directives.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let base = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());

    let filter = EnvFilter::try_new(filter_directives(&base, default_loggers_disabled()))?;
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => subscriber
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
    }

    let state = FILTER.get_or_init(|| FilterState { base, handle });
    // Picks up a disable call that landed between building the filter and now.
    state.reload()?;

    info!(directives = %state.directives(), "Tracing initialized");
    Ok(())
}

/// Raises the framework, access and server-error targets to ERROR.
///
/// Idempotent. If tracing has not been installed through [`init_tracing`]
/// yet, the change is applied when it is.
pub fn disable_default_loggers() {
    DEFAULT_LOGGERS_DISABLED.store(true, Ordering::SeqCst);

    if let Some(state) = FILTER.get() {
        if let Err(e) = state.reload() {
            warn!(error = %e, "Failed to raise default logger thresholds");
        }
    }
}

pub fn default_loggers_disabled() -> bool {
    DEFAULT_LOGGERS_DISABLED.load(Ordering::SeqCst)
}

/// Directives currently applied, or `None` when [`init_tracing`] never ran.
pub fn active_directives() -> Option<String> {
    FILTER.get().map(FilterState::directives)
}

/// Combines `base` with the suppression directives.
///
/// Any directive in `base` aimed at one of [`DEFAULT_LOGGER_TARGETS`] is
/// replaced, so applying this to its own output changes nothing.
pub fn filter_directives(base: &str, disable_default_loggers: bool) -> String {
    if !disable_default_loggers {
        return base.to_string();
    }

    let mut directives: Vec<String> = base
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .filter(|directive| {
            let target = directive_target(directive);
            !DEFAULT_LOGGER_TARGETS.iter().any(|suppressed| *suppressed == target)
        })
        .map(str::to_owned)
        .collect();

    directives.extend(
        DEFAULT_LOGGER_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, SUPPRESSED_LEVEL)),
    );
    directives.join(",")
}

fn directive_target(directive: &str) -> &str {
    directive
        .split(|c: char| c == '=' || c == '[')
        .next()
        .unwrap_or(directive)
        .trim()
}
