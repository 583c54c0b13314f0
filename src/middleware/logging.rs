use std::{
    any::Any,
    fmt::Display,
    panic::AssertUnwindSafe,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::{Body, Bytes},
    http::{Request, Response},
};
use futures::{future::BoxFuture, stream, FutureExt};
use tower::{BoxError, Layer, Service};
use tracing::warn;

use super::{
    deferred::DeferredBody,
    event::{CapturedBody, ErrorEvent, RequestFields, ResponseFields, SuccessEvent},
    sink::{DefaultLogSink, LogSink, SharedSink},
};
use crate::metrics;

/// Layer that applies [`RequestLogger`] to the wrapped service.
#[derive(Clone)]
pub struct RequestLoggerLayer {
    sink: SharedSink,
}

impl RequestLoggerLayer {
    pub fn new<L: LogSink>(sink: L) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn from_shared(sink: SharedSink) -> Self {
        Self { sink }
    }
}

impl Default for RequestLoggerLayer {
    fn default() -> Self {
        Self::new(DefaultLogSink)
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLogger<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogger {
            inner,
            sink: self.sink.clone(),
        }
    }
}

/// Captures every request/response exchange and hands exactly one event to
/// the configured [`LogSink`].
///
/// Both bodies are buffered in full. The handler sees the request body
/// untouched and the client receives the response unchanged; the success
/// event is only delivered once the response body has been handed off.
/// Handler failures, whether an `Err` or a panic, are logged inline and then
/// propagated as-is.
///
/// Capture has no size limit of its own and runs before any extractor, so
/// `DefaultBodyLimit` does not apply to it. Bound it from outside with a
/// `TimeoutLayer` or `RequestBodyLimitLayer`.
#[derive(Clone)]
pub struct RequestLogger<S> {
    inner: S,
    sink: SharedSink,
}

impl<S, B> Service<Request<Body>> for RequestLogger<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // The ready instance stays in `self.inner`'s place for this call only.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let sink = self.sink.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let mut pending = PendingEvent::new(sink, RequestFields::capture(&parts, Bytes::new()));

            let replay = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => {
                    pending.request.body = CapturedBody::decode(bytes.clone());
                    Body::from(bytes)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to buffer request body, forwarding the error");
                    failed_body(e)
                }
            };

            let request = Request::from_parts(parts, replay);
            let outcome = AssertUnwindSafe(async { inner.call(request).await })
                .catch_unwind()
                .await;

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    pending.fail(e.to_string());
                    return Err(e);
                }
                Err(payload) => {
                    pending.fail(panic_message(payload.as_ref()));
                    std::panic::resume_unwind(payload);
                }
            };

            let (parts, body) = response.into_parts();
            match axum::body::to_bytes(Body::new(body), usize::MAX).await {
                Ok(bytes) => {
                    let (sink, request) = pending.disarm();
                    let event = SuccessEvent {
                        request,
                        response: ResponseFields::capture(&parts, bytes.clone()),
                    };
                    metrics::record_captured_bytes(
                        event.request.body.len() + event.response.body.len(),
                    );
                    let body = DeferredBody::new(bytes, move || {
                        metrics::record_success_event();
                        sink.on_success(&event);
                    });
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Err(e) => {
                    metrics::record_drain_failure();
                    pending.fail(e.to_string());
                    Ok(Response::from_parts(parts, failed_body(e)))
                }
            }
        })
    }
}

/// Message logged when the exchange is dropped before any event was produced.
pub const CANCELLED_MESSAGE: &str = "request cancelled before a response was produced";

/// Owns the request snapshot until exactly one event has been emitted.
///
/// If the middleware future is dropped first (an outer timeout, the client
/// going away), the drop emits an error event instead.
struct PendingEvent {
    sink: SharedSink,
    request: RequestFields,
    armed: bool,
}

impl PendingEvent {
    fn new(sink: SharedSink, request: RequestFields) -> Self {
        Self {
            sink,
            request,
            armed: true,
        }
    }

    fn disarm(&mut self) -> (SharedSink, RequestFields) {
        self.armed = false;
        (self.sink.clone(), std::mem::take(&mut self.request))
    }

    fn fail(&mut self, error_message: String) {
        let (sink, request) = self.disarm();
        log_error(&sink, request, error_message);
    }
}

impl Drop for PendingEvent {
    fn drop(&mut self) {
        if self.armed {
            self.fail(CANCELLED_MESSAGE.to_string());
        }
    }
}

fn log_error(sink: &SharedSink, request: RequestFields, error_message: String) {
    metrics::record_error_event();
    sink.on_error(&ErrorEvent {
        request,
        error_message,
    });
}

/// A body that yields `error` on first poll, so a buffering failure reaches
/// the next consumer exactly as it would have without this middleware.
fn failed_body(error: axum::Error) -> Body {
    Body::from_stream(stream::once(async move { Err::<Bytes, _>(error) }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
