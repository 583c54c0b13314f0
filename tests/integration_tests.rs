use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, Method, Request, StatusCode},
    routing::get,
    Router,
};
use request_logger::{
    config::{AppConfig, LoggingConfig, MetricsConfig, ServerConfig},
    create_app_with_sink,
    middleware::{
        add_custom_logger, logging::CANCELLED_MESSAGE, CapturedBody, ErrorEvent, LogEvent,
        LogSink, SuccessEvent,
    },
};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceExt; // .oneshot()

// ── Helpers ───────────────────────────────────────────────────

struct Recorder {
    events: Mutex<Vec<LogEvent>>,
    notify: mpsc::UnboundedSender<()>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                notify,
            }),
            rx,
        )
    }

    fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: LogEvent) {
        self.events.lock().unwrap().push(event);
        let _ = self.notify.send(());
    }
}

impl LogSink for Recorder {
    fn on_success(&self, event: &SuccessEvent) {
        self.push(LogEvent::Success(event.clone()));
    }

    fn on_error(&self, event: &ErrorEvent) {
        self.push(LogEvent::Error(event.clone()));
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeout_seconds: 5,
        },
        logging: LoggingConfig {
            disable_default_loggers: false,
            ..LoggingConfig::default()
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 0,
        },
    }
}

fn ok_router(recorder: Arc<Recorder>) -> Router {
    let routes = Router::new().route(
        "/",
        get(|| async {
            (
                [
                    ("x-test", "v"),
                    ("content-type", "application/json"),
                ],
                r#"{"ok":true}"#,
            )
        }),
    );
    add_custom_logger(routes, recorder, false)
}

/// Waits for the next event, then gives a stray second event time to show up.
async fn settle(rx: &mut mpsc::UnboundedReceiver<()>) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("logger was not invoked")
        .expect("recorder dropped");
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Success path ─────────────────────────────────────────────

#[tokio::test]
async fn health_check_returns_200() {
    let (recorder, mut rx) = Recorder::new();
    let app = create_app_with_sink(test_config(), recorder.clone());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "request-logger");

    settle(&mut rx).await;
    assert_eq!(recorder.events().len(), 1);
}

#[tokio::test]
async fn success_response_is_unchanged_and_logged_once() {
    let (recorder, mut rx) = Recorder::new();
    let app = ok_router(recorder.clone());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/?a=1")
        .header(header::HOST, "localhost")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-test"], "v");
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    assert!(recorder.events().is_empty());

    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    assert_eq!(&body[..], br#"{"ok":true}"#);

    settle(&mut rx).await;
    match &recorder.events()[..] {
        [LogEvent::Success(event)] => {
            assert_eq!(event.request.query_params["a"], "1");
            assert_eq!(event.request.url, "http://localhost/?a=1");
            assert_eq!(event.response.status_code, 200);
            assert_eq!(event.response.headers["x-test"], "v");
            assert_eq!(
                event.response.body,
                CapturedBody::Text(r#"{"ok":true}"#.to_string())
            );
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn binary_request_body_is_captured_raw() {
    let (recorder, mut rx) = Recorder::new();
    let app = create_app_with_sink(test_config(), recorder.clone());
    let payload: &'static [u8] = &[0xff, 0xfe, 0x00, 0xc3, 0x28];

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/echo")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(payload))
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    assert_eq!(&body[..], payload);

    settle(&mut rx).await;
    match &recorder.events()[..] {
        [LogEvent::Success(event)] => {
            assert_eq!(event.request.body, CapturedBody::Bytes(payload.into()));
            assert_eq!(
                event.response.media_type.as_deref(),
                Some("application/octet-stream")
            );
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

// ── Error path ───────────────────────────────────────────────

#[tokio::test]
async fn panicking_handler_is_logged_and_still_fails() {
    let (recorder, mut rx) = Recorder::new();
    let app = create_app_with_sink(test_config(), recorder.clone());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/fail?id=7")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();

    // CatchPanicLayer above the logger still produces the usual 500.
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    settle(&mut rx).await;
    match &recorder.events()[..] {
        [LogEvent::Error(event)] => {
            assert_eq!(event.error_message, "bad input");
            assert_eq!(event.request.method, "GET");
            assert_eq!(event.request.query_params["id"], "7");
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn timed_out_request_still_produces_one_event() {
    let (recorder, mut rx) = Recorder::new();
    let mut config = test_config();
    config.server.timeout_seconds = 1;
    let app = create_app_with_sink(config, recorder.clone());

    let body = Body::from_stream(futures::stream::pending::<Result<Bytes, std::io::Error>>());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/echo")
        .body(body)
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);

    settle(&mut rx).await;
    match &recorder.events()[..] {
        [LogEvent::Error(event)] => {
            assert_eq!(event.error_message, CANCELLED_MESSAGE);
            assert_eq!(event.request.method, "POST");
            assert_eq!(event.request.url, "/api/v1/echo");
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

// ── Over a real socket ───────────────────────────────────────

#[tokio::test]
async fn logger_runs_after_client_receives_response() {
    let (recorder, mut rx) = Recorder::new();
    let app = create_app_with_sink(test_config(), recorder.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/v1/echo", addr))
        .header("content-type", "application/json")
        .body(r#"{"name":"demo"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "demo");

    settle(&mut rx).await;
    match &recorder.events()[..] {
        [LogEvent::Success(event)] => {
            assert_eq!(event.request.method, "POST");
            assert_eq!(
                event.request.body,
                CapturedBody::Text(r#"{"name":"demo"}"#.to_string())
            );
            assert_eq!(event.response.status_code, 200);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}
