use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
};

/// Returns the request body as-is, keeping its content type.
pub async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    ([(header::CONTENT_TYPE, content_type)], body)
}

/// Always panics; exercises the error path of the request logger.
pub async fn fail() -> &'static str {
    panic!("bad input")
}
