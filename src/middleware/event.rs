//! Request/response snapshots and the log events built from them.
//!
//! A snapshot is taken once at the middleware boundary and never mutated
//! afterwards. Log sinks receive either a [`SuccessEvent`] or an
//! [`ErrorEvent`]; both expose the same flat, ordered field list through
//! `fields()` so formatters don't need to care which kind they hold.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::Query,
    http::{header, request, response, HeaderMap, Uri},
};
use serde::{Serialize, Serializer};

pub type FieldMap = BTreeMap<String, String>;

/// A captured body, decoded as UTF-8 when possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedBody {
    Text(String),
    Bytes(Bytes),
}

impl Default for CapturedBody {
    fn default() -> Self {
        CapturedBody::Text(String::new())
    }
}

impl CapturedBody {
    /// Decodes `raw` as UTF-8 text, keeping the raw bytes if that fails.
    pub fn decode(raw: Bytes) -> Self {
        match std::str::from_utf8(&raw) {
            Ok(text) => CapturedBody::Text(text.to_owned()),
            Err(_) => CapturedBody::Bytes(raw),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CapturedBody::Text(text) => text.as_bytes(),
            CapturedBody::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_field(&self) -> FieldValue<'_> {
        match self {
            CapturedBody::Text(text) => FieldValue::Text(text),
            CapturedBody::Bytes(bytes) => FieldValue::Bytes(bytes),
        }
    }
}

/// Borrowed view of a single event field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Map(&'a FieldMap),
    Bytes(&'a [u8]),
    Integer(i64),
    Absent,
}

impl Serialize for FieldValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::Map(map) => serializer.collect_map(map.iter()),
            FieldValue::Bytes(bytes) => serializer.serialize_bytes(bytes),
            FieldValue::Integer(value) => serializer.serialize_i64(*value),
            FieldValue::Absent => serializer.serialize_none(),
        }
    }
}

pub type Fields<'a> = Vec<(&'static str, FieldValue<'a>)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFields {
    pub body: CapturedBody,
    pub headers: FieldMap,
    pub query_params: FieldMap,
    pub method: String,
    pub url: String,
}

impl RequestFields {
    pub fn capture(parts: &request::Parts, body: Bytes) -> Self {
        Self {
            body: CapturedBody::decode(body),
            headers: header_map(&parts.headers),
            query_params: query_map(&parts.uri),
            method: parts.method.to_string(),
            url: absolute_url(&parts.uri, &parts.headers),
        }
    }

    fn push_fields<'a>(&'a self, fields: &mut Fields<'a>) {
        fields.push(("request_body", self.body.as_field()));
        fields.push(("request_headers", FieldValue::Map(&self.headers)));
        fields.push(("request_query_params", FieldValue::Map(&self.query_params)));
        fields.push(("request_method", FieldValue::Text(&self.method)));
        fields.push(("request_url", FieldValue::Text(&self.url)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFields {
    pub body: CapturedBody,
    pub headers: FieldMap,
    pub media_type: Option<String>,
    pub status_code: u16,
}

impl ResponseFields {
    pub fn capture(parts: &response::Parts, body: Bytes) -> Self {
        Self {
            body: CapturedBody::decode(body),
            headers: header_map(&parts.headers),
            media_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned()),
            status_code: parts.status.as_u16(),
        }
    }

    fn push_fields<'a>(&'a self, fields: &mut Fields<'a>) {
        fields.push(("response_body", self.body.as_field()));
        fields.push(("response_headers", FieldValue::Map(&self.headers)));
        fields.push((
            "response_media_type",
            self.media_type
                .as_deref()
                .map_or(FieldValue::Absent, FieldValue::Text),
        ));
        fields.push((
            "response_status_code",
            FieldValue::Integer(i64::from(self.status_code)),
        ));
    }
}

/// Emitted when the wrapped handler produced a response.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessEvent {
    pub request: RequestFields,
    pub response: ResponseFields,
}

impl SuccessEvent {
    pub fn fields(&self) -> Fields<'_> {
        let mut fields = Vec::with_capacity(9);
        self.request.push_fields(&mut fields);
        self.response.push_fields(&mut fields);
        fields
    }
}

/// Emitted when the wrapped handler failed or panicked.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub request: RequestFields,
    pub error_message: String,
}

impl ErrorEvent {
    pub fn fields(&self) -> Fields<'_> {
        let mut fields = Vec::with_capacity(6);
        self.request.push_fields(&mut fields);
        fields.push(("error_message", FieldValue::Text(&self.error_message)));
        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Success(SuccessEvent),
    Error(ErrorEvent),
}

impl LogEvent {
    pub fn fields(&self) -> Fields<'_> {
        match self {
            LogEvent::Success(event) => event.fields(),
            LogEvent::Error(event) => event.fields(),
        }
    }

    pub fn request(&self) -> &RequestFields {
        match self {
            LogEvent::Success(event) => &event.request,
            LogEvent::Error(event) => &event.request,
        }
    }
}

impl Serialize for SuccessEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.fields())
    }
}

impl Serialize for ErrorEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.fields())
    }
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.fields())
    }
}

/// Flattens a header map, joining repeated names with `", "` in arrival order.
pub fn header_map(headers: &HeaderMap) -> FieldMap {
    let mut map = FieldMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_owned())
            .and_modify(|joined: &mut String| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

/// Parses the query string; the last occurrence of a repeated key wins.
pub fn query_map(uri: &Uri) -> FieldMap {
    Query::<FieldMap>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default()
}

fn absolute_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()));

    match host {
        Some(host) => format!(
            "http://{}{}",
            host,
            uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        ),
        None => uri.to_string(),
    }
}
