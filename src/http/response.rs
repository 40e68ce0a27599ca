//! HTTP/1.1 response builder and parser.
//!
//! Provides a fluent builder API for constructing HTTP responses, wire
//! serialization to a byte buffer, and the inverse parse used by the
//! client-side caching handler to read upstream responses.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unrecognized status code: {0}")]
    UnknownStatus(u16),
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use revalid::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
    // Optional view model attached by a handler so the validation stage can
    // derive a validator through the typed resolver registry. Never serialized.
    model: Option<Arc<dyn Any + Send + Sync>>,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
            model: None,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Attaches the view model this response was rendered from.
    ///
    /// The validation stage looks the model's type up in its resolver
    /// registry to extract a validator without re-parsing the body. The
    /// model never reaches the wire.
    #[must_use]
    pub fn with_model<T: Any + Send + Sync>(mut self, model: T) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// Takes the attached view model out of the response, if any.
    pub fn take_model(&mut self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.model.take()
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a mutable reference to the response headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the response body bytes.
    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// Parse a raw HTTP/1.1 response from a byte slice.
    ///
    /// Returns the parsed `Response` and the byte offset at which the body
    /// begins in `buf`. The caller buffers until `Content-Length` bytes of
    /// body are available; everything after the header terminator is taken
    /// as body here.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — more data is needed to complete the headers.
    /// - [`ResponseError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`ResponseError::UnknownStatus`] — the status code is not one this crate models.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        const MAX_HEADERS: usize = 64;
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw_res = httparse::Response::new(&mut headers);

        let body_offset = match raw_res.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw_res
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;
        let status = StatusCode::from_u16(code).ok_or(ResponseError::UnknownStatus(code))?;

        let mut header_map = Headers::with_capacity(raw_res.headers.len());
        for header in raw_res.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let keep_alive = match header_map.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => raw_res.version == Some(1),
        };

        let body = buf[body_offset..].to_vec();

        Ok((
            Self {
                status,
                headers: header_map,
                body,
                keep_alive,
                model: None,
            },
            body_offset,
        ))
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);
        self.headers.remove("content-length");

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }

    /// Consumes the response, returning its body as [`Bytes`].
    pub fn into_body(self) -> Bytes {
        Bytes::from(self.body)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("keep_alive", &self.keep_alive)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NoContent);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::Ok).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn not_found() {
        let r = Response::new(StatusCode::NotFound).body("Not Found");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn parse_roundtrip() {
        let r = Response::new(StatusCode::Ok)
            .header("ETag", "\"v1\"")
            .body("cached body");
        let bytes = r.into_bytes();
        let (parsed, offset) = Response::parse(&bytes).unwrap();
        assert_eq!(parsed.status(), StatusCode::Ok);
        assert_eq!(parsed.headers().get("etag"), Some("\"v1\""));
        assert_eq!(parsed.body_ref(), b"cached body");
        assert_eq!(&bytes[offset..], b"cached body");
    }

    #[test]
    fn parse_incomplete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type:";
        assert!(matches!(
            Response::parse(raw),
            Err(ResponseError::Incomplete)
        ));
    }

    #[test]
    fn parse_not_modified_without_body() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nETag: \"abc\"\r\n\r\n";
        let (parsed, _) = Response::parse(raw).unwrap();
        assert_eq!(parsed.status(), StatusCode::NotModified);
        assert!(parsed.body_ref().is_empty());
    }

    #[test]
    fn model_is_recoverable() {
        struct Car {
            id: u32,
        }
        let mut r = Response::new(StatusCode::Ok).with_model(Car { id: 7 });
        let model = r.take_model().unwrap();
        let car = model.downcast_ref::<Car>().unwrap();
        assert_eq!(car.id, 7);
        assert!(r.take_model().is_none());
    }
}
