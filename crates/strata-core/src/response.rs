//! The response tuple and explicit header accessors.
//!
//! A response is `(status, headers, body)`, represented as
//! `http::Response<Body>`. Header fields that components commonly inspect
//! are read and written through [`HeaderMapExt`] rather than ad-hoc string
//! lookups.

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, VARY};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::body::Body;

/// The response produced by an application.
pub type Response = http::Response<Body>;

/// Builds a response with the given status, content type and body.
pub fn with_body(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response {
    let body = body.into();
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(len) = response.body().exact_len() {
        response.headers_mut().set_content_length(len);
    }
    response
}

/// Builds a `text/plain` response.
pub fn text(status: StatusCode, text: impl Into<String>) -> Response {
    with_body(status, "text/plain; charset=utf-8", text.into())
}

/// Builds a body-less response.
pub fn empty(status: StatusCode) -> Response {
    let mut response = http::Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Builds a `text/plain` response whose body is the canonical reason phrase.
pub fn error(status: StatusCode) -> Response {
    text(status, status.canonical_reason().unwrap_or("Error"))
}

/// Returns `true` if responses with this status may carry a body.
pub fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Explicit accessors over a header map.
pub trait HeaderMapExt {
    /// The `Content-Type` value, if present and readable.
    fn content_type(&self) -> Option<&str>;

    /// The media type portion of `Content-Type`, lowercased and without
    /// parameters.
    fn media_type(&self) -> Option<String>;

    /// The parsed `Content-Length` value.
    fn content_length(&self) -> Option<u64>;

    /// Sets `Content-Type`; invalid values are ignored.
    fn set_content_type(&mut self, value: &str);

    /// Sets `Content-Length`.
    fn set_content_length(&mut self, len: u64);

    /// Appends a token to `Vary` unless it is already listed.
    fn append_vary(&mut self, token: &str);

    /// Returns the first value of `name` as a string.
    fn get_str(&self, name: &HeaderName) -> Option<&str>;
}

impl HeaderMapExt for HeaderMap {
    fn content_type(&self) -> Option<&str> {
        self.get_str(&CONTENT_TYPE)
    }

    fn media_type(&self) -> Option<String> {
        self.content_type().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    fn content_length(&self) -> Option<u64> {
        self.get_str(&CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    fn set_content_type(&mut self, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.insert(CONTENT_TYPE, value);
        }
    }

    fn set_content_length(&mut self, len: u64) {
        self.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }

    fn append_vary(&mut self, token: &str) {
        let listed = self
            .get_all(VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| {
                let t = t.trim();
                t == "*" || t.eq_ignore_ascii_case(token)
            });
        if !listed {
            if let Ok(value) = HeaderValue::from_str(token) {
                self.append(VARY, value);
            }
        }
    }

    fn get_str(&self, name: &HeaderName) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response_headers() {
        let response = text(StatusCode::OK, "hello");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().content_length(), Some(5));
        assert_eq!(
            response.headers().media_type().as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn test_error_uses_reason_phrase() {
        let response = error(StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_bytes(), Some(&b"Not Found"[..]));
    }

    #[test]
    fn test_append_vary_deduplicates() {
        let mut headers = HeaderMap::new();
        headers.append_vary("Accept-Encoding");
        headers.append_vary("accept-encoding");
        headers.append_vary("Cookie");
        assert_eq!(headers.get_all(VARY).iter().count(), 2);
    }

    #[test]
    fn test_status_allows_body() {
        assert!(status_allows_body(StatusCode::OK));
        assert!(!status_allows_body(StatusCode::NO_CONTENT));
        assert!(!status_allows_body(StatusCode::NOT_MODIFIED));
        assert!(!status_allows_body(StatusCode::CONTINUE));
    }
}
