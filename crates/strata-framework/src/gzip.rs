//! Streaming gzip transform.
//!
//! [`GzipEncoder`] wraps a body so that every source chunk is fed through one
//! persistent encoder as it arrives. The transformed body honours the same
//! producer contract as its source: chunks in order, then a single end signal
//! or error. At no point is the whole body held in memory.
//!
//! [`GzipLayer`] decides per response whether to apply the transform.

use std::io::Write;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::{Stream, StreamExt};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use strata_core::{Body, BodyError, Env, HeaderMapExt, Response, response};
use tower::{BoxError, Layer, Service};
use tracing::trace;

use crate::app::AppFuture;

/// Media-type patterns compressed by default.
pub const DEFAULT_TYPES: [&str; 4] = ["text/", "javascript", "json", "xml"];

/// A stream adapter that gzip-encodes its source incrementally.
pub struct GzipEncoder<S> {
    source: S,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<S> GzipEncoder<S> {
    /// Wraps `source` with a fresh encoder.
    pub fn new(source: S, level: Compression) -> Self {
        Self {
            source,
            encoder: Some(GzEncoder::new(Vec::new(), level)),
        }
    }
}

impl GzipEncoder<Body> {
    /// Returns a body producing the gzip encoding of `body`.
    pub fn wrap(body: Body, level: Compression) -> Body {
        Body::from_stream(Self::new(body, level))
    }
}

impl<S> Stream for GzipEncoder<S>
where
    S: Stream<Item = Result<Bytes, BodyError>> + Unpin,
{
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.source.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    if let Err(err) = encoder.write_all(&chunk) {
                        this.encoder = None;
                        return Poll::Ready(Some(Err(err.into())));
                    }
                    let out = mem::take(encoder.get_mut());
                    if !out.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(out))));
                    }
                }
                Some(Err(err)) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    return match encoder.finish() {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => Poll::Ready(Some(Ok(Bytes::from(tail)))),
                        Err(err) => Poll::Ready(Some(Err(err.into()))),
                    };
                }
            }
        }
    }
}

/// Returns `true` if an `Accept-Encoding` value admits gzip.
///
/// An explicit `gzip`/`x-gzip` entry decides; otherwise `*` does. Entries
/// with `q=0` refuse the coding.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    let mut wildcard = None;
    for entry in accept_encoding.split(',') {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        let quality = parts
            .filter_map(|p| {
                let (key, value) = p.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("q")
                    .then(|| value.trim().parse::<f32>().ok())
                    .flatten()
            })
            .next()
            .unwrap_or(1.0);

        if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
            return quality > 0.0;
        }
        if coding == "*" {
            wildcard = Some(quality > 0.0);
        }
    }
    wildcard.unwrap_or(false)
}

/// Compresses eligible responses.
///
/// A response is compressed only when all of the following hold: the
/// request negotiated gzip, the response carries no `Content-Encoding`, its
/// status allows a body, and its media type matches one of the configured
/// patterns (case-insensitive substring).
#[derive(Debug, Clone)]
pub struct GzipLayer {
    level: Compression,
    types: Arc<[String]>,
}

impl GzipLayer {
    /// Creates the layer with the default level and the built-in text media types.
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
            types: DEFAULT_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Sets the compression level, clamped to `0..=9`.
    pub fn level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Replaces the media-type patterns.
    pub fn types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.types = types
            .into_iter()
            .map(|t| t.into().to_ascii_lowercase())
            .collect();
        self
    }
}

impl Default for GzipLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for GzipLayer {
    type Service = Gzip<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Gzip {
            inner,
            layer: self.clone(),
        }
    }
}

/// The service produced by [`GzipLayer`].
#[derive(Debug, Clone)]
pub struct Gzip<S> {
    inner: S,
    layer: GzipLayer,
}

impl GzipLayer {
    fn eligible(&self, response: &Response) -> bool {
        let headers = response.headers();
        if headers.contains_key(CONTENT_ENCODING) || !response::status_allows_body(response.status())
        {
            return false;
        }
        let Some(media_type) = headers.media_type() else {
            return false;
        };
        self.types.iter().any(|t| media_type.contains(t.as_str()))
    }
}

impl<S> Service<Env> for Gzip<S>
where
    S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = BoxError;
    type Future = AppFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, env: Env) -> Self::Future {
        let negotiated = env
            .header_str(ACCEPT_ENCODING)
            .is_some_and(|v| accepts_gzip(&v));
        let fut = self.inner.call(env);
        let layer = self.layer.clone();

        Box::pin(async move {
            let response = fut.await?;
            if !negotiated || !layer.eligible(&response) {
                return Ok(response);
            }

            trace!(level = layer.level.level(), "compressing response");
            let (mut parts, body) = response.into_parts();
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.append_vary("Accept-Encoding");
            parts.headers.remove(CONTENT_LENGTH);
            Ok(Response::from_parts(
                parts,
                GzipEncoder::wrap(body, layer.level),
            ))
        })
    }
}
