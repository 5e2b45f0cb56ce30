use std::task::{Context, Poll};

use http::HeaderValue;
use http::header::CONTENT_TYPE;
use strata_core::{Env, Response, response};
use tower::{BoxError, Layer, Service};

use crate::app::AppFuture;

/// Sets a default `Content-Type` on responses that carry none.
#[derive(Debug, Clone)]
pub struct ContentTypeLayer {
    default: HeaderValue,
}

impl ContentTypeLayer {
    /// Creates the layer. An invalid header value falls back to
    /// `text/html`.
    pub fn new(default: &str) -> Self {
        Self {
            default: HeaderValue::from_str(default)
                .unwrap_or_else(|_| HeaderValue::from_static("text/html")),
        }
    }
}

impl Default for ContentTypeLayer {
    fn default() -> Self {
        Self::new("text/html")
    }
}

impl<S> Layer<S> for ContentTypeLayer {
    type Service = ContentType<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContentType {
            inner,
            default: self.default.clone(),
        }
    }
}

/// The service produced by [`ContentTypeLayer`].
#[derive(Debug, Clone)]
pub struct ContentType<S> {
    inner: S,
    default: HeaderValue,
}

impl<S> Service<Env> for ContentType<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let default = self.default.clone();
        Box::pin(async move {
            let mut response = inner.call(env).await?;
            if response::status_allows_body(response.status()) {
                response
                    .headers_mut()
                    .entry(CONTENT_TYPE)
                    .or_insert(default);
            }
            Ok(response)
        })
    }
}
