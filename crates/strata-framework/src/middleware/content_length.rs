use std::task::{Context, Poll};

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use strata_core::{Env, HeaderMapExt, Response, response};
use tower::{BoxError, Layer, Service};

use crate::app::AppFuture;

/// Sets `Content-Length` on responses whose body is fully materialized.
///
/// Streaming bodies, responses that already declare a length or a transfer
/// coding, and statuses without a body are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentLengthLayer;

impl ContentLengthLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ContentLengthLayer {
    type Service = ContentLength<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContentLength { inner }
    }
}

/// The service produced by [`ContentLengthLayer`].
#[derive(Debug, Clone)]
pub struct ContentLength<S> {
    inner: S,
}

impl<S> Service<Env> for ContentLength<S>
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
        Box::pin(async move {
            let mut response = inner.call(env).await?;
            let headers = response.headers();
            if response::status_allows_body(response.status())
                && !headers.contains_key(CONTENT_LENGTH)
                && !headers.contains_key(TRANSFER_ENCODING)
                && let Some(len) = response.body().exact_len()
            {
                response.headers_mut().set_content_length(len);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use strata_core::Body;
    use tower::{ServiceExt, service_fn};

    async fn run(make: fn() -> Response) -> Response {
        ContentLengthLayer::new()
            .layer(service_fn(move |_env: Env| async move { Ok::<_, BoxError>(make()) }))
            .oneshot(Env::get("/").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_body_gets_length() {
        let res = run(|| http::Response::new(Body::from("twelve bytes"))).await;
        assert_eq!(res.headers()[CONTENT_LENGTH], "12");
    }

    #[tokio::test]
    async fn test_stream_and_bodiless_left_alone() {
        let res = run(|| {
            let (tx, body) = Body::channel();
            tx.end(None);
            http::Response::new(body)
        })
        .await;
        assert!(res.headers().get(CONTENT_LENGTH).is_none());

        let res = run(|| response::empty(StatusCode::NO_CONTENT)).await;
        assert!(res.headers().get(CONTENT_LENGTH).is_none());
    }
}
