use std::task::{Context, Poll};

use http::Method;
use strata_core::{Body, Env, Response};
use tower::{BoxError, Layer, Service};

use crate::app::AppFuture;

/// Drops the body of responses to `HEAD` requests, keeping status and
/// headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadLayer;

impl HeadLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for HeadLayer {
    type Service = Head<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Head { inner }
    }
}

/// The service produced by [`HeadLayer`].
#[derive(Debug, Clone)]
pub struct Head<S> {
    inner: S,
}

impl<S> Service<Env> for Head<S>
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
        let is_head = env.method() == Method::HEAD;
        Box::pin(async move {
            let response = inner.call(env).await?;
            if !is_head {
                return Ok(response);
            }
            let (parts, _body) = response.into_parts();
            Ok(Response::from_parts(parts, Body::empty()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_LENGTH;
    use http::{Request, StatusCode};
    use strata_core::response;
    use tower::{ServiceExt, service_fn};

    fn env(method: Method) -> Env {
        Env::new(
            Request::builder()
                .method(method)
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_head_strips_body_keeps_headers() {
        let app = HeadLayer::new().layer(service_fn(|_env: Env| async {
            Ok::<_, BoxError>(response::text(StatusCode::OK, "payload"))
        }));

        let res = app.clone().oneshot(env(Method::HEAD)).await.unwrap();
        assert_eq!(res.headers()[CONTENT_LENGTH], "7");
        assert!(res.into_body().collect().await.unwrap().is_empty());

        let res = app.oneshot(env(Method::GET)).await.unwrap();
        assert_eq!(res.into_body().collect().await.unwrap(), "payload");
    }
}
