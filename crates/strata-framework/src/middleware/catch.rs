use std::task::{Context, Poll};

use http::StatusCode;
use strata_core::{Env, Response, response};
use tower::{BoxError, Layer, Service};

use crate::app::AppFuture;

/// Converts a downstream error into a `500` response.
///
/// The error is recorded in the env error sink, so nothing above this layer
/// ever sees an `Err`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchLayer;

impl CatchLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CatchLayer {
    type Service = Catch<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Catch { inner }
    }
}

/// The service produced by [`CatchLayer`].
#[derive(Debug, Clone)]
pub struct Catch<S> {
    inner: S,
}

impl<S> Service<Env> for Catch<S>
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
            match inner.call(env.clone()).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    env.report_error(&err);
                    Ok(response::error(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }
}
