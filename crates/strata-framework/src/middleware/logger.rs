use std::task::{Context, Poll};
use std::time::Instant;

use strata_core::{Env, Response};
use tower::{BoxError, Layer, Service};
use tracing::{info, warn};

use crate::app::AppFuture;

/// Emits one access-log event per request.
///
/// Events are logged at `info` under the `strata::access` target with the
/// request id, method, path, status and elapsed time. A downstream error is
/// logged at `warn` and passed through.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerLayer;

impl LoggerLayer {
    /// Creates the access logger.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for LoggerLayer {
    type Service = Logger<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logger { inner }
    }
}

/// The service produced by [`LoggerLayer`].
#[derive(Debug, Clone)]
pub struct Logger<S> {
    inner: S,
}

impl<S> Service<Env> for Logger<S>
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
        let request_id = env.id();
        let method = env.method();
        let path = env.path();
        let started = Instant::now();

        Box::pin(async move {
            let result = inner.call(env).await;
            let elapsed = started.elapsed();
            match &result {
                Ok(response) => info!(
                    target: "strata::access",
                    request_id,
                    %method,
                    %path,
                    status = response.status().as_u16(),
                    ?elapsed,
                    "request completed"
                ),
                Err(err) => warn!(
                    target: "strata::access",
                    request_id,
                    %method,
                    %path,
                    error = %err,
                    ?elapsed,
                    "request failed"
                ),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use strata_core::response;
    use tower::{ServiceExt, service_fn};

    #[tokio::test]
    async fn test_passes_response_and_error_through() {
        let ok = LoggerLayer::new().layer(service_fn(|_env: Env| async {
            Ok::<_, BoxError>(response::empty(StatusCode::OK))
        }));
        assert_eq!(
            ok.oneshot(Env::get("/a").unwrap()).await.unwrap().status(),
            StatusCode::OK
        );

        let failing = LoggerLayer::new().layer(service_fn(|_env: Env| async {
            Err::<Response, BoxError>("nope".into())
        }));
        assert_eq!(
            failing.oneshot(Env::get("/b").unwrap()).await.unwrap_err().to_string(),
            "nope"
        );
    }
}
