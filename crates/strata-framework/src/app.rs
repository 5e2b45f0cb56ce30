//! The Application contract.
//!
//! An application is any `tower::Service<Env>` that resolves to a
//! [`Response`] or a [`BoxError`]. Because the service future resolves once,
//! the response is delivered exactly once per call. Three ways to write one:
//!
//! - implement [`Service<Env>`] directly, as the middleware in this crate do;
//! - [`service_fn`] for a plain async closure;
//! - [`app_fn`] for callback-style code that is handed a [`Completion`] and
//!   fulfils it later, possibly from another task.
//!
//! [`BoxApp`] is the type-erased form used wherever applications are stored
//! or composed at runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::StatusCode;
use strata_core::{Completion, Env, Response, completion, response};
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};
use tracing::error;

pub use tower::service_fn;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The future returned by every application in this crate.
pub type AppFuture = BoxFuture<'static, Result<Response, BoxError>>;

/// A type-erased, `Clone + Send + Sync` application.
pub type BoxApp = BoxCloneSyncService<Env, Response, BoxError>;

/// Erases the concrete type of an application.
pub fn boxed<S>(app: S) -> BoxApp
where
    S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(app)
}

// ============================================================================
// Callback-style applications
// ============================================================================

/// Adapts a callback-style application `(env, completion) -> ()`.
///
/// The callback must fulfil the [`Completion`] exactly once. A completion
/// dropped unfulfilled is a protocol violation: it is reported to the env's
/// error sink and answered with `500 Internal Server Error`.
///
/// ```rust,ignore
/// let app = app_fn(|env: Env, done: Completion| {
///     tokio::spawn(async move {
///         done.complete(response::text(StatusCode::OK, env.path()));
///     });
/// });
/// ```
pub fn app_fn<F>(f: F) -> AppFn<F>
where
    F: Fn(Env, Completion) + Send + Sync + 'static,
{
    AppFn { f: Arc::new(f) }
}

/// The application produced by [`app_fn`].
pub struct AppFn<F> {
    f: Arc<F>,
}

impl<F> Clone for AppFn<F> {
    fn clone(&self) -> Self {
        AppFn { f: self.f.clone() }
    }
}

impl<F> Service<Env> for AppFn<F>
where
    F: Fn(Env, Completion) + Send + Sync + 'static,
{
    type Response = Response;
    type Error = BoxError;
    type Future = AppFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Env) -> Self::Future {
        let (completion, pending) = completion();
        (self.f)(env.clone(), completion);

        Box::pin(async move {
            match pending.await {
                Ok(response) => Ok(response),
                Err(err) => {
                    error!(request_id = env.id(), "application never completed");
                    env.report_error(err);
                    Ok(response::error(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_app_fn_completes_from_task() {
        let app = app_fn(|env: Env, done: Completion| {
            tokio::spawn(async move {
                done.complete(response::text(StatusCode::OK, env.path()));
            });
        });

        let response = app.oneshot(Env::get("/hello").unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.into_body().collect().await.unwrap(),
            bytes::Bytes::from_static(b"/hello")
        );
    }

    #[tokio::test]
    async fn test_dropped_completion_yields_server_error() {
        let app = app_fn(|_env: Env, done: Completion| drop(done));
        let env = Env::get("/").unwrap();

        let response = app.oneshot(env.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_service_fn_boxes() {
        let app = boxed(service_fn(|_env: Env| async {
            Ok::<_, BoxError>(response::empty(StatusCode::NO_CONTENT))
        }));

        let response = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
