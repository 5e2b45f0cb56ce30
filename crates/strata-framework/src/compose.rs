//! Middleware composition.
//!
//! A middleware wraps a downstream application and is itself an application.
//! Registering `M1`, `M2`, … `Mn` over a terminal `A` nests them as
//! `M1(M2(…Mn(A)))`:
//!
//! ```text
//!   inbound   M1 ──▶ M2 ──▶ … ──▶ Mn ──▶ A
//!   outbound  M1 ◀── M2 ◀── … ◀── Mn ◀── A
//! ```
//!
//! The first-registered middleware sees the request first and the final
//! response last. Both [`Builder`] (runtime composition over [`BoxApp`]) and
//! `tower::ServiceBuilder` (static composition) follow this order.
//!
//! Middleware written with [`from_fn`] receives the downstream as a [`Next`]
//! that can be run at most once, forwarding the identical [`Env`] handle.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use strata_core::{Env, Response};
use tower::util::BoxCloneService;
use tower::{BoxError, Layer, Service, ServiceBuilder, ServiceExt};
use tower_layer::Stack;

use crate::app::{AppFuture, BoxApp, boxed};

type LayerFn = Arc<dyn Fn(BoxApp) -> BoxApp + Send + Sync>;

// ============================================================================
// Builder
// ============================================================================

/// An explicitly constructed middleware stack.
///
/// There is no process-wide pipeline; callers build one and pass it around.
///
/// ```rust,ignore
/// let app = Builder::new()
///     .layer(LoggerLayer::new())
///     .layer(TimeoutLayer::new(Duration::from_secs(30)))
///     .run(service_fn(handler));
/// ```
#[derive(Clone, Default)]
pub struct Builder {
    layers: Vec<LayerFn>,
}

impl Builder {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware. Earlier registrations wrap later ones.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxApp> + Send + Sync + 'static,
        L::Service: Service<Env, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Env>>::Future: Send + 'static,
    {
        self.layers
            .push(Arc::new(move |inner: BoxApp| boxed(layer.layer(inner))));
        self
    }

    /// Registers a middleware only when `enabled` is `true`.
    pub fn layer_if<L>(self, enabled: bool, layer: L) -> Self
    where
        L: Layer<BoxApp> + Send + Sync + 'static,
        L::Service: Service<Env, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Env>>::Future: Send + 'static,
    {
        if enabled { self.layer(layer) } else { self }
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps the terminal application with every registered middleware.
    pub fn run<S>(&self, app: S) -> BoxApp
    where
        S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.layers
            .iter()
            .rev()
            .fold(boxed(app), |inner, layer| layer(inner))
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("layers", &self.layers.len())
            .finish()
    }
}

// ============================================================================
// from_fn
// ============================================================================

/// The downstream of a [`from_fn`] middleware.
pub struct Next {
    inner: BoxCloneService<Env, Response, BoxError>,
}

impl Next {
    /// Forwards the environment downstream and waits for its response.
    pub async fn run(self, env: Env) -> Result<Response, BoxError> {
        self.inner.oneshot(env).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Creates a middleware from an async closure.
///
/// The closure may inspect or mutate the environment, call the downstream via
/// [`Next::run`], and rewrite status, headers or body of the response before
/// returning it upstream. Returning without running `next` short-circuits the
/// downstream.
///
/// ```rust,ignore
/// let stamp = from_fn(|env: Env, next: Next| async move {
///     let mut res = next.run(env).await?;
///     res.headers_mut().insert("x-served-by", HeaderValue::from_static("strata"));
///     Ok(res)
/// });
/// ```
pub fn from_fn<F>(f: F) -> FromFnLayer<F> {
    FromFnLayer { f }
}

/// The layer produced by [`from_fn`].
#[derive(Clone)]
pub struct FromFnLayer<F> {
    f: F,
}

impl<F: Clone, S> Layer<S> for FromFnLayer<F> {
    type Service = FromFn<F, S>;

    fn layer(&self, inner: S) -> Self::Service {
        FromFn {
            f: self.f.clone(),
            inner,
        }
    }
}

/// The service produced by [`FromFnLayer`].
#[derive(Clone)]
pub struct FromFn<F, S> {
    f: F,
    inner: S,
}

impl<F, Fut, S> Service<Env> for FromFn<F, S>
where
    F: Fn(Env, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send + 'static,
    S: Service<Env, Response = Response, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = BoxError;
    type Future = AppFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Env) -> Self::Future {
        let next = Next {
            inner: BoxCloneService::new(self.inner.clone()),
        };
        Box::pin((self.f)(env, next))
    }
}

// ============================================================================
// ServiceBuilderExt
// ============================================================================

/// Extension trait for [`tower::ServiceBuilder`] adding Strata conveniences.
pub trait ServiceBuilderExt<L> {
    /// Stacks a [`from_fn`] middleware.
    fn middleware_fn<F>(self, f: F) -> ServiceBuilder<Stack<FromFnLayer<F>, L>>;

    /// Wraps `app` with all stacked layers and erases the result.
    fn app<S>(self, app: S) -> BoxApp
    where
        L: Layer<S>,
        L::Service: Service<Env, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Env>>::Future: Send + 'static;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn middleware_fn<F>(self, f: F) -> ServiceBuilder<Stack<FromFnLayer<F>, L>> {
        self.layer(from_fn(f))
    }

    fn app<S>(self, app: S) -> BoxApp
    where
        L: Layer<S>,
        L::Service: Service<Env, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Env>>::Future: Send + 'static,
    {
        boxed(self.service(app))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use std::sync::Mutex;

    use http::{HeaderValue, StatusCode};
    use strata_core::{Completion, response};

    use crate::app::{app_fn, service_fn};

    /// Records the order in which middleware observe the request.
    #[derive(Clone, Default)]
    struct Markers(Arc<Mutex<Vec<String>>>);

    impl Markers {
        fn push(&self, marker: impl Into<String>) {
            self.0.lock().unwrap().push(marker.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn terminal() -> BoxApp {
        boxed(service_fn(|_env: Env| async {
            Ok::<_, BoxError>(response::text(StatusCode::OK, "ok"))
        }))
    }

    /// Appends `name` to `x-trail` on the way out and records the inbound
    /// order.
    fn marker(
        name: &'static str,
        seen: Markers,
    ) -> FromFnLayer<impl Fn(Env, Next) -> AppFuture + Clone + Send + Sync + 'static> {
        from_fn(move |env: Env, next: Next| -> AppFuture {
            let seen = seen.clone();
            Box::pin(async move {
                seen.push(format!("in:{name}"));
                let mut res = next.run(env).await?;
                let trail = match res.headers().get("x-trail") {
                    Some(v) => format!("{},{name}", v.to_str().unwrap_or_default()),
                    None => name.to_string(),
                };
                res.headers_mut()
                    .insert("x-trail", HeaderValue::from_str(&trail)?);
                Ok(res)
            })
        })
    }

    #[tokio::test]
    async fn test_reverse_order_law() {
        let seen = Markers::default();
        let app = Builder::new()
            .layer(marker("m1", seen.clone()))
            .layer(marker("m2", seen.clone()))
            .layer(marker("m3", seen.clone()))
            .run(terminal());

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();

        assert_eq!(seen.take(), ["in:m1", "in:m2", "in:m3"]);
        assert_eq!(res.headers()["x-trail"], "m3,m2,m1");
    }

    #[tokio::test]
    async fn test_service_builder_matches_builder_order() {
        let seen = Markers::default();
        let app = ServiceBuilder::new()
            .layer(marker("a", seen.clone()))
            .layer(marker("b", seen.clone()))
            .app(terminal());

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(seen.take(), ["in:a", "in:b"]);
        assert_eq!(res.headers()["x-trail"], "b,a");
    }

    #[tokio::test]
    async fn test_exactly_one_completion_for_every_depth() {
        for depth in 0..6 {
            let completions = Arc::new(AtomicUsize::new(0));
            let counter = completions.clone();
            let terminal = app_fn(move |_env: Env, done: Completion| {
                counter.fetch_add(1, Ordering::SeqCst);
                done.complete(response::empty(StatusCode::OK));
            });

            let seen = Markers::default();
            let builder = (0..depth).fold(Builder::new(), |b, _| {
                b.layer(marker("m", seen.clone()))
            });
            assert_eq!(builder.len(), depth);

            let res = builder.run(terminal).oneshot(Env::get("/").unwrap()).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(completions.load(Ordering::SeqCst), 1, "depth {depth}");
            assert_eq!(seen.take().len(), depth);
        }
    }

    #[tokio::test]
    async fn test_env_shared_downstream() {
        let app = Builder::new()
            .layer(from_fn(|env: Env, next: Next| async move {
                env.insert_ext(7u32);
                let res = next.run(env.clone()).await?;
                assert_eq!(env.get_ext::<&'static str>(), Some("from below"));
                Ok::<_, BoxError>(res)
            }))
            .run(service_fn(|env: Env| async move {
                assert_eq!(env.get_ext::<u32>(), Some(7));
                env.insert_ext("from below");
                Ok::<_, BoxError>(response::empty(StatusCode::OK))
            }));

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Builder::new()
            .layer(from_fn(|_env: Env, _next: Next| async move {
                Ok::<_, BoxError>(response::error(StatusCode::FORBIDDEN))
            }))
            .run(service_fn(move |_env: Env| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(response::empty(StatusCode::OK)) }
            }));

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
