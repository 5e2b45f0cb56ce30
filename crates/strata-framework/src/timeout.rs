//! Timeout supervisor.
//!
//! [`TimeoutLayer`] guarantees a response even when the wrapped application
//! never completes. The downstream call runs as its own task, so firing the
//! watchdog never aborts it; whichever of the downstream result and the timer
//! resolves first wins, and the loser is discarded.
//!
//! The deadline is read from the [`Env`] and may be changed while the request
//! is in flight:
//!
//! | change                      | effect                                     |
//! |-----------------------------|--------------------------------------------|
//! | larger duration             | fire time pushed back by the difference    |
//! | smaller or equal duration   | original fire time kept                    |
//! | [`Deadline::Disabled`]      | watchdog becomes inert for this request    |
//!
//! ```rust,ignore
//! let app = ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(Duration::from_secs(30)).on_timeout(
//!         |err: TimeoutError, _env: Env, done: Completion| {
//!             done.complete(response::error(StatusCode::GATEWAY_TIMEOUT));
//!         },
//!     ))
//!     .service(app);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use http::StatusCode;
use strata_core::{Completion, Deadline, Env, Response, completion, response};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tower::{BoxError, Layer, Service, ServiceExt};
use tracing::{debug, trace, warn};

use crate::app::AppFuture;
use crate::error::TimeoutError;

/// Lifecycle of the watchdog attached to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Armed with the initial deadline.
    Running,
    /// Armed with a deadline that has been pushed back at least once.
    Extended,
    /// The timer elapsed first; the hook owns the response.
    Fired,
    /// The downstream responded first.
    Completed,
}

/// Called when a request misses its deadline.
///
/// The hook receives the request's environment and a fresh [`Completion`]
/// that it must fulfil. It runs at most once per request.
pub trait TimeoutHook: Send + Sync + 'static {
    /// Produces the response for a timed-out request.
    fn on_timeout(&self, err: TimeoutError, env: Env, completion: Completion);
}

impl<F> TimeoutHook for F
where
    F: Fn(TimeoutError, Env, Completion) + Send + Sync + 'static,
{
    fn on_timeout(&self, err: TimeoutError, env: Env, completion: Completion) {
        self(err, env, completion)
    }
}

/// Reports the timeout to the env error sink and responds with `500`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTimeoutHook;

impl TimeoutHook for DefaultTimeoutHook {
    fn on_timeout(&self, err: TimeoutError, env: Env, completion: Completion) {
        env.report_error(&err);
        completion.complete(response::error(StatusCode::INTERNAL_SERVER_ERROR));
    }
}

/// Applies a watchdog to the wrapped application.
#[derive(Clone)]
pub struct TimeoutLayer {
    default: Deadline,
    hook: Arc<dyn TimeoutHook>,
}

impl TimeoutLayer {
    /// Creates a layer whose deadline defaults to `after`.
    pub fn new(after: Duration) -> Self {
        Self {
            default: Deadline::After(after),
            hook: Arc::new(DefaultTimeoutHook),
        }
    }

    /// Creates a layer that arms no watchdog unless the env sets a deadline
    /// before the supervisor is invoked.
    pub fn disabled() -> Self {
        Self {
            default: Deadline::Disabled,
            hook: Arc::new(DefaultTimeoutHook),
        }
    }

    /// Replaces the timeout hook.
    pub fn on_timeout(mut self, hook: impl TimeoutHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }
}

impl std::fmt::Debug for TimeoutLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutLayer")
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            default: self.default,
            hook: self.hook.clone(),
        }
    }
}

/// The service produced by [`TimeoutLayer`].
#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    default: Deadline,
    hook: Arc<dyn TimeoutHook>,
}

impl<S> Service<Env> for Timeout<S>
where
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
        let inner = self.inner.clone();
        let hook = self.hook.clone();

        match env.init_deadline(self.default) {
            Deadline::After(after) => Box::pin(supervise(inner, env, after, hook)),
            _ => {
                trace!(request_id = env.id(), "watchdog disabled");
                Box::pin(inner.oneshot(env))
            }
        }
    }
}

async fn supervise<S>(
    inner: S,
    env: Env,
    after: Duration,
    hook: Arc<dyn TimeoutHook>,
) -> Result<Response, BoxError>
where
    S: Service<Env, Response = Response, Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
{
    let request_id = env.id();
    let resolved = Arc::new(AtomicBool::new(false));
    let mut deadline = env.watch_deadline();
    let (tx, mut rx) = oneshot::channel();

    let task_resolved = resolved.clone();
    let task_env = env.clone();
    tokio::spawn(async move {
        let result = inner.oneshot(task_env).await;
        if task_resolved.swap(true, Ordering::AcqRel) {
            debug!(request_id, "late response after timeout discarded");
            return;
        }
        let _ = tx.send(result);
    });

    let mut state = WatchdogState::Running;
    let mut current = after;
    let mut fire_at = Instant::now() + after;
    let mut armed = true;
    let mut watching = true;
    trace!(request_id, ?state, deadline = ?after, "watchdog armed");

    loop {
        tokio::select! {
            result = &mut rx => {
                state = WatchdogState::Completed;
                trace!(request_id, ?state, "watchdog settled");
                return result.unwrap_or_else(|_| {
                    Err("application task terminated without a response".into())
                });
            }
            changed = deadline.changed(), if armed && watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let value = *deadline.borrow_and_update();
                match value {
                    Deadline::Disabled => {
                        armed = false;
                        debug!(request_id, "watchdog disabled in flight");
                    }
                    Deadline::After(new) if new > current => {
                        fire_at += new - current;
                        current = new;
                        state = WatchdogState::Extended;
                        debug!(request_id, ?state, deadline = ?new, "watchdog extended");
                    }
                    _ => {}
                }
            }
            _ = sleep_until(fire_at), if armed => {
                armed = false;
                if resolved.swap(true, Ordering::AcqRel) {
                    // The downstream won the race; its result is already queued.
                    continue;
                }
                state = WatchdogState::Fired;
                warn!(request_id, ?state, after = ?current, "request timed out");
                return fire(&env, current, hook.as_ref()).await;
            }
        }
    }
}

async fn fire(env: &Env, after: Duration, hook: &dyn TimeoutHook) -> Result<Response, BoxError> {
    let err = TimeoutError {
        after,
        request_id: env.id(),
    };
    let (done, pending) = completion();
    hook.on_timeout(err, env.clone(), done);

    match pending.await {
        Ok(response) => Ok(response),
        Err(err) => {
            env.report_error(format_args!("timeout hook failed: {err}"));
            Ok(response::error(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use futures::future;
    use tower::service_fn;

    use crate::app::boxed;

    fn never() -> crate::app::BoxApp {
        boxed(service_fn(|_env: Env| future::pending::<Result<Response, BoxError>>()))
    }

    fn counting_hook(calls: Arc<AtomicUsize>) -> impl TimeoutHook {
        move |_err: TimeoutError, _env: Env, done: Completion| {
            calls.fetch_add(1, Ordering::SeqCst);
            done.complete(response::error(StatusCode::GATEWAY_TIMEOUT));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_at_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(calls.clone()))
            .layer(never());

        let start = Instant::now();
        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();

        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_hook_reports_and_responds_500() {
        let env = Env::get("/").unwrap();
        let app = TimeoutLayer::new(Duration::from_millis(10)).layer(never());

        let res = app.oneshot(env.clone()).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.errors().len(), 1);
        assert!(env.errors()[0].contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_discarded_but_downstream_runs() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let slow = service_fn(move |_env: Env| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(response::empty(StatusCode::OK))
            }
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(calls.clone()))
            .layer(slow);

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_completion_forwarded_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(calls.clone()))
            .layer(service_fn(|_env: Env| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, BoxError>(response::text(StatusCode::CREATED, "made"))
            }));

        let start = Instant::now();
        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(start.elapsed(), Duration::from_millis(40));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_pushes_fire_time_back() {
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(Arc::default()))
            .layer(service_fn(|env: Env| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                env.set_deadline(Duration::from_millis(250));
                future::pending::<Result<Response, BoxError>>().await
            }));

        let start = Instant::now();
        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrease_keeps_original_fire_time() {
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(Arc::default()))
            .layer(service_fn(|env: Env| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                env.set_deadline(Duration::from_millis(30));
                future::pending::<Result<Response, BoxError>>().await
            }));

        let start = Instant::now();
        app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_in_flight_never_fires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = TimeoutLayer::new(Duration::from_millis(100))
            .on_timeout(counting_hook(calls.clone()))
            .layer(service_fn(|env: Env| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                env.disable_deadline();
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(response::empty(StatusCode::OK))
            }));

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_set_before_invocation_wins_over_default() {
        let env = Env::get("/").unwrap();
        env.set_deadline(Duration::from_millis(20));
        let app = TimeoutLayer::new(Duration::from_secs(10))
            .on_timeout(counting_hook(Arc::default()))
            .layer(never());

        let start = Instant::now();
        app.oneshot(env).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_layer_runs_inline() {
        let app = TimeoutLayer::disabled().layer(service_fn(|_env: Env| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, BoxError>(response::empty(StatusCode::OK))
        }));

        let res = app.oneshot(Env::get("/").unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_dropping_completion_yields_500() {
        let env = Env::get("/").unwrap();
        let app = TimeoutLayer::new(Duration::from_millis(5))
            .on_timeout(|_err: TimeoutError, _env: Env, done: Completion| drop(done))
            .layer(never());

        let res = app.oneshot(env.clone()).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downstream_error_forwarded() {
        let app = TimeoutLayer::new(Duration::from_millis(100)).layer(service_fn(
            |_env: Env| async { Err::<Response, BoxError>("boom".into()) },
        ));

        let err = app.oneshot(Env::get("/").unwrap()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
