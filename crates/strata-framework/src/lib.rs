//! # Strata Framework
//!
//! Composition, supervision and the standard applications built on the
//! `strata-core` request contract.
//!
//! ## Architecture
//!
//! Every component is a `tower::Service<Env>` or a `tower::Layer` producing
//! one. A pipeline nests middleware around a terminal application:
//!
//! ```text
//! Env ─▶ Catch ─▶ Logger ─▶ Timeout ─▶ … ─▶ Gzip ─▶ Files ─▶ app
//!                              │
//!                              └─ spawns the downstream, races it against
//!                                 the env deadline, answers via the hook
//! ```
//!
//! - [`compose`]: [`Builder`] and [`from_fn`] for runtime composition
//! - [`app`]: [`BoxApp`], [`app_fn`] for callback-style applications
//! - [`timeout`]: the watchdog supervisor and its [`TimeoutHook`]
//! - [`gzip`]: the streaming gzip transform and its negotiation gate
//! - [`params`]: cached query/body parameter accumulation
//! - [`files`]: the static file responder
//! - [`middleware`]: small supplementary layers
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! let app = Builder::new()
//!     .layer(CatchLayer::new())
//!     .layer(TimeoutLayer::new(Duration::from_secs(30)))
//!     .layer(from_fn(|env: Env, next: Next| async move {
//!         let params = params(&env).await?;
//!         tracing::debug!(count = params.len(), "parameters parsed");
//!         next.run(env).await
//!     }))
//!     .run(service_fn(|env: Env| async move {
//!         Ok::<_, BoxError>(response::text(StatusCode::OK, env.path()))
//!     }));
//! ```

pub mod app;
pub mod compose;
pub mod error;
pub mod files;
pub mod gzip;
pub mod middleware;
pub mod params;
pub mod timeout;

pub use app::{AppFn, AppFuture, BoxApp, BoxFuture, app_fn, boxed, service_fn};
pub use compose::{Builder, FromFn, FromFnLayer, Next, ServiceBuilderExt, from_fn};
pub use error::{FilesError, ParamsError, ParamsResult, TimeoutError};
pub use files::{DefaultMediaTypes, Files, FilesLayer, MediaTypes};
pub use gzip::{Gzip, GzipEncoder, GzipLayer, accepts_gzip};
pub use middleware::{
    CatchLayer, ContentLengthLayer, ContentTypeLayer, HeadLayer, LoggerLayer, MethodOverrideLayer,
};
pub use params::{
    FileUpload, ParamValue, Params, ParamsLayer, ParamsOptions, body_params, params,
    query_params,
};
pub use timeout::{DefaultTimeoutHook, Timeout, TimeoutHook, TimeoutLayer, WatchdogState};

pub use tower::BoxError;
