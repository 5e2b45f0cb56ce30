//! # Strata
//!
//! Composable request pipelines built from `tower` services, with deadline
//! supervision, streaming gzip, cached parameter parsing and static files.
//!
//! ## Architecture
//!
//! ```text
//! transport ─▶ Server::call ─▶ Env ─▶ Catch ─▶ Logger ─▶ Timeout ─▶ … ─▶ app
//!                  ▲                                                      │
//!                  └──────────────── http::Response<Body> ◀───────────────┘
//! ```
//!
//! - **core**: the per-request [`Env`](core::Env), streaming
//!   [`Body`](core::Body) and single-assignment completions
//! - **framework**: composition, the timeout watchdog, gzip, params, files
//!   and the small supporting layers
//! - **runtime**: configuration, logging and the config-driven pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! fn main() -> Result<(), RuntimeError> {
//!     let runtime = StrataRuntime::load()?;
//!     let server = runtime.server(service_fn(|env: Env| async move {
//!         let params = params(&env).await?;
//!         let name = params.text("name").unwrap_or("world");
//!         Ok::<_, BoxError>(response::text(StatusCode::OK, format!("hello {name}")))
//!     }));
//!
//!     runtime.block_on(async move {
//!         // hand `server` to a transport, which calls `server.call(request)`
//!     })
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use strata_core as core;
pub use strata_framework as framework;
pub use strata_runtime as runtime;

/// Commonly used types for building applications.
pub mod prelude {
    // Runtime - entry point
    pub use strata_runtime::{RuntimeError, Server, StrataConfig, StrataRuntime};

    // Request contract
    pub use strata_core::http::{Method, Request, StatusCode};
    pub use strata_core::{Body, Completion, Deadline, Env, HeaderMapExt, Response, response};

    // Composition
    pub use strata_framework::{
        BoxApp, BoxError, Builder, Next, ServiceBuilderExt, app_fn, boxed, from_fn, service_fn,
    };

    // Middleware and leaf applications
    pub use strata_framework::{
        CatchLayer, ContentLengthLayer, ContentTypeLayer, FilesLayer, GzipLayer, HeadLayer,
        LoggerLayer, MethodOverrideLayer, ParamsLayer, TimeoutHook, TimeoutLayer,
    };

    // Parameters
    pub use strata_framework::{ParamValue, Params, body_params, params, query_params};

    pub use strata_runtime::prelude::*;
}
