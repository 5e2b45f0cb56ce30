//! # Strata Runtime
//!
//! Turns configuration into a running pipeline:
//!
//! - [`config`]: figment-based loading (`strata.toml`, `STRATA_*` variables)
//!   and validation
//! - [`logging`]: the global `tracing` subscriber
//! - [`runtime`]: [`StrataRuntime`], which assembles the standard middleware
//!   stack, and [`Server`], which drives one request through it
//!
//! ```rust,ignore
//! use strata_runtime::StrataRuntime;
//!
//! let runtime = StrataRuntime::load()?;
//! let server = runtime.server(service_fn(handler));
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, StrataConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, Server, StrataRuntime};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
