//! Layered configuration for the Strata runtime.
//!
//! Settings come from built-in defaults, TOML/YAML files, `STRATA_*`
//! environment variables and programmatic overrides, in that order.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    FilesConfig, GzipConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    ParamsConfig, ServerConfig, SpanEventConfig, StrataConfig,
};
pub use validation::validate_config;
