//! Configuration validation utilities.

use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    FilesConfig, GzipConfig, LogOutput, LoggingConfig, ParamsConfig, StrataConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &StrataConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_gzip_config(&config.gzip)?;
    validate_files_config(&config.files)?;
    validate_params_config(&config.params)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(target) = logging.filters.keys().find(|k| k.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter target must not be empty: {target:?}"
        )));
    }

    Ok(())
}

fn validate_gzip_config(gzip: &GzipConfig) -> ConfigResult<()> {
    if gzip.level > 9 {
        return Err(ConfigError::validation(format!(
            "Gzip level must be between 0 and 9, got {}",
            gzip.level
        )));
    }

    if gzip.enabled && gzip.types.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(
            "Gzip media types must not contain empty entries",
        ));
    }

    Ok(())
}

fn validate_files_config(files: &FilesConfig) -> ConfigResult<()> {
    if let Some(root) = &files.root {
        require_dir("files.root", root)?;
    }

    if let Some(index) = &files.index
        && (index.is_empty() || index.contains(['/', '\\']) || index == "." || index == "..")
    {
        return Err(ConfigError::validation(format!(
            "Index must be a plain file name, got {index:?}"
        )));
    }

    Ok(())
}

fn validate_params_config(params: &ParamsConfig) -> ConfigResult<()> {
    if params.max_length == 0 {
        return Err(ConfigError::validation(
            "Maximum body length must be greater than 0",
        ));
    }

    if let Some(dir) = &params.upload_dir {
        require_dir("params.upload_dir", dir)?;
    }

    Ok(())
}

fn require_dir(field: &str, path: &Path) -> ConfigResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "{field} is not a directory: {}",
            path.display()
        )))
    }
}
