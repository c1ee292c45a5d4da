use super::{
    types::{Config, MAX_FILE_SIZE_LIMIT_MB},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Backend URL is an http(s) URL
/// - Poll and health intervals are not 0
/// - Upload size limit is between 1 MB and [`MAX_FILE_SIZE_LIMIT_MB`], and at least one MIME type is allowed
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = config.backend.url.trim();
    if url.is_empty() {
        return Err(ConfigError::ValidationError(
            "backend.url cannot be empty".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "backend.url must start with http:// or https://, got {}",
            url
        )));
    }

    if config.poller.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "poller.interval_ms cannot be 0".to_string(),
        ));
    }

    if config.health.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "health.interval_ms cannot be 0".to_string(),
        ));
    }

    if config.upload.max_file_size_mb == 0 {
        return Err(ConfigError::ValidationError(
            "upload.max_file_size_mb cannot be 0".to_string(),
        ));
    }
    if config.upload.max_file_size_mb > MAX_FILE_SIZE_LIMIT_MB {
        return Err(ConfigError::ValidationError(format!(
            "upload.max_file_size_mb cannot exceed {}, got {}",
            MAX_FILE_SIZE_LIMIT_MB, config.upload.max_file_size_mb
        )));
    }

    if config.upload.allowed_mime_types.is_empty() {
        return Err(ConfigError::ValidationError(
            "upload.allowed_mime_types cannot be empty".to_string(),
        ));
    }

    Ok(())
}
