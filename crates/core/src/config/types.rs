use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Document-processing backend connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g., "http://localhost:8000")
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Client-side upload constraints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Largest accepted file, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// MIME types accepted for upload.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Advisory queue size shown to users; not enforced by the store.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            allowed_mime_types: default_allowed_mime_types(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// Largest accepted `upload.max_file_size_mb`.
pub const MAX_FILE_SIZE_LIMIT_MB: u64 = 10 * 1024;

impl UploadConfig {
    /// Maximum file size in bytes. Saturates instead of overflowing.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_allowed_mime_types() -> Vec<String> {
    vec!["application/pdf".to_string()]
}

fn default_max_queue_size() -> usize {
    10
}

/// Status poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    /// Delay between poll ticks (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Longest a document may stay unfinished before it is marked failed.
    /// 0 = poll forever.
    #[serde(default = "default_max_poll_duration")]
    pub max_poll_duration_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_poll_duration_secs: default_max_poll_duration(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds
}

fn default_max_poll_duration() -> u64 {
    900 // 15 minutes
}

/// Backend health check configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Delay between health checks (milliseconds).
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval(),
        }
    }
}

fn default_health_interval() -> u64 {
    30_000
}

/// Sanitized config for display (credentials in the backend URL redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub backend: SanitizedBackendConfig,
    pub upload: UploadConfig,
    pub poller: PollerConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBackendConfig {
    pub url: String,
    pub credentials_configured: bool,
    pub timeout_secs: u32,
}

/// Strip `user:password@` from a URL, if present.
fn redact_userinfo(url: &str) -> (String, bool) {
    let Some((scheme, rest)) = url.split_once("://") else {
        return (url.to_string(), false);
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => (format!("{}://***@{}", scheme, &rest[at + 1..]), true),
        None => (url.to_string(), false),
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let (url, credentials_configured) = redact_userinfo(&config.backend.url);
        Self {
            backend: SanitizedBackendConfig {
                url,
                credentials_configured,
                timeout_secs: config.backend.timeout_secs,
            },
            upload: config.upload.clone(),
            poller: config.poller.clone(),
            health: config.health.clone(),
        }
    }
}
