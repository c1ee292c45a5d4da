pub mod backend;
pub mod batch;
pub mod config;
pub mod health;
pub mod library;
pub mod metrics;
pub mod notify;
pub mod poller;
pub mod queue;
pub mod testing;
pub mod upload;

pub use backend::{BackendClient, BackendError, BackendStatus, HttpBackendClient};
pub use batch::{BatchError, BatchOutcome, BatchProcessor};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, SanitizedConfig,
};
pub use health::{HealthMonitor, HealthStatus, SystemHealth};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use poller::StatusPoller;
pub use queue::{FileHandle, RecordId, UploadQueue, UploadRecord, UploadStatus};
pub use upload::{UploadError, UploadOrchestrator};
