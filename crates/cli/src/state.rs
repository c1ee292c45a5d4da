use std::sync::Arc;

use ledgerdash_core::{
    BackendClient, BatchProcessor, Config, HealthMonitor, HttpBackendClient, Notifier,
    SanitizedConfig, StatusPoller, UploadOrchestrator, UploadQueue,
};

/// Every component a command may drive, wired around one backend client.
pub struct AppState {
    config: Config,
    pub backend: Arc<dyn BackendClient>,
    pub queue: UploadQueue,
    pub notifier: Notifier,
    pub orchestrator: UploadOrchestrator,
    pub poller: StatusPoller,
    pub batch: BatchProcessor,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let backend: Arc<dyn BackendClient> =
            Arc::new(HttpBackendClient::new(config.backend.clone())?);
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn BackendClient>) -> Self {
        let queue = UploadQueue::new();
        let notifier = Notifier::default();

        let orchestrator = UploadOrchestrator::new(
            backend.clone(),
            queue.clone(),
            notifier.clone(),
            config.upload.clone(),
        );
        let poller = StatusPoller::new(
            backend.clone(),
            queue.clone(),
            notifier.clone(),
            config.poller.clone(),
        );
        let batch = BatchProcessor::new(
            backend.clone(),
            queue.clone(),
            poller.clone(),
            notifier.clone(),
        );

        Self {
            config,
            backend,
            queue,
            notifier,
            orchestrator,
            poller,
            batch,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.backend.clone())
    }
}
