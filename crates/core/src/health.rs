//! Backend health monitoring.
//!
//! System health is tracked separately from any record's state: a backend
//! outage degrades the system status but never touches the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;

/// Overall system status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Backend reports `healthy`.
    Healthy,
    /// Backend reachable but reports a problem.
    Degraded,
    /// Backend unreachable.
    Unavailable,
}

/// Result of one health check.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub models_loaded: bool,
    pub pipeline_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_status: Option<String>,
    /// Failure reason when the backend could not be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Periodically checks backend health.
pub struct HealthMonitor {
    backend: Arc<dyn BackendClient>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            backend,
            shutdown_tx,
        }
    }

    /// Run one health check.
    pub async fn check(&self) -> SystemHealth {
        check_backend(self.backend.as_ref()).await
    }

    /// Spawn periodic checks, publishing each result.
    ///
    /// The first check runs immediately.
    pub fn spawn(&self, interval: Duration) -> (watch::Receiver<Option<SystemHealth>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel::<Option<SystemHealth>>(None);
        let backend = self.backend.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Health monitor started");
            loop {
                let health = check_backend(backend.as_ref()).await;
                let changed = tx
                    .borrow()
                    .as_ref()
                    .map(|h| h.status != health.status)
                    .unwrap_or(true);
                if changed {
                    info!(status = ?health.status, "Backend health changed");
                }
                tx.send_replace(Some(health));

                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Health monitor stopped");
        });

        (rx, handle)
    }

    /// Stop every spawned check loop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn check_backend(backend: &dyn BackendClient) -> SystemHealth {
    match backend.health().await {
        Ok(response) => {
            debug!(status = %response.status, "Health check");
            let status = if response.status == "healthy" {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
            SystemHealth {
                status,
                models_loaded: response.models_loaded,
                pipeline_ready: response.pipeline_ready,
                database_status: Some(response.database.status).filter(|s| !s.is_empty()),
                error: response.database.error,
                checked_at: Utc::now(),
            }
        }
        Err(e) => {
            warn!(error = %e, "Health check failed");
            SystemHealth {
                status: HealthStatus::Unavailable,
                models_loaded: false,
                pipeline_ready: false,
                database_status: None,
                error: Some(e.to_string()),
                checked_at: Utc::now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::testing::{fixtures, MockBackendClient};

    #[tokio::test]
    async fn test_healthy() {
        let backend = Arc::new(MockBackendClient::new());
        let monitor = HealthMonitor::new(backend);

        let health = monitor.check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.models_loaded);
        assert_eq!(health.database_status.as_deref(), Some("healthy"));
    }

    #[tokio::test]
    async fn test_degraded() {
        let backend = Arc::new(MockBackendClient::new());
        let mut response = fixtures::health_response("unhealthy");
        response.pipeline_ready = false;
        backend.set_health(Ok(response)).await;

        let health = HealthMonitor::new(backend).check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.pipeline_ready);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = Arc::new(MockBackendClient::new());
        backend
            .set_health(Err(BackendError::ConnectionFailed("refused".into())))
            .await;

        let health = HealthMonitor::new(backend).check().await;
        assert_eq!(health.status, HealthStatus::Unavailable);
        assert!(health.error.unwrap().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_publishes_and_stops() {
        let backend = Arc::new(MockBackendClient::new());
        let monitor = HealthMonitor::new(backend.clone());

        let (mut rx, handle) = monitor.spawn(Duration::from_secs(30));
        rx.changed().await.unwrap();
        assert!(rx.borrow().as_ref().unwrap().is_healthy());

        backend
            .set_health(Err(BackendError::Timeout))
            .await;
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().unwrap().status,
            HealthStatus::Unavailable
        );

        monitor.stop();
        handle.await.unwrap();
    }
}
