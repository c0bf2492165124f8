//! Minimal host for long-running background services (worker pool, scanner).
//!
//! Each service owns one cooperative loop and exits when its `shutdown` token
//! is cancelled. `ServiceHost` fans out, runs every registered service
//! concurrently, and waits for all of them on shutdown.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the service until `shutdown` is cancelled, then returns.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Runs every registered service until `shutdown` is cancelled.
    pub async fn run_until_shutdown(self, shutdown: CancellationToken) -> Result<()> {
        let mut handles = Vec::with_capacity(self.services.len());

        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = service.run(token).await {
                    tracing::error!(service = name, error = %e, "service exited with an error");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }
}
