use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use mirror_core::Backend;

use crate::git::{GitClient, StagingRepo};
use crate::job::{MirrorJob, RunSettings};
use crate::store_client::StoreClient;
use crate::transport::{RepositoryClient, Side};
use crate::SyncError;

/// The two clients of one job.
pub struct JobClients {
    pub source: Box<dyn RepositoryClient>,
    pub destination: Box<dyn RepositoryClient>,
}

impl JobClients {
    /// Release per-job resources on both sides; failures are only logged.
    pub async fn finish(&self) {
        for (side, client) in [
            (Side::Destination, &self.destination),
            (Side::Source, &self.source),
        ] {
            if let Err(e) = client.finish().await {
                warn!(side = side.label(), error = %e, "client cleanup failed");
            }
        }
    }
}

/// Builds the clients for a job. The orchestrator owns one factory for the
/// whole run.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, job: &MirrorJob) -> Result<JobClients, SyncError>;
}

/// Picks the client implementation from the endpoint addresses.
pub struct DefaultClientFactory {
    settings: RunSettings,
}

impl DefaultClientFactory {
    pub fn new(settings: &RunSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }
}

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn connect(&self, job: &MirrorJob) -> Result<JobClients, SyncError> {
        match (job.source.backend(), job.destination.backend()) {
            (Backend::Store, Backend::Store) => Ok(JobClients {
                source: Box::new(StoreClient::open(job.source.clone()).await?),
                destination: Box::new(StoreClient::open(job.destination.clone()).await?),
            }),
            (Backend::Git, Backend::Git) => {
                let staging = Arc::new(
                    StagingRepo::create(
                        self.settings.workdir.as_deref(),
                        &job.name,
                        self.settings.keep_workdir,
                    )
                    .await?,
                );
                Ok(JobClients {
                    source: Box::new(GitClient::new(
                        job.source.clone(),
                        Arc::clone(&staging),
                        Side::Source,
                        &job.name,
                    )?),
                    destination: Box::new(GitClient::new(
                        job.destination.clone(),
                        staging,
                        Side::Destination,
                        &job.name,
                    )?),
                })
            }
            (source, destination) => Err(SyncError::Unsupported(format!(
                "cannot mirror between {source:?} and {destination:?} endpoints"
            ))),
        }
    }
}
