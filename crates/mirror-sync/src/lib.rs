pub mod ancestry;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod git;
pub mod job;
pub mod lister;
pub mod negotiation;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod report;
pub mod retry;
pub mod store_client;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientFactory, DefaultClientFactory, JobClients};
pub use config::{load_config, parse_config, ConfigError};
pub use error::SyncError;
pub use job::{JobOptions, MirrorConfig, MirrorJob, RunSettings, Timeouts};
pub use orchestrator::{JobPhase, JobStateMachine, Orchestrator};
pub use policy::RefPolicy;
pub use report::{JobFailure, JobReport, RunReport};
pub use retry::RetryPolicy;
pub use transport::{RepositoryClient, Side};
