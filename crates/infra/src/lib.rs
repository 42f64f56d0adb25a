//! Infrastructure layer: remote source, retrying fetcher, datalake sink,
//! task registry, orchestration and configuration.

pub mod config;
pub mod fetcher;
pub mod orchestrator;
pub mod sink;
pub mod source;
pub mod tasks;

pub use config::{AppConfig, ConfigError};
pub use fetcher::{FetchError, RetryPolicy, RetryingBatchFetcher};
pub use orchestrator::{ExtractionError, ExtractionOrchestrator};
pub use sink::{CommitMode, CommitReport, StorageCommitter, StorageError};
pub use source::{RemoteRecordSource, SourceError};
pub use tasks::{RegistryError, TaskRegistry};
