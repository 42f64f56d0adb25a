//! Remote record source boundary.
//!
//! A source lists candidate identifiers for a query and fetches full records
//! for a batch of identifiers. Sources never retry; retry policy belongs to
//! [`crate::fetcher::RetryingBatchFetcher`].

pub mod http;
pub mod in_memory;
pub mod token;

pub use http::HttpRecordSource;
pub use in_memory::InMemoryRecordSource;
pub use token::{FileTokenProvider, StaticTokenProvider, TokenProvider};

use async_trait::async_trait;
use thiserror::Error;

use extractor_core::{Completeness, Record};

/// Failure reported by a remote source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Credential rejected; needs re-authentication, never retried.
    #[error("remote credential rejected: {0}")]
    AuthInvalid(String),

    /// Upstream rate limit or quota hit.
    #[error("remote quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network failure, upstream 5xx or an unusable response.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::QuotaExceeded(_) | SourceError::Unavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::AuthInvalid(_) => "remote_auth_invalid",
            SourceError::QuotaExceeded(_) => "remote_quota_exceeded",
            SourceError::Unavailable(_) => "remote_unavailable",
        }
    }
}

/// Stateless access to the external record API.
#[async_trait]
pub trait RemoteRecordSource: Send + Sync {
    /// Identifiers matching `query`, in upstream order, at most `max_results`.
    async fn list_candidates(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, SourceError>;

    /// Full records for `ids`. One call is one unit of retry.
    async fn fetch_batch(
        &self,
        ids: &[String],
        completeness: Completeness,
        metadata_fields: Option<&[String]>,
    ) -> Result<Vec<Record>, SourceError>;
}
