//! Fetch configuration for one extraction run.

use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Header names requested when `Completeness::Metadata` is used without an
/// explicit field list.
pub const DEFAULT_METADATA_FIELDS: [&str; 4] = ["From", "Subject", "Date", "To"];

/// How much of each record the remote source should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// Identifiers and labels only.
    Minimal,
    /// Minimal plus a selected set of header fields.
    Metadata,
    /// The full structured payload.
    Full,
    /// The raw encoded form.
    Raw,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Minimal => "minimal",
            Completeness::Metadata => "metadata",
            Completeness::Full => "full",
            Completeness::Raw => "raw",
        }
    }
}

impl Default for Completeness {
    fn default() -> Self {
        Self::Full
    }
}

impl core::fmt::Display for Completeness {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Completeness {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Completeness::Minimal),
            "metadata" => Ok(Completeness::Metadata),
            "full" => Ok(Completeness::Full),
            "raw" => Ok(Completeness::Raw),
            other => Err(DomainError::validation(format!(
                "completeness must be one of: minimal, metadata, full, raw (got '{other}')"
            ))),
        }
    }
}

/// Configuration of a single extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSpec {
    /// Upstream search query (empty matches everything).
    pub query: String,
    /// Upper bound on candidate identifiers taken from the listing.
    pub max_results: usize,
    /// Identifiers fetched per remote call.
    pub batch_size: usize,
    pub completeness: Completeness,
    /// Only meaningful for `Completeness::Metadata`.
    pub metadata_fields: Option<Vec<String>>,
    /// Retries per batch after the first call (0 disables retrying).
    pub max_retry_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub initial_retry_delay: Duration,
}

impl FetchSpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_completeness(mut self, completeness: Completeness) -> Self {
        self.completeness = completeness;
        self
    }

    pub fn with_metadata_fields(mut self, fields: Vec<String>) -> Self {
        self.metadata_fields = Some(fields);
        self
    }

    pub fn with_retries(mut self, max_retry_attempts: u32, initial_retry_delay: Duration) -> Self {
        self.max_retry_attempts = max_retry_attempts;
        self.initial_retry_delay = initial_retry_delay;
        self
    }

    /// Rejects a zero batch size or a zero retry delay.
    pub fn validate(&self) -> DomainResult<()> {
        if self.batch_size == 0 {
            return Err(DomainError::validation("batch size must be greater than 0"));
        }
        if self.initial_retry_delay.is_zero() {
            return Err(DomainError::validation(
                "initial retry delay must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Field names to request from the source, if any.
    ///
    /// Returns `None` unless completeness is `Metadata`; falls back to
    /// [`DEFAULT_METADATA_FIELDS`] when no explicit list was given.
    pub fn requested_metadata_fields(&self) -> Option<Vec<String>> {
        if self.completeness != Completeness::Metadata {
            return None;
        }
        Some(match &self.metadata_fields {
            Some(fields) if !fields.is_empty() => fields.clone(),
            _ => DEFAULT_METADATA_FIELDS.iter().map(|f| f.to_string()).collect(),
        })
    }
}

impl Default for FetchSpec {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_results: 500,
            batch_size: 25,
            completeness: Completeness::Full,
            metadata_fields: None,
            max_retry_attempts: 5,
            initial_retry_delay: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FetchSpec::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let spec = FetchSpec::new("in:inbox").with_batch_size(0);
        assert!(matches!(spec.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let spec = FetchSpec::new("").with_retries(3, Duration::ZERO);
        assert!(matches!(spec.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn zero_retries_is_allowed() {
        let spec = FetchSpec::new("").with_retries(0, Duration::from_millis(10));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn metadata_fields_only_apply_to_metadata_completeness() {
        let full = FetchSpec::new("").with_metadata_fields(vec!["Subject".into()]);
        assert_eq!(full.requested_metadata_fields(), None);

        let meta = full.with_completeness(Completeness::Metadata);
        assert_eq!(meta.requested_metadata_fields(), Some(vec!["Subject".to_string()]));
    }

    #[test]
    fn metadata_fields_fall_back_to_defaults() {
        let spec = FetchSpec::new("").with_completeness(Completeness::Metadata);
        assert_eq!(
            spec.requested_metadata_fields(),
            Some(vec![
                "From".to_string(),
                "Subject".to_string(),
                "Date".to_string(),
                "To".to_string()
            ])
        );
    }

    #[test]
    fn completeness_parses_case_insensitively() {
        assert_eq!("FULL".parse::<Completeness>().unwrap(), Completeness::Full);
        assert_eq!("raw".parse::<Completeness>().unwrap(), Completeness::Raw);
        assert!("everything".parse::<Completeness>().is_err());
    }

    #[test]
    fn completeness_serializes_lowercase() {
        let json = serde_json::to_string(&Completeness::Metadata).unwrap();
        assert_eq!(json, "\"metadata\"");
    }
}
