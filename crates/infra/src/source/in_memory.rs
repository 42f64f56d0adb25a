//! Scripted in-process source for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use extractor_core::{Completeness, Record};

use super::{RemoteRecordSource, SourceError};

/// One recorded `fetch_batch` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub ids: Vec<String>,
    pub completeness: Completeness,
    pub metadata_fields: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct CallLog {
    list_calls: usize,
    fetch_calls: Vec<FetchCall>,
}

/// Serves a fixed record set, in insertion order.
///
/// Failures are scripted per `fetch_batch` call index (0-based, counted across
/// the source's lifetime), or for every call. The query is matched as a
/// substring of the snippet or a label; an empty query matches everything.
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    records: Vec<Record>,
    list_failure: Option<SourceError>,
    fetch_failures: HashMap<usize, SourceError>,
    persistent_fetch_failure: Option<SourceError>,
    log: Mutex<CallLog>,
}

impl InMemoryRecordSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_list_failure(mut self, error: SourceError) -> Self {
        self.list_failure = Some(error);
        self
    }

    pub fn with_fetch_failure(mut self, call_index: usize, error: SourceError) -> Self {
        self.fetch_failures.insert(call_index, error);
        self
    }

    pub fn with_persistent_fetch_failure(mut self, error: SourceError) -> Self {
        self.persistent_fetch_failure = Some(error);
        self
    }

    pub async fn list_calls(&self) -> usize {
        self.log.lock().await.list_calls
    }

    pub async fn fetch_calls(&self) -> Vec<FetchCall> {
        self.log.lock().await.fetch_calls.clone()
    }

    fn matches(record: &Record, query: &str) -> bool {
        query.is_empty()
            || record.label_ids.contains(query)
            || record
                .snippet
                .as_deref()
                .is_some_and(|snippet| snippet.contains(query))
    }
}

#[async_trait]
impl RemoteRecordSource for InMemoryRecordSource {
    async fn list_candidates(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, SourceError> {
        self.log.lock().await.list_calls += 1;
        if let Some(err) = &self.list_failure {
            return Err(err.clone());
        }

        Ok(self
            .records
            .iter()
            .filter(|r| Self::matches(r, query))
            .take(max_results)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn fetch_batch(
        &self,
        ids: &[String],
        completeness: Completeness,
        metadata_fields: Option<&[String]>,
    ) -> Result<Vec<Record>, SourceError> {
        let call_index = {
            let mut log = self.log.lock().await;
            log.fetch_calls.push(FetchCall {
                ids: ids.to_vec(),
                completeness,
                metadata_fields: metadata_fields.map(<[String]>::to_vec),
            });
            log.fetch_calls.len() - 1
        };

        if let Some(err) = &self.persistent_fetch_failure {
            return Err(err.clone());
        }
        if let Some(err) = self.fetch_failures.get(&call_index) {
            return Err(err.clone());
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.records.iter().find(|r| &r.id == id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryRecordSource {
        InMemoryRecordSource::new(vec![
            Record::new("a", "t1").with_labels(["INBOX"]),
            Record::new("b", "t1").with_snippet("quarterly invoice"),
            Record::new("c", "t2").with_labels(["SPAM"]),
        ])
    }

    #[tokio::test]
    async fn listing_filters_and_caps() {
        let src = sample();
        assert_eq!(src.list_candidates("", 10).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(src.list_candidates("", 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(src.list_candidates("invoice", 10).await.unwrap(), vec!["b"]);
        assert_eq!(src.list_candidates("SPAM", 10).await.unwrap(), vec!["c"]);
        assert_eq!(src.list_calls().await, 4);
    }

    #[tokio::test]
    async fn scripted_failure_hits_only_its_call() {
        let src = sample().with_fetch_failure(1, SourceError::Unavailable("blip".into()));
        let ids = vec!["a".to_string()];

        assert!(src.fetch_batch(&ids, Completeness::Full, None).await.is_ok());
        assert!(src.fetch_batch(&ids, Completeness::Full, None).await.is_err());
        assert!(src.fetch_batch(&ids, Completeness::Full, None).await.is_ok());
        assert_eq!(src.fetch_calls().await.len(), 3);
    }
}
