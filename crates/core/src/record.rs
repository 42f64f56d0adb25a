//! The extracted record shape.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single record fetched from the remote source.
///
/// Records are immutable once fetched. `id` is the uniqueness key used by
/// merge commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub thread_id: String,
    /// Label tags; unordered upstream, kept sorted and deduplicated here.
    #[serde(default)]
    pub label_ids: BTreeSet<String>,
    pub snippet: Option<String>,
    pub history_id: Option<String>,
    /// When the upstream first saw the record.
    pub internal_date: Option<DateTime<Utc>>,
    /// Opaque nested structure, stored as serialized text by the sink.
    pub payload: Option<serde_json::Value>,
    pub size_estimate: Option<u64>,
    /// Full encoded message, present only for raw fetches.
    pub raw: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            label_ids: BTreeSet::new(),
            snippet: None,
            history_id: None,
            internal_date: None,
            payload: None,
            size_estimate: None,
            raw: None,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_ids = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_history_id(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = Some(history_id.into());
        self
    }

    pub fn with_internal_date(mut self, at: DateTime<Utc>) -> Self {
        self.internal_date = Some(at);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_size_estimate(mut self, size: u64) -> Self {
        self.size_estimate = Some(size);
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    /// Payload rendered the way the sink stores it.
    pub fn payload_text(&self) -> Option<String> {
        self.payload.as_ref().map(|p| p.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_deduplicated() {
        let r = Record::new("m1", "t1").with_labels(["INBOX", "UNREAD", "INBOX"]);
        assert_eq!(r.label_ids.len(), 2);
        assert!(r.label_ids.contains("UNREAD"));
    }

    #[test]
    fn payload_text_is_compact_json() {
        let r = Record::new("m1", "t1").with_payload(serde_json::json!({"mimeType": "text/plain"}));
        assert_eq!(r.payload_text().as_deref(), Some(r#"{"mimeType":"text/plain"}"#));
        assert_eq!(Record::new("m2", "t2").payload_text(), None);
    }
}
