//! REST adapter for a Gmail-style message API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use extractor_core::{Completeness, Record};

use super::{RemoteRecordSource, SourceError, TokenProvider};

/// Upper bound the upstream accepts for one listing page.
pub const MAX_PAGE_SIZE: usize = 500;

const RATE_LIMIT_REASONS: [&str; 4] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    snippet: Option<String>,
    history_id: Option<String>,
    internal_date: Option<String>,
    payload: Option<serde_json::Value>,
    size_estimate: Option<u64>,
    raw: Option<String>,
}

impl WireMessage {
    fn into_record(self) -> Record {
        let internal_date = self.internal_date.as_deref().and_then(parse_epoch_millis);
        Record {
            id: self.id,
            thread_id: self.thread_id,
            label_ids: self.label_ids.into_iter().collect(),
            snippet: self.snippet,
            history_id: self.history_id,
            internal_date,
            payload: self.payload,
            size_estimate: self.size_estimate,
            raw: self.raw,
        }
    }
}

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Maps a non-success upstream status to a [`SourceError`].
pub fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let detail = format!("upstream returned {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED => SourceError::AuthInvalid(detail),
        StatusCode::FORBIDDEN if RATE_LIMIT_REASONS.iter().any(|r| body.contains(r)) => {
            SourceError::QuotaExceeded(detail)
        }
        StatusCode::FORBIDDEN => SourceError::AuthInvalid(detail),
        StatusCode::TOO_MANY_REQUESTS => SourceError::QuotaExceeded(detail),
        _ => SourceError::Unavailable(detail),
    }
}

/// [`RemoteRecordSource`] over HTTP.
///
/// Listing: `GET {base}/messages?q=&maxResults=&pageToken=`, following
/// `nextPageToken` until enough ids are collected.
/// Fetching: `GET {base}/messages/{id}?format=&metadataHeaders=` per id, in
/// order; the first failing id fails the whole batch.
#[derive(Clone)]
pub struct HttpRecordSource {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpRecordSource {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, tokens)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/messages/{id}` with the id encoded as one path segment.
    fn message_url(&self, id: &str) -> Result<reqwest::Url, SourceError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            SourceError::Unavailable(format!("invalid base url '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                SourceError::Unavailable(format!("base url '{}' cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["messages", id]);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SourceError> {
        let resp = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Unavailable(format!("undecodable response: {e}")))
    }
}

#[async_trait]
impl RemoteRecordSource for HttpRecordSource {
    async fn list_candidates(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, SourceError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/messages", self.base_url);

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        while ids.len() < max_results {
            let page_size = (max_results - ids.len()).min(MAX_PAGE_SIZE);
            let mut params = vec![
                ("q", query.to_string()),
                ("maxResults", page_size.to_string()),
            ];
            if let Some(t) = &page_token {
                params.push(("pageToken", t.clone()));
            }

            let page: ListPage = self
                .send_json(self.client.get(&url).bearer_auth(&token).query(&params))
                .await?;
            let before = ids.len();
            ids.extend(page.messages.into_iter().map(|m| m.id));
            if ids.len() == before {
                break;
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        ids.truncate(max_results);

        tracing::debug!(count = ids.len(), "listed candidate ids");
        Ok(ids)
    }

    async fn fetch_batch(
        &self,
        ids: &[String],
        completeness: Completeness,
        metadata_fields: Option<&[String]>,
    ) -> Result<Vec<Record>, SourceError> {
        let token = self.tokens.bearer_token().await?;

        let mut params = vec![("format", completeness.as_str().to_string())];
        if let Some(fields) = metadata_fields {
            params.extend(fields.iter().map(|f| ("metadataHeaders", f.clone())));
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let url = self.message_url(id)?;
            let message: WireMessage = self
                .send_json(self.client.get(url).bearer_auth(&token).query(&params))
                .await?;
            records.push(message.into_record());
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticTokenProvider;
    use axum::extract::{Path, Query, RawQuery, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    fn source(base: &str) -> HttpRecordSource {
        HttpRecordSource::new(base, Arc::new(StaticTokenProvider::new("secret")))
    }

    async fn list_pages(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::response::Response {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret") {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        match params.get("pageToken").map(String::as_str) {
            None => Json(json!({
                "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t1"}],
                "nextPageToken": "p2"
            }))
            .into_response(),
            Some("p2") => Json(json!({
                "messages": [{"id": "m3", "threadId": "t2"}]
            }))
            .into_response(),
            Some(_) => AxumStatus::BAD_REQUEST.into_response(),
        }
    }

    async fn get_message(Path(id): Path<String>, RawQuery(query): RawQuery) -> axum::response::Response {
        if id == "broken" {
            return (AxumStatus::SERVICE_UNAVAILABLE, "backend error").into_response();
        }
        // Repeated keys matter here, so read the pairs in order.
        let pairs: Vec<(String, String)> =
            reqwest::Url::parse(&format!("http://stub/?{}", query.unwrap_or_default()))
                .unwrap()
                .query_pairs()
                .into_owned()
                .collect();
        let format = pairs
            .iter()
            .find(|(k, _)| k == "format")
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();
        let headers: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "metadataHeaders")
            .map(|(_, v)| v.as_str())
            .collect();
        let snippet = if headers.is_empty() {
            format!("format={format}")
        } else {
            format!("format={format} headers={}", headers.join(","))
        };
        Json(json!({
            "id": id,
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": snippet,
            "historyId": "991",
            "internalDate": "1700000000000",
            "payload": {"mimeType": "text/plain"},
            "sizeEstimate": 2048
        }))
        .into_response()
    }

    fn upstream() -> Router {
        Router::new()
            .route("/messages", get(list_pages))
            .route("/messages/:id", get(get_message))
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            SourceError::AuthInvalid(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#),
            SourceError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "insufficientPermissions"),
            SourceError::AuthInvalid(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            SourceError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            SourceError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            SourceError::Unavailable(_)
        ));
    }

    #[test]
    fn internal_date_is_epoch_millis() {
        let parsed = parse_epoch_millis("1700000000000").unwrap();
        assert_eq!(parsed.timestamp(), 1_700_000_000);
        assert!(parse_epoch_millis("yesterday").is_none());
    }

    #[tokio::test]
    async fn listing_follows_page_tokens() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let ids = source(&base).list_candidates("in:inbox", 10).await.unwrap();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);

        let capped = source(&base).list_candidates("in:inbox", 2).await.unwrap();
        assert_eq!(capped, vec!["m1", "m2"]);

        handle.abort();
    }

    #[tokio::test]
    async fn wrong_token_maps_to_auth_invalid() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let src = HttpRecordSource::new(&base, Arc::new(StaticTokenProvider::new("stale")));
        let err = src.list_candidates("", 5).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthInvalid(_)));

        handle.abort();
    }

    #[tokio::test]
    async fn fetch_batch_decodes_upstream_records() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let ids = vec!["a".to_string(), "b".to_string()];
        let records = source(&base)
            .fetch_batch(&ids, Completeness::Full, None)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].id, "b");
        assert_eq!(records[0].thread_id, "t1");
        assert!(records[0].label_ids.contains("INBOX"));
        assert_eq!(records[0].snippet.as_deref(), Some("format=full"));
        assert_eq!(records[0].size_estimate, Some(2048));
        assert_eq!(records[0].internal_date.unwrap().timestamp(), 1_700_000_000);

        handle.abort();
    }

    #[tokio::test]
    async fn one_failing_id_fails_the_batch() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let ids = vec!["a".to_string(), "broken".to_string()];
        let err = source(&base)
            .fetch_batch(&ids, Completeness::Minimal, None)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        handle.abort();
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        let err = source("http://127.0.0.1:9")
            .list_candidates("", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn metadata_fetch_sends_each_header_field() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let ids = vec!["a".to_string()];
        let fields = vec!["From".to_string(), "Subject".to_string(), "Date".to_string()];
        let records = source(&base)
            .fetch_batch(&ids, Completeness::Metadata, Some(&fields))
            .await
            .unwrap();

        assert_eq!(
            records[0].snippet.as_deref(),
            Some("format=metadata headers=From,Subject,Date")
        );

        handle.abort();
    }

    #[tokio::test]
    async fn ids_are_sent_as_a_single_path_segment() {
        let (base, handle) = spawn_upstream(upstream()).await;

        let ids = vec!["a/b c?d".to_string()];
        let records = source(&base)
            .fetch_batch(&ids, Completeness::Full, None)
            .await
            .unwrap();

        assert_eq!(records[0].id, "a/b c?d");

        handle.abort();
    }

    #[test]
    fn message_url_keeps_base_path() {
        let src = source("http://host/gmail/v1/users/me/");
        let url = src.message_url("x/y").unwrap();
        assert_eq!(url.as_str(), "http://host/gmail/v1/users/me/messages/x%2Fy");
    }

    async fn endless_empty_pages(State(calls): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "messages": [], "nextPageToken": format!("p{}", n + 1) }))
    }

    #[tokio::test]
    async fn listing_stops_on_a_page_without_ids() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/messages", get(endless_empty_pages))
            .with_state(calls.clone());
        let (base, handle) = spawn_upstream(app).await;

        let ids = source(&base).list_candidates("label:none", 100).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.abort();
    }
}
