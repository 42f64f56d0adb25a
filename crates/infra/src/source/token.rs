//! Bearer credentials for [`super::HttpRecordSource`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::SourceError;

/// Supplies the bearer token attached to every upstream request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, SourceError>;
}

/// Fixed token, used by tests and short-lived tooling.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, SourceError> {
        if self.token.trim().is_empty() {
            return Err(SourceError::AuthInvalid("empty bearer token".to_string()));
        }
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    token: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    expiry: Option<String>,
}

/// Reads a JSON token file on every call so an external refresher can
/// rotate it without restarting the service.
///
/// Expected layout: `{ "token": "...", "scopes": ["..."], "expiry": "..." }`.
/// `expiry` is optional and ignored when it does not parse as RFC 3339.
#[derive(Debug, Clone)]
pub struct FileTokenProvider {
    path: PathBuf,
    required_scopes: Vec<String>,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>, required_scopes: Vec<String>) -> Self {
        Self {
            path: path.into(),
            required_scopes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, file: TokenFile) -> Result<String, SourceError> {
        let token = file
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SourceError::AuthInvalid(format!(
                    "token file {} has no token",
                    self.path.display()
                ))
            })?;

        if let Some(missing) = self
            .required_scopes
            .iter()
            .find(|scope| !file.scopes.contains(scope))
        {
            return Err(SourceError::AuthInvalid(format!(
                "token is missing required scope {missing}"
            )));
        }

        let expiry = file
            .expiry
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(expiry) = expiry {
            if expiry <= Utc::now() {
                return Err(SourceError::AuthInvalid(format!(
                    "token expired at {expiry}; re-authentication required"
                )));
            }
        }

        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn bearer_token(&self) -> Result<String, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::AuthInvalid(format!(
                "cannot read token file {}: {e}",
                self.path.display()
            ))
        })?;
        let file: TokenFile = serde_json::from_str(&contents).map_err(|e| {
            SourceError::AuthInvalid(format!(
                "malformed token file {}: {e}",
                self.path.display()
            ))
        })?;
        self.check(file)
    }
}
