//! Service configuration, read once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use extractor_core::FetchSpec;

use crate::sink::CommitMode;

pub const DEFAULT_SINK_URL: &str = "sqlite://./data/datalake.db?mode=rwc";
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default tracing level; `RUST_LOG` overrides it.
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub url: String,
    pub schema: Option<String>,
    pub table: String,
    pub commit_mode: CommitMode,
}

impl SinkConfig {
    /// `schema.table` when a schema is configured, else `table`.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

/// Defaults applied to fields an extraction request leaves out.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDefaults {
    pub max_results: usize,
    pub batch_size: usize,
    pub max_retry_attempts: u32,
    pub initial_retry_delay: Duration,
}

impl Default for FetchDefaults {
    fn default() -> Self {
        let spec = FetchSpec::default();
        Self {
            max_results: spec.max_results,
            batch_size: spec.batch_size,
            max_retry_attempts: spec.max_retry_attempts,
            initial_retry_delay: spec.initial_retry_delay,
        }
    }
}

impl FetchDefaults {
    /// A spec for `query` carrying these defaults.
    pub fn spec(&self, query: impl Into<String>) -> FetchSpec {
        FetchSpec::new(query)
            .with_max_results(self.max_results)
            .with_batch_size(self.batch_size)
            .with_retries(self.max_retry_attempts, self.initial_retry_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token_path: PathBuf,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sink: SinkConfig,
    pub fetch: FetchDefaults,
    pub remote: RemoteConfig,
    /// Show the failure diagnostic chain in status responses.
    pub expose_diagnostics: bool,
}

impl AppConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server = ServerConfig {
            host: env.string("SERVER_HOST", "0.0.0.0"),
            port: env.parse("SERVER_PORT", 8080)?,
            log_level: parse_log_level(&env.string("SERVER_LOG_LEVEL", "info"))?,
        };

        let schema = env.optional("DATA_SINK_SCHEMA");
        let sink = SinkConfig {
            url: env.string("DATA_SINK_URL", DEFAULT_SINK_URL),
            schema: schema.clone(),
            table: env.string("DATA_SINK_TABLE", "messages"),
            commit_mode: match env.optional("COMMIT_MODE") {
                Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                    var: "COMMIT_MODE",
                    reason,
                })?,
                None => CommitMode::default(),
            },
        };
        validate_identifier("DATA_SINK_TABLE", &sink.table)?;
        if let Some(schema) = &schema {
            validate_identifier("DATA_SINK_SCHEMA", schema)?;
        }

        let batch_size: usize = env.parse("FETCH_BATCH_SIZE", 25)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "FETCH_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        let delay_secs: f64 = env.parse("FETCH_INITIAL_RETRY_DELAY_SECS", 1.0)?;
        let initial_retry_delay = Duration::try_from_secs_f64(delay_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::Invalid {
                var: "FETCH_INITIAL_RETRY_DELAY_SECS",
                reason: format!("expected a positive number of seconds, got {delay_secs}"),
            })?;
        let fetch = FetchDefaults {
            max_results: env.parse("FETCH_MAX_RESULTS", 500)?,
            batch_size,
            max_retry_attempts: env.parse("FETCH_MAX_RETRY_ATTEMPTS", 5)?,
            initial_retry_delay,
        };

        let remote = RemoteConfig {
            base_url: env.string("REMOTE_API_BASE_URL", DEFAULT_REMOTE_BASE_URL),
            token_path: PathBuf::from(env.string("REMOTE_API_TOKEN_PATH", "token.json")),
            scopes: env
                .string("REMOTE_API_SCOPES", DEFAULT_SCOPE)
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        };

        Ok(Self {
            server,
            sink,
            fetch,
            remote,
            expose_diagnostics: env.flag("API_EXPOSE_DIAGNOSTICS")?,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: format!("'{raw}': {e}"),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, var: &'static str) -> Result<bool, ConfigError> {
        match self.optional(var).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a boolean, got '{other}'"),
            }),
        }
    }
}

fn parse_log_level(raw: &str) -> Result<String, ConfigError> {
    let level = match raw.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        other => {
            return Err(ConfigError::Invalid {
                var: "SERVER_LOG_LEVEL",
                reason: format!("unknown level '{other}'"),
            });
        }
    };
    Ok(level.to_string())
}

fn validate_identifier(var: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            var,
            reason: format!("'{value}' is not a plain identifier"),
        })
    }
}
