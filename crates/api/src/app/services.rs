use std::sync::Arc;

use anyhow::Context;

use extractor_infra::config::FetchDefaults;
use extractor_infra::sink;
use extractor_infra::source::{FileTokenProvider, HttpRecordSource};
use extractor_infra::{AppConfig, ExtractionOrchestrator, TaskRegistry};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ExtractionOrchestrator,
    /// Applied to request fields left unset.
    pub defaults: FetchDefaults,
    pub expose_diagnostics: bool,
}

impl AppState {
    pub fn new(
        orchestrator: ExtractionOrchestrator,
        defaults: FetchDefaults,
        expose_diagnostics: bool,
    ) -> Self {
        Self {
            orchestrator,
            defaults,
            expose_diagnostics,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        self.orchestrator.registry()
    }
}

/// Production wiring: HTTP source with a file token, sink chosen by URL.
pub async fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let tokens = Arc::new(FileTokenProvider::new(
        &config.remote.token_path,
        config.remote.scopes.clone(),
    ));
    let source = Arc::new(HttpRecordSource::new(config.remote.base_url.clone(), tokens));

    let committer = sink::connect(&config.sink.url)
        .await
        .context("failed to open data sink")?;

    let table = config.sink.qualified_table();
    committer
        .ensure_schema(&table)
        .await
        .with_context(|| format!("data sink cannot hold table '{table}'"))?;
    tracing::info!(
        backend = committer.backend(),
        table = %table,
        mode = %config.sink.commit_mode,
        remote = %config.remote.base_url,
        "extraction pipeline ready"
    );

    let orchestrator = ExtractionOrchestrator::new(
        TaskRegistry::new(),
        source,
        committer,
        table,
        config.sink.commit_mode,
    );

    Ok(AppState::new(
        orchestrator,
        config.fetch.clone(),
        config.expose_diagnostics,
    ))
}
