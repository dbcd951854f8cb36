use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use patter_core::audit::TracingAuditSink;
use patter_core::catalog::ActionCatalog;
use patter_core::config::AppConfig;
use patter_core::escalation::EscalationPolicy;
use patter_db::repositories::SqlSessionRepository;
use patter_db::{connect_with_settings, migrations, DbPool};
use patter_dialogue::collaborators::{Answering, Classifier, ResourceApi};
use patter_dialogue::dispatcher::{ActionDispatcher, DispatchPolicy};
use patter_dialogue::fallback::FallbackRouter;
use patter_dialogue::orchestrator::{DialogueOrchestrator, TurnPolicy};
use patter_dialogue::templates::ResponseTemplates;

use crate::collaborators_http::{
    HeuristicClassifier, HttpAnswering, HttpClassifier, HttpResourceApi, UnconfiguredAnswering,
    UnconfiguredResourceApi,
};
use crate::routes::AppState;

pub struct App {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<App> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .context("connecting to the session store")?;

    migrations::run_pending(&db_pool).await.context("running session store migrations")?;

    let http = reqwest::Client::builder().build().context("building http client")?;

    let commerce: Arc<dyn ResourceApi> = match &config.commerce.base_url {
        Some(base_url) => Arc::new(HttpResourceApi::new(
            http.clone(),
            base_url.clone(),
            config.commerce.api_token.clone(),
            config.commerce.deduplicates,
        )),
        None => Arc::new(UnconfiguredResourceApi::new("commerce")),
    };

    let ticketing: Arc<dyn ResourceApi> = match &config.ticketing.base_url {
        Some(base_url) => Arc::new(HttpResourceApi::new(
            http.clone(),
            base_url.clone(),
            config.ticketing.api_token.clone(),
            true,
        )),
        None => Arc::new(UnconfiguredResourceApi::new("ticketing")),
    };

    let answering: Arc<dyn Answering> = match &config.answering.base_url {
        Some(base_url) => Arc::new(HttpAnswering::new(
            http.clone(),
            base_url.clone(),
            config.answering.api_key.clone(),
        )),
        None => Arc::new(UnconfiguredAnswering),
    };

    let classifier: Arc<dyn Classifier> = match &config.classifier.base_url {
        Some(base_url) => Arc::new(HttpClassifier::new(
            http,
            base_url.clone(),
            Duration::from_secs(config.classifier.timeout_secs),
        )),
        None => Arc::new(HeuristicClassifier),
    };

    tracing::info!(
        event_name = "system.bootstrap.collaborators",
        correlation_id = "bootstrap",
        session_id = "unknown",
        commerce = if config.commerce.base_url.is_some() { "http" } else { "unconfigured" },
        ticketing = if config.ticketing.base_url.is_some() { "http" } else { "unconfigured" },
        answering = if config.answering.base_url.is_some() { "http" } else { "unconfigured" },
        classifier = if config.classifier.base_url.is_some() { "http" } else { "heuristic" },
        "collaborator bindings resolved"
    );

    let dispatcher =
        ActionDispatcher::new(commerce, ticketing, DispatchPolicy::from(&config.dispatch));
    let fallback = FallbackRouter::new(
        answering,
        config.dialogue.fallback_budget_max,
        Duration::from_secs(config.answering.timeout_secs),
    );
    let escalation = EscalationPolicy::new(
        config.dialogue.escalation_fallback_threshold,
        config.dialogue.escalate_on_action_failure,
    );

    let orchestrator = Arc::new(DialogueOrchestrator::new(
        Arc::new(SqlSessionRepository::new(db_pool.clone())),
        dispatcher,
        fallback,
        ActionCatalog::builtin(),
        escalation,
        ResponseTemplates::builtin(),
        Arc::new(TracingAuditSink),
        TurnPolicy::from(&config.dialogue),
    ));

    Ok(App { config, db_pool, state: AppState { orchestrator, classifier } })
}

#[cfg(test)]
mod tests {
    use patter_core::config::AppConfig;

    use super::bootstrap_with_config;

    #[tokio::test]
    async fn bootstrap_succeeds_with_defaults_and_in_memory_database() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();

        let app = bootstrap_with_config(config).await.expect("bootstrap");
        assert_eq!(app.config.dialogue.fallback_budget_max, 5);

        app.db_pool.close().await;
    }
}
