use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
    utils::{
        config::{get_config, DatabasesConfig},
        embedding::Embedder,
        llm::{ChatCompleter, OpenAiChat},
    },
};
use ingestion_pipeline::{notion::NotionClient, pipeline::IngestionPipeline};
use session_manager::{
    idle::{IdleMonitor, IdleMonitorConfig},
    SessionManager,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    let databases = Arc::new(DatabasesConfig::load(&config.databases_config_path)?);
    let models = databases.models.clone();

    // Initialization order: store, then provider clients, then the session
    // manager and its idle monitor.
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;
    ensure_runtime_indexes(&db, models.embedding_dimensions as usize).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(Embedder::new(Arc::clone(&openai_client), &models));
    let chat =
        Arc::new(OpenAiChat::new(Arc::clone(&openai_client), &models)) as Arc<dyn ChatCompleter>;
    let notion = Arc::new(NotionClient::new(&config.notion_access_token));

    let session_manager = Arc::new(SessionManager::new(Arc::clone(&db), Arc::clone(&chat)));
    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        chat,
        notion,
        models.max_embedding_tokens,
    ));

    let idle_monitor = IdleMonitor::start(
        Arc::clone(&session_manager),
        IdleMonitorConfig::default(),
    );

    let state = ApiState::new(
        db,
        embedder,
        openai_client,
        session_manager,
        pipeline,
        databases,
        models,
    );
    let app = api_routes(state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The monitor gets a bounded window to finish its current cycle.
    idle_monitor.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .unwrap_or_else(|err| tracing::error!(error = %err, "failed to listen for shutdown signal"));
    info!("Shutdown signal received");
}
