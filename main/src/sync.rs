use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
    utils::{
        config::{get_config, DatabasesConfig},
        embedding::Embedder,
        llm::{ChatCompleter, OpenAiChat},
    },
};
use ingestion_pipeline::{notion::NotionClient, pipeline::IngestionPipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-shot sync over every configured database.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let databases = DatabasesConfig::load(&config.databases_config_path)?;
    let models = databases.models.clone();

    if databases.databases.is_empty() {
        error!("no databases configured, nothing to sync");
        return Ok(());
    }

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
    let chat = Arc::new(OpenAiChat::new(openai_client, &models)) as Arc<dyn ChatCompleter>;
    let notion = Arc::new(NotionClient::new(&config.notion_access_token));

    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        chat,
        notion,
        models.max_embedding_tokens,
    );

    for database in &databases.databases {
        info!(
            database_id = %database.database_id,
            name = %database.name,
            "syncing database"
        );

        match pipeline.ingest_database(database).await {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(err) => {
                error!(database_id = %database.database_id, error = %err, "database sync failed");
            }
        }
    }

    info!(
        embedding_tokens_used = embedder.tokens_used(),
        "sync run finished"
    );

    Ok(())
}
