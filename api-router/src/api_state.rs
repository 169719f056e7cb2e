use std::{collections::HashMap, sync::Arc};

use common::{
    storage::{db::SurrealDbClient, types::notion_database::FieldDefinition},
    utils::{
        config::{DatabasesConfig, ModelsConfig},
        embedding::Embedder,
    },
};
use ingestion_pipeline::pipeline::IngestionPipeline;
use retrieval_pipeline::RetrievalConfig;
use session_manager::SessionManager;

/// Everything the request handlers need, constructed once at startup.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub embedder: Arc<Embedder>,
    pub chat_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    pub session_manager: Arc<SessionManager>,
    pub pipeline: Arc<IngestionPipeline>,
    pub databases: Arc<DatabasesConfig>,
    pub models: ModelsConfig,
    pub retrieval: RetrievalConfig,
    pub field_definitions: Arc<HashMap<String, FieldDefinition>>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<Embedder>,
        chat_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        session_manager: Arc<SessionManager>,
        pipeline: Arc<IngestionPipeline>,
        databases: Arc<DatabasesConfig>,
        models: ModelsConfig,
    ) -> Self {
        let field_definitions = Arc::new(databases.field_definitions());
        Self {
            db,
            embedder,
            chat_client,
            session_manager,
            pipeline,
            databases,
            models,
            retrieval: RetrievalConfig::default(),
            field_definitions,
        }
    }
}
