use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::storage::types::notion_database::FieldDefinition;

/// Process-level configuration. Secrets and connection details come from
/// the environment; everything else has defaults or lives in the databases
/// file.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub notion_access_token: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_databases_path")]
    pub databases_config_path: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_databases_path() -> String {
    "databases.toml".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

/// Model selection plus provider pacing. Parsed from the `[models]` table of
/// the databases file; every field has a default so a minimal file works.
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct ModelsConfig {
    pub embedding_model: String,
    pub embedding_dimensions: u32,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tokenizer_encoding: String,
    pub max_embedding_tokens: usize,
    pub chat_timeout_secs: u64,
    pub embedding_inter_call_delay_ms: u64,
    pub embedding_retry_delay_ms: u64,
    pub embedding_max_retries: usize,
    pub embedding_batch_size: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            tokenizer_encoding: "cl100k_base".to_string(),
            max_embedding_tokens: 8000,
            chat_timeout_secs: 60,
            embedding_inter_call_delay_ms: 100,
            embedding_retry_delay_ms: 1000,
            embedding_max_retries: 3,
            embedding_batch_size: 64,
        }
    }
}

/// Chunking strategy selector. The paragraph splitter exists for the
/// benchmark-style corpus; article is the production default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategyKind {
    Paragraph,
    Article,
}

/// Per-database sync tuning.
#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub rate_limit_delay_ms: u64,
    pub max_retries: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunking_strategy: ChunkingStrategyKind,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            rate_limit_delay_ms: 1000,
            max_retries: 3,
            chunk_size: 1000,
            chunk_overlap: 100,
            chunking_strategy: ChunkingStrategyKind::Article,
        }
    }
}

/// One `[[databases]]` entry: the remote database, its sync tuning and the
/// promoted fields.
#[derive(Clone, Deserialize, Debug)]
pub struct DatabaseConfig {
    pub database_id: String,
    pub name: String,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub fields: HashMap<String, FieldDefinition>,
}

impl DatabaseConfig {
    /// Field names promoted into typed projections and allowed in filters.
    pub fn queryable_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, definition)| definition.filterable)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// The databases file: registered databases plus the models table.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct DatabasesConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl DatabasesConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(true))
            .build()?;

        config.try_deserialize()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;

        config.try_deserialize()
    }

    pub fn database(&self, database_id: &str) -> Option<&DatabaseConfig> {
        self.databases
            .iter()
            .find(|database| database.database_id == database_id)
    }

    /// Field-name → definition lookup across every configured database,
    /// used when routing metadata filters.
    pub fn field_definitions(&self) -> HashMap<String, FieldDefinition> {
        let mut merged = HashMap::new();
        for database in &self.databases {
            for (name, definition) in &database.fields {
                merged.insert(name.clone(), definition.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::notion_database::FieldType;

    const SAMPLE: &str = r#"
        [models]
        embedding_model = "text-embedding-3-small"
        embedding_dimensions = 1536
        chat_model = "gpt-4o-mini"
        temperature = 0.4

        [[databases]]
        database_id = "db-knowledge"
        name = "Knowledge base"

        [databases.sync]
        batch_size = 5
        rate_limit_delay_ms = 500
        chunk_size = 800
        chunk_overlap = 80
        chunking_strategy = "article"

        [databases.fields.status]
        field_type = "select"
        notion_name = "Status"
        filterable = true

        [databases.fields.notes]
        field_type = "rich_text"
        notion_name = "Notes"
        filterable = false

        [[databases]]
        database_id = "db-journal"
        name = "Journal"
    "#;

    #[test]
    fn test_parse_databases_file() {
        let parsed = DatabasesConfig::from_toml_str(SAMPLE).expect("parse sample");

        assert_eq!(parsed.databases.len(), 2);
        assert!((parsed.models.temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(parsed.models.embedding_dimensions, 1536);

        let knowledge = parsed.database("db-knowledge").expect("configured");
        assert_eq!(knowledge.sync.batch_size, 5);
        assert_eq!(knowledge.sync.chunk_size, 800);
        assert_eq!(
            knowledge.sync.chunking_strategy,
            ChunkingStrategyKind::Article
        );
        assert_eq!(knowledge.queryable_fields(), vec!["status".to_string()]);

        let journal = parsed.database("db-journal").expect("configured");
        assert_eq!(journal.sync.batch_size, 10);
        assert!(journal.fields.is_empty());
    }

    #[test]
    fn test_field_definitions_merged_across_databases() {
        let parsed = DatabasesConfig::from_toml_str(SAMPLE).expect("parse sample");
        let definitions = parsed.field_definitions();

        assert_eq!(definitions.len(), 2);
        assert_eq!(
            definitions.get("status").map(|d| d.field_type),
            Some(FieldType::Select)
        );
        assert!(!definitions.get("notes").map_or(true, |d| d.filterable));
    }

    #[test]
    fn test_models_defaults_applied() {
        let parsed = DatabasesConfig::from_toml_str("").expect("parse empty");
        assert_eq!(parsed.models.chat_model, "gpt-4o-mini");
        assert_eq!(parsed.models.tokenizer_encoding, "cl100k_base");
        assert_eq!(parsed.models.chat_timeout_secs, 60);
        assert!(parsed.databases.is_empty());
    }
}
