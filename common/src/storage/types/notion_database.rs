use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

/// Remote property types the metadata extractor understands. Anything else
/// is stored raw in `notion_properties` but cannot be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    RichText,
    Number,
    Select,
    Status,
    MultiSelect,
    Date,
    Checkbox,
}

/// Mapping of one promoted field: its remote property name, the property
/// type, and whether it participates in server-side filtering.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDefinition {
    pub field_type: FieldType,
    pub notion_name: String,
    #[serde(default)]
    pub filterable: bool,
}

stored_object!(NotionDatabase, "notion_database", {
    name: String,
    notion_schema: serde_json::Value,
    field_definitions: HashMap<String, FieldDefinition>,
    queryable_fields: Vec<String>,
    is_active: bool,
    #[serde(with = "crate::storage::types::serde_helpers::optional_datetime", default)]
    last_sync_at: Option<DateTime<Utc>>
});

impl NotionDatabase {
    pub fn new(
        database_id: String,
        name: String,
        notion_schema: serde_json::Value,
        field_definitions: HashMap<String, FieldDefinition>,
    ) -> Self {
        let queryable_fields = field_definitions
            .iter()
            .filter(|(_, definition)| definition.filterable)
            .map(|(field_name, _)| field_name.clone())
            .collect();
        let now = Utc::now();
        Self {
            id: database_id,
            created_at: now,
            updated_at: now,
            name,
            notion_schema,
            field_definitions,
            queryable_fields,
            is_active: true,
            last_sync_at: None,
        }
    }

    /// Register or refresh a database. The remote database id is the record
    /// id, so re-syncing the same database updates the existing row.
    pub async fn upsert(registration: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let upserted: Option<Self> = db
            .client
            .query("UPSERT type::thing($table, $id) MERGE $registration RETURN AFTER")
            .bind(("table", Self::table_name()))
            .bind(("id", registration.id.clone()))
            .bind(("registration", registration))
            .await?
            .take(0)?;

        upserted.ok_or_else(|| {
            AppError::Internal("Database registration upsert returned no row".into())
        })
    }

    pub async fn find_active(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE is_active = true")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(rows)
    }

    pub async fn mark_synced(database_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET last_sync_at = time::now(), updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", database_id.to_string()))
            .await?;

        Ok(())
    }

    pub fn field_definition(&self, field_name: &str) -> Option<&FieldDefinition> {
        self.field_definitions.get(field_name)
    }
}
