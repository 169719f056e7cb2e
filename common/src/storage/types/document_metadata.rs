use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

stored_object!(DocumentMetadata, "document_metadata", {
    document_id: String,
    field_name: String,
    text_value: Option<String>,
    number_value: Option<f64>,
    date_value: Option<String>,
    datetime_value: Option<String>,
    boolean_value: Option<bool>,
    array_value: Option<Vec<String>>
});

impl DocumentMetadata {
    fn empty(document_id: String, field_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            field_name: field_name.to_string(),
            text_value: None,
            number_value: None,
            date_value: None,
            datetime_value: None,
            boolean_value: None,
            array_value: None,
        }
    }

    pub fn text(document_id: String, field_name: &str, value: &str) -> Self {
        Self {
            text_value: Some(value.to_string()),
            ..Self::empty(document_id, field_name)
        }
    }

    pub fn number(document_id: String, field_name: &str, value: f64) -> Self {
        Self {
            number_value: Some(value),
            ..Self::empty(document_id, field_name)
        }
    }

    pub fn boolean(document_id: String, field_name: &str, value: bool) -> Self {
        Self {
            boolean_value: Some(value),
            ..Self::empty(document_id, field_name)
        }
    }

    pub fn date(document_id: String, field_name: &str, value: &str) -> Self {
        Self {
            date_value: Some(value.to_string()),
            ..Self::empty(document_id, field_name)
        }
    }

    pub fn datetime(document_id: String, field_name: &str, value: &str) -> Self {
        Self {
            datetime_value: Some(value.to_string()),
            ..Self::empty(document_id, field_name)
        }
    }

    pub fn array(document_id: String, field_name: &str, values: Vec<String>) -> Self {
        Self {
            array_value: Some(values),
            ..Self::empty(document_id, field_name)
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "DELETE {} WHERE document_id = $document_id",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }

    pub async fn for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE document_id = $document_id ORDER BY field_name ASC",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows)
    }
}
