use common::{
    storage::types::{document_metadata::DocumentMetadata, notion_database::FieldType},
    utils::config::DatabaseConfig,
};
use serde_json::Value;
use tracing::debug;

/// Project the configured queryable fields of a page into typed metadata
/// rows. Fields that are absent or empty on the page are skipped; nothing
/// here fails the page.
pub fn extract_document_metadata(
    document_id: &str,
    properties: &Value,
    database: &DatabaseConfig,
) -> Vec<DocumentMetadata> {
    let mut rows = Vec::new();

    for (field_name, definition) in &database.fields {
        if !definition.filterable {
            continue;
        }

        let Some(property) = properties.get(&definition.notion_name) else {
            debug!(
                field = field_name,
                notion_name = definition.notion_name,
                "queryable field missing on page"
            );
            continue;
        };

        let row = match definition.field_type {
            FieldType::Select => property["select"]["name"]
                .as_str()
                .map(|value| DocumentMetadata::text(document_id.to_string(), field_name, value)),
            FieldType::Status => property["status"]["name"]
                .as_str()
                .map(|value| DocumentMetadata::text(document_id.to_string(), field_name, value)),
            FieldType::Text | FieldType::RichText => {
                let text = rich_text_value(property);
                if text.is_empty() {
                    None
                } else {
                    Some(DocumentMetadata::text(
                        document_id.to_string(),
                        field_name,
                        &text,
                    ))
                }
            }
            FieldType::Number => property["number"]
                .as_f64()
                .map(|value| DocumentMetadata::number(document_id.to_string(), field_name, value)),
            FieldType::MultiSelect => {
                let values: Vec<String> = property["multi_select"]
                    .as_array()
                    .map(|options| {
                        options
                            .iter()
                            .filter_map(|option| option["name"].as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if values.is_empty() {
                    None
                } else {
                    Some(DocumentMetadata::array(
                        document_id.to_string(),
                        field_name,
                        values,
                    ))
                }
            }
            FieldType::Date => property["date"]["start"].as_str().map(|start| {
                if start.contains('T') {
                    DocumentMetadata::datetime(document_id.to_string(), field_name, start)
                } else {
                    DocumentMetadata::date(document_id.to_string(), field_name, start)
                }
            }),
            FieldType::Checkbox => property["checkbox"]
                .as_bool()
                .map(|value| DocumentMetadata::boolean(document_id.to_string(), field_name, value)),
        };

        if let Some(row) = row {
            rows.push(row);
        }
    }

    rows
}

fn rich_text_value(property: &Value) -> String {
    let key = match property["type"].as_str() {
        Some("title") => "title",
        _ => "rich_text",
    };

    property[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["plain_text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
