use std::collections::HashMap;

use common::storage::types::{
    document::ContentType,
    document_chunk::{DateRangeFilter, NumberFilter, TypedFilters},
    notion_database::{FieldDefinition, FieldType},
};
use serde::Deserialize;
use tracing::warn;

/// Request-level filters as they arrive over the API: a flat struct with
/// optional parts per filter kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub database_ids: Vec<String>,
    #[serde(default)]
    pub content_type: Vec<ContentType>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub metadata_filters: Vec<MetadataFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataFilter {
    pub field_name: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    In,
    Contains,
    Range,
}

/// Route request filters into the store's typed predicate slots using the
/// configured field definitions. Unknown fields are dropped with a warning;
/// nothing here fails a query.
pub fn prepare_filters(
    filters: &SearchFilters,
    field_definitions: &HashMap<String, FieldDefinition>,
) -> TypedFilters {
    let mut typed = TypedFilters {
        database_filter: if filters.database_ids.is_empty() {
            None
        } else {
            Some(filters.database_ids.clone())
        },
        content_type_filter: if filters.content_type.is_empty() {
            None
        } else {
            Some(filters.content_type.clone())
        },
        date_range_filter: filters.date_range.as_ref().and_then(|range| {
            if range.from.is_none() && range.to.is_none() {
                None
            } else {
                Some(DateRangeFilter {
                    from: range.from.clone(),
                    to: range.to.clone(),
                })
            }
        }),
        ..TypedFilters::default()
    };

    for filter in &filters.metadata_filters {
        let Some(definition) = field_definitions.get(&filter.field_name) else {
            warn!(field = %filter.field_name, "dropping filter on unknown field");
            continue;
        };

        match definition.field_type {
            FieldType::Text | FieldType::RichText => match filter.operator {
                FilterOperator::Equals => {
                    if let Some(value) = filter.values.first() {
                        typed
                            .text_filter
                            .insert(filter.field_name.clone(), vec![value.clone()]);
                    }
                }
                FilterOperator::In | FilterOperator::Contains => {
                    if !filter.values.is_empty() {
                        typed
                            .text_filter
                            .insert(filter.field_name.clone(), filter.values.clone());
                    }
                }
                FilterOperator::Range => {
                    warn!(field = %filter.field_name, "range operator unsupported for text fields, dropping");
                }
            },
            FieldType::Select | FieldType::Status => match filter.operator {
                FilterOperator::Equals => {
                    if let Some(value) = filter.values.first() {
                        typed
                            .select_filter
                            .insert(filter.field_name.clone(), vec![value.clone()]);
                    }
                }
                FilterOperator::In => {
                    if !filter.values.is_empty() {
                        typed
                            .select_filter
                            .insert(filter.field_name.clone(), filter.values.clone());
                    }
                }
                FilterOperator::Contains | FilterOperator::Range => {
                    warn!(field = %filter.field_name, "unsupported operator for select field, dropping");
                }
            },
            FieldType::MultiSelect => match filter.operator {
                FilterOperator::Equals => {
                    if let Some(value) = filter.values.first() {
                        typed.tag_filter.push(value.clone());
                    }
                }
                FilterOperator::In | FilterOperator::Contains => {
                    typed.tag_filter.extend(filter.values.iter().cloned());
                }
                FilterOperator::Range => {
                    warn!(field = %filter.field_name, "range operator unsupported for multi-select fields, dropping");
                }
            },
            FieldType::Number => match filter.operator {
                FilterOperator::Range => {
                    let mut number = NumberFilter::default();
                    for value in &filter.values {
                        if let Some(min) = value.strip_prefix("min:") {
                            number.min = min.parse().ok();
                        } else if let Some(max) = value.strip_prefix("max:") {
                            number.max = max.parse().ok();
                        }
                    }
                    if number.min.is_some() || number.max.is_some() {
                        typed.number_filter.insert(filter.field_name.clone(), number);
                    }
                }
                FilterOperator::Equals => {
                    if let Some(value) = filter.values.first().and_then(|v| v.parse().ok()) {
                        typed.number_filter.insert(
                            filter.field_name.clone(),
                            NumberFilter {
                                equals: Some(value),
                                ..NumberFilter::default()
                            },
                        );
                    }
                }
                FilterOperator::In | FilterOperator::Contains => {
                    warn!(field = %filter.field_name, "unsupported operator for number field, dropping");
                }
            },
            FieldType::Checkbox => {
                if filter.operator == FilterOperator::Equals {
                    if let Some(value) = filter.values.first() {
                        let truthy = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
                        typed.checkbox_filter.insert(filter.field_name.clone(), truthy);
                    }
                } else {
                    warn!(field = %filter.field_name, "unsupported operator for checkbox field, dropping");
                }
            }
            FieldType::Date => match filter.operator {
                FilterOperator::Range => {
                    let mut range = typed.date_range_filter.take().unwrap_or_default();
                    for value in &filter.values {
                        if let Some(from) = value.strip_prefix("from:") {
                            range.from = Some(from.to_string());
                        } else if let Some(to) = value.strip_prefix("to:") {
                            range.to = Some(to.to_string());
                        }
                    }
                    if range.from.is_some() || range.to.is_some() {
                        typed.date_range_filter = Some(range);
                    }
                }
                FilterOperator::Equals => {
                    if let Some(value) = filter.values.first() {
                        typed.date_range_filter = Some(DateRangeFilter {
                            from: Some(value.clone()),
                            to: Some(value.clone()),
                        });
                    }
                }
                FilterOperator::In | FilterOperator::Contains => {
                    warn!(field = %filter.field_name, "unsupported operator for date field, dropping");
                }
            },
        }
    }

    typed
}
