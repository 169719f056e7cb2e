use serde::{Deserialize, Serialize};
pub mod chat_message;
pub mod chat_session;
pub mod document;
pub mod document_chunk;
pub mod document_metadata;
pub mod notion_database;

/// Binding between a domain type and its table, used by the generic store
/// operations on the client.
pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Serde bridges between the domain structs and SurrealDB's value types.
pub mod serde_helpers {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use surrealdb::sql::Thing;

    /// Record ids come back from the store as `Thing`s but arrive in JSON
    /// payloads as plain strings; accept both and keep the raw id.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlexibleId {
        Text(String),
        Record(Thing),
    }

    pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match FlexibleId::deserialize(deserializer)? {
            FlexibleId::Text(id) => id,
            FlexibleId::Record(thing) => thing.id.to_raw(),
        })
    }

    /// `chrono` timestamps persisted as native SurrealDB datetimes
    /// (`created_at`, `updated_at`).
    pub mod datetime {
        use super::{DateTime, Deserialize, Deserializer, Utc};
        use serde::{Serialize, Serializer};

        pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            surrealdb::sql::Datetime::from(*value).serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let value = surrealdb::sql::Datetime::deserialize(deserializer)?;
            Ok(DateTime::<Utc>::from(value))
        }
    }

    /// Nullable timestamps (`last_sync_at`, `last_message_at`).
    pub mod optional_datetime {
        use super::{DateTime, Deserialize, Deserializer, Utc};
        use serde::{Serialize, Serializer};

        pub fn serialize<S>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => {
                    serializer.serialize_some(&surrealdb::sql::Datetime::from(*value))
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let value = Option::<surrealdb::sql::Datetime>::deserialize(deserializer)?;
            Ok(value.map(DateTime::<Utc>::from))
        }
    }
}

/// Declare a persisted row type. Every table shares the flexible string id
/// plus created/updated timestamps and gains the [`StoredObject`] binding.
/// Crate-internal: the generated serde attributes name `crate::` paths.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
        pub struct $name {
            #[serde(
                deserialize_with = "crate::storage::types::serde_helpers::deserialize_flexible_id"
            )]
            pub id: String,
            #[serde(with = "crate::storage::types::serde_helpers::datetime", default)]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(with = "crate::storage::types::serde_helpers::datetime", default)]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::storage::types::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
