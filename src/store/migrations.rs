//! Schema migrations for stored documents.
//!
//! Version 2 rewrites legacy work package documents so that the `_id` holds
//! a canonical UUID and `created`/`expires` hold UTC timestamps truncated to
//! millisecond precision. The reversal restores plain ISO-8601 strings and
//! is lossless up to that truncation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::models::WorkPackage;

use super::{Document, DocumentStore, StoreError, ID_FIELD};

/// The current schema version of the work package collection.
pub const SCHEMA_VERSION: u32 = 2;

const DATE_FIELDS: [&str; 2] = ["created", "expires"];

/// Errors raised while migrating documents.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("document is missing the {0} field")]
    MissingField(&'static str),
    #[error("invalid UUID in document: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("invalid datetime in document: {0}")]
    InvalidDatetime(#[from] chrono::ParseError),
    #[error("migrated document failed validation: {0}")]
    Validation(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn field_str<'a>(document: &'a Document, field: &'static str) -> Result<&'a str, MigrationError> {
    document
        .get(field)
        .and_then(Value::as_str)
        .ok_or(MigrationError::MissingField(field))
}

/// Upgrade a single legacy work package document to schema version 2.
pub fn upgrade_work_package(mut document: Document) -> Result<Document, MigrationError> {
    let id: Uuid = field_str(&document, ID_FIELD)?.parse()?;
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    for field in DATE_FIELDS {
        let datetime = DateTime::parse_from_rfc3339(field_str(&document, field)?)?
            .with_timezone(&Utc);
        document.insert(
            field.to_string(),
            Value::String(datetime.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    Ok(document)
}

/// Downgrade a work package document back to the legacy string format.
pub fn downgrade_work_package(mut document: Document) -> Result<Document, MigrationError> {
    for field in DATE_FIELDS {
        let datetime = DateTime::parse_from_rfc3339(field_str(&document, field)?)?
            .with_timezone(&Utc);
        document.insert(field.to_string(), Value::String(datetime.to_rfc3339()));
    }
    Ok(document)
}

fn validate_work_package(document: &Document) -> Result<(), MigrationError> {
    let mut checked = document.clone();
    if let Some(id) = checked.remove(ID_FIELD) {
        checked.insert("id".to_string(), id);
    }
    serde_json::from_value::<WorkPackage>(Value::Object(checked))?;
    Ok(())
}

/// Migrate all documents of the work package collection to schema version 2.
///
/// Returns the number of migrated documents.
pub async fn migrate_work_packages(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<usize, MigrationError> {
    let documents = store.documents(collection).await?;
    let count = documents.len();
    let migrated = documents
        .into_iter()
        .map(|document| {
            let document = upgrade_work_package(document)?;
            validate_work_package(&document)?;
            Ok(document)
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;
    store.replace_collection(collection, migrated).await?;
    info!(collection, count, version = SCHEMA_VERSION, "migrated work packages");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn legacy_document() -> Document {
        match json!({
            "_id": "F00454DD-05D5-4ED5-A283-1DDD09DC55C5",
            "type": "download",
            "dataset_id": "some-dataset-id",
            "files": {"GHGA001": ".json"},
            "user_id": "a86f8281-e18a-429e-88a9-a5c8ea0cf754",
            "full_user_name": "Dr. John Doe",
            "email": "john@home.org",
            "user_public_crypt4gh_key": "dXNlcnMtcHVibGljLWtleQ==",
            "token_hash": "d2b42a23b8a90200e47a1f5e26146745",
            "created": "2022-02-02T12:00:00.123456+00:00",
            "expires": "2022-03-04T12:00:00.456789+00:00",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn upgrade_canonicalizes_ids_and_truncates_dates() {
        let migrated = upgrade_work_package(legacy_document()).unwrap();
        assert_eq!(migrated["_id"], "f00454dd-05d5-4ed5-a283-1ddd09dc55c5");
        assert_eq!(migrated["created"], "2022-02-02T12:00:00.123Z");
        assert_eq!(migrated["expires"], "2022-03-04T12:00:00.456Z");
    }

    #[test]
    fn downgrade_restores_iso_strings() {
        let migrated = upgrade_work_package(legacy_document()).unwrap();
        let reverted = downgrade_work_package(migrated).unwrap();
        let roundtripped = upgrade_work_package(reverted).unwrap();
        assert_eq!(roundtripped["created"], "2022-02-02T12:00:00.123Z");
    }

    #[test]
    fn upgrade_rejects_malformed_ids() {
        let mut document = legacy_document();
        document.insert("_id".to_string(), Value::String("not-a-uuid".to_string()));
        assert!(matches!(
            upgrade_work_package(document).unwrap_err(),
            MigrationError::InvalidUuid(_)
        ));
    }

    #[tokio::test]
    async fn collection_migration_rewrites_all_documents() {
        let store = crate::store::MemoryStore::new();
        store
            .put(
                "workPackages",
                "F00454DD-05D5-4ED5-A283-1DDD09DC55C5",
                legacy_document(),
            )
            .await
            .unwrap();
        let count = migrate_work_packages(&store, "workPackages").await.unwrap();
        assert_eq!(count, 1);
        let migrated = store
            .find("workPackages", "f00454dd-05d5-4ed5-a283-1ddd09dc55c5")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(migrated["created"], "2022-02-02T12:00:00.123Z");
    }
}
