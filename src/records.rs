//! Read/write contract used by the records dashboard.
//!
//! `add_record` assigns `ID` as an uncoordinated random six-digit integer that is
//! never checked against existing records, so two records can share an `ID`.
//! The store-assigned document id remains the only real identity.

use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::contract::{DocumentStore, RecordId, StoredRecord};
use crate::error::{IngestError, IngestResult};

pub async fn list_records<S>(store: &S, collection: &str) -> IngestResult<Vec<StoredRecord>>
where
    S: DocumentStore + ?Sized,
{
    store.list_all(collection).await
}

/// Insert `{ID, Name, Email, Registration Date}` with a random `ID` and today's date.
pub async fn add_record<S>(
    store: &S,
    collection: &str,
    name: &str,
    email: &str,
) -> IngestResult<(RecordId, Map<String, Value>)>
where
    S: DocumentStore + ?Sized,
{
    if name.trim().is_empty() || email.trim().is_empty() {
        return Err(IngestError::malformed("name and email are required"));
    }

    let mut fields = Map::new();
    fields.insert("ID".to_string(), json!(random_six_digit_id()));
    fields.insert("Name".to_string(), json!(name));
    fields.insert("Email".to_string(), json!(email));
    fields.insert(
        "Registration Date".to_string(),
        json!(chrono::Local::now().format("%Y-%m-%d").to_string()),
    );

    let id = store.insert(collection, fields.clone()).await?;
    info!(collection, record_id = %id, "Record added");
    Ok((id, fields))
}

/// Uniform in 100000..=999999. Not checked against existing records.
pub fn random_six_digit_id() -> u32 {
    rand::rng().random_range(100_000..=999_999)
}
