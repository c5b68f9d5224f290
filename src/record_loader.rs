//! JSON path: one object body becomes exactly one new document.
//!
//! The payload's `ID` is stored as ordinary data. The document identifier is the
//! one the store assigns on insert; nothing here enforces uniqueness of `ID`.

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::contract::{DocumentStore, RecordId};
use crate::error::{IngestError, IngestResult};

/// A required field and the keys it may appear under.
struct RequiredField {
    name: &'static str,
    keys: &'static [&'static str],
}

const REQUIRED_FIELDS: [RequiredField; 4] = [
    RequiredField {
        name: "ID",
        keys: &["ID"],
    },
    RequiredField {
        name: "Nombre",
        keys: &["Nombre", "Name"],
    },
    RequiredField {
        name: "Correo electrónico",
        keys: &["Correo electrónico", "Email"],
    },
    RequiredField {
        name: "Fecha de registro",
        keys: &["Fecha de registro", "Registration Date", "RegistrationDate"],
    },
];

/// A validated record: the four required fields, keyed as they appeared in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedRecord {
    fields: Map<String, Value>,
}

impl IngestedRecord {
    /// Parse `body` as a single JSON object and pick out the required fields.
    pub fn parse(body: &str) -> IngestResult<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| IngestError::malformed(format!("body is not valid JSON: {e}")))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(IngestError::malformed(format!(
                    "expected a single JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut fields = Map::new();
        let mut missing = Vec::new();
        for field in &REQUIRED_FIELDS {
            let found = field
                .keys
                .iter()
                .find(|key| object.get(**key).is_some_and(|v| !v.is_null()));
            match found {
                Some(key) => {
                    if let Some(v) = object.remove(*key) {
                        fields.insert((*key).to_string(), v);
                    }
                }
                None => missing.push(field.name),
            }
        }

        if !missing.is_empty() {
            return Err(IngestError::malformed(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        Ok(IngestedRecord { fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate `body` and insert it as one new document in `collection`.
///
/// Validation completes before the store is touched, so a malformed body never
/// leaves a partial document behind.
pub async fn load_record<S>(store: &S, collection: &str, body: &str) -> IngestResult<RecordId>
where
    S: DocumentStore + ?Sized,
{
    let record = match IngestedRecord::parse(body) {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, collection, "[INGEST][JSON] Rejected payload");
            return Err(e);
        }
    };
    debug!(fields = ?record.fields(), "[INGEST][JSON] Parsed record");

    let id = store.insert(collection, record.into_fields()).await?;
    info!(collection, record_id = %id, "[INGEST][JSON] Inserted document");
    Ok(id)
}
