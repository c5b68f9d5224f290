//! Firestore REST: `createDocument` and paginated `listDocuments`.
//!
//! Documents travel as typed `Value` messages; [`encode_fields`] and
//! [`decode_fields`] convert them to and from plain JSON.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use tracing::{debug, info};

use super::auth::TokenProvider;
use super::{endpoint, parse_base, send, unexpected};
use crate::contract::{DocumentStore, RecordId, StoredRecord};
use crate::error::{IngestError, IngestResult};

const SERVICE: &str = "firestore";
const PAGE_SIZE: &str = "300";

pub struct FirestoreDocumentStore {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    base: Url,
    project_id: String,
}

#[derive(Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

impl FirestoreDocumentStore {
    pub fn new(
        http: reqwest::Client,
        auth: Arc<TokenProvider>,
        base_url: &str,
        project_id: &str,
    ) -> IngestResult<Self> {
        Ok(FirestoreDocumentStore {
            http,
            auth,
            base: parse_base(SERVICE, base_url)?,
            project_id: project_id.to_string(),
        })
    }

    pub fn collection_url(&self, collection: &str) -> IngestResult<Url> {
        endpoint(
            SERVICE,
            &self.base,
            &[
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
                collection,
            ],
        )
    }
}

/// The trailing segment of a resource name is the document id.
fn document_id(name: &str) -> IngestResult<RecordId> {
    name.rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(|id| RecordId(id.to_string()))
        .ok_or_else(|| IngestError::backend(SERVICE, format!("document name without id: {name}")))
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> IngestResult<RecordId> {
        let url = self.collection_url(collection)?;
        let body = json!({ "fields": encode_fields(&fields)? });
        let resp = send(SERVICE, &self.auth, self.http.post(url).json(&body)).await?;
        if !resp.status().is_success() {
            return Err(unexpected(SERVICE, resp).await);
        }
        let doc: Document = resp
            .json()
            .await
            .map_err(|e| IngestError::backend(SERVICE, format!("bad createDocument response: {e}")))?;
        document_id(&doc.name)
    }

    async fn list_all(&self, collection: &str) -> IngestResult<Vec<StoredRecord>> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.collection_url(collection)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", PAGE_SIZE);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let resp = send(SERVICE, &self.auth, self.http.get(url)).await?;
            if !resp.status().is_success() {
                return Err(unexpected(SERVICE, resp).await);
            }
            let page: ListDocumentsResponse = resp
                .json()
                .await
                .map_err(|e| IngestError::backend(SERVICE, format!("bad listDocuments response: {e}")))?;

            debug!(collection, count = page.documents.len(), "Fetched document page");
            for doc in page.documents {
                records.push(StoredRecord {
                    id: document_id(&doc.name)?,
                    fields: decode_fields(&doc.fields),
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(collection, count = records.len(), "Listed documents");
        Ok(records)
    }
}

/// Plain JSON object -> Firestore `fields` map.
///
/// Fails on integers outside int64, which Firestore can only hold as a lossy double.
pub fn encode_fields(fields: &Map<String, Value>) -> IngestResult<Value> {
    let mut encoded = Map::with_capacity(fields.len());
    for (k, v) in fields {
        encoded.insert(k.clone(), encode_value(v)?);
    }
    Ok(Value::Object(encoded))
}

pub fn encode_value(value: &Value) -> IngestResult<Value> {
    Ok(match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => encode_number(n)?,
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values = items.iter().map(encode_value).collect::<IngestResult<Vec<_>>>()?;
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map)? } }),
    })
}

fn encode_number(n: &Number) -> IngestResult<Value> {
    if let Some(i) = n.as_i64() {
        // int64 travels as a decimal string
        return Ok(json!({ "integerValue": i.to_string() }));
    }
    if n.is_u64() {
        return Err(IngestError::malformed(format!(
            "integer {n} does not fit a 64-bit signed document field"
        )));
    }
    match n.as_f64() {
        Some(f) => Ok(json!({ "doubleValue": f })),
        None => Err(IngestError::malformed(format!("number {n} has no double representation"))),
    }
}

/// Firestore `fields` map -> plain JSON object.
pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .unwrap_or_else(|_| inner.clone()),
            other => other.clone(),
        },
        "doubleValue" => match inner {
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| inner.clone()),
            other => other.clone(),
        },
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        // stringValue, timestampValue, referenceValue, bytesValue, geoPointValue
        _ => inner.clone(),
    }
}
