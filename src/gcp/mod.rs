//! REST clients for Cloud Storage, Firestore and BigQuery.
//!
//! One `reqwest::Client` and one [`auth::TokenProvider`] are shared by all three;
//! [`connect`] builds them once per process.

pub mod auth;
pub mod bigquery;
pub mod firestore;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, Url};

use crate::config::IngestConfig;
use crate::contract::Backends;
use crate::error::{IngestError, IngestResult};

use auth::TokenProvider;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request bound; covers the CSV upload to `jobs.insert`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the long-lived service handles from configuration.
pub fn connect(config: &IngestConfig) -> IngestResult<Backends> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("bucket-ingest/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| IngestError::backend("http", format!("failed to build client: {e}")))?;

    let auth = Arc::new(match &config.access_token {
        Some(token) => TokenProvider::fixed(http.clone(), token.clone()),
        None => TokenProvider::metadata_server(http.clone(), config.endpoints.metadata_token.clone()),
    });

    Ok(Backends {
        objects: Arc::new(storage::GcsObjectReader::new(
            http.clone(),
            auth.clone(),
            &config.endpoints.storage,
        )?),
        documents: Arc::new(firestore::FirestoreDocumentStore::new(
            http.clone(),
            auth.clone(),
            &config.endpoints.firestore,
            &config.project_id,
        )?),
        warehouse: Arc::new(bigquery::BigQueryWarehouse::new(
            http,
            auth,
            &config.endpoints.bigquery,
            &config.project_id,
            config.location.clone(),
        )?),
    })
}

pub(crate) fn parse_base(service: &'static str, base: &str) -> IngestResult<Url> {
    Url::parse(base).map_err(|e| IngestError::backend(service, format!("invalid endpoint {base}: {e}")))
}

/// `base` with each segment appended and percent-encoded (so `/` inside an object key stays literal).
pub(crate) fn endpoint(service: &'static str, base: &Url, segments: &[&str]) -> IngestResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| IngestError::backend(service, format!("endpoint {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Attach the bearer token and send, mapping transport failures to `Backend`.
pub(crate) async fn send(
    service: &'static str,
    auth: &TokenProvider,
    request: RequestBuilder,
) -> IngestResult<Response> {
    let token = auth.token().await?;
    request
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| IngestError::backend(service, format!("request failed: {e}")))
}

/// Turn a non-success response into a `Backend` error carrying the body text.
pub(crate) async fn unexpected(service: &'static str, resp: Response) -> IngestError {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
    tracing::error!(service, status = %status, "Unexpected response. Response body: {text}");
    IngestError::backend(service, format!("unexpected status {status}: {text}"))
}
