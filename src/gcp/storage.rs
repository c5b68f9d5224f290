use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::auth::TokenProvider;
use super::{endpoint, parse_base, send, unexpected};
use crate::contract::ObjectReader;
use crate::error::{IngestError, IngestResult};

const SERVICE: &str = "storage";

/// Cloud Storage JSON API, media download.
pub struct GcsObjectReader {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    base: Url,
}

impl GcsObjectReader {
    pub fn new(http: reqwest::Client, auth: Arc<TokenProvider>, base_url: &str) -> IngestResult<Self> {
        Ok(GcsObjectReader {
            http,
            auth,
            base: parse_base(SERVICE, base_url)?,
        })
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> IngestResult<Url> {
        let mut url = endpoint(SERVICE, &self.base, &["storage", "v1", "b", bucket, "o", key])?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectReader for GcsObjectReader {
    async fn fetch(&self, bucket: &str, key: &str) -> IngestResult<String> {
        let url = self.object_url(bucket, key)?;
        debug!(url = %url, "Downloading object");
        let resp = send(SERVICE, &self.auth, self.http.get(url)).await?;

        match resp.status() {
            s if s.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| IngestError::backend(SERVICE, format!("reading body: {e}")))?;
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| IngestError::malformed(format!("object is not UTF-8 text: {e}")))
            }
            StatusCode::NOT_FOUND => Err(IngestError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(IngestError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(unexpected(SERVICE, resp).await),
        }
    }
}
