//! Access tokens from the platform's ambient identity.
//!
//! On the hosting platform the metadata server hands out short-lived tokens for
//! the attached service account. Locally a fixed token (for example from
//! `gcloud auth print-access-token`) can be supplied instead.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{IngestError, IngestResult};

/// Refresh this long before the metadata server's expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The cache lock is held while fetching, so every waiting caller is bounded by this.
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

enum TokenSource {
    Fixed(String),
    MetadataServer { url: String },
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

pub struct TokenProvider {
    http: reqwest::Client,
    source: TokenSource,
    request_timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn fixed(http: reqwest::Client, token: String) -> Self {
        TokenProvider {
            http,
            source: TokenSource::Fixed(token),
            request_timeout: METADATA_TIMEOUT,
            cached: Mutex::new(None),
        }
    }

    pub fn metadata_server(http: reqwest::Client, url: String) -> Self {
        TokenProvider {
            http,
            source: TokenSource::MetadataServer { url },
            request_timeout: METADATA_TIMEOUT,
            cached: Mutex::new(None),
        }
    }

    /// Override how long a single metadata-server request may take.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// A bearer token valid for at least [`EXPIRY_MARGIN`].
    pub async fn token(&self) -> IngestResult<String> {
        let url = match &self.source {
            TokenSource::Fixed(token) => return Ok(token.clone()),
            TokenSource::MetadataServer { url } => url,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Failed to reach metadata server for access token");
                IngestError::backend("auth", format!("metadata server unreachable: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "Metadata server refused token request. Response body: {text}");
            return Err(IngestError::backend(
                "auth",
                format!("metadata server returned {status}"),
            ));
        }

        let token: MetadataToken = resp
            .json()
            .await
            .map_err(|e| IngestError::backend("auth", format!("bad token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = token.expires_in, "Fetched access token from metadata server");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}
