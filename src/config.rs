use tracing::info;

use crate::gcp::auth::DEFAULT_METADATA_TOKEN_URL;
use crate::handler::PipelineSettings;

/// Fully merged runtime configuration: static YAML plus environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub project_id: String,
    pub pipeline: PipelineSettings,
    /// Warehouse region for load jobs; `None` lets the warehouse pick.
    pub location: Option<String>,
    pub server: ServerConfig,
    pub endpoints: Endpoints,
    /// Fixed bearer token for local runs. When absent the metadata server is used.
    pub access_token: Option<String>,
}

impl IngestConfig {
    pub fn trace_loaded(&self) {
        info!(
            project_id = %self.project_id,
            collection = %self.pipeline.collection,
            table = %self.pipeline.target,
            load_timeout = ?self.pipeline.load_job.timeout,
            poll_interval = ?self.pipeline.load_job.poll_interval,
            fixed_token = self.access_token.is_some(),
            "Loaded IngestConfig"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Service base URLs; overridable for emulators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub storage: String,
    pub firestore: String,
    pub bigquery: String,
    pub metadata_token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            storage: "https://storage.googleapis.com".to_string(),
            firestore: "https://firestore.googleapis.com".to_string(),
            bigquery: "https://bigquery.googleapis.com".to_string(),
            metadata_token: DEFAULT_METADATA_TOKEN_URL.to_string(),
        }
    }
}
