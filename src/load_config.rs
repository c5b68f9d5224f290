use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use crate::batch_loader::LoadJobPolicy;
use crate::config::{Endpoints, IngestConfig, ServerConfig};
use crate::contract::BatchLoadTarget;
use crate::handler::PipelineSettings;

pub const DEFAULT_COLLECTION: &str = "mi-ejercicio-gcp";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticConfig {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    document_store: DocumentStoreSection,
    warehouse: WarehouseSection,
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    endpoints: EndpointsSection,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentStoreSection {
    #[serde(default = "default_collection")]
    collection: String,
}

impl Default for DocumentStoreSection {
    fn default() -> Self {
        DocumentStoreSection {
            collection: default_collection(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WarehouseSection {
    dataset: String,
    table: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default = "default_load_timeout_secs")]
    load_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EndpointsSection {
    storage: Option<String>,
    firestore: Option<String>,
    bigquery: Option<String>,
    metadata_token: Option<String>,
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_load_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Loads a static YAML config file and merges in the environment:
/// `GOOGLE_CLOUD_PROJECT` (project id, required unless set in the file),
/// `PORT` (server port) and `GOOGLE_OAUTH_ACCESS_TOKEN` (optional fixed token).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let project_id = match std::env::var("GOOGLE_CLOUD_PROJECT") {
        Ok(project) if !project.trim().is_empty() => {
            info!(project_id = %project, "GOOGLE_CLOUD_PROJECT found in env");
            project
        }
        _ => match static_conf.project_id.filter(|p| !p.trim().is_empty()) {
            Some(project) => project,
            None => {
                error!("No project id in config and GOOGLE_CLOUD_PROJECT not set");
                anyhow::bail!("project_id missing: set it in the config file or via GOOGLE_CLOUD_PROJECT");
            }
        },
    };

    let port = match std::env::var("PORT") {
        Ok(var) => match var.parse::<u16>() {
            Ok(port) => port,
            Err(e) => {
                error!(error = ?e, var = ?var, "PORT must be a valid port number");
                return Err(anyhow::anyhow!("PORT must be a valid port number: {e}"));
            }
        },
        Err(_) => static_conf.server.port,
    };

    let access_token = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    let warehouse = static_conf.warehouse;
    if warehouse.dataset.trim().is_empty() || warehouse.table.trim().is_empty() {
        anyhow::bail!("warehouse.dataset and warehouse.table must not be empty");
    }
    if static_conf.document_store.collection.trim().is_empty() {
        anyhow::bail!("document_store.collection must not be empty");
    }
    if warehouse.load_timeout_secs == 0 || warehouse.poll_interval_ms == 0 {
        anyhow::bail!("warehouse.load_timeout_secs and warehouse.poll_interval_ms must be positive");
    }
    let load_job = LoadJobPolicy {
        timeout: Duration::from_secs(warehouse.load_timeout_secs),
        poll_interval: Duration::from_millis(warehouse.poll_interval_ms),
    };
    if load_job.poll_interval > load_job.timeout {
        anyhow::bail!("warehouse.poll_interval_ms must not exceed warehouse.load_timeout_secs");
    }

    let defaults = Endpoints::default();
    let endpoints = Endpoints {
        storage: static_conf.endpoints.storage.unwrap_or(defaults.storage),
        firestore: static_conf.endpoints.firestore.unwrap_or(defaults.firestore),
        bigquery: static_conf.endpoints.bigquery.unwrap_or(defaults.bigquery),
        metadata_token: static_conf
            .endpoints
            .metadata_token
            .unwrap_or(defaults.metadata_token),
    };

    let config = IngestConfig {
        project_id,
        pipeline: PipelineSettings {
            collection: static_conf.document_store.collection,
            target: BatchLoadTarget {
                dataset: warehouse.dataset,
                table: warehouse.table,
            },
            load_job,
        },
        location: warehouse.location,
        server: ServerConfig {
            host: static_conf.server.host,
            port,
        },
        endpoints,
        access_token,
    };
    config.trace_loaded();
    Ok(config)
}
