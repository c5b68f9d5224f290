//! BigQuery REST: table bootstrap, multipart load-job upload, job polling.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::auth::TokenProvider;
use super::{endpoint, parse_base, send, unexpected};
use crate::contract::{
    BatchLoadTarget, JobFailure, JobFailureKind, JobState, LoadJobConfig, LoadJobHandle,
    LoadJobResult, SourceFormat, TableCreation, Warehouse,
};
use crate::error::{IngestError, IngestResult};

const SERVICE: &str = "bigquery";

pub struct BigQueryWarehouse {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    base: Url,
    project_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
    configuration: Option<JobConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorProto {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobConfiguration {
    load: Option<LoadConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration {
    destination_table: Option<TableReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    dataset_id: String,
    table_id: String,
}

impl BigQueryWarehouse {
    pub fn new(
        http: reqwest::Client,
        auth: Arc<TokenProvider>,
        base_url: &str,
        project_id: &str,
        location: Option<String>,
    ) -> IngestResult<Self> {
        Ok(BigQueryWarehouse {
            http,
            auth,
            base: parse_base(SERVICE, base_url)?,
            project_id: project_id.to_string(),
            location,
        })
    }

    fn table_url(&self, target: &BatchLoadTarget) -> IngestResult<Url> {
        endpoint(
            SERVICE,
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                self.project_id.as_str(),
                "datasets",
                target.dataset.as_str(),
                "tables",
                target.table.as_str(),
            ],
        )
    }

    /// Request body of `jobs.insert` for a CSV load into `target`.
    pub fn load_job_resource(&self, job_id: &str, target: &BatchLoadTarget, config: &LoadJobConfig) -> serde_json::Value {
        let source_format = match config.source_format {
            SourceFormat::Csv => "CSV",
        };
        let mut job_reference = json!({ "projectId": self.project_id, "jobId": job_id });
        if let Some(location) = &self.location {
            job_reference["location"] = json!(location);
        }
        json!({
            "jobReference": job_reference,
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": target.dataset,
                        "tableId": target.table,
                    },
                    "sourceFormat": source_format,
                    "skipLeadingRows": config.skip_leading_rows,
                    "autodetect": config.autodetect,
                    "writeDisposition": "WRITE_APPEND",
                    // the table was bootstrapped just before
                    "createDisposition": "CREATE_NEVER",
                }
            }
        })
    }
}

fn schema_mismatch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(schema does not match|provided schema|incompatible schema|cannot add fields|changed type from|number of columns|field .+ has changed)",
        )
        .expect("schema mismatch pattern is valid")
    })
}

/// Decide whether a failed job's error means the CSV header conflicts with the table schema.
pub fn classify_job_error(message: &str) -> JobFailureKind {
    if schema_mismatch_pattern().is_match(message) {
        JobFailureKind::SchemaMismatch
    } else {
        JobFailureKind::Other
    }
}

fn failure_from_status(status: &JobStatus) -> Option<JobFailure> {
    let primary = status.error_result.as_ref()?;
    let mut messages: Vec<String> = std::iter::once(primary)
        .chain(status.errors.iter())
        .filter_map(|e| e.message.clone())
        .collect();
    messages.dedup();
    let message = if messages.is_empty() {
        primary.reason.clone().unwrap_or_else(|| "unknown error".to_string())
    } else {
        messages.join("; ")
    };
    Some(JobFailure {
        kind: classify_job_error(&message),
        message,
    })
}

fn multipart_related(boundary: &str, metadata: &serde_json::Value, data: &str) -> String {
    format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: text/csv\r\n\r\n{data}\r\n--{boundary}--\r\n"
    )
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn table_exists(&self, target: &BatchLoadTarget) -> IngestResult<bool> {
        let url = self.table_url(target)?;
        let resp = send(SERVICE, &self.auth, self.http.get(url)).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected(SERVICE, resp).await),
        }
    }

    async fn create_table(&self, target: &BatchLoadTarget) -> IngestResult<TableCreation> {
        let url = endpoint(
            SERVICE,
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                self.project_id.as_str(),
                "datasets",
                target.dataset.as_str(),
                "tables",
            ],
        )?;
        let body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": target.dataset,
                "tableId": target.table,
            }
        });
        let resp = send(SERVICE, &self.auth, self.http.post(url).json(&body)).await?;
        match resp.status() {
            s if s.is_success() => Ok(TableCreation::Created),
            StatusCode::CONFLICT => Ok(TableCreation::AlreadyExists),
            _ => Err(unexpected(SERVICE, resp).await),
        }
    }

    async fn submit_load_job(
        &self,
        target: &BatchLoadTarget,
        data: &str,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobHandle> {
        let job_id = format!("bucket_ingest_{}", uuid::Uuid::new_v4().simple());
        let metadata = self.load_job_resource(&job_id, target, config);
        let boundary = format!("ingest_{}", uuid::Uuid::new_v4().simple());

        let mut url = endpoint(
            SERVICE,
            &self.base,
            &["upload", "bigquery", "v2", "projects", self.project_id.as_str(), "jobs"],
        )?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let request = self
            .http
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(multipart_related(&boundary, &metadata, data));
        let resp = send(SERVICE, &self.auth, request).await?;
        if !resp.status().is_success() {
            return Err(unexpected(SERVICE, resp).await);
        }

        let job: JobResource = resp
            .json()
            .await
            .map_err(|e| IngestError::backend(SERVICE, format!("bad jobs.insert response: {e}")))?;
        info!(job_id = %job.job_reference.job_id, location = ?job.job_reference.location, "Load job accepted");

        Ok(LoadJobHandle {
            job_id: job.job_reference.job_id,
            location: job.job_reference.location.or_else(|| self.location.clone()),
        })
    }

    async fn job_state(&self, handle: &LoadJobHandle) -> IngestResult<JobState> {
        let mut url = endpoint(
            SERVICE,
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                self.project_id.as_str(),
                "jobs",
                handle.job_id.as_str(),
            ],
        )?;
        if let Some(location) = &handle.location {
            url.query_pairs_mut().append_pair("location", location);
        }

        let resp = send(SERVICE, &self.auth, self.http.get(url)).await?;
        if !resp.status().is_success() {
            return Err(unexpected(SERVICE, resp).await);
        }
        let job: JobResource = resp
            .json()
            .await
            .map_err(|e| IngestError::backend(SERVICE, format!("bad jobs.get response: {e}")))?;
        debug!(job_id = %handle.job_id, status = ?job.status, "Fetched load job status");

        let Some(status) = job.status else {
            return Ok(JobState::Pending);
        };
        match status.state.as_str() {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "DONE" => {
                if let Some(failure) = failure_from_status(&status) {
                    return Ok(JobState::Failed(failure));
                }
                let output_rows = job
                    .statistics
                    .and_then(|s| s.load)
                    .and_then(|l| l.output_rows)
                    .and_then(|rows| rows.parse().ok())
                    .unwrap_or(0);
                let table = job
                    .configuration
                    .and_then(|c| c.load)
                    .and_then(|l| l.destination_table)
                    .map(|t| BatchLoadTarget {
                        dataset: t.dataset_id,
                        table: t.table_id,
                    })
                    .ok_or_else(|| IngestError::backend(SERVICE, "finished job lacks destination table"))?;
                Ok(JobState::Succeeded(LoadJobResult {
                    job_id: job.job_reference.job_id,
                    table,
                    output_rows,
                }))
            }
            other => Err(IngestError::backend(SERVICE, format!("unknown job state {other}"))),
        }
    }
}
