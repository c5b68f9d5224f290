//! # contract: backend boundaries of the ingestion pipeline
//!
//! This module defines one async trait per external system the pipeline talks to,
//! plus the plain data types that cross those boundaries:
//!
//! - [`ObjectReader`]: object storage, read-only.
//! - [`DocumentStore`]: schemaless document collections.
//! - [`Warehouse`]: analytical tables fed by asynchronous load jobs.
//!
//! ## Implementations
//! - [`crate::gcp`] talks to the real services over REST.
//! - [`crate::memory`] keeps everything in process, for tests and local runs.
//! - With the `test-export-mocks` feature (on by default) every trait also gets a
//!   `mockall` mock (`MockObjectReader`, `MockDocumentStore`, `MockWarehouse`).
//!
//! ## Errors
//! Every method returns [`IngestResult`]. Implementors map transport failures to
//! [`crate::error::IngestError::Backend`] and the well-known conditions
//! (missing object, permission denied) to their dedicated variants.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::IngestResult;

/// Identifier assigned by the document store at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as read back from a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub fields: Map<String, Value>,
}

/// The single warehouse table every CSV object is loaded into.
///
/// Fixed configuration; never derived from the triggering bucket or object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BatchLoadTarget {
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for BatchLoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    Csv,
}

/// Format parameters shared by table bootstrap and every load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadJobConfig {
    pub source_format: SourceFormat,
    pub skip_leading_rows: u32,
    pub autodetect: bool,
}

impl LoadJobConfig {
    /// CSV with one header row and schema auto-detection.
    pub fn csv_with_header() -> Self {
        LoadJobConfig {
            source_format: SourceFormat::Csv,
            skip_leading_rows: 1,
            autodetect: true,
        }
    }
}

impl Default for LoadJobConfig {
    fn default() -> Self {
        Self::csv_with_header()
    }
}

/// Outcome of a table creation attempt. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreation {
    Created,
    AlreadyExists,
}

/// Reference to a submitted load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobHandle {
    pub job_id: String,
    /// Region the job runs in, when the warehouse needs it for status lookups.
    pub location: Option<String>,
}

/// Terminal metadata of a successful load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadJobResult {
    pub job_id: String,
    pub table: BatchLoadTarget,
    pub output_rows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFailureKind {
    SchemaMismatch,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: JobFailureKind,
    pub message: String,
}

/// Lifecycle of a load job: pending -> running -> {succeeded, failed}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded(LoadJobResult),
    Failed(JobFailure),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded(_) | JobState::Failed(_))
    }
}

/// Read access to object storage.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Fetch the full object body decoded as UTF-8 text.
    async fn fetch(&self, bucket: &str, key: &str) -> IngestResult<String>;
}

/// Write/read access to a document store organised in named collections.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document; the store assigns and returns its identifier.
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> IngestResult<RecordId>;

    /// Every document in the collection, in store order.
    async fn list_all(&self, collection: &str) -> IngestResult<Vec<StoredRecord>>;
}

/// Table management and batch loading in the analytical warehouse.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, target: &BatchLoadTarget) -> IngestResult<bool>;

    /// Create the table without an explicit schema; the first load job defines it.
    ///
    /// Must report [`TableCreation::AlreadyExists`] rather than fail when a
    /// concurrent invocation created the table first.
    async fn create_table(&self, target: &BatchLoadTarget) -> IngestResult<TableCreation>;

    /// Submit `data` as the source of a load job. Returns as soon as the job is accepted.
    async fn submit_load_job(
        &self,
        target: &BatchLoadTarget,
        data: &str,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobHandle>;

    async fn job_state(&self, handle: &LoadJobHandle) -> IngestResult<JobState>;
}

/// Long-lived client handles, built once per process and shared by every invocation.
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectReader>,
    pub documents: Arc<dyn DocumentStore>,
    pub warehouse: Arc<dyn Warehouse>,
}
