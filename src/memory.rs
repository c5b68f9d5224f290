//! In-process backends for tests and offline runs.
//!
//! They follow the same observable contract as the real services: missing
//! objects and denied buckets fail with the dedicated errors, document ids are
//! generated by the store, and the warehouse takes a table's schema from the
//! header of its first load and rejects later loads whose header differs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::contract::{
    BatchLoadTarget, DocumentStore, JobFailure, JobFailureKind, JobState, LoadJobConfig,
    LoadJobHandle, LoadJobResult, ObjectReader, RecordId, StoredRecord, TableCreation, Warehouse,
};
use crate::error::{IngestError, IngestResult};

fn poisoned(service: &'static str) -> IngestError {
    IngestError::backend(service, "in-memory state lock poisoned")
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    denied_buckets: Mutex<HashSet<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), body.into());
        }
    }

    /// Make every read from `bucket` fail with `AccessDenied`.
    pub fn deny(&self, bucket: &str) {
        if let Ok(mut denied) = self.denied_buckets.lock() {
            denied.insert(bucket.to_string());
        }
    }
}

#[async_trait]
impl ObjectReader for InMemoryObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> IngestResult<String> {
        let denied = self
            .denied_buckets
            .lock()
            .map_err(|_| poisoned("storage"))?
            .contains(bucket);
        if denied {
            return Err(IngestError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let body = self
            .objects
            .lock()
            .map_err(|_| poisoned("storage"))?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| IngestError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        String::from_utf8(body)
            .map_err(|e| IngestError::malformed(format!("object is not UTF-8 text: {e}")))
    }
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<StoredRecord>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> IngestResult<RecordId> {
        let id = RecordId(uuid::Uuid::new_v4().simple().to_string());
        self.collections
            .lock()
            .map_err(|_| poisoned("documents"))?
            .entry(collection.to_string())
            .or_default()
            .push(StoredRecord {
                id: id.clone(),
                fields,
            });
        Ok(id)
    }

    async fn list_all(&self, collection: &str) -> IngestResult<Vec<StoredRecord>> {
        Ok(self
            .collections
            .lock()
            .map_err(|_| poisoned("documents"))?
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Clone)]
struct MemTable {
    /// `None` until the first load defines the schema.
    columns: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

struct MemJob {
    polls_until_done: usize,
    outcome: JobState,
}

#[derive(Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashMap<BatchLoadTarget, MemTable>>,
    jobs: Mutex<HashMap<String, MemJob>>,
    running_polls: usize,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report each job as running for `polls` status lookups before it turns terminal.
    pub fn with_running_polls(mut self, polls: usize) -> Self {
        self.running_polls = polls;
        self
    }

    /// Pre-create a table with a fixed column list.
    pub fn with_table(self, target: &BatchLoadTarget, columns: &[&str]) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(
                target.clone(),
                MemTable {
                    columns: Some(columns.iter().map(|c| c.to_string()).collect()),
                    rows: Vec::new(),
                },
            );
        }
        self
    }

    pub fn row_count(&self, target: &BatchLoadTarget) -> usize {
        self.tables
            .lock()
            .map(|t| t.get(target).map_or(0, |table| table.rows.len()))
            .unwrap_or(0)
    }

    pub fn columns(&self, target: &BatchLoadTarget) -> Option<Vec<String>> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(target).and_then(|table| table.columns.clone()))
    }

    fn apply_load(&self, target: &BatchLoadTarget, data: &str, config: &LoadJobConfig, job_id: &str) -> IngestResult<JobState> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(config.skip_leading_rows > 0)
            .from_reader(data.as_bytes());

        let header: Vec<String> = match reader.headers() {
            Ok(h) => h.iter().map(|c| c.trim().to_string()).collect(),
            Err(e) => return Ok(failed(JobFailureKind::Other, format!("unreadable CSV header: {e}"))),
        };
        let mut rows = Vec::new();
        for record in reader.records() {
            match record {
                Ok(r) => rows.push(r.iter().map(str::to_string).collect::<Vec<_>>()),
                Err(e) => return Ok(failed(JobFailureKind::Other, format!("CSV parse error: {e}"))),
            }
        }

        let mut tables = self.tables.lock().map_err(|_| poisoned("warehouse"))?;
        let Some(table) = tables.get_mut(target) else {
            return Ok(failed(JobFailureKind::Other, format!("Not found: Table {target}")));
        };

        if let Some(existing) = &table.columns {
            if *existing != header {
                return Ok(failed(
                    JobFailureKind::SchemaMismatch,
                    format!("Provided Schema does not match Table {target}: expected {existing:?}, got {header:?}"),
                ));
            }
        } else {
            table.columns = Some(header);
        }

        let output_rows = rows.len() as u64;
        table.rows.extend(rows);
        Ok(JobState::Succeeded(LoadJobResult {
            job_id: job_id.to_string(),
            table: target.clone(),
            output_rows,
        }))
    }
}

fn failed(kind: JobFailureKind, message: String) -> JobState {
    JobState::Failed(JobFailure { kind, message })
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn table_exists(&self, target: &BatchLoadTarget) -> IngestResult<bool> {
        Ok(self
            .tables
            .lock()
            .map_err(|_| poisoned("warehouse"))?
            .contains_key(target))
    }

    async fn create_table(&self, target: &BatchLoadTarget) -> IngestResult<TableCreation> {
        let mut tables = self.tables.lock().map_err(|_| poisoned("warehouse"))?;
        if tables.contains_key(target) {
            return Ok(TableCreation::AlreadyExists);
        }
        tables.insert(target.clone(), MemTable::default());
        Ok(TableCreation::Created)
    }

    async fn submit_load_job(
        &self,
        target: &BatchLoadTarget,
        data: &str,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobHandle> {
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let outcome = self.apply_load(target, data, config, &job_id)?;
        self.jobs.lock().map_err(|_| poisoned("warehouse"))?.insert(
            job_id.clone(),
            MemJob {
                polls_until_done: self.running_polls,
                outcome,
            },
        );
        Ok(LoadJobHandle {
            job_id,
            location: None,
        })
    }

    async fn job_state(&self, handle: &LoadJobHandle) -> IngestResult<JobState> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned("warehouse"))?;
        let job = jobs
            .get_mut(&handle.job_id)
            .ok_or_else(|| IngestError::backend("warehouse", format!("unknown job {}", handle.job_id)))?;
        if job.polls_until_done > 0 {
            job.polls_until_done -= 1;
            return Ok(JobState::Running);
        }
        Ok(job.outcome.clone())
    }
}
