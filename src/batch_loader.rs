//! CSV path: bootstrap the target table if needed, submit one load job, wait for it.
//!
//! The table bootstrap is the one step that may commit without the load
//! succeeding. It carries no data and repeating it is harmless.
//!
//! The wait is bounded by [`LoadJobPolicy::timeout`]. When it elapses the
//! invocation fails with [`IngestError::LoadJobTimeout`], but the job already
//! submitted is not cancelled: it finishes on the warehouse side and this
//! process never observes its outcome.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::contract::{
    BatchLoadTarget, JobFailure, JobFailureKind, JobState, LoadJobConfig, LoadJobHandle,
    LoadJobResult, TableCreation, Warehouse,
};
use crate::error::{IngestError, IngestResult};

/// How long to wait for a load job, and how often to ask about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadJobPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LoadJobPolicy {
    fn default() -> Self {
        LoadJobPolicy {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Load `body` into `target` and block until the job is terminal or the policy times out.
pub async fn load_batch<W>(
    warehouse: &W,
    body: &str,
    target: &BatchLoadTarget,
    policy: &LoadJobPolicy,
) -> IngestResult<LoadJobResult>
where
    W: Warehouse + ?Sized,
{
    ensure_table(warehouse, target).await?;

    let config = LoadJobConfig::csv_with_header();
    let handle = warehouse.submit_load_job(target, body, &config).await?;
    info!(job_id = %handle.job_id, table = %target, bytes = body.len(), "[INGEST][CSV] Load job submitted");

    let result = await_completion(warehouse, &handle, target, policy).await?;
    info!(
        job_id = %result.job_id,
        table = %result.table,
        output_rows = result.output_rows,
        "[INGEST][CSV] Load job succeeded"
    );
    Ok(result)
}

/// Create the table unless it exists. Safe to call any number of times.
pub async fn ensure_table<W>(warehouse: &W, target: &BatchLoadTarget) -> IngestResult<()>
where
    W: Warehouse + ?Sized,
{
    if warehouse.table_exists(target).await? {
        debug!(table = %target, "[INGEST][CSV] Table exists, skipping bootstrap");
        return Ok(());
    }

    match warehouse.create_table(target).await? {
        TableCreation::Created => info!(table = %target, "[INGEST][CSV] Created table"),
        TableCreation::AlreadyExists => {
            debug!(table = %target, "[INGEST][CSV] Table appeared concurrently, continuing")
        }
    }
    Ok(())
}

async fn await_completion<W>(
    warehouse: &W,
    handle: &LoadJobHandle,
    target: &BatchLoadTarget,
    policy: &LoadJobPolicy,
) -> IngestResult<LoadJobResult>
where
    W: Warehouse + ?Sized,
{
    match tokio::time::timeout(
        policy.timeout,
        poll_until_terminal(warehouse, handle, policy.poll_interval),
    )
    .await
    {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(JobOutcome::Lookup(e))) => Err(e),
        Ok(Err(JobOutcome::Failed(failure))) => {
            error!(job_id = %handle.job_id, table = %target, kind = ?failure.kind, message = %failure.message, "[INGEST][CSV] Load job failed");
            Err(failure_to_error(handle, target, failure))
        }
        Err(_) => {
            warn!(
                job_id = %handle.job_id,
                table = %target,
                waited = ?policy.timeout,
                "[INGEST][CSV] Gave up waiting for load job; it is not cancelled and its outcome will not be observed"
            );
            Err(IngestError::LoadJobTimeout {
                job_id: handle.job_id.clone(),
                waited: policy.timeout,
            })
        }
    }
}

enum JobOutcome {
    Lookup(IngestError),
    Failed(JobFailure),
}

async fn poll_until_terminal<W>(
    warehouse: &W,
    handle: &LoadJobHandle,
    interval: Duration,
) -> Result<LoadJobResult, JobOutcome>
where
    W: Warehouse + ?Sized,
{
    loop {
        let state = warehouse
            .job_state(handle)
            .await
            .map_err(JobOutcome::Lookup)?;
        debug!(job_id = %handle.job_id, ?state, "[INGEST][CSV] Polled load job");
        match state {
            JobState::Succeeded(result) => return Ok(result),
            JobState::Failed(failure) => return Err(JobOutcome::Failed(failure)),
            JobState::Pending | JobState::Running => tokio::time::sleep(interval).await,
        }
    }
}

fn failure_to_error(handle: &LoadJobHandle, target: &BatchLoadTarget, failure: JobFailure) -> IngestError {
    match failure.kind {
        JobFailureKind::SchemaMismatch => IngestError::SchemaMismatch {
            table: target.to_string(),
            message: failure.message,
        },
        JobFailureKind::Other => IngestError::LoadJobFailed {
            job_id: handle.job_id.clone(),
            message: failure.message,
        },
    }
}
