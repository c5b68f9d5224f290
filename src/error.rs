use std::time::Duration;

use thiserror::Error;

/// Convenience result type for the ingestion pipeline.
pub type IngestResult<T> = Result<T, IngestError>;

/// Error type shared by every stage of the pipeline and by the backend traits.
///
/// Nothing in this crate retries on any of these. They propagate out of
/// [`crate::handler::EventHandler::handle`] and the hosting platform decides
/// whether to redeliver the event.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The bucket or the object does not exist.
    #[error("object not found: gs://{bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Ambient credentials lack read permission on the object.
    #[error("access denied reading gs://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    /// The body is not a single JSON object carrying every required field.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    /// The auto-detected CSV schema conflicts with the existing table schema.
    #[error("schema mismatch loading into {table}: {message}")]
    SchemaMismatch { table: String, message: String },

    /// Any other job-level failure reported by the warehouse.
    #[error("load job {job_id} failed: {message}")]
    LoadJobFailed { job_id: String, message: String },

    /// The load job did not reach a terminal state within the configured wait.
    /// The job itself keeps running on the warehouse side.
    #[error("load job {job_id} still running after {waited:?}")]
    LoadJobTimeout { job_id: String, waited: Duration },

    /// The inbound notification lacks the bucket or object name.
    #[error("invalid storage notification: {reason}")]
    InvalidNotification { reason: String },

    /// Transport failure or unexpected response from a backend service.
    #[error("{service} error: {message}")]
    Backend { service: &'static str, message: String },
}

impl IngestError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        IngestError::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(service: &'static str, message: impl Into<String>) -> Self {
        IngestError::Backend {
            service,
            message: message.into(),
        }
    }
}
