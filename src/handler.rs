//! Event entry point: one storage notification in, one downstream write out.
//!
//! fetch -> route -> load, strictly in sequence. Every error propagates to the
//! caller untouched; redelivery is the hosting platform's decision.

use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use crate::batch_loader::{load_batch, LoadJobPolicy};
use crate::contract::{Backends, BatchLoadTarget, LoadJobResult, RecordId};
use crate::dispatch::{route, HandlerKind};
use crate::error::IngestResult;
use crate::notification::StorageNotification;
use crate::record_loader::load_record;

/// Fixed destinations of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Document collection for JSON objects.
    pub collection: String,
    /// Warehouse table for CSV objects.
    pub target: BatchLoadTarget,
    pub load_job: LoadJobPolicy,
}

/// What a successful invocation committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    Document { collection: String, record_id: RecordId },
    Batch { job: LoadJobResult },
}

pub struct EventHandler {
    backends: Backends,
    settings: PipelineSettings,
}

impl EventHandler {
    pub fn new(backends: Backends, settings: PipelineSettings) -> Self {
        EventHandler { backends, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process a single notification.
    pub async fn handle(&self, notification: &StorageNotification) -> IngestResult<IngestOutcome> {
        let span = info_span!(
            "storage_event",
            event_id = %notification.event_id,
            bucket = %notification.bucket,
            object_key = %notification.object_key,
        );

        async {
            // Context goes out before any processing step.
            info!(
                event_id = %notification.event_id,
                event_type = %notification.event_type,
                bucket = %notification.bucket,
                object_key = %notification.object_key,
                metageneration = notification.metageneration().unwrap_or("-"),
                time_created = notification.time_created().unwrap_or("-"),
                updated = notification.updated().unwrap_or("-"),
                "[INGEST] Received storage notification"
            );

            let result = self.process(notification).await;
            match &result {
                Ok(outcome) => info!(?outcome, "[INGEST] Notification processed"),
                Err(e) => error!(error = %e, "[INGEST][ERROR] Notification failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(&self, notification: &StorageNotification) -> IngestResult<IngestOutcome> {
        let body = self
            .backends
            .objects
            .fetch(&notification.bucket, &notification.object_key)
            .await?;

        let kind = route(&notification.object_key);
        info!(?kind, bytes = body.len(), "[INGEST] Fetched object, dispatching");

        match kind {
            HandlerKind::JsonRecord => {
                let record_id =
                    load_record(self.backends.documents.as_ref(), &self.settings.collection, &body)
                        .await?;
                Ok(IngestOutcome::Document {
                    collection: self.settings.collection.clone(),
                    record_id,
                })
            }
            HandlerKind::CsvBatch => {
                let job = load_batch(
                    self.backends.warehouse.as_ref(),
                    &body,
                    &self.settings.target,
                    &self.settings.load_job,
                )
                .await?;
                Ok(IngestOutcome::Batch { job })
            }
        }
    }
}
