//! Selects a loader from the object key alone. Body validity is the loader's concern.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandlerKind {
    /// Single JSON document into the document store. The default.
    JsonRecord,
    /// CSV body as a warehouse load job.
    CsvBatch,
}

/// `.csv` suffix (any case) goes to the warehouse, everything else to the document store.
pub fn route(object_key: &str) -> HandlerKind {
    let is_csv = object_key
        .len()
        .checked_sub(4)
        .and_then(|start| object_key.get(start..))
        .is_some_and(|suffix| suffix.eq_ignore_ascii_case(".csv"));

    if is_csv {
        HandlerKind::CsvBatch
    } else {
        HandlerKind::JsonRecord
    }
}
