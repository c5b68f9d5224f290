use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bucket_ingest::batch_loader::LoadJobPolicy;
use bucket_ingest::contract::{
    Backends, BatchLoadTarget, DocumentStore, MockDocumentStore, MockObjectReader, MockWarehouse,
};
use bucket_ingest::error::IngestError;
use bucket_ingest::handler::{EventHandler, IngestOutcome, PipelineSettings};
use bucket_ingest::memory::{InMemoryDocumentStore, InMemoryObjectStore, InMemoryWarehouse};
use bucket_ingest::notification::StorageNotification;
use serde_json::json;

const COLLECTION: &str = "mi-ejercicio-gcp";

fn settings() -> PipelineSettings {
    PipelineSettings {
        collection: COLLECTION.into(),
        target: BatchLoadTarget {
            dataset: "ingest".into(),
            table: "uploads".into(),
        },
        load_job: LoadJobPolicy {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        },
    }
}

fn notification(bucket: &str, key: &str) -> StorageNotification {
    let mut metadata = BTreeMap::new();
    metadata.insert("metageneration".to_string(), "1".to_string());
    metadata.insert("timeCreated".to_string(), "2024-01-01T00:00:00.000Z".to_string());
    metadata.insert("updated".to_string(), "2024-01-01T00:00:00.000Z".to_string());
    StorageNotification {
        bucket: bucket.into(),
        object_key: key.into(),
        metadata,
        event_id: format!("evt-{key}"),
        event_type: "google.storage.object.finalize".into(),
    }
}

struct Fixture {
    objects: Arc<InMemoryObjectStore>,
    documents: Arc<InMemoryDocumentStore>,
    warehouse: Arc<InMemoryWarehouse>,
    handler: EventHandler,
}

fn fixture() -> Fixture {
    let objects = Arc::new(InMemoryObjectStore::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let handler = EventHandler::new(
        Backends {
            objects: objects.clone(),
            documents: documents.clone(),
            warehouse: warehouse.clone(),
        },
        settings(),
    );
    Fixture {
        objects,
        documents,
        warehouse,
        handler,
    }
}

#[tokio::test]
async fn json_object_lands_as_one_document() {
    let fx = fixture();
    fx.objects.put(
        "b1",
        "u/42.json",
        r#"{"ID": 1, "Nombre": "Ana", "Correo electrónico": "a@x.com", "Fecha de registro": "2024-01-01"}"#,
    );

    let outcome = fx.handler.handle(&notification("b1", "u/42.json")).await.unwrap();

    let docs = fx.documents.list_all(COLLECTION).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        serde_json::Value::Object(docs[0].fields.clone()),
        json!({"ID": 1, "Nombre": "Ana", "Correo electrónico": "a@x.com", "Fecha de registro": "2024-01-01"})
    );
    match outcome {
        IngestOutcome::Document { collection, record_id } => {
            assert_eq!(collection, COLLECTION);
            assert_eq!(record_id, docs[0].id);
        }
        other => panic!("expected a document outcome, got {other:?}"),
    }
    assert_eq!(fx.warehouse.row_count(&settings().target), 0);
}

#[tokio::test]
async fn csv_objects_load_into_the_same_table_repeatedly() {
    let fx = fixture();
    fx.objects.put("b1", "import/jan.csv", "id,name,email\n1,Ana,a@x.com\n2,Bo,b@y.org\n3,Cy,c@z.net\n");
    fx.objects.put("other-bucket", "import/feb.CSV", "id,name,email\n4,Di,d@w.io\n");

    let first = fx.handler.handle(&notification("b1", "import/jan.csv")).await.unwrap();
    assert_eq!(fx.warehouse.row_count(&settings().target), 3);
    match first {
        IngestOutcome::Batch { job } => assert_eq!(job.output_rows, 3),
        other => panic!("expected a batch outcome, got {other:?}"),
    }

    fx.handler
        .handle(&notification("other-bucket", "import/feb.CSV"))
        .await
        .expect("second CSV must not fail on table pre-existence");
    assert_eq!(fx.warehouse.row_count(&settings().target), 4);
    assert_eq!(fx.documents.count(COLLECTION), 0);
}

#[tokio::test]
async fn missing_object_fails_without_mutation() {
    let fx = fixture();

    let err = fx.handler.handle(&notification("b1", "u/gone.json")).await.unwrap_err();

    assert!(matches!(err, IngestError::ObjectNotFound { ref bucket, ref key } if bucket == "b1" && key == "u/gone.json"));
    assert_eq!(fx.documents.count(COLLECTION), 0);
    assert_eq!(fx.warehouse.row_count(&settings().target), 0);
}

#[tokio::test]
async fn malformed_json_object_fails_the_invocation() {
    let fx = fixture();
    fx.objects.put("b1", "u/1.json", r#"{"ID": 1}"#);

    let err = fx.handler.handle(&notification("b1", "u/1.json")).await.unwrap_err();

    assert!(matches!(err, IngestError::MalformedPayload { .. }));
    assert_eq!(fx.documents.count(COLLECTION), 0);
}

#[tokio::test]
async fn access_denied_stops_before_any_write() {
    let mut objects = MockObjectReader::new();
    objects
        .expect_fetch()
        .withf(|bucket, key| bucket == "locked" && key == "a.csv")
        .times(1)
        .returning(|bucket, key| {
            Err(IngestError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        });
    let mut documents = MockDocumentStore::new();
    documents.expect_insert().times(0);
    let mut warehouse = MockWarehouse::new();
    warehouse.expect_table_exists().times(0);
    warehouse.expect_submit_load_job().times(0);

    let handler = EventHandler::new(
        Backends {
            objects: Arc::new(objects),
            documents: Arc::new(documents),
            warehouse: Arc::new(warehouse),
        },
        settings(),
    );

    let err = handler.handle(&notification("locked", "a.csv")).await.unwrap_err();
    assert!(matches!(err, IngestError::AccessDenied { .. }));
}

#[tokio::test]
async fn unknown_extension_defaults_to_document_path() {
    let fx = fixture();
    fx.objects.put(
        "b1",
        "uploads/file",
        r#"{"ID": 9, "Name": "Eve", "Email": "e@v.com", "Registration Date": "2024-03-03"}"#,
    );

    let outcome = fx.handler.handle(&notification("b1", "uploads/file")).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Document { .. }));
    assert_eq!(fx.documents.count(COLLECTION), 1);
}

#[tokio::test]
async fn denied_bucket_in_memory_store() {
    let fx = fixture();
    fx.objects.put("private", "u/1.json", "{}");
    fx.objects.deny("private");

    let err = fx.handler.handle(&notification("private", "u/1.json")).await.unwrap_err();
    assert!(matches!(err, IngestError::AccessDenied { .. }));
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn notification_context_is_logged_before_a_failed_fetch() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let fx = fixture();
    let err = fx.handler.handle(&notification("b1", "gone.json")).await.unwrap_err();
    assert!(matches!(err, IngestError::ObjectNotFound { .. }));

    let output = logs.contents();
    let lines: Vec<&str> = output.lines().collect();
    let received = lines
        .iter()
        .position(|l| l.contains("[INGEST] Received storage notification"))
        .unwrap_or_else(|| panic!("no context line in:\n{output}"));
    let failed = lines
        .iter()
        .position(|l| l.contains("[INGEST][ERROR] Notification failed"))
        .unwrap_or_else(|| panic!("no error line in:\n{output}"));
    assert!(received < failed, "context logged after the failure:\n{output}");

    let context = lines[received];
    for field in [
        "event_id=evt-gone.json",
        "event_type=google.storage.object.finalize",
        "bucket=b1",
        "object_key=gone.json",
        "metageneration=1",
        "time_created=2024-01-01T00:00:00.000Z",
        "updated=2024-01-01T00:00:00.000Z",
    ] {
        assert!(context.contains(field), "missing {field} in: {context}");
    }
}
