//! REST backends against a local actix-web stand-in for the Google endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use bucket_ingest::contract::{
    BatchLoadTarget, DocumentStore, JobFailureKind, JobState, LoadJobHandle, ObjectReader,
    TableCreation, Warehouse,
};
use bucket_ingest::error::IngestError;
use bucket_ingest::gcp::auth::TokenProvider;
use bucket_ingest::gcp::bigquery::BigQueryWarehouse;
use bucket_ingest::gcp::firestore::FirestoreDocumentStore;
use bucket_ingest::gcp::storage::GcsObjectReader;
use serde_json::json;

async fn object_media(req: HttpRequest, path: web::Path<(String, String)>) -> HttpResponse {
    let (_bucket, key) = path.into_inner();
    match key.as_str() {
        "missing.json" => HttpResponse::NotFound().finish(),
        "secret.json" => HttpResponse::Forbidden().finish(),
        "expired.json" => HttpResponse::Unauthorized().finish(),
        _ => {
            let bearer = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok());
            if bearer != Some("Bearer test-token") {
                return HttpResponse::Unauthorized().finish();
            }
            HttpResponse::Ok().body(r#"{"ID": 7}"#)
        }
    }
}

async fn list_documents(query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let doc = |id: &str, name: &str| {
        json!({
            "name": format!("projects/demo/databases/(default)/documents/users/{id}"),
            "fields": {"Nombre": {"stringValue": name}, "ID": {"integerValue": "1"}}
        })
    };
    match query.get("pageToken").map(String::as_str) {
        None => HttpResponse::Ok().json(json!({
            "documents": [doc("doc-a", "Ana")],
            "nextPageToken": "page-2"
        })),
        Some("page-2") => HttpResponse::Ok().json(json!({ "documents": [doc("doc-b", "Luis")] })),
        Some(_) => HttpResponse::BadRequest().finish(),
    }
}

async fn get_table(path: web::Path<(String, String, String)>) -> HttpResponse {
    let (_project, _dataset, table) = path.into_inner();
    if table == "uploads" {
        HttpResponse::Ok().json(json!({ "id": "demo:ingest.uploads" }))
    } else {
        HttpResponse::NotFound().finish()
    }
}

async fn insert_table() -> HttpResponse {
    HttpResponse::Conflict().json(json!({ "error": { "code": 409, "message": "Already Exists" } }))
}

async fn get_job(path: web::Path<(String, String)>) -> HttpResponse {
    let (_project, job_id) = path.into_inner();
    let status = match job_id.as_str() {
        "running" => json!({ "state": "RUNNING" }),
        "failed" => json!({
            "state": "DONE",
            "errorResult": {
                "reason": "invalid",
                "message": "Provided Schema does not match Table demo:ingest.uploads."
            },
            "errors": [{
                "reason": "invalid",
                "message": "Provided Schema does not match Table demo:ingest.uploads."
            }]
        }),
        _ => json!({ "state": "DONE" }),
    };
    HttpResponse::Ok().json(json!({
        "jobReference": { "projectId": "demo", "jobId": job_id },
        "status": status,
        "statistics": { "load": { "outputRows": "3" } },
        "configuration": {
            "load": { "destinationTable": { "projectId": "demo", "datasetId": "ingest", "tableId": "uploads" } }
        }
    }))
}

async fn metadata_token(req: HttpRequest) -> HttpResponse {
    if req.headers().get("metadata-flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
        return HttpResponse::Forbidden().finish();
    }
    HttpResponse::Ok().json(json!({ "access_token": "from-metadata", "expires_in": 3599, "token_type": "Bearer" }))
}

async fn hung_metadata_token() -> HttpResponse {
    actix_web::rt::time::sleep(Duration::from_secs(30)).await;
    HttpResponse::Ok().finish()
}

/// Start the stand-in on an ephemeral port and return its base URL.
fn start_fake_google() -> String {
    let server = HttpServer::new(|| {
        App::new()
            .route("/storage/v1/b/{bucket}/o/{key}", web::get().to(object_media))
            .route(
                "/v1/projects/{project}/databases/{database}/documents/{collection}",
                web::get().to(list_documents),
            )
            .route(
                "/bigquery/v2/projects/{project}/datasets/{dataset}/tables/{table}",
                web::get().to(get_table),
            )
            .route(
                "/bigquery/v2/projects/{project}/datasets/{dataset}/tables",
                web::post().to(insert_table),
            )
            .route("/bigquery/v2/projects/{project}/jobs/{job}", web::get().to(get_job))
            .route("/token", web::get().to(metadata_token))
            .route("/hung-token", web::get().to(hung_metadata_token))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("bind fake google");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{addr}")
}

fn auth() -> Arc<TokenProvider> {
    Arc::new(TokenProvider::fixed(reqwest::Client::new(), "test-token".into()))
}

fn target(table: &str) -> BatchLoadTarget {
    BatchLoadTarget {
        dataset: "ingest".into(),
        table: table.into(),
    }
}

fn handle(job_id: &str) -> LoadJobHandle {
    LoadJobHandle {
        job_id: job_id.into(),
        location: None,
    }
}

#[actix_web::test]
async fn storage_statuses_map_to_ingest_errors() {
    let base = start_fake_google();
    let reader = GcsObjectReader::new(reqwest::Client::new(), auth(), &base).unwrap();

    assert_eq!(reader.fetch("b1", "ok.json").await.unwrap(), r#"{"ID": 7}"#);

    let err = reader.fetch("b1", "missing.json").await.unwrap_err();
    assert!(
        matches!(&err, IngestError::ObjectNotFound { bucket, key } if bucket == "b1" && key == "missing.json"),
        "{err:?}"
    );

    for key in ["secret.json", "expired.json"] {
        let err = reader.fetch("b1", key).await.unwrap_err();
        assert!(matches!(err, IngestError::AccessDenied { .. }), "{key}: {err:?}");
    }
}

#[actix_web::test]
async fn firestore_listing_follows_page_tokens() {
    let base = start_fake_google();
    let store = FirestoreDocumentStore::new(reqwest::Client::new(), auth(), &base, "demo").unwrap();

    let records = store.list_all("users").await.unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["doc-a", "doc-b"]);
    assert_eq!(records[1].fields["Nombre"], "Luis");
    assert_eq!(records[0].fields["ID"], 1);
}

#[actix_web::test]
async fn firestore_insert_refuses_oversized_integers_before_sending() {
    let base = start_fake_google();
    let store = FirestoreDocumentStore::new(reqwest::Client::new(), auth(), &base, "demo").unwrap();
    let fields = json!({"ID": u64::MAX, "Nombre": "Ana"});

    let err = store
        .insert("users", fields.as_object().unwrap().clone())
        .await
        .unwrap_err();

    // the stand-in has no createDocument route, so reaching it would be a Backend error
    assert!(matches!(err, IngestError::MalformedPayload { .. }), "{err:?}");
}

#[actix_web::test]
async fn bigquery_table_bootstrap_statuses() {
    let base = start_fake_google();
    let warehouse = BigQueryWarehouse::new(reqwest::Client::new(), auth(), &base, "demo", None).unwrap();

    assert!(warehouse.table_exists(&target("uploads")).await.unwrap());
    assert!(!warehouse.table_exists(&target("absent")).await.unwrap());
    assert_eq!(
        warehouse.create_table(&target("uploads")).await.unwrap(),
        TableCreation::AlreadyExists
    );
}

#[actix_web::test]
async fn bigquery_job_states_are_mapped() {
    let base = start_fake_google();
    let warehouse = BigQueryWarehouse::new(reqwest::Client::new(), auth(), &base, "demo", None).unwrap();

    assert_eq!(warehouse.job_state(&handle("running")).await.unwrap(), JobState::Running);

    match warehouse.job_state(&handle("failed")).await.unwrap() {
        JobState::Failed(failure) => {
            assert_eq!(failure.kind, JobFailureKind::SchemaMismatch);
            assert!(failure.message.contains("does not match"), "{}", failure.message);
        }
        other => panic!("expected a failed job, got {other:?}"),
    }

    match warehouse.job_state(&handle("done")).await.unwrap() {
        JobState::Succeeded(result) => {
            assert_eq!(result.job_id, "done");
            assert_eq!(result.table, target("uploads"));
            assert_eq!(result.output_rows, 3);
        }
        other => panic!("expected a finished job, got {other:?}"),
    }
}

#[actix_web::test]
async fn metadata_server_token_is_fetched_with_flavor_header() {
    let base = start_fake_google();
    let provider = TokenProvider::metadata_server(reqwest::Client::new(), format!("{base}/token"));

    assert_eq!(provider.token().await.unwrap(), "from-metadata");
    // served from cache the second time
    assert_eq!(provider.token().await.unwrap(), "from-metadata");
}

#[actix_web::test]
async fn hung_metadata_server_fails_within_the_request_timeout() {
    let base = start_fake_google();
    let provider = TokenProvider::metadata_server(reqwest::Client::new(), format!("{base}/hung-token"))
        .with_request_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let err = provider.token().await.unwrap_err();

    assert!(matches!(err, IngestError::Backend { service: "auth", .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
}
