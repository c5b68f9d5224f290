//! HTTP receiver for storage notifications.
//!
//! `POST /` takes one notification per request. The status code is the whole
//! answer to the platform: 2xx acknowledges, 5xx asks for redelivery, 400 marks
//! a delivery that can never succeed.

use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde_json::json;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::contract::Backends;
use crate::handler::EventHandler;
use crate::notification::{CloudEventHeaders, StorageNotification};

/// Register the receiver routes. Expects `web::Data<EventHandler>` in app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::post().to(receive_event))
        .route("/healthz", web::get().to(healthz));
}

/// Serve `POST /` on the configured address until the process is stopped.
pub async fn serve(config: &IngestConfig, backends: Backends) -> std::io::Result<()> {
    let handler = Arc::new(EventHandler::new(backends, config.pipeline.clone()));
    let data = web::Data::from(handler);
    let (host, port) = (config.server.host.as_str(), config.server.port);
    info!(host, port, "Starting notification receiver");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .bind((host, port))?
        .run()
        .await
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn receive_event(
    req: HttpRequest,
    body: web::Bytes,
    handler: web::Data<EventHandler>,
) -> HttpResponse {
    let headers = match (header(&req, "ce-id"), header(&req, "ce-type")) {
        (Some(id), Some(event_type)) => Some(CloudEventHeaders {
            id: id.to_string(),
            event_type: event_type.to_string(),
        }),
        _ => None,
    };

    let notification = match StorageNotification::from_request(headers, &body) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "Rejected undeliverable notification");
            return HttpResponse::BadRequest().json(json!({ "error": e.to_string() }));
        }
    };

    match handler.handle(&notification).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "event_id": notification.event_id,
            "outcome": outcome,
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "event_id": notification.event_id,
            "error": e.to_string(),
        })),
    }
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}
