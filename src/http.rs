#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use actix_web::dev::Server;
use actix_web::{get, web, App, HttpResponse, HttpServer};
use serde_json::json;
use tracing::{error, info};

use crate::service::StatusService;

#[derive(Clone)]
pub struct AppState {
    pub status: StatusService,
}

#[get("/healthz")]
pub async fn healthz(data: web::Data<AppState>) -> HttpResponse {
    let report = data.status.health();
    if report.status == "ok" {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}

#[get("/status")]
pub async fn status(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.status.snapshot())
}

#[get("/metrics")]
pub async fn scrape_metrics(data: web::Data<AppState>) -> HttpResponse {
    match data.status.encode_metrics() {
        Ok(buf) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buf),
        Err(e) => {
            error!(error=%format!("{e:#}"), "encode metrics failed");
            json_error(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "encode metrics failed",
            )
        }
    }
}

/// Binds the status surface. The returned server must be awaited or spawned.
pub fn serve(bind: &str, state: AppState) -> std::io::Result<Server> {
    info!(bind, "status surface listening");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(healthz)
            .service(status)
            .service(scrape_metrics)
    })
    .workers(1)
    .disable_signals()
    .bind(bind)?
    .run();
    Ok(server)
}

fn json_error(code: actix_web::http::StatusCode, reason: &str) -> HttpResponse {
    HttpResponse::build(code).json(json!({"status":"error","reason":reason}))
}
