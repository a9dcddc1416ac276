/// Unversioned public resources
use crate::context::AppContext;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::warn;

const HUMANS: &str = "/* TEAM */
Backend: Tapglue
Site: https://www.tapglue.com
Location: Berlin, Germany

/* SITE */
Standards: HTTP/1.1, JSON
Components: Rust, axum, tokio, Redis
";

const ROBOTS: &str = "User-agent: *
Disallow: /
";

pub async fn home() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        "<!DOCTYPE html><html><head><title>Tapglue</title></head><body>\
         <p>Tapglue API. See <a href=\"https://developers.tapglue.com\">the developer documentation</a>.</p>\
         </body></html>",
    )
}

pub async fn humans() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], HUMANS)
}

pub async fn robots() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], ROBOTS)
}

/// Liveness plus a round trip to the store
pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    match ctx.kv.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "revision": ctx.config.service.revision,
            })),
        ),
        Err(e) => {
            warn!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "version": env!("CARGO_PKG_VERSION"),
                    "revision": ctx.config.service.revision,
                })),
            )
        }
    }
}

/// 404 handler
pub async fn not_found() -> impl IntoResponse {
    crate::error::TapglueError::NotFound("resource not found".to_string())
}
