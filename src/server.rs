/// HTTP server setup and routing
use crate::{
    api::{self, public},
    context::AppContext,
    error::{TapglueError, TapglueResult},
    rate_limit::flood_guard,
    request::{self, ApiVersion},
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::get,
    Extension, Router,
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// Build the main application router
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-tapglue-id"),
            HeaderName::from_static("x-tapglue-date"),
            HeaderName::from_static("x-tapglue-payload-hash"),
            HeaderName::from_static("x-tapglue-signature"),
            HeaderName::from_static("x-tapglue-session"),
            HeaderName::from_static("x-tapglue-app-key"),
        ]);

    let mut router = Router::new()
        .route("/", get(public::home))
        .route("/health", get(public::health))
        .route("/humans.txt", get(public::humans))
        .route("/robots.txt", get(public::robots));

    // Every version serves the same table; the version only changes how callers authenticate
    for version in ApiVersion::ALL {
        let versioned = api::routes(&ctx)
            .route_layer(middleware::from_fn_with_state(ctx.clone(), request::prepare))
            .layer(Extension(version));
        router = router.nest(&format!("/{}", version.as_str()), versioned);
    }

    let service = &ctx.config.service;
    router
        .fallback(public::not_found)
        .with_state(ctx.clone())
        .layer(middleware::from_fn_with_state(ctx.clone(), flood_guard))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-tapglue-revision"),
            header_value(&service.revision),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-tapglue-host"),
            header_value(&service.hostname),
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(service.request_timeout_secs)))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> TapglueResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Tapglue listening on {}", addr);
    info!("   Revision: {}", ctx.config.service.revision);
    info!("   Storage: {:?}", ctx.config.storage.backend);

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TapglueError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| TapglueError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
