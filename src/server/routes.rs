//! HTTP routes for the stats service.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::openapi::OpenApiDocument;
use super::templates::TemplateEngine;
use crate::database::DatabaseManager;

/// Name reported by the health endpoint.
pub const SERVICE_NAME: &str = "stats-service";

const DEFAULT_API_TITLE: &str = "Statistics API";

/// Shared application state.
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub openapi: Option<OpenApiDocument>,
    pub template_engine: TemplateEngine,
    /// Static view directory, `None` when it does not exist.
    pub view_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
}

/// Build the router with all routes.
///
/// - `GET /` redirects to the static view if there is one, else to the docs
/// - `GET /healthz` readiness payload
/// - `GET /api/openapi.yaml`, `GET /api/openapi.json` the API description
/// - `GET /api/docs` Swagger UI, `GET /api-docs` redirects there
/// - `/view/*` static files
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);

    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(health_handler))
        .route("/api/openapi.yaml", get(openapi_yaml_handler))
        .route("/api/openapi.json", get(openapi_json_handler))
        .route("/api/docs", get(swagger_handler))
        .route("/api-docs", get(|| async { Redirect::temporary("/api/docs") }));

    if let Some(ref view_dir) = state.view_dir {
        router = router.nest_service("/view", ServeDir::new(view_dir));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins with credentials allowed.
///
/// Methods and headers mirror the request because wildcards cannot be
/// combined with credentials. For the same reason an origin of `*` is served
/// by echoing the request's origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    if origins.iter().any(|origin| origin.trim() == "*") {
        return cors.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}

async fn root_handler(State(state): State<Arc<AppState>>) -> Redirect {
    if state.view_dir.is_some() {
        Redirect::temporary("/view/index.html")
    } else {
        Redirect::temporary("/api/docs")
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.db.is_connected().await {
        Json(json!({ "status": "ok", "service": SERVICE_NAME })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "service": SERVICE_NAME })),
        )
            .into_response()
    }
}

fn openapi_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": "OpenAPI YAML not found" })),
    )
        .into_response()
}

async fn openapi_yaml_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.openapi {
        Some(ref doc) => (
            [(header::CONTENT_TYPE, "application/yaml; charset=utf-8")],
            doc.yaml.clone(),
        )
            .into_response(),
        None => openapi_not_found(),
    }
}

async fn openapi_json_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.openapi {
        Some(ref doc) => Json(doc.json.clone()).into_response(),
        None => openapi_not_found(),
    }
}

async fn swagger_handler(State(state): State<Arc<AppState>>) -> Response {
    let api_title = state
        .openapi
        .as_ref()
        .and_then(|doc| doc.title())
        .unwrap_or(DEFAULT_API_TITLE);
    let title = format!("{} - Swagger UI", api_title);

    match state
        .template_engine
        .render_swagger(&title, "/api/openapi.yaml")
    {
        Ok(html) => Html(html).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Template error: {}", e),
        )
            .into_response(),
    }
}
