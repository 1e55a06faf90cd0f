//! REST surface assembly: module + execution routes behind bearer auth,
//! with server-side failures captured into the error log.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use http::header;
use sea_orm::DatabaseConnection;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use executor::RetryingExecutor;
use executor::provision::EnvProvisioner;
use modrun_auth::{Principal, TokenVerifier};
use modrun_errors::{ApiError, Problem, code};
use module_registry::api::rest::routes::RegistryRouterDeps;
use module_registry::domain::logs::ErrorLogService;
use module_registry::infra::storage::repo::NewErrorLogRow;
use module_registry::validation::ValidationPipeline;
use module_registry::{ModuleRegistryService, RegistryConfig};

pub struct HttpDeps {
    pub registry: Arc<ModuleRegistryService>,
    pub pipeline: Arc<ValidationPipeline>,
    pub logs: Arc<ErrorLogService>,
    pub provisioner: Arc<EnvProvisioner>,
    pub registry_config: Arc<RegistryConfig>,
    pub executor: Arc<RetryingExecutor>,
    pub verifier: TokenVerifier,
    pub db: DatabaseConnection,
}

/// Build the full application router. Health endpoints are public; every
/// API route requires a verified bearer token.
pub fn build_router(deps: HttpDeps) -> Router {
    let api = module_registry::api::rest::routes::router(RegistryRouterDeps {
        service: deps.registry,
        pipeline: deps.pipeline,
        logs: deps.logs.clone(),
        provisioner: deps.provisioner,
        config: deps.registry_config,
    })
    .merge(executor::api::rest::routes::router(deps.executor))
    .layer(axum::middleware::from_fn(capture_errors))
    .layer(axum::middleware::from_fn_with_state(
        deps.verifier,
        authenticate,
    ))
    .layer(Extension(deps.logs));

    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(health_db))
        .layer(Extension(deps.db))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Verify the bearer token and attach the principal, or reject with 401.
async fn authenticate(
    State(verifier): State<TokenVerifier>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match verifier.verify_header(header) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Persist server-side (5xx) failures into the error log. Module faults and
/// 4xx rejections are not platform errors and stay out of it.
async fn capture_errors(
    Extension(logs): Extension<Arc<ErrorLogService>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let principal = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.username.clone());

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let row = match response.extensions().get::<Problem>() {
            Some(problem) => NewErrorLogRow {
                code: problem.code.clone(),
                message: problem.message.clone(),
                developer_message: problem.developer_message.clone(),
                request_path: Some(path),
                stack: None,
                principal,
            },
            None => NewErrorLogRow {
                code: code::INTERNAL.to_owned(),
                message: "internal server error".to_owned(),
                developer_message: None,
                request_path: Some(path),
                stack: None,
                principal,
            },
        };
        logs.record(row).await;
    }
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn health_db(Extension(db): Extension<DatabaseConnection>) -> Response {
    match db.ping().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => (
            http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "detail": e.to_string()})),
        )
            .into_response(),
    }
}
