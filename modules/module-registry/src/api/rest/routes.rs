use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};

use executor::provision::EnvProvisioner;

use super::handlers;
use crate::config::RegistryConfig;
use crate::domain::logs::ErrorLogService;
use crate::domain::service::ModuleRegistryService;
use crate::validation::ValidationPipeline;

/// Everything the registry surface needs wired in.
pub struct RegistryRouterDeps {
    pub service: Arc<ModuleRegistryService>,
    pub pipeline: Arc<ValidationPipeline>,
    pub logs: Arc<ErrorLogService>,
    pub provisioner: Arc<EnvProvisioner>,
    pub config: Arc<RegistryConfig>,
}

/// Routes for the module / lifecycle / log surface.
pub fn router(deps: RegistryRouterDeps) -> Router {
    Router::new()
        .route(
            "/api/modules",
            get(handlers::list_modules).post(handlers::create_module),
        )
        .route(
            "/api/modules/{name}",
            get(handlers::get_module)
                .patch(handlers::patch_module)
                .delete(handlers::delete_module),
        )
        .route(
            "/api/modules/{name}/versions",
            get(handlers::list_versions).post(handlers::upload_version),
        )
        .route("/api/modules/{name}/upload", post(handlers::upload_artifact))
        .route("/api/modules/{name}/activate", post(handlers::activate_module))
        .route(
            "/api/modules/{name}/deactivate",
            post(handlers::deactivate_module),
        )
        .route("/api/modules/{name}/rollback", post(handlers::rollback_module))
        .route(
            "/api/modules/{name}/deploy",
            post(handlers::deploy_module).delete(handlers::undeploy_module),
        )
        .route("/api/modules/{name}/history", get(handlers::get_history))
        .route("/api/logs/errors", get(handlers::get_error_logs))
        .route(
            "/api/logs/errors/download",
            get(handlers::download_error_logs),
        )
        .route("/api/templates/module", get(handlers::get_template))
        .layer(Extension(deps.service))
        .layer(Extension(deps.pipeline))
        .layer(Extension(deps.logs))
        .layer(Extension(deps.provisioner))
        .layer(Extension(deps.config))
}
