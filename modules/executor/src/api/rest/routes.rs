use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};

use super::handlers;
use crate::retry::RetryingExecutor;

/// Routes for the execution surface.
pub fn router(executor: Arc<RetryingExecutor>) -> Router {
    Router::new()
        .route("/run/{name}", post(handlers::run_module))
        .route("/environments", get(handlers::list_environments))
        .layer(Extension(executor))
}
