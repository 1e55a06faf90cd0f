use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path};

use modrun_auth::{Principal, scope};
use modrun_errors::{ApiError, code};

use super::dto::{EnvironmentsResponse, RunRequest, RunResponse};
use crate::domain::model::ExecRequest;
use crate::retry::RetryingExecutor;

/// Execute the named module's active version with the given input object.
///
/// # Errors
///
/// Returns `ApiError` for missing execute scope or a non-object input.
pub async fn run_module(
    Extension(executor): Extension<Arc<RetryingExecutor>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    principal.require_any_scope(&[scope::EXECUTE_ALL, scope::EXECUTE_LIMITED])?;

    if !body.input.is_object() {
        return Err(ApiError::bad_request(
            code::BAD_INPUT,
            "input must be a JSON object",
        ));
    }

    let result = executor
        .execute(ExecRequest {
            module: name,
            input: body.input,
        })
        .await;

    Ok(Json(RunResponse::from(result)))
}

/// List the environment kinds with a wired executor backend.
pub async fn list_environments(
    Extension(executor): Extension<Arc<RetryingExecutor>>,
    Extension(_principal): Extension<Principal>,
) -> Json<EnvironmentsResponse> {
    Json(EnvironmentsResponse {
        environments: executor
            .available_kinds()
            .into_iter()
            .map(|k| k.as_str().to_owned())
            .collect(),
    })
}
