use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::model::ExecResult;

/// Request body for `POST /run/{name}`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub input: Value,
}

/// Response body for `POST /run/{name}`.
///
/// Module faults (non-zero exit, timeout) are reported here with a 200
/// status; they are the module's result, not a platform error.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub result: Value,
    pub exit_code: i32,
    pub stderr: String,
    pub stdout: String,
    pub duration: f64,
}

impl From<ExecResult> for RunResponse {
    fn from(r: ExecResult) -> Self {
        Self {
            result: r.result,
            exit_code: r.exit_code,
            stderr: r.stderr,
            stdout: r.stdout,
            duration: r.duration_seconds,
        }
    }
}

/// Response body for `GET /environments`.
#[derive(Debug, Serialize)]
pub struct EnvironmentsResponse {
    pub environments: Vec<String>,
}
