use async_trait::async_trait;

use super::error::ExecError;
use super::model::{EnvKind, ExecRequest, ExecResult};

/// Contract every executor backend satisfies.
///
/// `execute` returns `Err` only for platform faults (spawn failures, I/O);
/// anything the module itself did wrong comes back as an `ExecResult` with a
/// non-zero exit code.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the module's entry point with the request's input.
    async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError>;

    /// Whether this backend can serve the named module right now.
    async fn validate(&self, module_name: &str) -> bool;

    /// Release any persistent resources held by the backend.
    async fn cleanup(&self);

    fn kind(&self) -> EnvKind;
}
