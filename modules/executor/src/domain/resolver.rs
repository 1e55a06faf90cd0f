use async_trait::async_trait;

use super::model::ActiveModule;

/// Resolution failures surfaced to callers as failed results, not errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Module '{0}' not found")]
    NotFound(String),

    #[error("Module '{0}' has no active deployment")]
    NoActiveDeployment(String),

    #[error("failed to resolve module '{name}': {detail}")]
    Internal { name: String, detail: String },
}

/// Seam between the execution engine and the module registry.
///
/// The registry implements this; executors only ever see the resolved
/// snapshot of the active deployment.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    async fn resolve_active(&self, name: &str) -> Result<ActiveModule, ResolveError>;
}
