//! Modrun module registry.
//!
//! Owns the persistent data model (modules, versions, deployments, history,
//! logs), the on-disk artifact store, the version/deployment lifecycle with
//! its invariants, and the structural validation of uploaded artifacts.

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod validation;

pub use config::RegistryConfig;
pub use domain::error::RegistryError;
pub use domain::logs::ErrorLogService;
pub use domain::service::ModuleRegistryService;
pub use infra::fs::ArtifactStore;
pub use infra::storage::repo::Repository;
