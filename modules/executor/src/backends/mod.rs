//! Executor backends, one per environment kind, all satisfying the
//! [`crate::domain::backend::Executor`] contract.

mod container;
mod inline;
mod named_env;
mod subprocess;

pub use container::ContainerExecutor;
pub use inline::InlineExecutor;
pub use named_env::NamedEnvExecutor;
pub use subprocess::SubprocessExecutor;

pub(crate) use named_env::conda_env_exists;
