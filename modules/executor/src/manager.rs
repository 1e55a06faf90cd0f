use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::backend::Executor;
use crate::domain::error::ExecError;
use crate::domain::model::{EnvKind, ExecRequest, ExecResult};
use crate::domain::resolver::ModuleResolver;

/// Routes execution requests to the backend matching the target module's
/// declared environment kind.
pub struct ExecutorManager {
    resolver: Arc<dyn ModuleResolver>,
    executors: HashMap<EnvKind, Arc<dyn Executor>>,
}

impl ExecutorManager {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            resolver,
            executors: HashMap::new(),
        }
    }

    /// Wire a backend in under its own kind. The last registration for a
    /// kind wins.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        info!(kind = %executor.kind(), "registering executor backend");
        self.executors.insert(executor.kind(), executor);
    }

    #[must_use]
    pub fn available_kinds(&self) -> Vec<EnvKind> {
        let mut kinds: Vec<EnvKind> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Resolve, pick a backend, validate, delegate.
    ///
    /// Resolution failures, missing backends, and failed validation come
    /// back as failed results with the reason on stderr; only platform
    /// faults inside the chosen backend propagate as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the chosen backend hits a platform fault.
    pub async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError> {
        let module = match self.resolver.resolve_active(&request.module).await {
            Ok(module) => module,
            Err(e) => return Ok(ExecResult::failure(e.to_string())),
        };

        let Some(backend) = self.executors.get(&module.env_kind) else {
            return Ok(ExecResult::failure(format!(
                "No executor available for environment '{}'",
                module.env_kind
            )));
        };

        if !backend.validate(&request.module).await {
            return Ok(ExecResult::failure(format!(
                "Module '{}' cannot be executed in environment '{}'",
                request.module, module.env_kind
            )));
        }

        backend.execute(request).await
    }

    pub async fn cleanup(&self) {
        for backend in self.executors.values() {
            backend.cleanup().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::model::ActiveModule;
    use crate::domain::resolver::ResolveError;

    struct StubResolver {
        kind: EnvKind,
        known: &'static str,
    }

    #[async_trait]
    impl ModuleResolver for StubResolver {
        async fn resolve_active(&self, name: &str) -> Result<ActiveModule, ResolveError> {
            if name == self.known {
                Ok(ActiveModule {
                    id: 1,
                    name: name.to_owned(),
                    env_kind: self.kind,
                    version_label: "1.0".to_owned(),
                    code: None,
                    image_tag: None,
                })
            } else {
                Err(ResolveError::NotFound(name.to_owned()))
            }
        }
    }

    struct StubExecutor {
        kind: EnvKind,
        valid: bool,
        calls: AtomicUsize,
        cleanups: Arc<AtomicUsize>,
    }

    impl StubExecutor {
        fn new(kind: EnvKind, valid: bool) -> Self {
            Self {
                kind,
                valid,
                calls: AtomicUsize::new(0),
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Executor for StubExecutor {
        async fn execute(&self, _request: ExecRequest) -> Result<ExecResult, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecResult {
                result: json!({"ok": true}),
                exit_code: 0,
                stderr: String::new(),
                stdout: String::new(),
                duration_seconds: 0.01,
            })
        }

        async fn validate(&self, _module_name: &str) -> bool {
            self.valid
        }

        async fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        fn kind(&self) -> EnvKind {
            self.kind
        }
    }

    fn request(name: &str) -> ExecRequest {
        ExecRequest {
            module: name.to_owned(),
            input: json!({}),
        }
    }

    #[tokio::test]
    async fn unknown_module_fails_without_touching_backends() {
        let resolver = Arc::new(StubResolver {
            kind: EnvKind::Inline,
            known: "add",
        });
        let mut manager = ExecutorManager::new(resolver);
        manager.register(Arc::new(StubExecutor::new(EnvKind::Inline, true)));

        let result = manager.execute(request("missing")).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn missing_backend_reports_environment() {
        let resolver = Arc::new(StubResolver {
            kind: EnvKind::Container,
            known: "imgmod",
        });
        let manager = ExecutorManager::new(resolver);

        let result = manager.execute(request("imgmod")).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("No executor available"));
        assert!(result.stderr.contains("container"));
    }

    #[tokio::test]
    async fn failed_validation_short_circuits() {
        let resolver = Arc::new(StubResolver {
            kind: EnvKind::Subprocess,
            known: "venvmod",
        });
        let mut manager = ExecutorManager::new(resolver);
        let backend = Arc::new(StubExecutor::new(EnvKind::Subprocess, false));
        manager.register(backend.clone());

        let result = manager.execute(request("venvmod")).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("cannot be executed"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatches_to_matching_backend() {
        let resolver = Arc::new(StubResolver {
            kind: EnvKind::Inline,
            known: "add",
        });
        let mut manager = ExecutorManager::new(resolver);
        let backend = Arc::new(StubExecutor::new(EnvKind::Inline, true));
        manager.register(backend.clone());

        let result = manager.execute(request("add")).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.result["ok"], true);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn available_kinds_are_sorted_and_cleanup_reaches_all() {
        let resolver = Arc::new(StubResolver {
            kind: EnvKind::Inline,
            known: "add",
        });
        let mut manager = ExecutorManager::new(resolver);
        let a = Arc::new(StubExecutor::new(EnvKind::Subprocess, true));
        let b = Arc::new(StubExecutor::new(EnvKind::Inline, true));
        manager.register(a.clone());
        manager.register(b.clone());

        assert_eq!(
            manager.available_kinds(),
            vec![EnvKind::Inline, EnvKind::Subprocess]
        );

        manager.cleanup().await;
        assert_eq!(a.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(b.cleanups.load(Ordering::SeqCst), 1);
    }
}
