use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::domain::backend::Executor;
use crate::domain::error::ExecError;
use crate::domain::model::{EnvKind, ExecRequest, ExecResult};
use crate::domain::resolver::ModuleResolver;
use crate::driver::Scratch;
use crate::process::run_with_timeout;

/// Executes modules inside their provisioned per-module virtualenv.
///
/// The interpreter is the one the provisioner created under
/// `module_envs/<name>/venv/`; the driver prepends the staged source tree to
/// the module search path so `handler` resolves from the active version, not
/// from host-global packages.
pub struct SubprocessExecutor {
    resolver: Arc<dyn ModuleResolver>,
    config: ExecutorConfig,
}

impl SubprocessExecutor {
    pub fn new(resolver: Arc<dyn ModuleResolver>, config: ExecutorConfig) -> Self {
        Self { resolver, config }
    }
}

#[async_trait]
impl Executor for SubprocessExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError> {
        let started = Instant::now();

        let module = match self.resolver.resolve_active(&request.module).await {
            Ok(module) => module,
            Err(e) => return Ok(ExecResult::failure(e.to_string())),
        };

        let python = self.config.venv_python(&module.name);
        let source_dir = self.config.module_env_dir(&module.name);

        let scratch = Scratch::create(&request.input)?;
        scratch.write_driver(&source_dir, false)?;

        let mut cmd = Command::new(python);
        cmd.arg(scratch.driver_path())
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");

        let outcome = run_with_timeout(cmd, self.config.timeout()).await?;
        debug!(
            module = %module.name,
            version = %module.version_label,
            exit_code = outcome.exit_code,
            "subprocess execution finished"
        );

        let result = if outcome.success() {
            scratch.read_output()
        } else {
            serde_json::Value::Object(serde_json::Map::new())
        };

        Ok(ExecResult {
            result,
            exit_code: outcome.exit_code,
            stderr: outcome.stderr,
            stdout: outcome.stdout,
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }

    async fn validate(&self, module_name: &str) -> bool {
        self.config.venv_dir(module_name).exists()
    }

    async fn cleanup(&self) {}

    fn kind(&self) -> EnvKind {
        EnvKind::Subprocess
    }
}
