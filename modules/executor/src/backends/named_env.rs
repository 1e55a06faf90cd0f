use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::domain::backend::Executor;
use crate::domain::error::ExecError;
use crate::domain::model::{EnvKind, ExecRequest, ExecResult};
use crate::domain::resolver::ModuleResolver;
use crate::driver::Scratch;
use crate::process::run_with_timeout;

/// Bound on the env-manager list call used by `validate`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct EnvList {
    envs: Vec<String>,
}

/// Whether the external env manager knows an environment with this name.
/// Probe failures read as "absent".
pub(crate) async fn conda_env_exists(conda_bin: &str, env_name: &str) -> bool {
    let mut cmd = Command::new(conda_bin);
    cmd.args(["env", "list", "--json"]);
    let Ok(outcome) = run_with_timeout(cmd, PROBE_TIMEOUT).await else {
        return false;
    };
    if !outcome.success() {
        return false;
    }
    serde_json::from_str::<EnvList>(&outcome.stdout)
        .map(|list| {
            list.envs.iter().any(|path| {
                std::path::Path::new(path)
                    .file_name()
                    .is_some_and(|n| n == std::ffi::OsStr::new(env_name))
            })
        })
        .unwrap_or(false)
}

/// Executes modules through the external environment manager's
/// run-in-named-environment command; otherwise identical to the subprocess
/// marshalling.
pub struct NamedEnvExecutor {
    resolver: Arc<dyn ModuleResolver>,
    config: ExecutorConfig,
}

impl NamedEnvExecutor {
    pub fn new(resolver: Arc<dyn ModuleResolver>, config: ExecutorConfig) -> Self {
        Self { resolver, config }
    }
}

#[async_trait]
impl Executor for NamedEnvExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError> {
        let started = Instant::now();

        let module = match self.resolver.resolve_active(&request.module).await {
            Ok(module) => module,
            Err(e) => return Ok(ExecResult::failure(e.to_string())),
        };

        let env_name = self.config.named_env(&module);
        let source_dir = self.config.module_env_dir(&module.name);

        let scratch = Scratch::create(&request.input)?;
        scratch.write_driver(&source_dir, false)?;

        let mut cmd = Command::new(&self.config.conda_bin);
        cmd.args(["run", "-n", &env_name, "python"])
            .arg(scratch.driver_path());

        let outcome = run_with_timeout(cmd, self.config.timeout()).await?;
        debug!(
            module = %module.name,
            env = %env_name,
            exit_code = outcome.exit_code,
            "named-env execution finished"
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
        let Ok(module) = self.resolver.resolve_active(module_name).await else {
            return false;
        };
        if module.env_kind != EnvKind::NamedEnv {
            return false;
        }
        conda_env_exists(&self.config.conda_bin, &self.config.named_env(&module)).await
    }

    async fn cleanup(&self) {}

    fn kind(&self) -> EnvKind {
        EnvKind::NamedEnv
    }
}
