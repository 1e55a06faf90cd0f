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
use crate::driver::{Scratch, render_inline_handler};
use crate::process::run_with_timeout;

/// Executes inline modules by delegating to the bundled interpreter.
///
/// The stored code string is the body of `handler(input)`; the backend wraps
/// it into a generated `handler.py` inside the scratch directory and runs the
/// common driver against it, so inline execution shares the marshalling,
/// timeout, and capture semantics of the subprocess path.
pub struct InlineExecutor {
    resolver: Arc<dyn ModuleResolver>,
    config: ExecutorConfig,
}

impl InlineExecutor {
    pub fn new(resolver: Arc<dyn ModuleResolver>, config: ExecutorConfig) -> Self {
        Self { resolver, config }
    }
}

#[async_trait]
impl Executor for InlineExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError> {
        let started = Instant::now();

        let module = match self.resolver.resolve_active(&request.module).await {
            Ok(module) => module,
            Err(e) => return Ok(ExecResult::failure(e.to_string())),
        };
        let Some(code) = module.code else {
            return Ok(ExecResult::failure(format!(
                "Module '{}' has no inline code",
                module.name
            )));
        };

        let scratch = Scratch::create(&request.input)?;
        scratch.write_file("handler.py", &render_inline_handler(&code))?;
        // Inline results wrap non-object returns as {"result": value}.
        scratch.write_driver(scratch.path(), true)?;

        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg(scratch.driver_path());

        let outcome = run_with_timeout(cmd, self.config.timeout()).await?;
        debug!(
            module = %module.name,
            exit_code = outcome.exit_code,
            "inline execution finished"
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
        match self.resolver.resolve_active(module_name).await {
            Ok(module) => module.env_kind == EnvKind::Inline && module.code.is_some(),
            Err(_) => false,
        }
    }

    async fn cleanup(&self) {}

    fn kind(&self) -> EnvKind {
        EnvKind::Inline
    }
}
