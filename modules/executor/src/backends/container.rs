use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::domain::backend::Executor;
use crate::domain::error::ExecError;
use crate::domain::model::{EnvKind, ExecRequest, ExecResult};
use crate::domain::resolver::ModuleResolver;
use crate::driver::{DRIVER_FILE, render_driver};
use crate::driver::Scratch;
use crate::process::run_with_timeout;

/// Label attached to every container this backend starts, so stray ones can
/// be reaped by `cleanup`.
const CONTAINER_LABEL: &str = "modrun";

/// Bound on image/daemon probes used by `validate`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// In-container mount point for the scratch directory.
const DATA_MOUNT: &str = "/data";

/// Executes modules inside the image built for them at provision time.
///
/// The scratch directory is bind-mounted at `/data`; the container runs with
/// no network, a memory cap, a CPU quota, and is removed after termination
/// on every path.
pub struct ContainerExecutor {
    resolver: Arc<dyn ModuleResolver>,
    config: ExecutorConfig,
}

impl ContainerExecutor {
    pub fn new(resolver: Arc<dyn ModuleResolver>, config: ExecutorConfig) -> Self {
        Self { resolver, config }
    }

    /// Force-remove a container, ignoring failures; used after a timeout,
    /// when `docker run --rm` never got to clean up on its own.
    async fn force_remove(&self, container_name: &str) {
        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["rm", "-f", container_name]);
        if let Ok(outcome) = run_with_timeout(cmd, PROBE_TIMEOUT).await
            && !outcome.success()
            && !outcome.stderr.contains("No such container")
        {
            warn!(container = container_name, stderr = %outcome.stderr, "failed to remove container");
        }
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecResult, ExecError> {
        let started = Instant::now();

        let module = match self.resolver.resolve_active(&request.module).await {
            Ok(module) => module,
            Err(e) => return Ok(ExecResult::failure(e.to_string())),
        };
        let image = module.container_image();

        let scratch = Scratch::create(&request.input)?;
        // The driver runs inside the container, so it references the mount
        // point, not the host scratch path.
        scratch.write_file(
            DRIVER_FILE,
            &render_driver(
                DATA_MOUNT,
                &format!("{DATA_MOUNT}/input.json"),
                &format!("{DATA_MOUNT}/output.json"),
                false,
            ),
        )?;

        let container_name = format!("modrun-{}", Uuid::new_v4().simple());
        let mount = format!("{}:{DATA_MOUNT}", scratch.path().display());

        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["run", "--rm"])
            .args(["--name", &container_name])
            .args(["--label", CONTAINER_LABEL])
            .args(["--network", "none"])
            .args(["--memory", &self.config.container.memory])
            .args(["--cpus", &self.config.container.cpus])
            .args(["-v", &mount])
            .arg(&image)
            .args(["python", &format!("{DATA_MOUNT}/{DRIVER_FILE}")]);

        let outcome = run_with_timeout(cmd, self.config.timeout()).await?;
        if outcome.timed_out {
            // Killing the docker client does not kill the container.
            self.force_remove(&container_name).await;
        }
        debug!(
            module = %module.name,
            image = %image,
            exit_code = outcome.exit_code,
            "container execution finished"
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
        if module.env_kind != EnvKind::Container {
            return false;
        }
        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["image", "inspect", &module.container_image()]);
        match run_with_timeout(cmd, PROBE_TIMEOUT).await {
            Ok(outcome) => outcome.success(),
            Err(_) => false,
        }
    }

    async fn cleanup(&self) {
        let mut list = Command::new(&self.config.docker_bin);
        list.args(["ps", "-aq", "--filter", &format!("label={CONTAINER_LABEL}")]);
        let Ok(outcome) = run_with_timeout(list, PROBE_TIMEOUT).await else {
            return;
        };
        for id in outcome.stdout.lines().filter(|l| !l.trim().is_empty()) {
            self.force_remove(id.trim()).await;
        }
    }

    fn kind(&self) -> EnvKind {
        EnvKind::Container
    }
}
