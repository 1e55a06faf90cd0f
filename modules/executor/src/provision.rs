//! Environment provisioner: materializes the per-module runtime each
//! environment kind requires.
//!
//! Failures of any step are recorded through the [`ProvisionSink`] and
//! surfaced as [`ProvisionError`]; partially created environments are left
//! on disk for diagnosis and overwritten on the next attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::backends::conda_env_exists;
use crate::config::ExecutorConfig;
use crate::domain::model::{ActiveModule, EnvKind};
use crate::process::{CommandOutcome, run_with_timeout};

/// Receives one record per provisioning step, mirroring the validation-log
/// rows the registry persists.
#[async_trait]
pub trait ProvisionSink: Send + Sync {
    async fn record(&self, filename: &str, success: bool, message: &str);
}

#[derive(Debug, thiserror::Error)]
#[error("provisioning {kind} environment failed: {stderr}")]
pub struct ProvisionError {
    pub kind: EnvKind,
    pub stderr: String,
}

/// What the provisioner produced; the registry persists the image tag for
/// container modules.
#[derive(Debug, Default)]
pub struct ProvisionOutcome {
    pub image_tag: Option<String>,
}

pub struct EnvProvisioner {
    config: ExecutorConfig,
    sink: Arc<dyn ProvisionSink>,
}

impl EnvProvisioner {
    pub fn new(config: ExecutorConfig, sink: Arc<dyn ProvisionSink>) -> Self {
        Self { config, sink }
    }

    /// Materialize the runtime for the module's staged active source.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] with the failing tool's stderr when any
    /// step fails.
    pub async fn provision(&self, module: &ActiveModule) -> Result<ProvisionOutcome, ProvisionError> {
        let source_dir = self.config.module_env_dir(&module.name);
        let requirements = find_requirements(&source_dir);

        match module.env_kind {
            EnvKind::Inline => Ok(ProvisionOutcome::default()),
            EnvKind::Subprocess => {
                self.provision_venv(module, requirements.as_deref()).await?;
                Ok(ProvisionOutcome::default())
            }
            EnvKind::NamedEnv => {
                self.provision_named_env(module, requirements.as_deref())
                    .await?;
                Ok(ProvisionOutcome::default())
            }
            EnvKind::Container => {
                let tag = self
                    .provision_container(module, &source_dir, requirements.is_some())
                    .await?;
                Ok(ProvisionOutcome {
                    image_tag: Some(tag),
                })
            }
        }
    }

    /// Tear down external runtime artifacts; directory removal belongs to
    /// the artifact store. Best-effort: failures are logged, not returned.
    pub async fn destroy(&self, module: &ActiveModule) {
        match module.env_kind {
            EnvKind::Inline | EnvKind::Subprocess => {}
            EnvKind::NamedEnv => {
                let env_name = self.config.named_env(module);
                let mut cmd = Command::new(&self.config.conda_bin);
                cmd.args(["env", "remove", "-y", "-n", &env_name]);
                self.best_effort(cmd, &format!("remove env {env_name}")).await;
            }
            EnvKind::Container => {
                let image = module.container_image();
                let mut cmd = Command::new(&self.config.docker_bin);
                cmd.args(["rmi", "-f", &image]);
                self.best_effort(cmd, &format!("remove image {image}")).await;
            }
        }
    }

    async fn provision_venv(
        &self,
        module: &ActiveModule,
        requirements: Option<&Path>,
    ) -> Result<(), ProvisionError> {
        let venv_dir = self.config.venv_dir(&module.name);
        if venv_dir.exists() {
            info!(module = %module.name, "venv already provisioned, skipping creation");
        } else {
            let mut cmd = Command::new(&self.config.python_bin);
            cmd.args(["-m", "venv"]).arg(&venv_dir);
            self.run_step(module, cmd, "venv creation").await?;
        }

        if let Some(requirements) = requirements {
            let mut cmd = Command::new(self.config.venv_pip(&module.name));
            cmd.args(["install", "-r"])
                .arg(requirements)
                .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
            self.run_step(module, cmd, "venv dependency install").await?;
        }
        Ok(())
    }

    async fn provision_named_env(
        &self,
        module: &ActiveModule,
        requirements: Option<&Path>,
    ) -> Result<(), ProvisionError> {
        let env_name = self.config.named_env(module);

        if conda_env_exists(&self.config.conda_bin, &env_name).await {
            info!(module = %module.name, env = %env_name, "named env already provisioned, skipping creation");
        } else {
            let mut cmd = Command::new(&self.config.conda_bin);
            cmd.args(["create", "-y", "-n", &env_name, "python=3.11"]);
            self.run_step(module, cmd, "named env creation").await?;
        }

        if let Some(requirements) = requirements {
            let mut cmd = Command::new(&self.config.conda_bin);
            cmd.args(["run", "-n", &env_name, "pip", "install", "-r"])
                .arg(requirements);
            self.run_step(module, cmd, "named env dependency install")
                .await?;
        }
        Ok(())
    }

    async fn provision_container(
        &self,
        module: &ActiveModule,
        source_dir: &Path,
        has_requirements: bool,
    ) -> Result<String, ProvisionError> {
        let tag = format!("mod_{}:latest", module.id);

        let dockerfile = render_dockerfile(has_requirements);
        if let Err(e) = std::fs::write(source_dir.join("Dockerfile"), dockerfile) {
            let message = format!("failed to write container recipe: {e}");
            self.sink.record(&module.name, false, &message).await;
            return Err(ProvisionError {
                kind: module.env_kind,
                stderr: message,
            });
        }

        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["build", "-t", &tag]).arg(source_dir);
        self.run_step(module, cmd, "container image build").await?;
        Ok(tag)
    }

    /// Run one provisioning step, recording its outcome through the sink.
    async fn run_step(
        &self,
        module: &ActiveModule,
        cmd: Command,
        step: &str,
    ) -> Result<CommandOutcome, ProvisionError> {
        let outcome = match run_with_timeout(cmd, self.config.provision_timeout()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{step} failed: {e}");
                self.sink.record(&module.name, false, &message).await;
                return Err(ProvisionError {
                    kind: module.env_kind,
                    stderr: message,
                });
            }
        };

        if outcome.success() {
            self.sink
                .record(&module.name, true, &format!("{step} succeeded"))
                .await;
            Ok(outcome)
        } else {
            let message = format!("{step} failed\n{}", outcome.stderr);
            self.sink.record(&module.name, false, &message).await;
            Err(ProvisionError {
                kind: module.env_kind,
                stderr: outcome.stderr,
            })
        }
    }

    async fn best_effort(&self, cmd: Command, what: &str) {
        match run_with_timeout(cmd, self.config.provision_timeout()).await {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => warn!(step = what, stderr = %outcome.stderr, "cleanup step failed"),
            Err(e) => warn!(step = what, error = %e, "cleanup step failed"),
        }
    }
}

/// Case-insensitive search for the requirements file at the top of the
/// staged source tree.
fn find_requirements(source_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(source_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().eq_ignore_ascii_case("requirements.txt") {
            return Some(entry.path());
        }
    }
    None
}

fn render_dockerfile(has_requirements: bool) -> String {
    let mut recipe = String::from("FROM python:3.11-slim\nWORKDIR /app\nCOPY . /app\n");
    if has_requirements {
        recipe.push_str("RUN pip install --no-cache-dir -r requirements.txt\n");
    }
    recipe.push_str("CMD [\"python\", \"handler.py\"]\n");
    recipe
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, bool, String)>>,
    }

    #[async_trait]
    impl ProvisionSink for RecordingSink {
        async fn record(&self, filename: &str, success: bool, message: &str) {
            self.records.lock().unwrap().push((
                filename.to_owned(),
                success,
                message.to_owned(),
            ));
        }
    }

    fn module(kind: EnvKind) -> ActiveModule {
        ActiveModule {
            id: 9,
            name: "demo".to_owned(),
            env_kind: kind,
            version_label: "1.0".to_owned(),
            code: None,
            image_tag: None,
        }
    }

    #[test]
    fn requirements_lookup_is_case_insensitive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Requirements.TXT"), "requests\n").unwrap();
        let found = find_requirements(dir.path()).unwrap();
        assert!(found.ends_with("Requirements.TXT"));
        assert!(find_requirements(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn dockerfile_installs_requirements_only_when_present() {
        assert!(render_dockerfile(true).contains("pip install"));
        assert!(!render_dockerfile(false).contains("pip install"));
        assert!(render_dockerfile(false).starts_with("FROM python:3.11-slim"));
    }

    #[tokio::test]
    async fn inline_modules_need_no_provisioning() {
        let sink = Arc::new(RecordingSink::default());
        let provisioner = EnvProvisioner::new(ExecutorConfig::default(), sink.clone());
        let outcome = provisioner.provision(&module(EnvKind::Inline)).await.unwrap();
        assert!(outcome.image_tag.is_none());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_step_records_a_fail_row_and_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let config = ExecutorConfig {
            env_root: dir.path().to_path_buf(),
            // A binary that exists but rejects the venv invocation.
            python_bin: "false".to_owned(),
            provision_timeout_secs: 10,
            ..ExecutorConfig::default()
        };
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();

        let provisioner = EnvProvisioner::new(config, sink.clone());
        let err = provisioner
            .provision(&module(EnvKind::Subprocess))
            .await
            .unwrap_err();

        assert_eq!(err.kind, EnvKind::Subprocess);
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let (filename, success, message) = &records[0];
        assert_eq!(filename, "demo");
        assert!(!success);
        assert!(message.contains("venv creation failed"));
    }

    #[tokio::test]
    async fn missing_tool_is_recorded_not_panicked() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let config = ExecutorConfig {
            env_root: dir.path().to_path_buf(),
            conda_bin: "no-such-env-manager-52318".to_owned(),
            provision_timeout_secs: 5,
            ..ExecutorConfig::default()
        };
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();

        let provisioner = EnvProvisioner::new(config, sink.clone());
        let err = provisioner
            .provision(&module(EnvKind::NamedEnv))
            .await
            .unwrap_err();

        assert_eq!(err.kind, EnvKind::NamedEnv);
        assert!(err.stderr.contains("named env creation failed"));
    }

    #[tokio::test]
    async fn image_tag_follows_module_id() {
        // Container provisioning against a guaranteed-missing docker binary
        // still fails, but the recipe lands in the staged source first.
        let dir = tempdir().unwrap();
        let source = dir.path().join("demo");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("requirements.txt"), "requests\n").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let config = ExecutorConfig {
            env_root: dir.path().to_path_buf(),
            docker_bin: "no-such-container-engine-52318".to_owned(),
            provision_timeout_secs: 5,
            ..ExecutorConfig::default()
        };
        let provisioner = EnvProvisioner::new(config, sink.clone());
        let err = provisioner
            .provision(&module(EnvKind::Container))
            .await
            .unwrap_err();

        assert_eq!(err.kind, EnvKind::Container);
        let recipe = std::fs::read_to_string(source.join("Dockerfile")).unwrap();
        assert!(recipe.contains("pip install --no-cache-dir -r requirements.txt"));
    }
}
