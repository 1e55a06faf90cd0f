use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::model::ActiveModule;

/// Configuration for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Root of the provisioned per-module environments (`module_envs/`).
    #[serde(default = "default_env_root")]
    pub env_root: PathBuf,

    /// Bundled interpreter used for inline execution and venv creation.
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// External environment manager binary for `named_env` modules.
    #[serde(default = "default_conda_bin")]
    pub conda_bin: String,

    /// Host container engine binary for `container` modules.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Wall-clock bound on a single module execution, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bound on environment creation and dependency installs, in seconds.
    #[serde(default = "default_provision_timeout_secs")]
    pub provision_timeout_secs: u64,

    #[serde(default)]
    pub container: ContainerLimits,
}

/// Resource limits applied to every container execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerLimits {
    #[serde(default = "default_container_memory")]
    pub memory: String,
    #[serde(default = "default_container_cpus")]
    pub cpus: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            env_root: default_env_root(),
            python_bin: default_python_bin(),
            conda_bin: default_conda_bin(),
            docker_bin: default_docker_bin(),
            timeout_secs: default_timeout_secs(),
            provision_timeout_secs: default_provision_timeout_secs(),
            container: ContainerLimits::default(),
        }
    }
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            memory: default_container_memory(),
            cpus: default_container_cpus(),
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    /// Staged source tree of a module's active version.
    #[must_use]
    pub fn module_env_dir(&self, name: &str) -> PathBuf {
        self.env_root.join(name)
    }

    /// Isolated interpreter environment for a `subprocess` module.
    #[must_use]
    pub fn venv_dir(&self, name: &str) -> PathBuf {
        self.module_env_dir(name).join("venv")
    }

    #[must_use]
    pub fn venv_python(&self, name: &str) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir(name).join("Scripts").join("python.exe")
        } else {
            self.venv_dir(name).join("bin").join("python")
        }
    }

    #[must_use]
    pub fn venv_pip(&self, name: &str) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir(name).join("Scripts").join("pip.exe")
        } else {
            self.venv_dir(name).join("bin").join("pip")
        }
    }

    /// Externally-named runtime for a `named_env` module.
    #[must_use]
    pub fn named_env(&self, module: &ActiveModule) -> String {
        format!("mod_{}", module.id)
    }
}

fn default_env_root() -> PathBuf {
    PathBuf::from("module_envs")
}

fn default_python_bin() -> String {
    "python3".to_owned()
}

fn default_conda_bin() -> String {
    "conda".to_owned()
}

fn default_docker_bin() -> String {
    "docker".to_owned()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_provision_timeout_secs() -> u64 {
    600
}

fn default_container_memory() -> String {
    "512m".to_owned()
}

fn default_container_cpus() -> String {
    "0.5".to_owned()
}
