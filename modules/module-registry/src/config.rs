use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the registry's on-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Root under which `modules/` and `module_envs/` live.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Static module template archive served by the API.
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            template_path: default_template_path(),
        }
    }
}

impl RegistryConfig {
    /// Immutable extracted source trees, `modules/<name>/<version>/`.
    #[must_use]
    pub fn modules_root(&self) -> PathBuf {
        self.data_root.join("modules")
    }

    /// Staged active sources and runtimes, `module_envs/<name>/`.
    #[must_use]
    pub fn envs_root(&self) -> PathBuf {
        self.data_root.join("module_envs")
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_template_path() -> PathBuf {
    PathBuf::from("templates/module_template.zip")
}
