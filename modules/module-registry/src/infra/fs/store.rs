//! On-disk artifact layout.
//!
//! ```text
//! modules/<name>/<version>/   immutable extracted source (non-inline modules)
//! module_envs/<name>/         active version's staged sources
//! module_envs/<name>/venv/    provisioned runtime, never overwritten by staging
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::RegistryConfig;

/// Runtime subdirectory inside a module's environment; source staging must
/// leave it untouched.
pub const RUNTIME_SUBDIR: &str = "venv";

pub struct ArtifactStore {
    modules_root: PathBuf,
    envs_root: PathBuf,
}

impl ArtifactStore {
    /// Create the store, materializing both roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directories cannot be created.
    pub fn new(config: &RegistryConfig) -> io::Result<Self> {
        let modules_root = config.modules_root();
        let envs_root = config.envs_root();
        std::fs::create_dir_all(&modules_root)?;
        std::fs::create_dir_all(&envs_root)?;
        Ok(Self {
            modules_root,
            envs_root,
        })
    }

    #[must_use]
    pub fn source_dir(&self, name: &str, version: &str) -> PathBuf {
        self.modules_root.join(name).join(version)
    }

    #[must_use]
    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.envs_root.join(name)
    }

    /// Persist a validated artifact directory as the immutable source tree
    /// of `(name, version)`.
    ///
    /// If `tmp_dir` contains exactly one top-level directory, its contents
    /// (not the directory itself) become the stored root.
    ///
    /// # Errors
    ///
    /// Returns an error on any filesystem failure.
    pub fn store_source(&self, name: &str, version: &str, tmp_dir: &Path) -> io::Result<PathBuf> {
        let dest = self.source_dir(name, version);
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let root = effective_root(tmp_dir)?;
        copy_tree(&root, &dest)?;
        Ok(dest)
    }

    /// Stage the given version's sources as the module's active tree.
    ///
    /// Stage-then-swap: sources are copied to a sibling staging directory,
    /// the runtime subdirectory is carried across by rename, and the staged
    /// directory replaces the environment directory, so an in-flight
    /// execution never observes a partially-staged tree.
    ///
    /// # Errors
    ///
    /// Returns an error on any filesystem failure before the swap completes.
    pub fn stage_active(&self, name: &str, version: &str) -> io::Result<()> {
        let source = self.source_dir(name, version);
        let env = self.env_dir(name);
        let nonce = Uuid::new_v4().simple().to_string();
        let staging = self.envs_root.join(format!(".stage-{name}-{nonce}"));

        copy_tree(&source, &staging)?;

        if env.exists() {
            let runtime = env.join(RUNTIME_SUBDIR);
            if runtime.is_dir() {
                std::fs::rename(&runtime, staging.join(RUNTIME_SUBDIR))?;
            }
            let retired = self.envs_root.join(format!(".old-{name}-{nonce}"));
            std::fs::rename(&env, &retired)?;
            std::fs::rename(&staging, &env)?;
            if let Err(e) = std::fs::remove_dir_all(&retired) {
                warn!(module = name, error = %e, "failed to remove retired env dir");
            }
        } else {
            std::fs::rename(&staging, &env)?;
        }
        Ok(())
    }

    /// Remove the module's environment directory, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn remove_env(&self, name: &str) -> io::Result<()> {
        let env = self.env_dir(name);
        if env.exists() {
            std::fs::remove_dir_all(env)?;
        }
        Ok(())
    }

    /// Remove one version's source tree, or the module's whole source
    /// directory when no version is given.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn remove_source(&self, name: &str, version: Option<&str>) -> io::Result<()> {
        let target = match version {
            Some(version) => self.source_dir(name, version),
            None => self.modules_root.join(name),
        };
        if target.exists() {
            std::fs::remove_dir_all(target)?;
        }
        Ok(())
    }
}

/// Apply the single-top-level-directory flattening rule.
fn effective_root(dir: &Path) -> io::Result<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        Ok(entries[0].path())
    } else {
        Ok(dir.to_path_buf())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(root: &Path) -> ArtifactStore {
        let config = RegistryConfig {
            data_root: root.to_path_buf(),
            ..RegistryConfig::default()
        };
        ArtifactStore::new(&config).unwrap()
    }

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn store_source_copies_tree_verbatim() {
        let root = tempdir().unwrap();
        let staged = tempdir().unwrap();
        write(&staged.path().join("handler.py"), "def handler(input): ...");
        write(&staged.path().join("lib/util.py"), "X = 1");

        let store = store_in(root.path());
        let dest = store.store_source("demo", "1.0", staged.path()).unwrap();

        assert!(dest.join("handler.py").is_file());
        assert!(dest.join("lib/util.py").is_file());
    }

    #[test]
    fn single_top_level_directory_is_flattened() {
        let root = tempdir().unwrap();
        let staged = tempdir().unwrap();
        write(
            &staged.path().join("bundle/handler.py"),
            "def handler(input): ...",
        );
        write(&staged.path().join("bundle/requirements.txt"), "");

        let store = store_in(root.path());
        let dest = store.store_source("demo", "1.0", staged.path()).unwrap();

        // The wrapper directory itself is not part of the stored root.
        assert!(dest.join("handler.py").is_file());
        assert!(!dest.join("bundle").exists());
    }

    #[test]
    fn stage_active_swaps_sources_and_keeps_runtime() {
        let root = tempdir().unwrap();
        let store = store_in(root.path());

        let staged = tempdir().unwrap();
        write(&staged.path().join("handler.py"), "v1");
        store.store_source("demo", "1.0", staged.path()).unwrap();
        store.stage_active("demo", "1.0").unwrap();

        // Simulate a provisioned runtime.
        write(&store.env_dir("demo").join("venv/bin/python"), "fake");
        // And a stale source file that must disappear after re-staging.
        write(&store.env_dir("demo").join("stale.py"), "old");

        let staged2 = tempdir().unwrap();
        write(&staged2.path().join("handler.py"), "v2");
        store.store_source("demo", "2.0", staged2.path()).unwrap();
        store.stage_active("demo", "2.0").unwrap();

        let env = store.env_dir("demo");
        assert_eq!(std::fs::read_to_string(env.join("handler.py")).unwrap(), "v2");
        assert!(env.join("venv/bin/python").is_file());
        assert!(!env.join("stale.py").exists());
        // No staging leftovers.
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("module_envs"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn remove_env_and_sources_are_idempotent() {
        let root = tempdir().unwrap();
        let store = store_in(root.path());

        let staged = tempdir().unwrap();
        write(&staged.path().join("handler.py"), "v1");
        store.store_source("demo", "1.0", staged.path()).unwrap();
        store.stage_active("demo", "1.0").unwrap();

        store.remove_env("demo").unwrap();
        store.remove_env("demo").unwrap();
        assert!(!store.env_dir("demo").exists());

        store.remove_source("demo", Some("1.0")).unwrap();
        store.remove_source("demo", None).unwrap();
        assert!(!root.path().join("modules/demo").exists());
    }
}
