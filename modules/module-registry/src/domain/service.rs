use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use executor::provision::ProvisionSink;
use executor::{ActiveModule, EnvKind, ModuleResolver, ResolveError};

use crate::domain::error::RegistryError;
use crate::domain::model::{
    DeployState, HistoryAction, HistoryEntry, ModuleDetail, ModulePatch, ModuleStatus,
    ModuleSummary, NewModule, NewVersion, Payload, VersionInfo,
};
use crate::infra::fs::ArtifactStore;
use crate::infra::storage::entity::{deployments, modules, versions};
use crate::infra::storage::repo::{NewModuleRow, NewVersionRow, Repository};

/// Registry and lifecycle manager.
///
/// Owns the module/version/deployment rows through the repository and the
/// on-disk trees through the artifact store. Disk writes for a module are
/// serialized behind a per-module lock; readers only ever see fully staged
/// trees thanks to the store's stage-then-swap.
pub struct ModuleRegistryService {
    repo: Arc<Repository>,
    store: Arc<ArtifactStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ModuleRegistryService {
    pub fn new(repo: Arc<Repository>, store: Arc<ArtifactStore>) -> Self {
        Self {
            repo,
            store,
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a new module with its first version; the first deployment
    /// is active immediately.
    #[instrument(skip(self, new), fields(module = %new.name))]
    pub async fn register(&self, new: NewModule) -> Result<ModuleDetail, RegistryError> {
        let name = new.name.trim().to_owned();
        if name.is_empty() {
            return Err(RegistryError::BadInput("module name must not be empty".into()));
        }
        check_payload(new.env_kind, &new.payload)?;

        let existing = self.repo.find_module(&name).await?;
        let revivable = match existing {
            Some(module) if module.status == ModuleStatus::Deleted.as_str() => Some(module),
            Some(_) => return Err(RegistryError::NameConflict(name)),
            None => None,
        };

        let code = match &new.payload {
            Payload::InlineCode(code) => Some(code.clone()),
            _ => None,
        };
        let operator = new.owner.clone();

        let (module, _version) = self
            .repo
            .create_module(
                revivable,
                NewModuleRow {
                    name: name.clone(),
                    env_kind: new.env_kind.as_str().to_owned(),
                    description: new.description,
                    tags: join_tags(&new.tags),
                    owner: new.owner,
                    version_label: new.version_label.clone(),
                    code,
                    version_description: None,
                    operator,
                },
            )
            .await?;

        if let Payload::Artifact(dir) = &new.payload {
            let lock = self.lock_for(&name);
            let _guard = lock.lock().await;
            self.store.store_source(&name, &new.version_label, dir)?;
        }

        info!(module = %module.name, version = %new.version_label, "module registered");
        self.detail(&name).await
    }

    /// Upload a new version; it becomes the single active deployment.
    #[instrument(skip(self, new), fields(module = name, version = %new.version_label))]
    pub async fn upload_version(
        &self,
        name: &str,
        new: NewVersion,
        operator: Option<&str>,
    ) -> Result<VersionInfo, RegistryError> {
        let module = self.require_module(name).await?;
        let kind = env_kind_of(&module);
        check_payload(kind, &new.payload)?;

        if self
            .repo
            .find_version(module.id, &new.version_label)
            .await?
            .is_some()
        {
            return Err(RegistryError::DuplicateVersion {
                module: name.to_owned(),
                version: new.version_label,
            });
        }

        let code = match &new.payload {
            Payload::InlineCode(code) => Some(code.clone()),
            _ => None,
        };

        let version = self
            .repo
            .add_version(
                &module,
                NewVersionRow {
                    version_label: new.version_label.clone(),
                    code,
                    description: new.description,
                    changelog: new.changelog,
                    operator: operator.map(ToOwned::to_owned),
                },
            )
            .await?;

        if let Payload::Artifact(dir) = &new.payload {
            let lock = self.lock_for(name);
            let _guard = lock.lock().await;
            self.store.store_source(name, &new.version_label, dir)?;
            // If the module is already deployed, the newly active sources
            // replace the staged tree right away.
            if self.store.env_dir(name).exists() {
                self.store.stage_active(name, &new.version_label)?;
            }
        }

        info!(module = name, version = %version.version, "version uploaded and activated");
        Ok(VersionInfo {
            version: version.version,
            status: DeployState::Active,
            created_at: version.created_at,
        })
    }

    pub async fn activate(
        &self,
        name: &str,
        version_label: &str,
        operator: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.set_active(name, version_label, HistoryAction::Activate, operator)
            .await
    }

    /// Semantically an activate of an older label; only the recorded
    /// history action differs.
    pub async fn rollback(
        &self,
        name: &str,
        version_label: &str,
        operator: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.set_active(name, version_label, HistoryAction::Rollback, operator)
            .await
    }

    async fn set_active(
        &self,
        name: &str,
        version_label: &str,
        action: HistoryAction,
        operator: Option<&str>,
    ) -> Result<(), RegistryError> {
        let module = self.require_module(name).await?;
        let version = self.require_version(&module, version_label).await?;

        self.repo
            .set_active_version(&module, &version, action, operator)
            .await?;

        // Non-inline modules with a staged environment pick up the newly
        // active sources.
        if env_kind_of(&module) != EnvKind::Inline && self.store.env_dir(name).exists() {
            let lock = self.lock_for(name);
            let _guard = lock.lock().await;
            self.store.stage_active(name, version_label)?;
        }

        info!(module = name, version = version_label, action = %action, "deployment switched");
        Ok(())
    }

    pub async fn deactivate(
        &self,
        name: &str,
        version_label: &str,
        operator: Option<&str>,
    ) -> Result<(), RegistryError> {
        let module = self.require_module(name).await?;
        let version = self.require_version(&module, version_label).await?;
        self.repo
            .deactivate_version(&module, &version, operator)
            .await?;
        info!(module = name, version = version_label, "deployment deactivated");
        Ok(())
    }

    /// Logical delete plus best-effort disk purge. Disk failures are logged
    /// and do not fail the call; the logical state is already deleted.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let module = self.require_module(name).await?;
        self.repo.mark_deleted(module.id).await?;

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        if let Err(e) = self.store.remove_env(name) {
            warn!(module = name, error = %e, "failed to remove environment directory");
        }
        if let Err(e) = self.store.remove_source(name, None) {
            warn!(module = name, error = %e, "failed to remove source directory");
        }
        info!(module = name, "module deleted");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ModuleSummary>, RegistryError> {
        let rows = self.repo.list_modules().await?;
        let mut summaries = Vec::with_capacity(rows.len());
        for module in rows {
            let active = self.active_pair(&module).await?;
            summaries.push(self.summarize(&module, active.as_ref()));
        }
        Ok(summaries)
    }

    pub async fn detail(&self, name: &str) -> Result<ModuleDetail, RegistryError> {
        let module = self.require_module(name).await?;
        let active = self.active_pair(&module).await?;
        let summary = self.summarize(&module, active.as_ref());
        let (code, version_description) = match &active {
            Some((_, version)) => (version.code.clone(), version.description.clone()),
            None => (None, None),
        };
        Ok(ModuleDetail {
            summary,
            code,
            version_description,
        })
    }

    pub async fn patch_meta(
        &self,
        name: &str,
        patch: ModulePatch,
    ) -> Result<ModuleDetail, RegistryError> {
        let module = self.require_module(name).await?;
        self.repo
            .update_meta(
                module.id,
                patch.description.map(Some),
                patch.tags.map(|tags| join_tags(&tags)),
            )
            .await?;
        self.detail(name).await
    }

    /// All versions with their deployment status, oldest first.
    pub async fn versions(&self, name: &str) -> Result<Vec<VersionInfo>, RegistryError> {
        let module = self.require_module(name).await?;
        let versions = self.repo.versions_of(module.id).await?;
        let deployments = self.repo.deployments_of(module.id).await?;
        Ok(versions
            .into_iter()
            .map(|v| {
                let status = deployments
                    .iter()
                    .find(|d| d.version_id == v.id)
                    .filter(|d| d.status == DeployState::Active.as_str())
                    .map_or(DeployState::Inactive, |_| DeployState::Active);
                VersionInfo {
                    version: v.version,
                    status,
                    created_at: v.created_at,
                }
            })
            .collect())
    }

    /// Lifecycle audit, newest first.
    pub async fn history(&self, name: &str) -> Result<Vec<HistoryEntry>, RegistryError> {
        let module = self.require_module(name).await?;
        let versions = self.repo.versions_of(module.id).await?;
        let rows = self.repo.history_of(module.id).await?;
        Ok(rows
            .into_iter()
            .map(|h| HistoryEntry {
                version: versions
                    .iter()
                    .find(|v| v.id == h.version_id)
                    .map(|v| v.version.clone())
                    .unwrap_or_default(),
                action: h.action,
                operator: h.operator,
                timestamp: h.timestamp,
            })
            .collect())
    }

    /// Stage the active version's sources for deployment and hand back the
    /// runtime reference the provisioner needs.
    pub async fn stage_for_deploy(&self, name: &str) -> Result<ActiveModule, RegistryError> {
        let module = self.require_module(name).await?;
        let Some((_, version)) = self.active_pair(&module).await? else {
            return Err(RegistryError::NoActiveDeployment(name.to_owned()));
        };

        if env_kind_of(&module) != EnvKind::Inline {
            let lock = self.lock_for(name);
            let _guard = lock.lock().await;
            self.store.stage_active(name, &version.version)?;
        }
        Ok(to_active(&module, &version))
    }

    /// Remove the staged environment directory (explicit undeploy).
    pub async fn remove_env(&self, name: &str) -> Result<(), RegistryError> {
        let module = self.require_module(name).await?;
        let lock = self.lock_for(&module.name);
        let _guard = lock.lock().await;
        self.store.remove_env(&module.name)?;
        Ok(())
    }

    /// Runtime reference for teardown, built from the module row alone so it
    /// also works when no deployment is active.
    pub async fn runtime_ref(&self, name: &str) -> Result<ActiveModule, RegistryError> {
        let module = self.require_module(name).await?;
        Ok(ActiveModule {
            id: module.id,
            name: module.name.clone(),
            env_kind: env_kind_of(&module),
            version_label: module.current_version.clone().unwrap_or_default(),
            code: None,
            image_tag: module.image_tag,
        })
    }

    pub async fn set_image_tag(&self, name: &str, tag: Option<String>) -> Result<(), RegistryError> {
        let module = self.require_module(name).await?;
        self.repo.set_image_tag(module.id, tag).await?;
        Ok(())
    }

    // ---- internals ----

    async fn require_module(&self, name: &str) -> Result<modules::Model, RegistryError> {
        match self.repo.find_module(name).await? {
            Some(module) if module.status != ModuleStatus::Deleted.as_str() => Ok(module),
            _ => Err(RegistryError::ModuleNotFound(name.to_owned())),
        }
    }

    async fn require_version(
        &self,
        module: &modules::Model,
        label: &str,
    ) -> Result<versions::Model, RegistryError> {
        self.repo
            .find_version(module.id, label)
            .await?
            .ok_or_else(|| RegistryError::VersionNotFound {
                module: module.name.clone(),
                version: label.to_owned(),
            })
    }

    async fn active_pair(
        &self,
        module: &modules::Model,
    ) -> Result<Option<(deployments::Model, versions::Model)>, RegistryError> {
        let Some(deployment) = self.repo.active_deployment(module.id).await? else {
            return Ok(None);
        };
        let version = self.repo.version_by_id(deployment.version_id).await?;
        Ok(version.map(|v| (deployment, v)))
    }

    fn summarize(
        &self,
        module: &modules::Model,
        active: Option<&(deployments::Model, versions::Model)>,
    ) -> ModuleSummary {
        let kind = env_kind_of(module);
        let is_deployed = if kind == EnvKind::Inline {
            active.is_some()
        } else {
            self.store.env_dir(&module.name).exists()
        };
        ModuleSummary {
            name: module.name.clone(),
            env_kind: kind,
            description: module.description.clone(),
            tags: split_tags(module.tags.as_deref()),
            status: ModuleStatus::parse(&module.status).unwrap_or(ModuleStatus::Inactive),
            active_version: active.map(|(_, v)| v.version.clone()),
            is_deployed,
            created_at: module.created_at,
            updated_at: module.updated_at,
        }
    }
}

#[async_trait]
impl ModuleResolver for ModuleRegistryService {
    async fn resolve_active(&self, name: &str) -> Result<ActiveModule, ResolveError> {
        let module = match self.repo.find_module(name).await {
            Ok(Some(module)) if module.status != ModuleStatus::Deleted.as_str() => module,
            Ok(_) => return Err(ResolveError::NotFound(name.to_owned())),
            Err(e) => {
                return Err(ResolveError::Internal {
                    name: name.to_owned(),
                    detail: e.to_string(),
                });
            }
        };

        let pair = self.active_pair(&module).await.map_err(|e| {
            ResolveError::Internal {
                name: name.to_owned(),
                detail: e.to_string(),
            }
        })?;
        match pair {
            Some((_, version)) => Ok(to_active(&module, &version)),
            None => Err(ResolveError::NoActiveDeployment(name.to_owned())),
        }
    }
}

/// Provisioning steps land in the validation log.
#[async_trait]
impl ProvisionSink for ModuleRegistryService {
    async fn record(&self, filename: &str, success: bool, message: &str) {
        if let Err(e) = self
            .repo
            .insert_validation_log(filename, success, message)
            .await
        {
            warn!(filename, error = %e, "failed to persist validation log");
        }
    }
}

fn env_kind_of(module: &modules::Model) -> EnvKind {
    EnvKind::parse(&module.env_kind).unwrap_or(EnvKind::Inline)
}

fn to_active(module: &modules::Model, version: &versions::Model) -> ActiveModule {
    ActiveModule {
        id: module.id,
        name: module.name.clone(),
        env_kind: env_kind_of(module),
        version_label: version.version.clone(),
        code: version.code.clone(),
        image_tag: module.image_tag.clone(),
    }
}

fn check_payload(kind: EnvKind, payload: &Payload) -> Result<(), RegistryError> {
    match (kind, payload) {
        (EnvKind::Inline, Payload::InlineCode(_)) => Ok(()),
        (EnvKind::Inline, _) => Err(RegistryError::BadInput(
            "inline modules require inline code".into(),
        )),
        (_, Payload::InlineCode(_)) => Err(RegistryError::BadInput(format!(
            "inline code is not valid for {kind} modules"
        ))),
        _ => Ok(()),
    }
}

fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(","))
    }
}

fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_csv_column() {
        let joined = join_tags(&["math".to_owned(), "demo".to_owned()]).unwrap();
        assert_eq!(joined, "math,demo");
        assert_eq!(split_tags(Some(&joined)), vec!["math", "demo"]);
        assert!(split_tags(None).is_empty());
        assert!(join_tags(&[]).is_none());
    }

    #[test]
    fn payload_env_kind_pairing_is_enforced() {
        assert!(check_payload(EnvKind::Inline, &Payload::InlineCode("return 1".into())).is_ok());
        assert!(check_payload(EnvKind::Inline, &Payload::None).is_err());
        assert!(
            check_payload(EnvKind::Subprocess, &Payload::InlineCode("return 1".into())).is_err()
        );
        assert!(check_payload(EnvKind::Container, &Payload::None).is_ok());
    }
}
