use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use executor::EnvKind;

/// Lifecycle state of a module row. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Active,
    Inactive,
    Deleted,
}

impl ModuleStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment status; at most one `Active` deployment exists per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Active,
    Inactive,
}

impl DeployState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition recorded in the module history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Upload,
    Activate,
    Deactivate,
    Rollback,
}

impl HistoryAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a registration or version upload: inline source, or a
/// validated artifact directory handed over by the validation pipeline.
#[derive(Debug)]
pub enum Payload {
    InlineCode(String),
    Artifact(PathBuf),
    /// Non-inline module registered ahead of its first artifact upload.
    None,
}

/// Input to `register`.
#[derive(Debug)]
pub struct NewModule {
    pub name: String,
    pub env_kind: EnvKind,
    pub version_label: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner: Option<String>,
    pub payload: Payload,
}

/// Input to `upload_version`.
#[derive(Debug)]
pub struct NewVersion {
    pub version_label: String,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub payload: Payload,
}

/// Metadata edit; `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct ModulePatch {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Registry view of a module, list form.
#[derive(Debug, Clone)]
pub struct ModuleSummary {
    pub name: String,
    pub env_kind: EnvKind,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: ModuleStatus,
    /// Label of the active deployment's version, when one exists.
    pub active_version: Option<String>,
    /// Whether a provisioned environment is staged on disk.
    pub is_deployed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registry view of a module, detail form: the summary plus the active
/// version's payload.
#[derive(Debug, Clone)]
pub struct ModuleDetail {
    pub summary: ModuleSummary,
    pub code: Option<String>,
    pub version_description: Option<String>,
}

/// One version row with its deployment status.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version: String,
    pub status: DeployState,
    pub created_at: DateTime<Utc>,
}

/// One lifecycle audit row.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub version: String,
    pub action: String,
    pub operator: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_status_round_trips() {
        for status in [
            ModuleStatus::Active,
            ModuleStatus::Inactive,
            ModuleStatus::Deleted,
        ] {
            assert_eq!(ModuleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ModuleStatus::parse("archived"), None);
    }

    #[test]
    fn history_actions_match_audit_vocabulary() {
        assert_eq!(HistoryAction::Upload.as_str(), "upload");
        assert_eq!(HistoryAction::Rollback.as_str(), "rollback");
    }
}
