use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::model::{HistoryEntry, ModuleDetail, ModuleSummary, VersionInfo};
use crate::infra::storage::entity::error_logs;

/// Request body for `POST /api/modules`.
#[derive(Debug, Deserialize)]
pub struct RegisterModuleRequest {
    pub name: String,
    /// Environment kind: `inline`, `subprocess`, `named_env`, `container`.
    pub env: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Inline source; required iff `env == "inline"`.
    pub code: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    "0.1.0".to_owned()
}

/// Request body for the JSON variant of `POST /api/modules/{name}/versions`.
#[derive(Debug, Deserialize)]
pub struct UploadVersionRequest {
    pub version: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub changelog: Option<String>,
}

/// Request body for `PATCH /api/modules/{name}`.
#[derive(Debug, Deserialize)]
pub struct PatchModuleRequest {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Request body for activate / deactivate / rollback.
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub version: String,
}

/// List row for `GET /api/modules`.
#[derive(Debug, Serialize)]
pub struct ModuleSummaryDto {
    pub name: String,
    pub env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_version: Option<String>,
    #[serde(rename = "isDeployed")]
    pub is_deployed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ModuleSummary> for ModuleSummaryDto {
    fn from(s: &ModuleSummary) -> Self {
        Self {
            name: s.name.clone(),
            env: s.env_kind.as_str().to_owned(),
            description: s.description.clone(),
            tags: s.tags.clone(),
            status: s.status.as_str().to_owned(),
            active_version: s.active_version.clone(),
            is_deployed: s.is_deployed,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Detail body for `GET /api/modules/{name}`.
#[derive(Debug, Serialize)]
pub struct ModuleDetailDto {
    #[serde(flatten)]
    pub summary: ModuleSummaryDto,
    /// Active version's inline source, for inline modules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_description: Option<String>,
}

impl From<&ModuleDetail> for ModuleDetailDto {
    fn from(d: &ModuleDetail) -> Self {
        Self {
            summary: ModuleSummaryDto::from(&d.summary),
            code: d.code.clone(),
            version_description: d.version_description.clone(),
        }
    }
}

/// Row for `GET /api/modules/{name}/versions`.
#[derive(Debug, Serialize)]
pub struct VersionDto {
    pub version: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<&VersionInfo> for VersionDto {
    fn from(v: &VersionInfo) -> Self {
        Self {
            version: v.version.clone(),
            status: v.status.as_str().to_owned(),
            created_at: v.created_at,
        }
    }
}

/// Row for `GET /api/modules/{name}/history`.
#[derive(Debug, Serialize)]
pub struct HistoryDto {
    pub version: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&HistoryEntry> for HistoryDto {
    fn from(h: &HistoryEntry) -> Self {
        Self {
            version: h.version.clone(),
            action: h.action.clone(),
            operator: h.operator.clone(),
            timestamp: h.timestamp,
        }
    }
}

/// Query parameters for the error-log endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorLogQuery {
    pub code: Option<String>,
    /// Username filter.
    pub user: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub keyword: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_limit() -> u64 {
    100
}

/// Row for `GET /api/logs/errors`.
#[derive(Debug, Serialize)]
pub struct ErrorLogDto {
    pub id: i32,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<error_logs::Model> for ErrorLogDto {
    fn from(m: error_logs::Model) -> Self {
        Self {
            id: m.id,
            code: m.code,
            message: m.message,
            developer_message: m.developer_message,
            request_path: m.request_path,
            stack: m.stack,
            user: m.principal,
            created_at: m.created_at,
        }
    }
}

/// Generic `{detail}` acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub detail: String,
}
