use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Multipart, Path, Query};
use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};

use executor::EnvKind;
use executor::provision::EnvProvisioner;
use modrun_auth::{Principal, ROLE_ADMIN, scope};
use modrun_errors::{ApiError, Problem, code};

use super::dto::{
    ErrorLogDto, ErrorLogQuery, HistoryDto, LifecycleRequest, MessageResponse, ModuleDetailDto,
    ModuleSummaryDto, PatchModuleRequest, RegisterModuleRequest, UploadVersionRequest, VersionDto,
};
use crate::config::RegistryConfig;
use crate::domain::logs::ErrorLogService;
use crate::domain::model::{ModulePatch, NewModule, NewVersion, Payload};
use crate::domain::service::ModuleRegistryService;
use crate::infra::storage::repo::ErrorLogFilter;
use crate::validation::{ValidationError, ValidationPipeline};

fn parse_env(env: &str) -> Result<EnvKind, ApiError> {
    EnvKind::parse(env).ok_or_else(|| {
        ApiError::bad_request(
            code::BAD_INPUT,
            format!("unknown environment kind '{env}', expected inline | subprocess | named_env | container"),
        )
    })
}

/// List modules with their active version and deployment flag.
///
/// # Errors
///
/// Returns `ApiError` on missing read scope or a repository failure.
pub async fn list_modules(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ModuleSummaryDto>>, ApiError> {
    principal.require_scope(scope::MODULES_READ)?;
    let modules = service.list().await?;
    Ok(Json(modules.iter().map(ModuleSummaryDto::from).collect()))
}

/// Module detail with the active version's payload.
///
/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn get_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ModuleDetailDto>, ApiError> {
    principal.require_scope(scope::MODULES_READ)?;
    let detail = service.detail(&name).await?;
    Ok(Json(ModuleDetailDto::from(&detail)))
}

/// Register a new module (inline code, or a shell awaiting its first
/// artifact upload).
///
/// # Errors
///
/// Returns `ApiError` for name conflicts and payload/kind mismatches.
pub async fn create_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<RegisterModuleRequest>,
) -> Result<Response, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    let env_kind = parse_env(&body.env)?;
    let payload = match body.code {
        Some(code) => Payload::InlineCode(code),
        None => Payload::None,
    };
    let detail = service
        .register(NewModule {
            name: body.name,
            env_kind,
            version_label: body.version,
            description: body.description,
            tags: body.tags,
            owner: Some(principal.username),
            payload,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ModuleDetailDto::from(&detail))).into_response())
}

/// Edit description/tags.
///
/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn patch_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<PatchModuleRequest>,
) -> Result<Json<ModuleDetailDto>, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    let detail = service
        .patch_meta(
            &name,
            ModulePatch {
                description: body.description,
                tags: body.tags,
            },
        )
        .await?;
    Ok(Json(ModuleDetailDto::from(&detail)))
}

/// Logical delete plus runtime and disk cleanup.
///
/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn delete_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(provisioner): Extension<Arc<EnvProvisioner>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    // Kill external runtimes first, then purge rows and directories.
    let runtime = service.runtime_ref(&name).await?;
    provisioner.destroy(&runtime).await;
    service.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Versions with their deployment status.
///
/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn list_versions(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<Vec<VersionDto>>, ApiError> {
    principal.require_scope(scope::MODULES_READ)?;
    let versions = service.versions(&name).await?;
    Ok(Json(versions.iter().map(VersionDto::from).collect()))
}

/// JSON version upload (inline modules). The new version auto-activates.
///
/// # Errors
///
/// Returns `ApiError` for duplicate labels and payload mismatches.
pub async fn upload_version(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<UploadVersionRequest>,
) -> Result<Response, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    let payload = match body.code {
        Some(code) => Payload::InlineCode(code),
        None => Payload::None,
    };
    let version = service
        .upload_version(
            &name,
            NewVersion {
                version_label: body.version,
                description: body.description,
                changelog: body.changelog,
                payload,
            },
            Some(&principal.username),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(VersionDto::from(&version))).into_response())
}

/// Artifact version upload (multipart). The archive is validated
/// structurally, stored as an immutable source tree, and auto-activated.
///
/// # Errors
///
/// Returns `ApiError` for malformed multipart bodies, failed validation,
/// and duplicate labels.
pub async fn upload_artifact(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(pipeline): Extension<Arc<ValidationPipeline>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;

    let mut filename = String::from("upload.zip");
    let mut archive: Option<Vec<u8>> = None;
    let mut version: Option<String> = None;
    let mut description: Option<String> = None;
    let mut changelog: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(code::BAD_INPUT, format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_owned();
        match field_name.as_str() {
            "file" => {
                if let Some(n) = field.file_name() {
                    filename = n.to_owned();
                }
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(code::BAD_INPUT, format!("failed to read upload: {e}"))
                })?;
                archive = Some(bytes.to_vec());
            }
            "version" => {
                version = Some(text_field(field).await?);
            }
            "description" => {
                description = Some(text_field(field).await?);
            }
            "changelog" => {
                changelog = Some(text_field(field).await?);
            }
            _ => {}
        }
    }

    let archive = archive
        .ok_or_else(|| ApiError::bad_request(code::BAD_INPUT, "missing 'file' field"))?;
    let version = version
        .ok_or_else(|| ApiError::bad_request(code::BAD_INPUT, "missing 'version' field"))?;

    let artifact = pipeline
        .validate_archive(&filename, &archive)
        .await
        .map_err(|e| match e {
            ValidationError::Rejected(message) => {
                ApiError::bad_request(code::VALIDATION_FAILED, message)
            }
            other => ApiError::internal(other.to_string()),
        })?;

    let info = service
        .upload_version(
            &name,
            NewVersion {
                version_label: version,
                description,
                changelog,
                payload: Payload::Artifact(artifact.path().to_path_buf()),
            },
            Some(&principal.username),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(VersionDto::from(&info))).into_response())
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(code::BAD_INPUT, format!("malformed field: {e}")))
}

/// # Errors
///
/// Returns `ApiError` when the module or version is unknown.
pub async fn activate_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<LifecycleRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    service
        .activate(&name, &body.version, Some(&principal.username))
        .await?;
    Ok(Json(MessageResponse {
        detail: format!("activated {name} v{}", body.version),
    }))
}

/// # Errors
///
/// Returns `ApiError` when the module or version is unknown.
pub async fn deactivate_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<LifecycleRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    service
        .deactivate(&name, &body.version, Some(&principal.username))
        .await?;
    Ok(Json(MessageResponse {
        detail: format!("deactivated {name} v{}", body.version),
    }))
}

/// # Errors
///
/// Returns `ApiError` when the module or version is unknown.
pub async fn rollback_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(body): Json<LifecycleRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    service
        .rollback(&name, &body.version, Some(&principal.username))
        .await?;
    Ok(Json(MessageResponse {
        detail: format!("rolled back {name} to v{}", body.version),
    }))
}

/// Stage the active sources and provision the runtime environment.
///
/// # Errors
///
/// Returns `ApiError` when there is no active deployment or provisioning
/// fails; provisioning failures carry the tool's stderr.
pub async fn deploy_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(provisioner): Extension<Arc<EnvProvisioner>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;

    let module = service.stage_for_deploy(&name).await?;
    let outcome = provisioner.provision(&module).await.map_err(|e| {
        ApiError(
            Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code::PROVISION_FAILED,
                format!("provisioning {} environment failed", e.kind),
            )
            .with_developer_message(e.stderr),
        )
    })?;
    if outcome.image_tag.is_some() {
        service.set_image_tag(&name, outcome.image_tag).await?;
    }
    Ok(Json(MessageResponse {
        detail: format!("deployed {name}"),
    }))
}

/// Destroy the provisioned runtime and remove the staged environment.
///
/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn undeploy_module(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(provisioner): Extension<Arc<EnvProvisioner>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    principal.require_scope(scope::MODULES_WRITE)?;
    let runtime = service.runtime_ref(&name).await?;
    provisioner.destroy(&runtime).await;
    service.remove_env(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # Errors
///
/// Returns `ApiError` when the module is unknown.
pub async fn get_history(
    Extension(service): Extension<Arc<ModuleRegistryService>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<Vec<HistoryDto>>, ApiError> {
    principal.require_scope(scope::MODULES_READ)?;
    let history = service.history(&name).await?;
    Ok(Json(history.iter().map(HistoryDto::from).collect()))
}

fn to_filter(q: ErrorLogQuery) -> ErrorLogFilter {
    ErrorLogFilter {
        code: q.code,
        principal: q.user,
        from: q.from,
        to: q.to,
        keyword: q.keyword,
        limit: Some(q.limit),
        offset: Some(q.offset),
    }
}

/// Filtered error logs, newest first. Admin only.
///
/// # Errors
///
/// Returns `ApiError` on missing admin role or a repository failure.
pub async fn get_error_logs(
    Extension(logs): Extension<Arc<ErrorLogService>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ErrorLogQuery>,
) -> Result<Json<Vec<ErrorLogDto>>, ApiError> {
    principal.require_role(ROLE_ADMIN)?;
    let rows = logs.query(&to_filter(query)).await?;
    Ok(Json(rows.into_iter().map(ErrorLogDto::from).collect()))
}

/// CSV export of the filtered error logs. Admin only.
///
/// # Errors
///
/// Returns `ApiError` on missing admin role or a repository failure.
pub async fn download_error_logs(
    Extension(logs): Extension<Arc<ErrorLogService>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ErrorLogQuery>,
) -> Result<Response, ApiError> {
    principal.require_role(ROLE_ADMIN)?;
    let csv = logs.export_csv(&to_filter(query)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=error_logs.csv",
            ),
        ],
        csv,
    )
        .into_response())
}

/// Serve the static module template archive.
///
/// # Errors
///
/// Returns `ApiError` when the template file is not present on disk.
pub async fn get_template(
    Extension(config): Extension<Arc<RegistryConfig>>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    principal.require_scope(scope::MODULES_READ)?;
    let bytes = tokio::fs::read(&config.template_path).await.map_err(|_| {
        ApiError::not_found(code::MODULE_NOT_FOUND, "module template is not available")
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=module_template.zip",
            ),
        ],
        bytes,
    )
        .into_response())
}
