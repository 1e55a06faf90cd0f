//! gRPC surface: the `Runner` service, semantically equivalent to the REST
//! API, with bearer-token auth in an interceptor.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use executor::provision::EnvProvisioner;
use executor::{EnvKind, ExecRequest, RetryingExecutor};
use modrun_auth::{Principal, TokenVerifier, scope};
use module_registry::domain::model::{ModuleSummary, NewModule, Payload};
use module_registry::{ModuleRegistryService, RegistryError};

pub mod proto {
    tonic::include_proto!("modrun.v1");
}

use proto::runner_server::Runner;
pub use proto::runner_server::RunnerServer;

/// Verifies the `authorization` metadata and stashes the principal into the
/// request extensions for the per-method scope checks.
#[derive(Clone)]
pub struct AuthInterceptor {
    verifier: TokenVerifier,
}

impl AuthInterceptor {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        let principal = self
            .verifier
            .verify_header(header)
            .map_err(|e| Status::unauthenticated(e.to_string()))?;
        request.extensions_mut().insert(principal);
        Ok(request)
    }
}

pub struct RunnerService {
    registry: Arc<ModuleRegistryService>,
    executor: Arc<RetryingExecutor>,
    provisioner: Arc<EnvProvisioner>,
}

impl RunnerService {
    pub fn new(
        registry: Arc<ModuleRegistryService>,
        executor: Arc<RetryingExecutor>,
        provisioner: Arc<EnvProvisioner>,
    ) -> Self {
        Self {
            registry,
            executor,
            provisioner,
        }
    }
}

fn principal_of<T>(request: &Request<T>) -> Result<Principal, Status> {
    request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("missing principal"))
}

fn permission_denied(err: modrun_auth::AuthError) -> Status {
    Status::permission_denied(err.to_string())
}

fn registry_status(err: RegistryError) -> Status {
    match &err {
        RegistryError::ModuleNotFound(_)
        | RegistryError::VersionNotFound { .. }
        | RegistryError::NoActiveDeployment(_) => Status::not_found(err.to_string()),
        RegistryError::NameConflict(_) => Status::already_exists(err.to_string()),
        RegistryError::DuplicateVersion { .. } | RegistryError::BadInput(_) => {
            Status::invalid_argument(err.to_string())
        }
        RegistryError::Db(_) | RegistryError::Io(_) => Status::internal(err.to_string()),
    }
}

fn to_module_info(summary: &ModuleSummary) -> proto::ModuleInfo {
    proto::ModuleInfo {
        name: summary.name.clone(),
        env: summary.env_kind.as_str().to_owned(),
        version: summary.active_version.clone().unwrap_or_default(),
        description: summary.description.clone().unwrap_or_default(),
        tags: summary.tags.clone(),
        is_deployed: summary.is_deployed,
    }
}

#[tonic::async_trait]
impl Runner for RunnerService {
    async fn execute(
        &self,
        request: Request<proto::ExecuteRequest>,
    ) -> Result<Response<proto::ExecuteResponse>, Status> {
        let principal = principal_of(&request)?;
        principal
            .require_any_scope(&[scope::EXECUTE_ALL, scope::EXECUTE_LIMITED])
            .map_err(permission_denied)?;

        let req = request.into_inner();
        let input: serde_json::Value = serde_json::from_str(&req.json_input)
            .map_err(|_| Status::invalid_argument("invalid JSON input"))?;
        if !input.is_object() {
            return Err(Status::invalid_argument("input must be a JSON object"));
        }

        let result = self
            .executor
            .execute(ExecRequest {
                module: req.module,
                input,
            })
            .await;

        Ok(Response::new(proto::ExecuteResponse {
            json_result: serde_json::to_string(&result.result)
                .unwrap_or_else(|_| "{}".to_owned()),
            exit_code: result.exit_code,
            stderr: result.stderr,
            stdout: result.stdout,
            duration_seconds: result.duration_seconds,
        }))
    }

    async fn list_modules(
        &self,
        request: Request<proto::ListModulesRequest>,
    ) -> Result<Response<proto::ListModulesResponse>, Status> {
        let principal = principal_of(&request)?;
        principal
            .require_scope(scope::MODULES_READ)
            .map_err(permission_denied)?;

        let modules = self.registry.list().await.map_err(registry_status)?;
        Ok(Response::new(proto::ListModulesResponse {
            modules: modules.iter().map(to_module_info).collect(),
        }))
    }

    async fn get_module(
        &self,
        request: Request<proto::GetModuleRequest>,
    ) -> Result<Response<proto::ModuleInfo>, Status> {
        let principal = principal_of(&request)?;
        principal
            .require_scope(scope::MODULES_READ)
            .map_err(permission_denied)?;

        let name = request.into_inner().name;
        let detail = self.registry.detail(&name).await.map_err(registry_status)?;
        Ok(Response::new(to_module_info(&detail.summary)))
    }

    async fn register_module(
        &self,
        request: Request<proto::RegisterModuleRequest>,
    ) -> Result<Response<proto::ModuleInfo>, Status> {
        let principal = principal_of(&request)?;
        principal
            .require_scope(scope::MODULES_WRITE)
            .map_err(permission_denied)?;

        let req = request.into_inner();
        let env_kind = EnvKind::parse(&req.env)
            .ok_or_else(|| Status::invalid_argument(format!("unknown environment kind '{}'", req.env)))?;
        let payload = if req.code.is_empty() {
            Payload::None
        } else {
            Payload::InlineCode(req.code)
        };
        let version_label = if req.version.is_empty() {
            "0.1.0".to_owned()
        } else {
            req.version
        };

        let detail = self
            .registry
            .register(NewModule {
                name: req.name,
                env_kind,
                version_label,
                description: (!req.description.is_empty()).then_some(req.description),
                tags: req.tags,
                owner: Some(principal.username),
                payload,
            })
            .await
            .map_err(registry_status)?;
        Ok(Response::new(to_module_info(&detail.summary)))
    }

    async fn delete_module(
        &self,
        request: Request<proto::DeleteModuleRequest>,
    ) -> Result<Response<proto::DeleteModuleResponse>, Status> {
        let principal = principal_of(&request)?;
        principal
            .require_scope(scope::MODULES_WRITE)
            .map_err(permission_denied)?;

        let name = request.into_inner().name;
        let runtime = self.registry.runtime_ref(&name).await.map_err(registry_status)?;
        self.provisioner.destroy(&runtime).await;
        self.registry.delete(&name).await.map_err(registry_status)?;
        Ok(Response::new(proto::DeleteModuleResponse { deleted: true }))
    }
}
