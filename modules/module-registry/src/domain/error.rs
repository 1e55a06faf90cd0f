use modrun_errors::{ApiError, code};

/// Registry and lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    NameConflict(String),

    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    #[error("version '{version}' not found for module '{module}'")]
    VersionNotFound { module: String, version: String },

    #[error("version '{version}' already exists for module '{module}'")]
    DuplicateVersion { module: String, version: String },

    #[error("module '{0}' has no active deployment")]
    NoActiveDeployment(String),

    #[error("{0}")]
    BadInput(String),

    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("artifact store error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match &err {
            RegistryError::NameConflict(_) => {
                ApiError::bad_request(code::NAME_CONFLICT, err.to_string())
            }
            RegistryError::ModuleNotFound(_) => {
                ApiError::not_found(code::MODULE_NOT_FOUND, err.to_string())
            }
            RegistryError::VersionNotFound { .. } => {
                ApiError::not_found(code::VERSION_NOT_FOUND, err.to_string())
            }
            RegistryError::DuplicateVersion { .. } => {
                ApiError::bad_request(code::DUPLICATE_VERSION, err.to_string())
            }
            RegistryError::NoActiveDeployment(_) => {
                ApiError::bad_request(code::NO_ACTIVE_DEPLOYMENT, err.to_string())
            }
            RegistryError::BadInput(_) => ApiError::bad_request(code::BAD_INPUT, err.to_string()),
            RegistryError::Db(_) | RegistryError::Io(_) => ApiError::internal(err.to_string()),
        }
    }
}
