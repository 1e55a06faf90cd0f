//! Repository over the registry tables.
//!
//! Every lifecycle mutation runs as one transaction that (a) inactivates
//! competing deployments, (b) writes the target deployment, (c) refreshes
//! the module's `current_version` mirror, and (d) appends the history row,
//! so concurrent lifecycle calls for one module serialize into a
//! well-defined linear order with exactly one deployment ending active.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};

use crate::domain::model::{DeployState, HistoryAction, ModuleStatus};

use super::entity::{deployments, error_logs, module_history, modules, validation_logs, versions};

/// Fields of a new module row; disk payloads are handled by the service.
pub struct NewModuleRow {
    pub name: String,
    pub env_kind: String,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub owner: Option<String>,
    pub version_label: String,
    pub code: Option<String>,
    pub version_description: Option<String>,
    pub operator: Option<String>,
}

/// Fields of a new version row.
pub struct NewVersionRow {
    pub version_label: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub operator: Option<String>,
}

/// Fields of a new error-log row.
pub struct NewErrorLogRow {
    pub code: String,
    pub message: String,
    pub developer_message: Option<String>,
    pub request_path: Option<String>,
    pub stack: Option<String>,
    pub principal: Option<String>,
}

/// Filter for error-log queries; `keyword` matches message, developer
/// message, or stack.
#[derive(Debug, Default, Clone)]
pub struct ErrorLogFilter {
    pub code: Option<String>,
    pub principal: Option<String>,
    pub from: Option<chrono::DateTime<Utc>>,
    pub to: Option<chrono::DateTime<Utc>>,
    pub keyword: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // ---- reads ----

    pub async fn find_module(&self, name: &str) -> Result<Option<modules::Model>, DbErr> {
        modules::Entity::find()
            .filter(modules::Column::Name.eq(name))
            .one(&self.db)
            .await
    }

    /// All non-deleted modules, ordered by name.
    pub async fn list_modules(&self) -> Result<Vec<modules::Model>, DbErr> {
        modules::Entity::find()
            .filter(modules::Column::Status.ne(ModuleStatus::Deleted.as_str()))
            .order_by_asc(modules::Column::Name)
            .all(&self.db)
            .await
    }

    pub async fn versions_of(&self, module_id: i32) -> Result<Vec<versions::Model>, DbErr> {
        versions::Entity::find()
            .filter(versions::Column::ModuleId.eq(module_id))
            .order_by_asc(versions::Column::CreatedAt)
            .order_by_asc(versions::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn find_version(
        &self,
        module_id: i32,
        label: &str,
    ) -> Result<Option<versions::Model>, DbErr> {
        versions::Entity::find()
            .filter(versions::Column::ModuleId.eq(module_id))
            .filter(versions::Column::Version.eq(label))
            .one(&self.db)
            .await
    }

    pub async fn version_by_id(&self, id: i32) -> Result<Option<versions::Model>, DbErr> {
        versions::Entity::find_by_id(id).one(&self.db).await
    }

    pub async fn deployments_of(&self, module_id: i32) -> Result<Vec<deployments::Model>, DbErr> {
        deployments::Entity::find()
            .filter(deployments::Column::ModuleId.eq(module_id))
            .all(&self.db)
            .await
    }

    pub async fn active_deployment(
        &self,
        module_id: i32,
    ) -> Result<Option<deployments::Model>, DbErr> {
        deployments::Entity::find()
            .filter(deployments::Column::ModuleId.eq(module_id))
            .filter(deployments::Column::Status.eq(DeployState::Active.as_str()))
            .one(&self.db)
            .await
    }

    /// Lifecycle audit rows, newest first.
    pub async fn history_of(&self, module_id: i32) -> Result<Vec<module_history::Model>, DbErr> {
        module_history::Entity::find()
            .filter(module_history::Column::ModuleId.eq(module_id))
            .order_by_desc(module_history::Column::Timestamp)
            .order_by_desc(module_history::Column::Id)
            .all(&self.db)
            .await
    }

    // ---- lifecycle transactions ----

    /// Insert a module with its first version, active deployment, and
    /// `upload` history row. When `existing` carries a previously deleted
    /// row for the same name, that row is revived instead of inserted.
    pub async fn create_module(
        &self,
        existing: Option<modules::Model>,
        row: NewModuleRow,
    ) -> Result<(modules::Model, versions::Model), DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let module = match existing {
            Some(old) => {
                let mut active: modules::ActiveModel = old.into();
                active.env_kind = Set(row.env_kind);
                active.description = Set(row.description);
                active.tags = Set(row.tags);
                active.owner = Set(row.owner);
                active.current_version = Set(Some(row.version_label.clone()));
                active.status = Set(ModuleStatus::Active.as_str().to_owned());
                active.image_tag = Set(None);
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                modules::ActiveModel {
                    name: Set(row.name),
                    env_kind: Set(row.env_kind),
                    description: Set(row.description),
                    tags: Set(row.tags),
                    owner: Set(row.owner),
                    current_version: Set(Some(row.version_label.clone())),
                    status: Set(ModuleStatus::Active.as_str().to_owned()),
                    image_tag: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };

        let version = versions::ActiveModel {
            module_id: Set(module.id),
            version: Set(row.version_label),
            code: Set(row.code),
            description: Set(row.version_description),
            changelog: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        insert_deployment(&txn, module.id, version.id).await?;
        insert_history(
            &txn,
            module.id,
            version.id,
            HistoryAction::Upload,
            row.operator.as_deref(),
        )
        .await?;

        txn.commit().await?;
        Ok((module, version))
    }

    /// Insert a new version and make it the single active deployment.
    /// Duplicate-label checks belong to the caller.
    pub async fn add_version(
        &self,
        module: &modules::Model,
        row: NewVersionRow,
    ) -> Result<versions::Model, DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let version = versions::ActiveModel {
            module_id: Set(module.id),
            version: Set(row.version_label.clone()),
            code: Set(row.code),
            description: Set(row.description),
            changelog: Set(row.changelog),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        inactivate_others(&txn, module.id, version.id).await?;
        insert_deployment(&txn, module.id, version.id).await?;
        set_current_version(&txn, module.id, Some(row.version_label)).await?;
        insert_history(
            &txn,
            module.id,
            version.id,
            HistoryAction::Upload,
            row.operator.as_deref(),
        )
        .await?;

        txn.commit().await?;
        Ok(version)
    }

    /// Activate (or roll back to) an existing version: every other
    /// deployment of the module goes inactive in the same transaction.
    pub async fn set_active_version(
        &self,
        module: &modules::Model,
        version: &versions::Model,
        action: HistoryAction,
        operator: Option<&str>,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        inactivate_others(&txn, module.id, version.id).await?;

        let existing = deployments::Entity::find()
            .filter(deployments::Column::ModuleId.eq(module.id))
            .filter(deployments::Column::VersionId.eq(version.id))
            .one(&txn)
            .await?;
        match existing {
            Some(deployment) => {
                let mut active: deployments::ActiveModel = deployment.into();
                active.status = Set(DeployState::Active.as_str().to_owned());
                active.deployed_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                insert_deployment(&txn, module.id, version.id).await?;
            }
        }

        set_current_version(&txn, module.id, Some(version.version.clone())).await?;
        insert_history(&txn, module.id, version.id, action, operator).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Mark the given version's deployment inactive.
    pub async fn deactivate_version(
        &self,
        module: &modules::Model,
        version: &versions::Model,
        operator: Option<&str>,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        deployments::Entity::update_many()
            .col_expr(
                deployments::Column::Status,
                Expr::value(DeployState::Inactive.as_str()),
            )
            .filter(deployments::Column::ModuleId.eq(module.id))
            .filter(deployments::Column::VersionId.eq(version.id))
            .exec(&txn)
            .await?;

        // The mirror only tracks the active deployment.
        if module.current_version.as_deref() == Some(version.version.as_str()) {
            set_current_version(&txn, module.id, None).await?;
        }

        insert_history(
            &txn,
            module.id,
            version.id,
            HistoryAction::Deactivate,
            operator,
        )
        .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Logical module delete with an explicit cascade over its versions,
    /// deployments, and history.
    pub async fn mark_deleted(&self, module_id: i32) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        module_history::Entity::delete_many()
            .filter(module_history::Column::ModuleId.eq(module_id))
            .exec(&txn)
            .await?;
        deployments::Entity::delete_many()
            .filter(deployments::Column::ModuleId.eq(module_id))
            .exec(&txn)
            .await?;
        versions::Entity::delete_many()
            .filter(versions::Column::ModuleId.eq(module_id))
            .exec(&txn)
            .await?;

        modules::Entity::update_many()
            .col_expr(
                modules::Column::Status,
                Expr::value(ModuleStatus::Deleted.as_str()),
            )
            .col_expr(modules::Column::CurrentVersion, Expr::value(Option::<String>::None))
            .col_expr(modules::Column::ImageTag, Expr::value(Option::<String>::None))
            .col_expr(modules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(modules::Column::Id.eq(module_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    pub async fn update_meta(
        &self,
        module_id: i32,
        description: Option<Option<String>>,
        tags: Option<Option<String>>,
    ) -> Result<(), DbErr> {
        let mut update = modules::Entity::update_many()
            .col_expr(modules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(modules::Column::Id.eq(module_id));
        if let Some(description) = description {
            update = update.col_expr(modules::Column::Description, Expr::value(description));
        }
        if let Some(tags) = tags {
            update = update.col_expr(modules::Column::Tags, Expr::value(tags));
        }
        update.exec(&self.db).await?;
        Ok(())
    }

    pub async fn set_image_tag(&self, module_id: i32, tag: Option<String>) -> Result<(), DbErr> {
        modules::Entity::update_many()
            .col_expr(modules::Column::ImageTag, Expr::value(tag))
            .col_expr(modules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(modules::Column::Id.eq(module_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- logs ----

    pub async fn insert_validation_log(
        &self,
        filename: &str,
        success: bool,
        message: &str,
    ) -> Result<(), DbErr> {
        validation_logs::ActiveModel {
            filename: Set(filename.to_owned()),
            status: Set(if success { "success" } else { "fail" }.to_owned()),
            message: Set(Some(message.to_owned())),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn validation_logs(&self) -> Result<Vec<validation_logs::Model>, DbErr> {
        validation_logs::Entity::find()
            .order_by_asc(validation_logs::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn insert_error_log(&self, row: NewErrorLogRow) -> Result<(), DbErr> {
        error_logs::ActiveModel {
            code: Set(row.code),
            message: Set(row.message),
            developer_message: Set(row.developer_message),
            request_path: Set(row.request_path),
            stack: Set(row.stack),
            principal: Set(row.principal),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn query_error_logs(
        &self,
        filter: &ErrorLogFilter,
    ) -> Result<Vec<error_logs::Model>, DbErr> {
        let mut query = error_logs::Entity::find();

        if let Some(code) = &filter.code {
            query = query.filter(error_logs::Column::Code.eq(code));
        }
        if let Some(principal) = &filter.principal {
            query = query.filter(error_logs::Column::Principal.eq(principal));
        }
        if let Some(from) = filter.from {
            query = query.filter(error_logs::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(error_logs::Column::CreatedAt.lte(to));
        }
        if let Some(keyword) = &filter.keyword {
            query = query.filter(
                Condition::any()
                    .add(error_logs::Column::Message.contains(keyword))
                    .add(error_logs::Column::DeveloperMessage.contains(keyword))
                    .add(error_logs::Column::Stack.contains(keyword)),
            );
        }

        query = query
            .order_by_desc(error_logs::Column::CreatedAt)
            .order_by_desc(error_logs::Column::Id);
        if let Some(offset) = filter.offset {
            query = query.offset(offset);
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        query.all(&self.db).await
    }
}

async fn insert_deployment(
    txn: &DatabaseTransaction,
    module_id: i32,
    version_id: i32,
) -> Result<(), DbErr> {
    deployments::ActiveModel {
        module_id: Set(module_id),
        version_id: Set(version_id),
        status: Set(DeployState::Active.as_str().to_owned()),
        deployed_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(())
}

/// Mark every deployment of the module except `keep_version_id` inactive.
async fn inactivate_others(
    txn: &DatabaseTransaction,
    module_id: i32,
    keep_version_id: i32,
) -> Result<(), DbErr> {
    deployments::Entity::update_many()
        .col_expr(
            deployments::Column::Status,
            Expr::value(DeployState::Inactive.as_str()),
        )
        .filter(deployments::Column::ModuleId.eq(module_id))
        .filter(deployments::Column::VersionId.ne(keep_version_id))
        .exec(txn)
        .await?;
    Ok(())
}

async fn set_current_version(
    txn: &DatabaseTransaction,
    module_id: i32,
    label: Option<String>,
) -> Result<(), DbErr> {
    modules::Entity::update_many()
        .col_expr(modules::Column::CurrentVersion, Expr::value(label))
        .col_expr(modules::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(modules::Column::Id.eq(module_id))
        .exec(txn)
        .await?;
    Ok(())
}

async fn insert_history(
    txn: &DatabaseTransaction,
    module_id: i32,
    version_id: i32,
    action: HistoryAction,
    operator: Option<&str>,
) -> Result<(), DbErr> {
    module_history::ActiveModel {
        module_id: Set(module_id),
        version_id: Set(version_id),
        action: Set(action.as_str().to_owned()),
        operator: Set(operator.map(ToOwned::to_owned)),
        timestamp: Set(Utc::now()),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(())
}
