//! Schema bootstrap: tables are derived from the entities at startup.
//! Migration tooling is deliberately out of scope; the registry owns its
//! schema end to end.

use sea_orm::sea_query::{Alias, Index};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Schema};

use super::entity;

/// Create all registry tables (and the composite uniqueness index on
/// versions) if they do not exist yet.
///
/// # Errors
///
/// Returns `DbErr` if statement execution fails.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create!(entity::modules::Entity);
    create!(entity::versions::Entity);
    create!(entity::deployments::Entity);
    create!(entity::module_history::Entity);
    create!(entity::validation_logs::Entity);
    create!(entity::error_logs::Entity);

    // `(module, version_label)` is unique.
    let mut index = Index::create();
    index
        .name("idx_versions_module_version")
        .table(Alias::new("versions"))
        .col(Alias::new("module_id"))
        .col(Alias::new("version"))
        .unique()
        .if_not_exists();
    db.execute(backend.build(&index)).await?;

    Ok(())
}
