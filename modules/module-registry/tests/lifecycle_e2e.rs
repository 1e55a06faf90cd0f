//! Service-level lifecycle tests over an in-memory sqlite database.

use std::sync::Arc;

use sea_orm::{ConnectOptions, Database, ColumnTrait, EntityTrait, QueryFilter};
use tempfile::TempDir;

use executor::ModuleResolver;
use executor::{EnvKind, ResolveError};
use module_registry::domain::model::{NewModule, NewVersion, Payload};
use module_registry::infra::storage::entity::{deployments, modules};
use module_registry::infra::storage::schema;
use module_registry::validation::{ValidationError, ValidationPipeline};
use module_registry::{ArtifactStore, ModuleRegistryService, RegistryConfig, Repository, RegistryError};

async fn setup() -> (Arc<ModuleRegistryService>, Arc<Repository>, TempDir) {
    let data_root = TempDir::new().unwrap();

    // One pooled connection, or each pool member would get its own
    // in-memory database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.unwrap();
    schema::create_tables(&db).await.unwrap();

    let repo = Arc::new(Repository::new(db));
    let config = RegistryConfig {
        data_root: data_root.path().to_path_buf(),
        ..RegistryConfig::default()
    };
    let store = Arc::new(ArtifactStore::new(&config).unwrap());
    let service = Arc::new(ModuleRegistryService::new(repo.clone(), store));
    (service, repo, data_root)
}

fn inline_module(name: &str, version: &str, code: &str) -> NewModule {
    NewModule {
        name: name.to_owned(),
        env_kind: EnvKind::Inline,
        version_label: version.to_owned(),
        description: Some("adds numbers".to_owned()),
        tags: vec!["math".to_owned()],
        owner: Some("alice".to_owned()),
        payload: Payload::InlineCode(code.to_owned()),
    }
}

fn inline_version(label: &str, code: &str) -> NewVersion {
    NewVersion {
        version_label: label.to_owned(),
        description: None,
        changelog: None,
        payload: Payload::InlineCode(code.to_owned()),
    }
}

async fn active_count(repo: &Repository, name: &str) -> usize {
    let module = repo.find_module(name).await.unwrap().unwrap();
    deployments::Entity::find()
        .filter(deployments::Column::ModuleId.eq(module.id))
        .filter(deployments::Column::Status.eq("active"))
        .all(repo.connection())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn register_creates_active_first_deployment() {
    let (service, repo, _root) = setup().await;

    let detail = service
        .register(inline_module("add", "1.0", "return input['a'] + input['b']"))
        .await
        .unwrap();

    assert_eq!(detail.summary.name, "add");
    assert_eq!(detail.summary.active_version.as_deref(), Some("1.0"));
    assert!(detail.summary.is_deployed);
    assert_eq!(detail.code.as_deref(), Some("return input['a'] + input['b']"));
    assert_eq!(active_count(&repo, "add").await, 1);

    let history = service.history("add").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, "upload");
    assert_eq!(history[0].operator.as_deref(), Some("alice"));
}

#[tokio::test]
async fn duplicate_name_is_a_conflict_without_side_effects() {
    let (service, repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return 1"))
        .await
        .unwrap();

    let err = service
        .register(inline_module("add", "2.0", "return 2"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict(_)));

    // No extra version or deployment rows appeared.
    assert_eq!(service.versions("add").await.unwrap().len(), 1);
    assert_eq!(active_count(&repo, "add").await, 1);
}

#[tokio::test]
async fn new_version_activates_and_deactivates_the_old_one() {
    let (service, repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return input['a'] + input['b']"))
        .await
        .unwrap();

    let info = service
        .upload_version("add", inline_version("2.0", "return input['a'] * input['b']"), Some("bob"))
        .await
        .unwrap();
    assert_eq!(info.version, "2.0");

    let versions = service.versions("add").await.unwrap();
    let by_label: Vec<(&str, &str)> = versions
        .iter()
        .map(|v| (v.version.as_str(), v.status.as_str()))
        .collect();
    assert_eq!(by_label, vec![("1.0", "inactive"), ("2.0", "active")]);
    assert_eq!(active_count(&repo, "add").await, 1);

    let detail = service.detail("add").await.unwrap();
    assert_eq!(detail.summary.active_version.as_deref(), Some("2.0"));
    assert_eq!(detail.code.as_deref(), Some("return input['a'] * input['b']"));
}

#[tokio::test]
async fn rollback_restores_old_version_and_records_history() {
    let (service, repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return input['a'] + input['b']"))
        .await
        .unwrap();
    service
        .upload_version("add", inline_version("2.0", "return input['a'] * input['b']"), None)
        .await
        .unwrap();

    service.rollback("add", "1.0", Some("carol")).await.unwrap();

    let detail = service.detail("add").await.unwrap();
    assert_eq!(detail.summary.active_version.as_deref(), Some("1.0"));
    assert_eq!(detail.code.as_deref(), Some("return input['a'] + input['b']"));
    assert_eq!(active_count(&repo, "add").await, 1);

    let rollbacks: Vec<_> = service
        .history("add")
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.action == "rollback")
        .collect();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0].version, "1.0");
    assert_eq!(rollbacks[0].operator.as_deref(), Some("carol"));
}

#[tokio::test]
async fn deactivate_leaves_no_active_deployment() {
    let (service, repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return 1"))
        .await
        .unwrap();

    service.deactivate("add", "1.0", None).await.unwrap();

    assert_eq!(active_count(&repo, "add").await, 0);
    let err = service.resolve_active("add").await.unwrap_err();
    assert!(matches!(err, ResolveError::NoActiveDeployment(_)));

    // Activation brings it back.
    service.activate("add", "1.0", None).await.unwrap();
    assert_eq!(active_count(&repo, "add").await, 1);
}

#[tokio::test]
async fn duplicate_version_label_is_rejected() {
    let (service, _repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return 1"))
        .await
        .unwrap();

    let err = service
        .upload_version("add", inline_version("1.0", "return 2"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateVersion { .. }));
}

#[tokio::test]
async fn lifecycle_on_unknown_targets_fails_cleanly() {
    let (service, _repo, _root) = setup().await;
    assert!(matches!(
        service.activate("ghost", "1.0", None).await.unwrap_err(),
        RegistryError::ModuleNotFound(_)
    ));

    service
        .register(inline_module("add", "1.0", "return 1"))
        .await
        .unwrap();
    assert!(matches!(
        service.activate("add", "9.9", None).await.unwrap_err(),
        RegistryError::VersionNotFound { .. }
    ));
}

#[tokio::test]
async fn inline_payload_rules_are_enforced() {
    let (service, _repo, _root) = setup().await;

    let err = service
        .register(NewModule {
            name: "noop".to_owned(),
            env_kind: EnvKind::Inline,
            version_label: "1.0".to_owned(),
            description: None,
            tags: vec![],
            owner: None,
            payload: Payload::None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BadInput(_)));

    let err = service
        .register(NewModule {
            name: "venvmod".to_owned(),
            env_kind: EnvKind::Subprocess,
            version_label: "1.0".to_owned(),
            description: None,
            tags: vec![],
            owner: None,
            payload: Payload::InlineCode("return 1".to_owned()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BadInput(_)));
}

#[tokio::test]
async fn resolve_active_exposes_the_running_snapshot() {
    let (service, _repo, _root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return input['a'] + input['b']"))
        .await
        .unwrap();

    let active = service.resolve_active("add").await.unwrap();
    assert_eq!(active.name, "add");
    assert_eq!(active.env_kind, EnvKind::Inline);
    assert_eq!(active.version_label, "1.0");
    assert_eq!(active.code.as_deref(), Some("return input['a'] + input['b']"));

    assert!(matches!(
        service.resolve_active("ghost").await.unwrap_err(),
        ResolveError::NotFound(_)
    ));
}

#[tokio::test]
async fn delete_cascades_rows_and_purges_directories() {
    let (service, repo, root) = setup().await;
    service
        .register(inline_module("add", "1.0", "return 1"))
        .await
        .unwrap();

    // Simulate staged artifacts on disk.
    let env_dir = root.path().join("module_envs/add");
    let src_dir = root.path().join("modules/add/1.0");
    std::fs::create_dir_all(&env_dir).unwrap();
    std::fs::create_dir_all(&src_dir).unwrap();

    service.delete("add").await.unwrap();

    assert!(!env_dir.exists());
    assert!(!root.path().join("modules/add").exists());

    let row = modules::Entity::find()
        .filter(modules::Column::Name.eq("add"))
        .one(repo.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "deleted");
    assert_eq!(active_count(&repo, "add").await, 0);
    assert!(service.versions("add").await.is_err());

    // The name can be taken again after a logical delete.
    let detail = service
        .register(inline_module("add", "3.0", "return 3"))
        .await
        .unwrap();
    assert_eq!(detail.summary.active_version.as_deref(), Some("3.0"));
    assert_eq!(service.versions("add").await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_archive_writes_exactly_one_fail_row_and_no_module_state() {
    let (service, repo, root) = setup().await;
    service
        .register(NewModule {
            name: "packaged".to_owned(),
            env_kind: EnvKind::Subprocess,
            version_label: "0.1.0".to_owned(),
            description: None,
            tags: vec![],
            owner: None,
            payload: Payload::None,
        })
        .await
        .unwrap();

    let pipeline = ValidationPipeline::new(repo.clone());
    let err = pipeline
        .validate_archive("bad.zip", b"this is not an archive")
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::Rejected(_)));

    let logs = repo.validation_logs().await.unwrap();
    let fails: Vec<_> = logs.iter().filter(|l| l.status == "fail").collect();
    assert_eq!(fails.len(), 1);
    assert!(fails[0].message.as_deref().unwrap().contains("not a valid archive"));

    // Only the registration version exists; the env dir was never touched.
    assert_eq!(service.versions("packaged").await.unwrap().len(), 1);
    assert!(!root.path().join("module_envs/packaged").exists());
}

#[tokio::test]
async fn valid_archive_passes_and_stores_source_tree() {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    let (service, repo, root) = setup().await;
    service
        .register(NewModule {
            name: "packaged".to_owned(),
            env_kind: EnvKind::Subprocess,
            version_label: "0.1.0".to_owned(),
            description: None,
            tags: vec![],
            owner: None,
            payload: Payload::None,
        })
        .await
        .unwrap();

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        for (name, contents) in [
            ("handler.py", "def handler(input):\n    return input\n"),
            ("requirements.txt", ""),
            ("README.md", "# packaged"),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    let pipeline = ValidationPipeline::new(repo.clone());
    let artifact = pipeline
        .validate_archive("packaged.zip", &buffer.into_inner())
        .await
        .unwrap();
    assert!(artifact.path().join("handler.py").is_file());

    let info = service
        .upload_version(
            "packaged",
            NewVersion {
                version_label: "1.0".to_owned(),
                description: None,
                changelog: None,
                payload: Payload::Artifact(artifact.path().to_path_buf()),
            },
            Some("alice"),
        )
        .await
        .unwrap();
    assert_eq!(info.version, "1.0");

    let stored = root.path().join("modules/packaged/1.0/handler.py");
    assert!(stored.is_file());

    let logs = repo.validation_logs().await.unwrap();
    assert!(logs.iter().any(|l| l.status == "success"));
}
