//! End-to-end tests over the fully wired application router: real sqlite,
//! real services, bearer tokens issued with the configured secret.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use sea_orm::{ConnectOptions, Database};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use executor::backends::InlineExecutor;
use executor::provision::EnvProvisioner;
use executor::{ExecutorConfig, ExecutorManager, ModuleResolver, RetryPolicy, RetryingExecutor};
use modrun_auth::{Claims, TokenVerifier};
use modrun_server::http::{HttpDeps, build_router};
use module_registry::domain::logs::ErrorLogService;
use module_registry::infra::storage::schema;
use module_registry::validation::ValidationPipeline;
use module_registry::{ArtifactStore, ModuleRegistryService, RegistryConfig, Repository};

const SECRET: &str = "server-e2e-secret";

fn token(scopes: &[&str], roles: &[&str]) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    let claims = Claims {
        sub: "alice".to_owned(),
        scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
        roles: roles.iter().map(|r| (*r).to_owned()).collect(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn operator_token() -> String {
    token(
        &["modules:read", "modules:write", "execute:all"],
        &["admin"],
    )
}

async fn build_app() -> (Router, TempDir) {
    let data_root = TempDir::new().unwrap();

    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.unwrap();
    schema::create_tables(&db).await.unwrap();

    let repo = Arc::new(Repository::new(db.clone()));
    let registry_config = Arc::new(RegistryConfig {
        data_root: data_root.path().to_path_buf(),
        ..RegistryConfig::default()
    });
    let store = Arc::new(ArtifactStore::new(&registry_config).unwrap());
    let registry = Arc::new(ModuleRegistryService::new(repo.clone(), store));
    let pipeline = Arc::new(ValidationPipeline::new(repo.clone()));
    let logs = Arc::new(ErrorLogService::new(repo));

    let exec_config = ExecutorConfig {
        env_root: registry_config.envs_root(),
        ..ExecutorConfig::default()
    };
    let resolver: Arc<dyn ModuleResolver> = registry.clone();
    let provisioner = Arc::new(EnvProvisioner::new(exec_config.clone(), registry.clone()));
    let mut manager = ExecutorManager::new(resolver.clone());
    manager.register(Arc::new(InlineExecutor::new(resolver, exec_config)));
    let executor = Arc::new(RetryingExecutor::new(
        Arc::new(manager),
        RetryPolicy::default(),
    ));

    let router = build_router(HttpDeps {
        registry,
        pipeline,
        logs,
        provisioner,
        registry_config,
        executor,
        verifier: TokenVerifier::new(SECRET),
        db,
    });
    (router, data_root)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {bearer}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_endpoints_are_public() {
    let (router, _root) = build_app().await;

    let (status, body) = send(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, Method::GET, "/health/db", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_requires_a_bearer_token() {
    let (router, _root) = build_app().await;

    let (status, body) = send(&router, Method::GET, "/api/modules", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &router,
        Method::GET,
        "/api/modules",
        Some("not-a-real-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scopes_gate_module_mutations() {
    let (router, _root) = build_app().await;
    let read_only = token(&["modules:read"], &[]);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/modules",
        Some(&read_only),
        Some(json!({"name": "add", "env": "inline", "code": "return 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn register_list_and_detail_round_trip() {
    let (router, _root) = build_app().await;
    let bearer = operator_token();

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/modules",
        Some(&bearer),
        Some(json!({
            "name": "add",
            "env": "inline",
            "version": "1.0",
            "code": "return input['a'] + input['b']",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "add");
    assert_eq!(created["active_version"], "1.0");

    let (status, list) = send(&router, Method::GET, "/api/modules", Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, envs) =
        send(&router, Method::GET, "/environments", Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envs["environments"], json!(["inline"]));
}

#[tokio::test]
#[ignore = "requires python3 on PATH"]
async fn inline_module_executes_end_to_end() {
    let (router, _root) = build_app().await;
    let bearer = operator_token();

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/modules",
        Some(&bearer),
        Some(json!({
            "name": "add",
            "env": "inline",
            "version": "1.0",
            "code": "return input['a'] + input['b']",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &router,
        Method::POST,
        "/run/add",
        Some(&bearer),
        Some(json!({"input": {"a": 2, "b": 3}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exit_code"], 0, "stderr: {}", body["stderr"]);
    assert_eq!(body["result"]["result"], 5);

    // A second identical call returns the same result.
    let (_, again) = send(
        &router,
        Method::POST,
        "/run/add",
        Some(&bearer),
        Some(json!({"input": {"a": 2, "b": 3}})),
    )
    .await;
    assert_eq!(again["result"], body["result"]);
}
