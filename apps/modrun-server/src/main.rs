//! Modrun server: multi-tenant module execution platform host.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sea_orm::{ConnectOptions, Database};
use tokio_util::sync::CancellationToken;
use tracing::info;

use executor::backends::{
    ContainerExecutor, InlineExecutor, NamedEnvExecutor, SubprocessExecutor,
};
use executor::provision::EnvProvisioner;
use executor::{ExecutorManager, ModuleResolver, RetryingExecutor};
use modrun_auth::TokenVerifier;
use module_registry::domain::logs::ErrorLogService;
use module_registry::infra::storage::schema;
use module_registry::validation::ValidationPipeline;
use module_registry::{ArtifactStore, ModuleRegistryService, Repository};

use modrun_server::config::AppConfig;
use modrun_server::grpc::{AuthInterceptor, RunnerServer, RunnerService};
use modrun_server::http::{self, HttpDeps};
use modrun_server::logging;

#[derive(Debug, Parser)]
#[command(name = "modrun-server", about = "Modrun module execution platform")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Raise console log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(cli.verbose);
    config.normalize()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.logging, &config.server.home_dir);
    info!(home = %config.server.home_dir.display(), "starting modrun server");

    // Database and schema.
    let dsn = config.database.resolved_dsn(&config.server.home_dir);
    let mut options = ConnectOptions::new(dsn);
    options.sqlx_logging(false);
    if config.database.dsn.is_empty() || config.database.dsn.starts_with("sqlite") {
        // A sqlite pool must stay on one connection for in-memory DSNs, and
        // gains nothing from more with a file DSN.
        options.max_connections(1);
    }
    let db = Database::connect(options)
        .await
        .context("failed to connect to database")?;
    schema::create_tables(&db)
        .await
        .context("failed to create schema")?;

    // Registry side.
    let repo = Arc::new(Repository::new(db.clone()));
    let registry_config = Arc::new(config.registry.clone());
    let store = Arc::new(ArtifactStore::new(&registry_config).context("artifact store init")?);
    let registry = Arc::new(ModuleRegistryService::new(repo.clone(), store));
    let pipeline = Arc::new(ValidationPipeline::new(repo.clone()));
    let logs = Arc::new(ErrorLogService::new(repo));

    // Execution side. The registry service doubles as the module resolver
    // and the provisioning log sink.
    let resolver: Arc<dyn ModuleResolver> = registry.clone();
    let provisioner = Arc::new(EnvProvisioner::new(
        config.executor.clone(),
        registry.clone(),
    ));
    let mut manager = ExecutorManager::new(resolver.clone());
    manager.register(Arc::new(InlineExecutor::new(
        resolver.clone(),
        config.executor.clone(),
    )));
    manager.register(Arc::new(SubprocessExecutor::new(
        resolver.clone(),
        config.executor.clone(),
    )));
    manager.register(Arc::new(NamedEnvExecutor::new(
        resolver.clone(),
        config.executor.clone(),
    )));
    manager.register(Arc::new(ContainerExecutor::new(
        resolver,
        config.executor.clone(),
    )));
    let executor = Arc::new(RetryingExecutor::new(
        Arc::new(manager),
        config.retry.policy(),
    ));

    let verifier = TokenVerifier::new(&config.auth.jwt_secret);

    let router = http::build_router(HttpDeps {
        registry: registry.clone(),
        pipeline,
        logs,
        provisioner: provisioner.clone(),
        registry_config,
        executor: executor.clone(),
        verifier: verifier.clone(),
        db,
    });

    let runner = RunnerService::new(registry, executor.clone(), provisioner);

    // Serve REST and gRPC until a shutdown signal arrives.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let http_listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "REST API listening");

    let http_shutdown = shutdown.clone();
    let http_server = axum::serve(http_listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

    let grpc_addr = config.server.grpc_addr;
    info!(addr = %grpc_addr, "gRPC API listening");
    let grpc_shutdown = shutdown.clone();
    let grpc_server = tonic::transport::Server::builder()
        .add_service(RunnerServer::with_interceptor(
            runner,
            AuthInterceptor::new(verifier),
        ))
        .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await });

    let (http_result, grpc_result) = tokio::join!(http_server, grpc_server);
    http_result.context("REST server failed")?;
    grpc_result.context("gRPC server failed")?;

    // Release backend resources (stray containers in particular).
    executor.cleanup().await;
    info!("modrun server stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
