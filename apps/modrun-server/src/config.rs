use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use executor::ExecutorConfig;
use module_registry::RegistryConfig;

/// Main application configuration: strongly-typed global sections plus the
/// registry and executor sections their crates define.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            registry: RegistryConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
    /// Home directory for data, logs, and the default sqlite file.
    /// Normalized to an absolute path at startup.
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            grpc_addr: default_grpc_addr(),
            home_dir: default_home_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database DSN. Empty means a sqlite file under `home_dir`.
    #[serde(default)]
    pub dsn: String,
}

impl DatabaseConfig {
    #[must_use]
    pub fn resolved_dsn(&self, home_dir: &Path) -> String {
        if self.dsn.is_empty() {
            let path = home_dir.join("modrun.sqlite");
            format!("sqlite://{}?mode=rwc", path.display())
        } else {
            self.dsn.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 secret shared with the external token issuer.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_console_level")]
    pub console_level: String,
    /// JSON log file, relative to `home_dir` unless absolute. Empty string
    /// disables the file sink.
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default = "default_file_level")]
    pub file_level: String,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            file: default_log_file(),
            file_level: default_file_level(),
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
        }
    }
}

/// Retry policy applied around the execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> executor::RetryPolicy {
        executor::RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: std::time::Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

impl AppConfig {
    /// Layered loading: defaults, then the YAML file, then `MODRUN__`
    /// environment variables (`MODRUN__SERVER__BIND_ADDR=...`).
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or a layer fails to parse.
    pub fn load_layered(config_path: &Path) -> Result<Self> {
        use figment::Figment;
        use figment::providers::{Env, Format, Serialized, Yaml};

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("MODRUN__").split("__"));

        figment
            .extract()
            .context("failed to extract configuration")
    }

    /// Load from a file, or fall back to defaults when none is given.
    ///
    /// # Errors
    ///
    /// Returns an error when the given path does not exist or parsing fails.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                ensure!(path.is_file(), "config file does not exist: {}", path.display());
                Self::load_layered(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply verbosity flags to the console log level.
    pub fn apply_cli_overrides(&mut self, verbose: u8) {
        match verbose {
            0 => {}
            1 => self.logging.console_level = "debug".to_owned(),
            _ => self.logging.console_level = "trace".to_owned(),
        }
    }

    /// Normalize the home directory and anchor relative data roots under it.
    /// The executor always shares the registry's environment root; the two
    /// halves of the platform must agree on where staged sources live.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created.
    pub fn normalize(&mut self) -> Result<()> {
        if self.server.home_dir.is_relative() {
            let cwd = std::env::current_dir().context("cannot resolve working directory")?;
            self.server.home_dir = cwd.join(&self.server.home_dir);
        }
        std::fs::create_dir_all(&self.server.home_dir)
            .with_context(|| format!("failed to create home_dir {}", self.server.home_dir.display()))?;

        if self.registry.data_root.is_relative() {
            self.registry.data_root = self.server.home_dir.join(&self.registry.data_root);
        }
        if self.registry.template_path.is_relative() {
            self.registry.template_path = self.server.home_dir.join(&self.registry.template_path);
        }
        self.executor.env_root = self.registry.envs_root();
        Ok(())
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("static addr")
}

fn default_grpc_addr() -> SocketAddr {
    "0.0.0.0:50051".parse().expect("static addr")
}

fn default_home_dir() -> PathBuf {
    PathBuf::from(".modrun")
}

fn default_jwt_secret() -> String {
    // Development fallback; production deployments configure their own.
    "modrun-dev-secret".to_owned()
}

fn default_console_level() -> String {
    "info".to_owned()
}

fn default_log_file() -> String {
    "logs/modrun.log".to_owned()
}

fn default_file_level() -> String {
    "debug".to_owned()
}

fn default_max_size_mb() -> u64 {
    100
}

fn default_max_backups() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_complete() {
        let config = AppConfig::default();
        assert_eq!(config.executor.timeout_secs, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.database.dsn.is_empty());
    }

    #[test]
    fn yaml_layer_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modrun.yaml");
        std::fs::write(
            &path,
            r#"
server:
  bind_addr: "127.0.0.1:9999"
logging:
  console_level: "warn"
  file: ""
retry:
  max_retries: 5
"#,
        )
        .unwrap();

        let config = AppConfig::load_layered(&path).unwrap();
        assert_eq!(config.server.bind_addr.port(), 9999);
        assert_eq!(config.logging.console_level, "warn");
        assert!(config.logging.file.is_empty());
        assert_eq!(config.retry.max_retries, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.executor.timeout_secs, 60);
    }

    #[test]
    fn normalize_anchors_roots_under_home() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig {
            server: ServerConfig {
                home_dir: dir.path().join("home"),
                ..ServerConfig::default()
            },
            ..AppConfig::default()
        };
        config.normalize().unwrap();

        assert!(config.server.home_dir.is_absolute());
        assert!(config.registry.data_root.starts_with(&config.server.home_dir));
        assert_eq!(config.executor.env_root, config.registry.envs_root());
    }

    #[test]
    fn empty_dsn_resolves_to_sqlite_under_home() {
        let config = DatabaseConfig::default();
        let dsn = config.resolved_dsn(Path::new("/data/modrun"));
        assert_eq!(dsn, "sqlite:///data/modrun/modrun.sqlite?mode=rwc");
    }

    #[test]
    fn verbosity_flags_raise_console_level() {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(0);
        assert_eq!(config.logging.console_level, "info");
        config.apply_cli_overrides(1);
        assert_eq!(config.logging.console_level, "debug");
        config.apply_cli_overrides(2);
        assert_eq!(config.logging.console_level, "trace");
    }
}
