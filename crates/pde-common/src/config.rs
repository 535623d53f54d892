//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Shared primitives and utilities for the core runtime."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_registry_url() -> String {
    "http://127.0.0.1:8443/serviceregistry".to_owned()
}

fn default_orchestrator_url() -> String {
    "http://127.0.0.1:8441/orchestrator".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_interface() -> String {
    "HTTP-INSECURE-JSON".to_owned()
}

fn default_priority() -> u32 {
    1
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_max_concurrent_pings() -> usize {
    8
}

fn default_monitor_service() -> String {
    "monitorable".to_owned()
}

fn default_ignored_systems() -> Vec<String> {
    vec![
        "serviceregistry".to_owned(),
        "orchestrator".to_owned(),
        "plantdescriptionengine".to_owned(),
    ]
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("target/pde-data")
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("target/pde-data/pde.sqlite3")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the engine daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "PDE_CONFIG";

    /// Load configuration from disk, respecting the `PDE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.registry.base_url)
            .with_context(|| format!("invalid registry base_url {}", self.registry.base_url))?;
        Url::parse(&self.orchestrator.base_url).with_context(|| {
            format!(
                "invalid orchestrator base_url {}",
                self.orchestrator.base_url
            )
        })?;
        let intervals = [
            ("registry.poll_interval", self.registry.poll_interval),
            ("registry.request_timeout", self.registry.request_timeout),
            ("orchestrator.request_timeout", self.orchestrator.request_timeout),
            ("monitor.mismatch_interval", self.monitor.mismatch_interval),
            ("monitor.ping_interval", self.monitor.ping_interval),
            ("monitor.ping_timeout", self.monitor.ping_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(anyhow!("{name} must be greater than zero"));
            }
        }
        if self.monitor.max_concurrent_pings == 0 {
            return Err(anyhow!("monitor.max_concurrent_pings must be at least 1"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Registry collaborator settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Orchestrator collaborator settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_orchestrator_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Interface name stamped onto every created rule.
    #[serde(default = "default_interface")]
    pub default_interface: String,
    /// Priority used for connections that do not declare one.
    #[serde(default = "default_priority")]
    pub default_priority: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_orchestrator_url(),
            request_timeout: default_request_timeout(),
            default_interface: default_interface(),
            default_priority: default_priority(),
        }
    }
}

/// Drift detection and liveness settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub mismatch_interval: Duration,
    #[serde(default = "default_monitor_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ping_interval: Duration,
    #[serde(default = "default_ping_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ping_timeout: Duration,
    #[serde(default = "default_max_concurrent_pings")]
    pub max_concurrent_pings: usize,
    #[serde(default = "default_monitor_service")]
    pub monitor_service_definition: String,
    /// Registered systems that are never reported as missing from the description.
    #[serde(default = "default_ignored_systems")]
    pub ignored_systems: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mismatch_interval: default_monitor_interval(),
            ping_interval: default_monitor_interval(),
            ping_timeout: default_ping_timeout(),
            max_concurrent_pings: default_max_concurrent_pings(),
            monitor_service_definition: default_monitor_service(),
            ignored_systems: default_ignored_systems(),
        }
    }
}

/// Backing store selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_data_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            directory: default_data_directory(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.registry.poll_interval, Duration::from_secs(5));
        assert_eq!(config.persistence.backend, BackendKind::File);
        assert_eq!(config.orchestrator.default_priority, 1);
        assert!(config
            .monitor
            .ignored_systems
            .contains(&"serviceregistry".to_owned()));
    }

    #[test]
    fn durations_are_read_as_seconds() {
        let config: AppConfig = r#"
            [registry]
            base_url = "http://registry.local:8443/serviceregistry"
            poll_interval = 2

            [persistence]
            backend = "sqlite"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.registry.poll_interval, Duration::from_secs(2));
        assert_eq!(config.persistence.backend, BackendKind::Sqlite);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = "[monitor]\nping_interval = 0\n"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("monitor.ping_interval"));
    }

    #[test]
    fn load_picks_first_existing_candidate() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("pded.toml");
        fs::write(&present, "[orchestrator]\ndefault_priority = 3\n").unwrap();

        let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.orchestrator.default_priority, 3);
    }
}
