//! shipyard.toml configuration parser.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below, so an empty file is a valid configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipyardConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
    pub reconcile: ReconcileConfig,
    pub deploy: DeployConfig,
    pub alert: AlertConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Route of the duplex command session.
    pub session_path: String,
    /// Header carrying the caller identity set by the upstream auth gateway.
    pub identity_header: String,
    /// Capacity of each session's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8480)),
            session_path: "/ws/k8s".to_string(),
            identity_header: "x-user-id".to_string(),
            outbound_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/shipyard"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Plain-HTTP API server endpoint, typically a `kubectl proxy`.
    pub api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per bucket.
    pub blob_root: PathBuf,
    pub snapshot_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: PathBuf::from("/var/lib/shipyard/blobs"),
            snapshot_ttl_secs: 3600,
        }
    }
}

impl StorageConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Upper bound on one full pass.
    pub tick_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            tick_timeout_secs: 50,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Scratch directory for downloaded manifests.
    pub work_dir: PathBuf,
    pub rollout_timeout_secs: u64,
    pub rollout_poll_millis: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("k8s"),
            rollout_timeout_secs: 30,
            rollout_poll_millis: 1000,
        }
    }
}

impl DeployConfig {
    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_secs)
    }

    pub fn rollout_poll(&self) -> Duration {
        Duration::from_millis(self.rollout_poll_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Address accepting newline-delimited JSON log records.
    pub listen: SocketAddr,
    pub workers: usize,
    pub queue_capacity: usize,
    pub mail_queue_capacity: usize,
    pub failure_pause_secs: u64,
    pub system_namespaces: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 24224)),
            workers: 50,
            queue_capacity: 1000,
            mail_queue_capacity: 1000,
            failure_pause_secs: 5,
            system_namespaces: vec![
                "kube-system".to_string(),
                "kube-public".to_string(),
                "kube-node-lease".to_string(),
            ],
        }
    }
}

impl AlertConfig {
    pub fn failure_pause(&self) -> Duration {
        Duration::from_secs(self.failure_pause_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Log,
    Webhook,
    Smtp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub transport: TransportKind,
    /// Mail relay endpoint, required for the webhook transport.
    pub webhook_url: Option<String>,
    /// Required for the smtp transport.
    pub smtp_host: Option<String>,
    /// 465 selects implicit TLS; any other port upgrades with STARTTLS
    /// when the server offers it.
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "alerts@shipyard.local".to_string(),
            transport: TransportKind::Log,
            webhook_url: None,
            smtp_host: None,
            smtp_port: 587,
            username: None,
            password: None,
        }
    }
}

impl ShipyardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ShipyardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::Invalid("reconcile.interval_secs must be > 0".into()));
        }
        if self.alert.workers == 0 {
            return Err(ConfigError::Invalid("alert.workers must be > 0".into()));
        }
        if self.alert.queue_capacity == 0 || self.alert.mail_queue_capacity == 0 {
            return Err(ConfigError::Invalid("alert queue capacities must be > 0".into()));
        }
        if self.server.outbound_capacity == 0 {
            return Err(ConfigError::Invalid("server.outbound_capacity must be > 0".into()));
        }
        if self.mail.transport == TransportKind::Webhook && self.mail.webhook_url.is_none() {
            return Err(ConfigError::Invalid(
                "mail.webhook_url is required for the webhook transport".into(),
            ));
        }
        if self.mail.transport == TransportKind::Smtp {
            self.validate_smtp()?;
        }
        Ok(())
    }

    fn validate_smtp(&self) -> Result<(), ConfigError> {
        let mail = &self.mail;
        match mail.smtp_host.as_deref() {
            Some(host) if !host.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "mail.smtp_host is required for the smtp transport".into(),
                ));
            }
        }
        if mail.smtp_port == 0 {
            return Err(ConfigError::Invalid("mail.smtp_port must be > 0".into()));
        }
        if mail.username.is_some() != mail.password.is_some() {
            return Err(ConfigError::Invalid(
                "mail.username and mail.password must be set together".into(),
            ));
        }
        if !mail.from.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "mail.from is not an address: {}",
                mail.from
            )));
        }
        Ok(())
    }

    /// Path of the redb database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.state.data_dir.join("shipyard.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ShipyardConfig::from_toml("").unwrap();
        assert_eq!(config.reconcile.interval(), Duration::from_secs(60));
        assert_eq!(config.storage.snapshot_ttl(), Duration::from_secs(3600));
        assert_eq!(config.alert.workers, 50);
        assert_eq!(config.alert.queue_capacity, 1000);
        assert_eq!(config.alert.system_namespaces.len(), 3);
        assert_eq!(config.server.session_path, "/ws/k8s");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = ShipyardConfig::from_toml(
            r#"
[reconcile]
interval_secs = 15

[cluster]
api_url = "http://10.0.0.5:8001"
"#,
        )
        .unwrap();
        assert_eq!(config.reconcile.interval_secs, 15);
        assert_eq!(config.reconcile.tick_timeout_secs, 50);
        assert_eq!(config.cluster.api_url, "http://10.0.0.5:8001");
        assert_eq!(config.cluster.request_timeout_secs, 10);
    }

    #[test]
    fn webhook_transport_requires_url() {
        let err = ShipyardConfig::from_toml("[mail]\ntransport = \"webhook\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn smtp_transport_settings() {
        let err = ShipyardConfig::from_toml("[mail]\ntransport = \"smtp\"\n").unwrap_err();
        assert!(err.to_string().contains("smtp_host"));

        let err = ShipyardConfig::from_toml(
            "[mail]\ntransport = \"smtp\"\nsmtp_host = \"mail.example.com\"\nusername = \"alerts\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("together"));

        let config = ShipyardConfig::from_toml(
            r#"
[mail]
transport = "smtp"
from = "ops@example.com"
smtp_host = "mail.example.com"
smtp_port = 465
username = "alerts"
password = "secret"
"#,
        )
        .unwrap();
        assert_eq!(config.mail.transport, TransportKind::Smtp);
        assert_eq!(config.mail.smtp_port, 465);
        assert_eq!(config.mail.password.as_deref(), Some("secret"));
        assert_eq!(ShipyardConfig::default().mail.smtp_port, 587);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(ShipyardConfig::from_toml("[alert]\nworkers = 0\n").is_err());
    }

    #[test]
    fn render_round_trips() {
        let config = ShipyardConfig::default();
        let rendered = config.to_toml_string().unwrap();
        let parsed = ShipyardConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.deploy.rollout_timeout_secs, 30);
    }
}
