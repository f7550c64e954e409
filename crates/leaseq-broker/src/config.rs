use chrono::Duration;
use anyhow::Context;
use leaseq_core::{lease_timeout_from_secs, DEFAULT_LEASE_TIMEOUT_SECS};
use leaseq_persistence::CheckpointStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub leases: LeaseConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Quiet period after which buffered bytes count as a full request
    pub request_idle_timeout_ms: u64,
    /// Upper bound on how long a connection may take to deliver its request
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub checkpoint_dir: PathBuf,
    pub checkpoint_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 5555,
            request_idle_timeout_ms: 200,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let store = CheckpointStoreConfig::default();
        PersistenceConfig {
            checkpoint_dir: store.checkpoint_dir,
            checkpoint_file: store.checkpoint_file,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    /// Lease timeout, rejected when it does not fit a lease deadline
    pub fn lease_timeout(&self) -> anyhow::Result<Duration> {
        lease_timeout_from_secs(self.leases.timeout_secs).context("invalid leases.timeout_secs")
    }

    pub fn request_idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.broker.request_idle_timeout_ms)
    }

    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.broker.connection_timeout_secs)
    }

    pub fn to_checkpoint_store_config(&self) -> CheckpointStoreConfig {
        CheckpointStoreConfig {
            checkpoint_dir: self.persistence.checkpoint_dir.clone(),
            checkpoint_file: self.persistence.checkpoint_file.clone(),
        }
    }
}
