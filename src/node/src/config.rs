//! Node configuration loading and validation

use anyhow::{Context, Result};
use lattice_dag::DagParams;
use lattice_net::NetConfig;
use lattice_store::StoreConfig;
use lattice_types::RetargetParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete node configuration. Every section has defaults, so an empty
/// file is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub network: NetworkSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub miner: MinerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsensusSection {
    /// Desired seconds between milestones.
    #[serde(default = "default_target_spacing")]
    pub target_spacing_secs: u64,
    #[serde(default = "default_clamp_factor")]
    pub retarget_clamp_factor: u64,
    /// Ordinary-block target relaxation relative to the milestone target.
    #[serde(default = "default_block_target_shift")]
    pub block_target_shift: u32,
    /// Easiest permitted milestone target, compact form.
    #[serde(default = "default_pow_limit")]
    pub pow_limit: u32,
    #[serde(default = "default_max_orphans")]
    pub max_orphans: usize,
    #[serde(default = "default_orphan_ttl")]
    pub orphan_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkSection {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Peers dialed at startup, `ip:port`.
    #[serde(default)]
    pub connect: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSection {
    /// Level-set log directory, relative to `data_dir` unless absolute.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size_mb: u64,
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinerSection {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ConsensusSection {
    fn default() -> Self {
        ConsensusSection {
            target_spacing_secs: default_target_spacing(),
            retarget_clamp_factor: default_clamp_factor(),
            block_target_shift: default_block_target_shift(),
            pow_limit: default_pow_limit(),
            max_orphans: default_max_orphans(),
            orphan_ttl_secs: default_orphan_ttl(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            bind_ip: default_bind_ip(),
            port: default_port(),
            connect: Vec::new(),
            connect_timeout_ms: default_connect_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            path: default_storage_path(),
            max_segment_size_mb: default_max_segment_size(),
            sync_writes: true,
        }
    }
}

impl Default for MinerSection {
    fn default() -> Self {
        MinerSection { enabled: false }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./lattice-data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_target_spacing() -> u64 {
    10
}
fn default_clamp_factor() -> u64 {
    4
}
fn default_block_target_shift() -> u32 {
    4
}
fn default_pow_limit() -> u32 {
    0x2100_ffff
}
fn default_max_orphans() -> usize {
    1024
}
fn default_orphan_ttl() -> u64 {
    600
}
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7615
}
fn default_connect_timeout() -> u64 {
    10_000
}
fn default_handshake_timeout() -> u64 {
    5_000
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("ledger")
}
fn default_max_segment_size() -> u64 {
    64
}
fn default_true() -> bool {
    true
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {:?}", path.as_ref()))?;

        let config: NodeConfig =
            toml::from_str(&contents).context("failed to parse configuration file")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.consensus.target_spacing_secs == 0 {
            anyhow::bail!("target_spacing_secs must be positive");
        }
        if self.consensus.retarget_clamp_factor < 2 {
            anyhow::bail!("retarget_clamp_factor must be at least 2");
        }
        if self.consensus.block_target_shift >= 24 {
            anyhow::bail!("block_target_shift must be below 24");
        }
        if self.network.bind_ip.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("bind_ip is not a valid IP address: {}", self.network.bind_ip);
        }
        if self.storage.max_segment_size_mb == 0 {
            anyhow::bail!("max_segment_size_mb must be positive");
        }
        Ok(())
    }

    /// Absolute data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.node.data_dir.is_absolute() {
            self.node.data_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.node.data_dir)
        }
    }

    /// Absolute level-set log path.
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            self.data_dir().join(&self.storage.path)
        }
    }

    pub fn dag_params(&self) -> DagParams {
        DagParams {
            retarget: RetargetParams {
                target_spacing: self.consensus.target_spacing_secs,
                clamp_factor: self.consensus.retarget_clamp_factor,
                block_target_shift: self.consensus.block_target_shift,
                pow_limit: self.consensus.pow_limit,
            },
            max_orphans: self.consensus.max_orphans,
            orphan_ttl: Duration::from_secs(self.consensus.orphan_ttl_secs),
            ..DagParams::default()
        }
    }

    pub fn net_config(&self) -> NetConfig {
        NetConfig {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.network.handshake_timeout_ms),
            ..NetConfig::default()
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            dir: self.storage_path(),
            max_segment_size: self.storage.max_segment_size_mb * 1024 * 1024,
            sync_writes: self.storage.sync_writes,
        }
    }
}
