//! Configuration management for MapMesh nodes.
//!
//! A node runs exactly one role and reads a single TOML file. Sections that
//! a role does not use may be omitted; every optional value has a default.

use crate::error::{CoreError, Result};
use crate::types::{DomainId, PeerAddress, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FANOUT: usize = 3;
pub const DEFAULT_GOSSIP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_VALIDITY_WINDOW_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 5 * 60;
pub const DEFAULT_ENTRY_TYPE: &str = "MAP";
pub const DEFAULT_REGISTRY_REFRESH_SECS: u64 = 10 * 60;
pub const DEFAULT_HOP_BOUND: u16 = 3;
pub const DEFAULT_PROPAGATION_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_PUSH_INTERVAL_SECS: u64 = 10 * 60;
pub const DEFAULT_PULL_INTERVAL_SECS: u64 = 10 * 60;

/// Role a node process plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Aggregator,
    Relay,
    Registry,
}

impl Role {
    /// Service kind other nodes use to address this role.
    pub fn service_kind(&self) -> ServiceKind {
        match self {
            Role::Aggregator => ServiceKind::Aggregator,
            Role::Relay => ServiceKind::Relay,
            Role::Registry => ServiceKind::Registry,
        }
    }

    fn default_db(&self) -> PathBuf {
        PathBuf::from(format!("./{}.db", self.service_kind()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub gossip: GossipConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// `"<domain>/<service>" = "<ip>:<port>"` resolution table for the TCP transport
    #[serde(default)]
    pub peers: BTreeMap<String, SocketAddr>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Node identifier, unique across the network
    pub id: String,
    /// Local domain
    pub domain: DomainId,
    pub role: Role,
    /// Directory holding `*.key` Ed25519 seeds
    pub key_dir: PathBuf,
    /// SQLite database (default `./<role>.db`)
    #[serde(default)]
    pub db: Option<PathBuf>,
    /// JSON trust material (TRCs and chains); when absent the local CA service is queried
    #[serde(default)]
    pub trust_material: Option<PathBuf>,
    /// Address the TCP transport listens on
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl GeneralConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Number of peers each push cycle targets (N)
    pub fanout: usize,
    pub interval_secs: u64,
    /// Entries older than this are stale
    pub validity_window_secs: u64,
    /// Entries dated further than this into the future are stale
    pub max_clock_skew_secs: u64,
    /// Entry type used by aggregators for mapping entries
    pub entry_type: String,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_FANOUT,
            interval_secs: DEFAULT_GOSSIP_INTERVAL_SECS,
            validity_window_secs: DEFAULT_VALIDITY_WINDOW_SECS,
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            entry_type: DEFAULT_ENTRY_TYPE.to_string(),
        }
    }
}

impl GossipConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Domain of the registry this node registers with
    pub domain: Option<DomainId>,
    pub refresh_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: None,
            refresh_secs: DEFAULT_REGISTRY_REFRESH_SECS,
        }
    }
}

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Maximum segment length for a domain to count as downstream
    pub hop_bound: u16,
    pub interval_secs: u64,
    /// Static topology: known segments from this domain, each listing the
    /// domains it traverses in order, destination last
    pub segments: Vec<Vec<DomainId>>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            hop_bound: DEFAULT_HOP_BOUND,
            interval_secs: DEFAULT_PROPAGATION_INTERVAL_SECS,
            segments: Vec::new(),
        }
    }
}

impl PropagationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Reachability (IP prefixes) announced for the local domain
    pub prefixes: Vec<String>,
    pub push_interval_secs: u64,
    /// How often the full entry set is pulled from a relay into the local store
    pub pull_interval_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            push_interval_secs: DEFAULT_PUSH_INTERVAL_SECS,
            pull_interval_secs: DEFAULT_PULL_INTERVAL_SECS,
        }
    }
}

impl AggregatorConfig {
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl NodeConfig {
    /// Load, default and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: NodeConfig =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.init_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in values that depend on other settings.
    pub fn init_defaults(&mut self) {
        if self.general.db.is_none() {
            self.general.db = Some(self.general.role.default_db());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.id.is_empty() {
            return Err(CoreError::Config("general.id must be set".to_string()));
        }
        if self.general.domain.is_wildcard() {
            return Err(CoreError::Config(
                "wildcard general.domain not allowed".to_string(),
            ));
        }
        if self.general.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "general.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.gossip.fanout == 0 {
            return Err(CoreError::Config("gossip.fanout must be positive".to_string()));
        }
        if self.gossip.interval_secs == 0 || self.propagation.interval_secs == 0 {
            return Err(CoreError::Config("intervals must be positive".to_string()));
        }
        if self.gossip.entry_type.is_empty() {
            return Err(CoreError::Config("gossip.entry_type must be set".to_string()));
        }
        if self.general.role != Role::Registry && self.registry.domain.is_none() {
            return Err(CoreError::Config(
                "registry.domain must be set for aggregator and relay roles".to_string(),
            ));
        }
        if self.general.role == Role::Aggregator {
            if self.aggregator.prefixes.is_empty() {
                return Err(CoreError::Config(
                    "aggregator.prefixes must not be empty".to_string(),
                ));
            }
            if self.aggregator.push_interval_secs == 0 || self.aggregator.pull_interval_secs == 0 {
                return Err(CoreError::Config("intervals must be positive".to_string()));
            }
        }
        if self.gossip.validity_window_secs < self.gossip.interval_secs {
            tracing::warn!(
                validity_window_secs = self.gossip.validity_window_secs,
                interval_secs = self.gossip.interval_secs,
                "validity window shorter than gossip interval; entries may expire between pushes"
            );
        }
        self.peer_table()?;
        Ok(())
    }

    /// Parsed `[peers]` table.
    pub fn peer_table(&self) -> Result<BTreeMap<PeerAddress, SocketAddr>> {
        self.peers
            .iter()
            .map(|(key, addr)| Ok((key.parse::<PeerAddress>()?, *addr)))
            .collect()
    }

    pub fn db_path(&self) -> PathBuf {
        self.general
            .db
            .clone()
            .unwrap_or_else(|| self.general.role.default_db())
    }
}
