//! Configuration loading and validation.
//!
//! Loads node and cluster settings from `~/.dapi/config.toml` (or
//! `$DAPI_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterTopology, NodeInfo, StaticTopology};
use crate::router::RouterSettings;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "DAPI_CONFIG_PATH";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// This node.
    pub node: NodeConfig,
    /// Cluster membership as last reported by the membership layer.
    pub cluster: ClusterConfig,
    /// Router limits.
    pub router: RouterConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$DAPI_CONFIG_PATH` or `~/.dapi/config.toml`.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok())?;
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config at {}", path.display()))
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML or unknown value types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Resolve the config file path using a custom env resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if no env override is set and the home directory
    /// cannot be determined.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process
    /// environment. Invalid values are logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DAPI_NODE_NAME") {
            self.node.name = v;
        }
        if let Some(v) = env("DAPI_MASTER_NODE") {
            self.cluster.master = Some(v);
        }
        if let Some(v) = env("DAPI_REQUEST_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.router.request_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "DAPI_REQUEST_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: empty or duplicate node names, an
    /// unknown master, an unparsable address, or inconsistent timeouts.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.node.name.is_empty(), "node.name must not be empty");

        let mut names = HashSet::new();
        for node in &self.cluster.nodes {
            ensure!(!node.name.is_empty(), "cluster.nodes entries need a name");
            ensure!(
                names.insert(node.name.as_str()),
                "duplicate cluster node '{}'",
                node.name
            );
            if let Some(address) = &node.address {
                url::Url::parse(address).with_context(|| {
                    format!("invalid address '{address}' for node '{}'", node.name)
                })?;
            }
        }

        match &self.cluster.master {
            Some(master) if *master != self.node.name && !names.contains(master.as_str()) => {
                bail!("master '{master}' is not a known node")
            }
            None if !self.cluster.nodes.is_empty() => {
                bail!("cluster.master must be set when cluster.nodes are configured")
            }
            _ => {}
        }

        ensure!(
            self.router.request_timeout_secs > 0,
            "router.request_timeout_secs must be greater than zero"
        );
        ensure!(
            self.router.request_timeout_secs <= self.router.max_timeout_secs,
            "router.request_timeout_secs ({}) exceeds router.max_timeout_secs ({})",
            self.router.request_timeout_secs,
            self.router.max_timeout_secs
        );
        Ok(())
    }

    /// The configured cluster as seen from this node.
    ///
    /// With no master and no peers the node is a standalone master.
    pub fn cluster_topology(&self) -> ClusterTopology {
        if self.cluster.master.is_none() && self.cluster.nodes.is_empty() {
            return ClusterTopology::standalone(self.node.name.clone());
        }
        ClusterTopology::new(
            self.node.name.clone(),
            self.cluster.master.clone(),
            self.cluster.nodes.clone(),
        )
    }

    /// A topology source seeded from [`cluster_topology`](Self::cluster_topology).
    pub fn topology(&self) -> StaticTopology {
        StaticTopology::new(self.cluster_topology())
    }
}

// ── Sections ────────────────────────────────────────────────────

/// This node's identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, unique within the cluster.
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node01".to_owned(),
        }
    }
}

/// Cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Master node name.
    pub master: Option<String>,
    /// Known members, in the order broadcasts should visit them.
    pub nodes: Vec<NodeInfo>,
}

/// Router limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Timeout for calls that do not set one.
    pub request_timeout_secs: u64,
    /// Largest timeout a call may request.
    pub max_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_timeout_secs: 3600,
        }
    }
}

impl RouterConfig {
    /// Limits in the form the router takes.
    pub fn settings(&self) -> RouterSettings {
        RouterSettings {
            default_timeout: Duration::from_secs(self.request_timeout_secs),
            max_timeout: Duration::from_secs(self.max_timeout_secs),
        }
    }
}

/// Load configuration from an explicit path, then apply env overrides.
///
/// Unlike [`Config::load`], a missing file is an error.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let mut config = Config::from_toml(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.dapi/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".dapi"))
}
