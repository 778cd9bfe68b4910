//! Configuration management for ppm-agent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default range authority queried during bootstrap
pub const DEFAULT_AUTHORITY_URL: &str = "https://agent.api.purplemaze.net";

/// Fixed port of the agent control API
pub const DEFAULT_AGENT_PORT: u16 = 6950;

const MAX_FETCH_TIMEOUT_SECS: u64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the range authority (`{authority_url}/ranges/{slug}`)
    pub authority_url: String,

    /// Port the control API listens on; infra ranges are allowed to it
    pub agent_port: u16,

    /// Address the control API binds to
    pub listen_address: IpAddr,

    /// PEM file holding the authority's RSA public key
    pub public_key_path: PathBuf,

    /// Append-only log file (in addition to the console)
    pub log_file: Option<PathBuf>,

    /// Single-instance lock file
    pub lock_file: PathBuf,

    /// Timeout of one bootstrap fetch attempt
    pub fetch_timeout_secs: u64,

    /// Firewall backend (auto, iptables, netsh)
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            agent_port: DEFAULT_AGENT_PORT,
            listen_address: IpAddr::from([0, 0, 0, 0]),
            public_key_path: PathBuf::from("/etc/ppm-agent/master.pem"),
            log_file: Some(PathBuf::from("ppm-agent.log")),
            lock_file: default_lock_file(),
            fetch_timeout_secs: 30,
            backend: Backend::Auto,
        }
    }
}

fn default_lock_file() -> PathBuf {
    if cfg!(windows) {
        std::env::temp_dir().join("ppm-agent.lock")
    } else {
        PathBuf::from("/var/run/ppm-agent.lock")
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise use defaults.
    ///
    /// A file that exists but does not parse or validate is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!("No config at {:?}, using defaults", path.as_ref());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.authority_url.starts_with("https://") {
            anyhow::bail!("Authority URL must use HTTPS: {}", self.authority_url);
        }

        if self.agent_port == 0 {
            anyhow::bail!("agent_port must be between 1 and 65535");
        }

        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > MAX_FETCH_TIMEOUT_SECS {
            anyhow::bail!(
                "fetch_timeout_secs must be between 1 and {} (got {})",
                MAX_FETCH_TIMEOUT_SECS,
                self.fetch_timeout_secs
            );
        }

        Ok(())
    }

    /// Authority URL without a trailing slash
    pub fn authority_base(&self) -> &str {
        self.authority_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Pick by operating system (iptables on Linux, netsh on Windows)
    #[default]
    Auto,
    /// Linux iptables with a dedicated chain
    Iptables,
    /// Windows Firewall through netsh advfirewall
    Netsh,
}
