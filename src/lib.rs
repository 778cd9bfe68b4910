//! # ppm-agent - Host Firewall Agent
//!
//! Enforces which IP ranges may reach the game/service servers running on a
//! host. A remote authority decides; the agent applies the decision to the
//! OS packet filter and nothing else.
//!
//! ## Features
//!
//! - **Deny by default** - Every managed server port is closed before any range is allowed
//! - **Fail-closed startup** - No traffic is served until every server's initial rules are confirmed
//! - **Signed control API** - RSA-PSS/SHA-512 over the raw body, with a TTL freshness check
//! - **Two backends** - iptables (dedicated chain) on Linux, netsh advfirewall on Windows
//! - **Injection safe** - Ranges are parsed before use and passed as discrete arguments
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ppm-agent                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap) + Config (serde_yaml)                           │
//! │    └── servers: slug:ip:port[:controlPanelPort]             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  API (axum)                                                 │
//! │    ├── GET /alive                                           │
//! │    └── POST|DELETE /whitelist/{slug}  ── Auth (rsa, pss)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FirewallManager                                            │
//! │    ├── lifecycle: init → bootstrap → serving                │
//! │    └── Fetcher (reqwest + rustls): GET /ranges/{slug}       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FirewallBackend trait)                           │
//! │    ├── IptablesBackend (chain PPMV4)                        │
//! │    └── NetshBackend (rule set PPMV4)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ppm_agent::auth::TrustAnchor;
//! use ppm_agent::cmd_abstraction::RealCommandExecutor;
//! use ppm_agent::config::Config;
//! use ppm_agent::enforcer::create_backend;
//! use ppm_agent::fetcher::HttpRangeAuthority;
//! use ppm_agent::firewall::FirewallManager;
//! use ppm_agent::server::ServerRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/ppm-agent/config.yaml")?;
//!     let registry = ServerRegistry::from_specs(&["abcdef12:0.0.0.0:30120"])?;
//!     let anchor = TrustAnchor::load(&config.public_key_path)?;
//!
//!     let backend = create_backend(
//!         config.backend,
//!         Arc::new(RealCommandExecutor::new()),
//!         config.agent_port,
//!     )?;
//!     let manager = Arc::new(FirewallManager::new(registry, Arc::from(backend)));
//!
//!     manager.initialize_firewall().await?;
//!     let authority = HttpRangeAuthority::new(
//!         config.authority_base(),
//!         Duration::from_secs(config.fetch_timeout_secs),
//!     );
//!     manager.bootstrap_whitelist(&authority).await?;
//!     # let _ = anchor;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Control API router and server
//! - [`api_types`] - JSON envelope and request/response bodies
//! - [`auth`] - Signature verification and freshness check
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Mockable process execution
//! - [`config`] - Configuration parsing and validation
//! - [`enforcer`] - Firewall backend abstraction (iptables, netsh)
//! - [`error`] - Error types
//! - [`fetcher`] - HTTP client for the range authority
//! - [`firewall`] - Rule orchestration and lifecycle
//! - [`lock`] - Single-instance lock file
//! - [`logging`] - Console and file logging
//! - [`server`] - Managed servers and their registry
//! - [`signal`] - Graceful shutdown signal handling
//! - [`validation`] - Range, slug and port validation

pub mod api;
pub mod api_types;
pub mod auth;
pub mod cli;
pub mod cmd_abstraction;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod fetcher;
pub mod firewall;
pub mod lock;
pub mod logging;
pub mod server;
pub mod signal;
pub mod validation;

pub use cli::Cli;
pub use config::Config;
pub use firewall::FirewallManager;
