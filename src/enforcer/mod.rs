//! Firewall enforcement backends (iptables, netsh).
//!
//! Both backends expose the same four primitives. Which one runs is decided
//! once by [`create_backend`]; nothing else in the crate branches on the
//! platform.

mod iptables;
mod netsh;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tracing::debug;

pub use iptables::IptablesBackend;
pub use netsh::NetshBackend;

use crate::cmd_abstraction::{CommandExecutor, CommandOutput};
use crate::config::Backend;
use crate::error::FirewallError;
use crate::validation::ValidRange;

/// Name of the chain (Linux) or rule set (Windows) owned by the agent.
pub const RULE_CONTAINER: &str = "PPMV4";

/// Transport protocol of a single filter rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Trait for firewall backends
///
/// Every primitive either succeeds or returns the reason it failed
/// (usually the native tool's stderr). Implementations never panic.
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Create (if needed) and flush the agent's rule container.
    async fn init(&self) -> Result<(), FirewallError>;

    /// Drop TCP and UDP traffic to `port` from every source.
    async fn default_deny(&self, port: u16) -> Result<(), FirewallError>;

    /// Accept traffic from `range` to `port`. With `infra`, also accept TCP
    /// from `range` to the agent control port.
    async fn allow(&self, range: &ValidRange, port: u16, infra: bool)
        -> Result<(), FirewallError>;

    /// Inverse of [`FirewallBackend::allow`].
    async fn revoke(&self, range: &ValidRange, port: u16, infra: bool)
        -> Result<(), FirewallError>;
}

/// The (port, protocol) pairs an allow/revoke touches.
///
/// Infra traffic to the agent itself is TCP only; the server port always
/// gets both protocols.
pub fn rule_targets(port: u16, infra: bool, agent_port: u16) -> Vec<(u16, Protocol)> {
    let mut targets = Vec::with_capacity(3);
    if infra {
        targets.push((agent_port, Protocol::Tcp));
    }
    targets.push((port, Protocol::Tcp));
    targets.push((port, Protocol::Udp));
    targets
}

/// Create a firewall backend based on configuration
pub fn create_backend(
    backend: Backend,
    executor: Arc<dyn CommandExecutor>,
    agent_port: u16,
) -> Result<Box<dyn FirewallBackend>, FirewallError> {
    let actual_backend = match backend {
        Backend::Auto => detect_backend()?,
        other => other,
    };

    match actual_backend {
        Backend::Iptables => Ok(Box::new(IptablesBackend::new(executor, agent_port))),
        Backend::Netsh => Ok(Box::new(NetshBackend::new(executor, agent_port))),
        Backend::Auto => Err(FirewallError::ToolMissing(
            "a supported firewall".to_string(),
        )),
    }
}

/// Pick the backend for the running OS
pub fn detect_backend() -> Result<Backend, FirewallError> {
    match std::env::consts::OS {
        "linux" => Ok(Backend::Iptables),
        "windows" => Ok(Backend::Netsh),
        other => Err(FirewallError::ToolMissing(format!(
            "a supported firewall on {}",
            other
        ))),
    }
}

/// Run a command on the blocking pool, mapping a failure to start it into
/// a `FirewallError`.
pub(crate) async fn exec_cmd(
    executor: &Arc<dyn CommandExecutor>,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, FirewallError> {
    debug!("exec: {} {}", program, args.join(" "));
    let executor = Arc::clone(executor);
    let (cmd, cmd_args) = (program.to_string(), args.to_vec());
    let result = tokio::task::spawn_blocking(move || executor.execute(&cmd, &cmd_args))
        .await
        .map_err(|e| FirewallError::Spawn {
            program: program.to_string(),
            source: io::Error::other(e),
        })?;

    result.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            FirewallError::ToolMissing(program.to_string())
        } else {
            FirewallError::Spawn {
                program: program.to_string(),
                source: e,
            }
        }
    })
}

/// Run a command and require a zero exit status.
pub(crate) async fn exec_checked(
    executor: &Arc<dyn CommandExecutor>,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, FirewallError> {
    let output = exec_cmd(executor, program, args).await?;
    if output.success {
        Ok(output)
    } else {
        Err(FirewallError::Command {
            program: program.to_string(),
            args: args.join(" "),
            stderr: output.reason(),
        })
    }
}

/// Check if running as root (effective UID == 0)
#[cfg(unix)]
pub fn check_root() -> Result<(), FirewallError> {
    // SAFETY: geteuid() is a simple syscall that reads the effective user ID.
    // It has no preconditions, never fails, and doesn't modify any state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(FirewallError::Permission(
            "iptables requires root. Please re-run with the appropriate permissions".to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_root() -> Result<(), FirewallError> {
    Err(FirewallError::Permission(
        "root check is only available on Unix".to_string(),
    ))
}
