//! iptables backend implementation.

use async_trait::async_trait;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    check_root, exec_checked, exec_cmd, rule_targets, FirewallBackend, Protocol, RULE_CONTAINER,
};
use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::FirewallError;
use crate::validation::ValidRange;

const IPTABLES: &str = "iptables";
const MAIN_CHAIN: &str = "INPUT";

/// iptables backend (dedicated chain spliced into the head of INPUT)
///
/// Filters IPv4 only. IPv6 ranges are refused before any command runs.
pub struct IptablesBackend {
    executor: Arc<dyn CommandExecutor>,
    agent_port: u16,
    privilege_check: fn() -> Result<(), FirewallError>,
}

impl IptablesBackend {
    pub fn new(executor: Arc<dyn CommandExecutor>, agent_port: u16) -> Self {
        Self {
            executor,
            agent_port,
            privilege_check: check_root,
        }
    }

    #[cfg(test)]
    fn with_privilege_check(mut self, check: fn() -> Result<(), FirewallError>) -> Self {
        self.privilege_check = check;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<bool, FirewallError> {
        let output = exec_cmd(&self.executor, IPTABLES, &args_to_strings(args)).await?;
        Ok(output.success)
    }

    async fn run_checked(&self, args: &[String]) -> Result<(), FirewallError> {
        exec_checked(&self.executor, IPTABLES, args).await.map(|_| ())
    }

    /// Arguments for one accept rule; `op` is -I, -D or -C.
    fn accept_rule(op: &str, range: &ValidRange, port: u16, proto: Protocol) -> Vec<String> {
        vec![
            op.to_string(),
            RULE_CONTAINER.to_string(),
            "-s".to_string(),
            range.to_string(),
            "-p".to_string(),
            proto.as_str().to_string(),
            "--dport".to_string(),
            port.to_string(),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ]
    }

    fn require_ipv4(range: &ValidRange) -> Result<(), FirewallError> {
        match range.net() {
            IpNet::V4(_) => Ok(()),
            IpNet::V6(_) => Err(FirewallError::UnsupportedRange {
                range: range.to_string(),
                backend: "iptables",
            }),
        }
    }

    async fn rule_exists(
        &self,
        range: &ValidRange,
        port: u16,
        proto: Protocol,
    ) -> Result<bool, FirewallError> {
        let args = Self::accept_rule("-C", range, port, proto);
        let output = exec_cmd(&self.executor, IPTABLES, &args).await?;
        Ok(output.success)
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn init(&self) -> Result<(), FirewallError> {
        // Fails with ToolMissing when the binary is absent
        self.run(&["--version"]).await?;

        (self.privilege_check)()?;

        if !self.run(&["-L", RULE_CONTAINER, "-n"]).await? {
            info!("Chain {} not found. Creating it.", RULE_CONTAINER);
            self.run_checked(&args_to_strings(&["-N", RULE_CONTAINER])).await?;
        }

        // Restarts begin from an empty chain
        self.run_checked(&args_to_strings(&["-F", RULE_CONTAINER])).await?;

        if !self.run(&["-C", MAIN_CHAIN, "-j", RULE_CONTAINER]).await? {
            self.run_checked(&args_to_strings(&["-I", MAIN_CHAIN, "1", "-j", RULE_CONTAINER])).await?;
            debug!("Spliced {} into {}", RULE_CONTAINER, MAIN_CHAIN);
        }

        info!("iptables chain {} ready", RULE_CONTAINER);
        Ok(())
    }

    async fn default_deny(&self, port: u16) -> Result<(), FirewallError> {
        let port_str = port.to_string();
        for proto in [Protocol::Tcp, Protocol::Udp] {
            let args = args_to_strings(&[
                "-A", RULE_CONTAINER,
                "-p", proto.as_str(),
                "--dport", &port_str,
                "-j", "DROP",
            ]);
            if let Err(e) = self.run_checked(&args).await {
                error!("Failed to add block rule for port {}: {}", port, e);
                return Err(e);
            }
        }
        debug!("Default deny installed for port {}", port);
        Ok(())
    }

    async fn allow(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        Self::require_ipv4(range)?;
        for (p, proto) in rule_targets(port, infra, self.agent_port) {
            if self.rule_exists(range, p, proto).await? {
                debug!("{} {} -> {} already accepted", proto.as_str(), range, p);
                continue;
            }
            if let Err(e) = self.run_checked(&Self::accept_rule("-I", range, p, proto)).await {
                error!("Failed to add rule for range {} on port {}: {}", range, p, e);
                return Err(e);
            }
        }
        info!("Allowed {} on port {}{}", range, port, if infra { " (infra)" } else { "" });
        Ok(())
    }

    async fn revoke(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        Self::require_ipv4(range)?;
        for (p, proto) in rule_targets(port, infra, self.agent_port) {
            if !self.rule_exists(range, p, proto).await? {
                debug!("{} {} -> {} already absent", proto.as_str(), range, p);
                continue;
            }
            if let Err(e) = self.run_checked(&Self::accept_rule("-D", range, p, proto)).await {
                error!("Failed to remove rule for range {} on port {}: {}", range, p, e);
                return Err(e);
            }
        }
        info!("Revoked {} on port {}{}", range, port, if infra { " (infra)" } else { "" });
        Ok(())
    }
}
