//! Windows Firewall backend (`netsh advfirewall`).
//!
//! All agent rules share the name `PPMV4`, so a single delete by name
//! purges them. Inbound traffic is blocked by the Windows default policy;
//! the agent only ever adds allow rules on top of it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{exec_cmd, rule_targets, FirewallBackend, Protocol, RULE_CONTAINER};
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, CommandOutput};
use crate::error::FirewallError;
use crate::validation::ValidRange;

const NETSH: &str = "netsh";
const NET: &str = "net";
const NO_MATCH: &str = "No rules match";

/// netsh backend
pub struct NetshBackend {
    executor: Arc<dyn CommandExecutor>,
    agent_port: u16,
}

impl NetshBackend {
    pub fn new(executor: Arc<dyn CommandExecutor>, agent_port: u16) -> Self {
        Self {
            executor,
            agent_port,
        }
    }

    async fn netsh(&self, args: Vec<String>) -> Result<CommandOutput, FirewallError> {
        exec_cmd(&self.executor, NETSH, &args).await
    }

    fn command_error(args: &[String], output: &CommandOutput) -> FirewallError {
        FirewallError::Command {
            program: NETSH.to_string(),
            args: args.join(" "),
            stderr: output.reason(),
        }
    }

    fn rule_args(verb: &str, range: &ValidRange, port: u16, proto: Protocol) -> Vec<String> {
        let mut args = args_to_strings(&["advfirewall", "firewall", verb, "rule"]);
        args.push(format!("name={}", RULE_CONTAINER));
        args.push("dir=in".to_string());
        if verb == "add" {
            args.push("action=allow".to_string());
        }
        args.push(format!("protocol={}", proto.as_str().to_uppercase()));
        args.push(format!("localport={}", port));
        args.push(format!("remoteip={}", range));
        args
    }

    /// Delete rules matching the filter; "no match" counts as success.
    async fn delete_matching(&self, args: Vec<String>) -> Result<(), FirewallError> {
        let output = self.netsh(args.clone()).await?;
        if output.success || is_no_match(&output) {
            return Ok(());
        }
        Err(Self::command_error(&args, &output))
    }

    /// Administrator check: `net session` only succeeds when elevated.
    async fn check_admin(&self) -> Result<(), FirewallError> {
        let output = exec_cmd(&self.executor, NET, &args_to_strings(&["session"])).await?;
        if !output.success {
            return Err(FirewallError::Permission(
                "You need to be admin to use the Windows Firewall".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_no_match(output: &CommandOutput) -> bool {
    output.stdout.contains(NO_MATCH) || output.stderr.contains(NO_MATCH)
}

/// Parse `netsh advfirewall show allprofiles state` output.
///
/// Returns `(on, off)` profile counts.
fn profile_states(stdout: &str) -> (usize, usize) {
    let mut on = 0;
    let mut off = 0;
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() == 2 && parts[0] == "State" {
            match parts[1] {
                "ON" => on += 1,
                "OFF" => off += 1,
                _ => {}
            }
        }
    }
    (on, off)
}

#[async_trait]
impl FirewallBackend for NetshBackend {
    fn name(&self) -> &'static str {
        "netsh"
    }

    async fn init(&self) -> Result<(), FirewallError> {
        self.check_admin().await?;

        let show = args_to_strings(&["advfirewall", "show", "allprofiles", "state"]);
        let output = self.netsh(show.clone()).await?;
        if !output.success {
            return Err(Self::command_error(&show, &output));
        }
        let (on, off) = profile_states(&output.stdout);
        if on == 0 {
            return Err(FirewallError::Disabled(
                "The Windows Firewall is disabled. Please enable it and try again".to_string(),
            ));
        }
        if off > 0 {
            warn!("{} Windows Firewall profile(s) are OFF", off);
        }

        // Purge rules left by a previous run
        let mut purge = args_to_strings(&["advfirewall", "firewall", "delete", "rule"]);
        purge.push(format!("name={}", RULE_CONTAINER));
        self.delete_matching(purge).await?;

        info!("Windows Firewall rule set {} ready", RULE_CONTAINER);
        Ok(())
    }

    async fn default_deny(&self, port: u16) -> Result<(), FirewallError> {
        // Block rules take precedence over allow rules on Windows, so the
        // inbound default-block policy verified in init is the deny.
        debug!("Port {} relies on the default inbound block policy", port);
        Ok(())
    }

    async fn allow(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        for (p, proto) in rule_targets(port, infra, self.agent_port) {
            // Replace rather than stack duplicates
            self.delete_matching(Self::rule_args("delete", range, p, proto)).await?;

            let args = Self::rule_args("add", range, p, proto);
            let output = self.netsh(args.clone()).await?;
            if !output.success {
                let err = Self::command_error(&args, &output);
                error!("Failed to add rule for range {} on port {}: {}", range, p, err);
                return Err(err);
            }
        }
        info!("Allowed {} on port {}{}", range, port, if infra { " (infra)" } else { "" });
        Ok(())
    }

    async fn revoke(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        for (p, proto) in rule_targets(port, infra, self.agent_port) {
            if let Err(e) = self.delete_matching(Self::rule_args("delete", range, p, proto)).await {
                error!("Failed to remove rule for range {} on port {}: {}", range, p, e);
                return Err(e);
            }
        }
        info!("Revoked {} on port {}{}", range, port, if infra { " (infra)" } else { "" });
        Ok(())
    }
}
