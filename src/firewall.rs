//! Firewall orchestration.
//!
//! [`FirewallManager`] owns the server registry and the selected backend.
//! Every rule mutation goes through it and is serialized behind one async
//! mutex, so a flush can never race an insert and two API requests never
//! interleave their rule changes.
//!
//! Lifecycle: `Uninitialized -> Initialized -> WhitelistBootstrapped -> Serving`.
//! Rules are left in place when the process exits.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api_types::{InitialRanges, WhitelistAction};
use crate::enforcer::FirewallBackend;
use crate::error::{BootstrapError, FirewallError};
use crate::fetcher::RangeAuthority;
use crate::server::{ManagedServer, ServerRegistry};
use crate::validation::validate_range;

/// Lifecycle phase of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Uninitialized,
    Initialized,
    WhitelistBootstrapped,
    Serving,
}

struct State {
    registry: ServerRegistry,
    phase: Phase,
}

pub struct FirewallManager {
    backend: Arc<dyn FirewallBackend>,
    state: Mutex<State>,
}

impl FirewallManager {
    pub fn new(registry: ServerRegistry, backend: Arc<dyn FirewallBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(State {
                registry,
                phase: Phase::Uninitialized,
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn has_server(&self, slug: &str) -> bool {
        self.state.lock().await.registry.contains(slug)
    }

    /// Snapshot of one server, including its current whitelist.
    pub async fn server(&self, slug: &str) -> Option<ManagedServer> {
        self.state.lock().await.registry.get(slug).cloned()
    }

    /// Create and flush the agent's rule container.
    ///
    /// Runs once, from `Uninitialized` only. Any failure here must abort
    /// startup.
    pub async fn initialize_firewall(&self) -> Result<(), FirewallError> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Uninitialized {
            return Err(FirewallError::AlreadyInitialized);
        }
        info!("Initializing firewall ({})", self.backend.name());

        if let Err(e) = self.backend.init().await {
            error!("Failed to initialize firewall: {}", e);
            return Err(e);
        }

        state.phase = Phase::Initialized;
        Ok(())
    }

    /// Deny each server's port, then install the ranges the authority
    /// returns for it.
    ///
    /// Infra ranges are taken from the first server only. Any failure aborts
    /// the whole bootstrap; the agent must not serve with a partial rule set.
    pub async fn bootstrap_whitelist(
        &self,
        authority: &dyn RangeAuthority,
    ) -> Result<(), BootstrapError> {
        let servers: Vec<ManagedServer> = {
            let state = self.state.lock().await;
            if state.phase != Phase::Initialized {
                return Err(FirewallError::NotInitialized.into());
            }
            state.registry.iter().cloned().collect()
        };

        info!("Initializing whitelist for {} server(s)", servers.len());
        let mut infra_done = false;

        for server in &servers {
            let slug = server.slug().to_string();

            {
                let _guard = self.state.lock().await;
                if let Err(source) = self.backend.default_deny(server.local_port()).await {
                    error!("Failed to block traffic for server {}: {}", slug, source);
                    return Err(BootstrapError::DefaultDeny { slug, source });
                }
            }

            // Read-only; runs without the mutation lock.
            let ranges = match authority.fetch_ranges(server).await {
                Ok(ranges) => ranges,
                Err(source) => {
                    error!("Failed to fetch IP ranges for server {}: {}", slug, source);
                    return Err(BootstrapError::Fetch { slug, source });
                }
            };

            self.install_initial(server, &ranges, !infra_done).await?;
            infra_done = true;
        }

        self.state.lock().await.phase = Phase::WhitelistBootstrapped;
        info!("Whitelist initialized");
        Ok(())
    }

    async fn install_initial(
        &self,
        server: &ManagedServer,
        ranges: &InitialRanges,
        with_infra: bool,
    ) -> Result<(), BootstrapError> {
        let mut state = self.state.lock().await;
        let port = server.local_port();

        let infra = ranges.infra.iter().filter(|_| with_infra).map(|r| (r, true));
        let proxies = ranges.proxies.iter().map(|r| (r, false));

        for (range, is_infra) in infra.chain(proxies) {
            if let Err(source) = self.mutate(range, port, is_infra, WhitelistAction::Add).await {
                return Err(BootstrapError::Allow {
                    slug: server.slug().to_string(),
                    range: range.clone(),
                    source,
                });
            }
            if let Some(entry) = state.registry.get_mut(server.slug()) {
                entry.record_allowed(range);
            }
        }
        Ok(())
    }

    /// Bootstrap done; the control API is about to accept requests.
    pub async fn mark_serving(&self) -> Result<(), FirewallError> {
        let mut state = self.state.lock().await;
        if state.phase < Phase::WhitelistBootstrapped {
            return Err(FirewallError::NotInitialized);
        }
        state.phase = Phase::Serving;
        Ok(())
    }

    /// Allow `range` on `port` (and the agent port when `infra`).
    ///
    /// Adding a range that is already allowed succeeds without change.
    pub async fn add(&self, range: &str, port: u16, infra: bool) -> Result<(), FirewallError> {
        let state = self.state.lock().await;
        Self::require_initialized(&state)?;
        self.mutate(range, port, infra, WhitelistAction::Add).await
    }

    /// Inverse of [`FirewallManager::add`]; removing an absent range succeeds.
    pub async fn remove(&self, range: &str, port: u16, infra: bool) -> Result<(), FirewallError> {
        let state = self.state.lock().await;
        Self::require_initialized(&state)?;
        self.mutate(range, port, infra, WhitelistAction::Remove).await
    }

    /// Apply `action` to each range on the server's port, in order.
    ///
    /// The whole batch runs under one lock acquisition. The first failing
    /// range stops the batch; ranges before it stay applied.
    pub async fn apply(
        &self,
        slug: &str,
        action: WhitelistAction,
        ranges: &[String],
    ) -> Result<(), FirewallError> {
        let mut state = self.state.lock().await;
        Self::require_initialized(&state)?;

        let port = state
            .registry
            .get(slug)
            .map(|s| s.local_port())
            .ok_or_else(|| FirewallError::UnknownServer(slug.to_string()))?;

        for range in ranges {
            self.mutate(range, port, false, action).await?;
            if let Some(server) = state.registry.get_mut(slug) {
                match action {
                    WhitelistAction::Add => server.record_allowed(range),
                    WhitelistAction::Remove => server.record_revoked(range),
                }
            }
        }
        Ok(())
    }

    fn require_initialized(state: &State) -> Result<(), FirewallError> {
        if state.phase == Phase::Uninitialized {
            return Err(FirewallError::NotInitialized);
        }
        Ok(())
    }

    /// Validate then hand to the backend. Caller holds the state lock.
    async fn mutate(
        &self,
        range: &str,
        port: u16,
        infra: bool,
        action: WhitelistAction,
    ) -> Result<(), FirewallError> {
        let valid = match validate_range(range) {
            Ok(valid) => valid,
            Err(e) => {
                warn!("{}", e);
                return Err(e.into());
            }
        };

        match action {
            WhitelistAction::Add => self.backend.allow(&valid, port, infra).await,
            WhitelistAction::Remove => self.backend.revoke(&valid, port, infra).await,
        }
    }
}
