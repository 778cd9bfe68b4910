//! Managed servers and their registry.
//!
//! Servers are given on the command line as `slug:ip:port[:controlPanelPort]`.
//! Identity (slug, port, interface) is fixed once parsed; only the list of
//! whitelisted ranges changes afterwards.

use std::net::IpAddr;

use crate::error::ValidationError;
use crate::validation::{validate_ip, validate_port, validate_slug};

/// One locally running server fronted by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedServer {
    slug: String,
    local_port: u16,
    interface: IpAddr,
    control_panel_port: Option<u16>,
    whitelisted_ranges: Vec<String>,
}

impl ManagedServer {
    pub fn new(slug: &str, local_port: u16, interface: IpAddr, control_panel_port: Option<u16>) -> Self {
        Self {
            slug: slug.to_string(),
            local_port,
            interface,
            control_panel_port,
            whitelisted_ranges: Vec::new(),
        }
    }

    /// Parse `slug:ip:port[:controlPanelPort]`.
    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(ValidationError::ServerSpec(spec.to_string()));
        }

        validate_slug(parts[0])?;
        let interface = validate_ip(parts[1])?;
        let port = validate_port(parts[2])?;
        let control_panel_port = match parts.get(3) {
            Some(p) => Some(validate_port(p)?),
            None => None,
        };

        Ok(Self::new(parts[0], port, interface, control_panel_port))
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Interface the server is bound to; bootstrap fetches egress from it.
    pub fn interface(&self) -> IpAddr {
        self.interface
    }

    pub fn control_panel_port(&self) -> Option<u16> {
        self.control_panel_port
    }

    /// Ranges currently whitelisted on this server's port, in insertion order.
    pub fn whitelisted_ranges(&self) -> &[String] {
        &self.whitelisted_ranges
    }

    pub(crate) fn record_allowed(&mut self, range: &str) {
        if !self.whitelisted_ranges.iter().any(|r| r == range) {
            self.whitelisted_ranges.push(range.to_string());
        }
    }

    pub(crate) fn record_revoked(&mut self, range: &str) {
        self.whitelisted_ranges.retain(|r| r != range);
    }
}

/// Slug-keyed set of managed servers, iterated in command-line order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRegistry {
    servers: Vec<ManagedServer>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from command-line specs.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, ValidationError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.insert(ManagedServer::parse(spec.as_ref())?)?;
        }
        if registry.is_empty() {
            return Err(ValidationError::NoServers);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, server: ManagedServer) -> Result<(), ValidationError> {
        if self.contains(server.slug()) {
            return Err(ValidationError::DuplicateSlug(server.slug().to_string()));
        }
        self.servers.push(server);
        Ok(())
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }

    pub fn get(&self, slug: &str) -> Option<&ManagedServer> {
        self.servers.iter().find(|s| s.slug == slug)
    }

    pub(crate) fn get_mut(&mut self, slug: &str) -> Option<&mut ManagedServer> {
        self.servers.iter_mut().find(|s| s.slug == slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedServer> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
