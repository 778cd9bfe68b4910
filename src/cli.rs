//! CLI argument parsing with clap.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{Backend, Config};

/// Shown after a rejected server list.
pub const USAGE_EXAMPLE: &str = "Usage: ppm-agent [OPTIONS] <SERVERS>...\n\
    \n\
    Each server is slug:ip:port[:controlPanelPort], for example:\n\
    \x20   ppm-agent abcdef12:0.0.0.0:30120 abcdff14:10.11.12.13:30121:40120";

#[derive(Parser, Debug)]
#[command(name = "ppm-agent")]
#[command(author, version, about = "Firewall agent: signed remote whitelist control for local servers")]
pub struct Cli {
    /// Managed servers, as slug:ip:port[:controlPanelPort]
    #[arg(value_name = "SERVERS", required = true, num_args = 1..)]
    pub servers: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "/etc/ppm-agent/config.yaml")]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long)]
    pub verbose: bool,

    /// Range authority base URL (overrides config)
    #[arg(long, value_name = "URL")]
    pub authority_url: Option<String>,

    /// Control API port (overrides config)
    #[arg(long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// PEM public key of the authority (overrides config)
    #[arg(long, value_name = "FILE")]
    pub public_key: Option<PathBuf>,

    /// Firewall backend (overrides config)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,
}

impl Cli {
    /// Command-line values win over the config file.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.authority_url {
            config.authority_url = url.clone();
        }
        if let Some(port) = self.port {
            config.agent_port = port;
        }
        if let Some(path) = &self.public_key {
            config.public_key_path = path.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
    }
}
