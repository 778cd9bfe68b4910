//! ppm-agent - Host firewall agent
//!
//! Closes every managed server port, opens it to the ranges the authority
//! hands out, then serves the signed control API.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use ppm_agent::api::{self, AppState};
use ppm_agent::auth::TrustAnchor;
use ppm_agent::cli::{Cli, USAGE_EXAMPLE};
use ppm_agent::cmd_abstraction::RealCommandExecutor;
use ppm_agent::config::Config;
use ppm_agent::enforcer::create_backend;
use ppm_agent::fetcher::HttpRangeAuthority;
use ppm_agent::firewall::FirewallManager;
use ppm_agent::lock::LockGuard;
use ppm_agent::logging;
use ppm_agent::server::ServerRegistry;
use ppm_agent::signal::shutdown_signal;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let registry = match ServerRegistry::from_specs(&cli.servers) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE_EXAMPLE);
            return ExitCode::from(1);
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let level = logging::level_for(cli.verbose, cli.quiet);
    if let Err(e) = logging::init(level, config.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }

    match run(config, registry).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(config: Config, registry: ServerRegistry) -> Result<()> {
    info!("=== ppm-agent starting ===");
    info!(
        "Authority {}, control port {}, {} server(s)",
        config.authority_base(),
        config.agent_port,
        registry.len()
    );
    for server in registry.iter() {
        info!(
            "Server {} on {}:{}",
            server.slug(),
            server.interface(),
            server.local_port()
        );
    }

    let _lock = LockGuard::acquire(&config.lock_file)?;

    let anchor = TrustAnchor::load(&config.public_key_path)?;
    info!("Loaded authority public key from {:?}", config.public_key_path);

    let backend = create_backend(
        config.backend,
        Arc::new(RealCommandExecutor::new()),
        config.agent_port,
    )?;
    let manager = Arc::new(FirewallManager::new(registry, Arc::from(backend)));

    manager
        .initialize_firewall()
        .await
        .context("Failed to initialize firewall. Exiting")?;

    let authority = HttpRangeAuthority::new(
        config.authority_base(),
        Duration::from_secs(config.fetch_timeout_secs),
    );
    manager
        .bootstrap_whitelist(&authority)
        .await
        .context("Failed to initialize whitelist. Exiting")?;

    let addr = SocketAddr::new(config.listen_address, config.agent_port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", addr))?;
    manager.mark_serving().await?;
    info!("Control API listening on {}", addr);

    let app = api::router(AppState {
        manager,
        anchor: Arc::new(anchor),
    });
    api::serve(listener, app, shutdown_signal())
        .await
        .context("Control API server error")?;

    info!("ppm-agent stopped, firewall rules left in place");
    Ok(())
}
