//! Integration tests for ppm-agent.
//!
//! Binary tests cover argument handling and fail-closed startup without
//! touching the host firewall. The end-to-end test wires the library
//! pieces together with an in-process backend, authority and API.

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnet::IpNet;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use sha2::Sha512;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ppm_agent::api::{self, AppState, SIGNATURE_HEADER};
use ppm_agent::auth::TrustAnchor;
use ppm_agent::enforcer::{rule_targets, FirewallBackend, Protocol};
use ppm_agent::error::FirewallError;
use ppm_agent::fetcher::HttpRangeAuthority;
use ppm_agent::firewall::{FirewallManager, Phase};
use ppm_agent::server::ServerRegistry;
use ppm_agent::validation::ValidRange;

/// Run the agent binary and return its output
fn run_agent(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ppm-agent"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute ppm-agent")
}

fn write_config(dir: &Path, extra: &str) -> String {
    let config = format!(
        "log_file: {log}\nlock_file: {lock}\npublic_key_path: {key}\n{extra}",
        log = dir.join("ppm-agent.log").display(),
        lock = dir.join("ppm-agent.lock").display(),
        key = dir.join("missing.pem").display(),
        extra = extra,
    );
    let path = dir.join("config.yaml");
    std::fs::write(&path, config).unwrap();
    path.display().to_string()
}

#[test]
fn test_help_command() {
    let output = run_agent(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SERVERS"));
    assert!(stdout.contains("--authority-url"));
}

#[test]
fn test_version_command() {
    let output = run_agent(&["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ppm-agent"));
}

#[test]
fn test_no_servers_exits_1() {
    let output = run_agent(&[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SERVERS"));
}

#[test]
fn test_bad_server_spec_exits_1_with_usage() {
    for spec in [
        "abcdef12:10.0.0.1",
        "ABCDEF12:10.0.0.1:30120",
        "abcdef12:10.0.0.300:30120",
        "abcdef12:10.0.0.1:0",
    ] {
        let output = run_agent(&[spec]);
        assert_eq!(output.status.code(), Some(1), "{}", spec);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("slug:ip:port"), "{}", stderr);
    }
}

#[test]
fn test_duplicate_slug_exits_1() {
    let output = run_agent(&["abcdef12:0.0.0.0:30120", "abcdef12:0.0.0.0:30121"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Duplicated server slug"));
}

#[test]
fn test_insecure_authority_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "authority_url: http://authority.example\n");
    let output = run_agent(&["-c", &config, "abcdef12:0.0.0.0:30120"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("HTTPS"));
}

#[test]
fn test_missing_public_key_fails_before_firewall() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let output = run_agent(&["-c", &config, "abcdef12:0.0.0.0:30120"]);
    assert_eq!(output.status.code(), Some(1));

    let log = std::fs::read_to_string(dir.path().join("ppm-agent.log")).unwrap();
    assert!(log.contains("=== ppm-agent starting ==="));
    assert!(log.contains("Failed to read public key"));
    assert!(!log.contains("Initializing firewall"));
}

/// Packet filter kept in memory
#[derive(Default)]
struct RecordingBackend {
    denied: Mutex<HashSet<u16>>,
    accepts: Mutex<HashSet<(IpNet, u16, Protocol)>>,
}

impl RecordingBackend {
    fn reachable(&self, src: &str, port: u16) -> bool {
        let src: IpAddr = src.parse().unwrap();
        let accepted = self
            .accepts
            .lock()
            .unwrap()
            .iter()
            .any(|(net, p, proto)| *p == port && *proto == Protocol::Tcp && net.contains(&src));
        accepted || !self.denied.lock().unwrap().contains(&port)
    }
}

#[async_trait]
impl FirewallBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn init(&self) -> Result<(), FirewallError> {
        Ok(())
    }

    async fn default_deny(&self, port: u16) -> Result<(), FirewallError> {
        self.denied.lock().unwrap().insert(port);
        Ok(())
    }

    async fn allow(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        let mut accepts = self.accepts.lock().unwrap();
        for (p, proto) in rule_targets(port, infra, 6950) {
            accepts.insert((range.net(), p, proto));
        }
        Ok(())
    }

    async fn revoke(&self, range: &ValidRange, port: u16, infra: bool) -> Result<(), FirewallError> {
        let mut accepts = self.accepts.lock().unwrap();
        for (p, proto) in rule_targets(port, infra, 6950) {
            accepts.remove(&(range.net(), p, proto));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_bootstrap_then_signed_whitelist_end_to_end() {
    // Authority
    let authority_app = Router::new().route(
        "/ranges/{slug}",
        get(|| async {
            r#"{"success":true,"data":{"infra":["10.0.0.0/24"],"proxies":["203.0.113.0/24"]}}"#
        }),
    );
    let authority_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority_addr = authority_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(authority_listener, authority_app).await.unwrap();
    });

    // Agent
    let backend = Arc::new(RecordingBackend::default());
    let registry = ServerRegistry::from_specs(&["abcdef12:127.0.0.1:30120"]).unwrap();
    let manager = Arc::new(FirewallManager::new(registry, backend.clone()));
    manager.initialize_firewall().await.unwrap();
    let authority = HttpRangeAuthority::new(
        &format!("http://{}", authority_addr),
        Duration::from_secs(5),
    );
    manager.bootstrap_whitelist(&authority).await.unwrap();
    manager.mark_serving().await.unwrap();
    assert_eq!(manager.phase().await, Phase::Serving);

    assert!(backend.reachable("10.0.0.9", 6950));
    assert!(backend.reachable("10.0.0.9", 30120));
    assert!(backend.reachable("203.0.113.9", 30120));
    assert!(!backend.reachable("198.51.100.9", 30120));

    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let anchor = TrustAnchor::from_key(private_key.to_public_key());
    let app = api::router(AppState {
        manager: manager.clone(),
        anchor: Arc::new(anchor),
    });
    let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_addr = api_listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(api::serve(api_listener, app, async move {
        let _ = stop_rx.await;
    }));

    // Signed whitelist request over a real socket
    let body = serde_json::to_vec(&json!({
        "ranges": ["198.51.100.0/24"],
        "timestamp": chrono::Utc::now().timestamp(),
        "seed": "e2e",
        "ttl": 30,
    }))
    .unwrap();
    let signing_key = BlindedSigningKey::<Sha512>::new(private_key);
    let signature = STANDARD.encode(signing_key.sign_with_rng(&mut rand::thread_rng(), &body).to_bytes());

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/whitelist/abcdef12", api_addr))
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope, json!({"success": true, "message": "Success"}));
    assert!(backend.reachable("198.51.100.9", 30120));

    let alive: Value = client
        .get(format!("http://{}/alive", api_addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alive["message"], "alive !");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
