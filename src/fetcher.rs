//! HTTP client for the range authority.
//!
//! At startup the agent asks `GET {authority}/ranges/{slug}` which ranges
//! may already reach each server. The request leaves from the server's own
//! interface so multi-homed hosts use the right egress path.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api_types::{Envelope, InitialRanges};
use crate::error::FetchError;
use crate::server::ManagedServer;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 2000;

/// Maximum size of a ranges response (1 MiB)
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Source of the initial whitelist of a server.
#[async_trait]
pub trait RangeAuthority: Send + Sync {
    async fn fetch_ranges(&self, server: &ManagedServer) -> Result<InitialRanges, FetchError>;
}

/// [`RangeAuthority`] backed by the remote HTTPS authority.
#[derive(Debug, Clone)]
pub struct HttpRangeAuthority {
    base_url: String,
    timeout: Duration,
    retry_delay: Duration,
}

impl HttpRangeAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Base delay between attempts; doubles after each failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn ranges_url(&self, slug: &str) -> String {
        format!("{}/ranges/{}", self.base_url, slug)
    }

    /// One client per fetch, bound to `interface` unless it is the wildcard.
    fn client_for(&self, interface: IpAddr) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(format!("ppm-agent/{}", env!("CARGO_PKG_VERSION")));
        if !interface.is_unspecified() {
            builder = builder.local_address(interface);
        }
        builder.build().map_err(FetchError::Client)
    }

    async fn fetch_with_retry(&self, client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_delay * (1 << (attempt - 1));
                debug!("Retry {} after {:?} for {}", attempt, delay, url);
                tokio::time::sleep(delay).await;
            }

            match fetch_once(client, url).await {
                Ok(body) => return Ok(body),
                Err(e) if is_retryable(&e) => {
                    warn!("Fetch attempt {} of {} failed: {}", attempt + 1, MAX_RETRIES, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Malformed("no attempt made".to_string())))
    }
}

#[async_trait]
impl RangeAuthority for HttpRangeAuthority {
    async fn fetch_ranges(&self, server: &ManagedServer) -> Result<InitialRanges, FetchError> {
        let url = self.ranges_url(server.slug());
        info!("Fetching initial ranges for {} from {}", server.slug(), url);

        let client = self.client_for(server.interface())?;
        let body = self.fetch_with_retry(&client, &url).await?;
        let ranges = parse_ranges_response(&body)?;

        info!(
            "Server {}: {} infra range(s), {} proxy range(s)",
            server.slug(),
            ranges.infra.len(),
            ranges.proxies.len()
        );
        Ok(ranges)
    }
}

async fn fetch_once(client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let transport = |source| FetchError::Transport {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(transport)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    if let Some(content_length) = response.content_length() {
        if content_length as usize > MAX_RESPONSE_SIZE {
            return Err(FetchError::TooLarge(content_length as usize));
        }
    }

    let body = response.bytes().await.map_err(transport)?;
    if body.len() > MAX_RESPONSE_SIZE {
        return Err(FetchError::TooLarge(body.len()));
    }
    Ok(body.to_vec())
}

/// Transport errors and 5xx are worth another attempt; 4xx and bad bodies are not.
fn is_retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Transport { .. } => true,
        FetchError::Status { status, .. } => StatusCode::from_u16(*status)
            .map(|s| s.is_server_error())
            .unwrap_or(false),
        _ => false,
    }
}

/// Decode the authority envelope; both lists must be present.
pub fn parse_ranges_response(body: &[u8]) -> Result<InitialRanges, FetchError> {
    let envelope: Envelope<InitialRanges> =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if !envelope.success {
        return Err(FetchError::Malformed(format!(
            "authority reported failure: {}",
            envelope.error.as_deref().unwrap_or("no reason given")
        )));
    }

    envelope
        .data
        .ok_or_else(|| FetchError::Malformed("missing data".to_string()))
}
