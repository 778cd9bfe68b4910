//! Control API.
//!
//! | Method        | Path                | Behavior                          |
//! |---------------|---------------------|-----------------------------------|
//! | any           | `/alive`            | liveness probe, no auth           |
//! | POST          | `/whitelist/{slug}` | signed add of ranges              |
//! | DELETE        | `/whitelist/{slug}` | signed removal of ranges          |
//! | other methods | `/whitelist/{slug}` | 405 "Unknown method"              |
//! | any           | anything else       | 404 "Unknown route"               |
//!
//! Every response is an [`Envelope`]. Panics inside a handler become a 500
//! envelope; they never reach the accept loop.

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, PathRejection};
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

use crate::api_types::{ControlRequest, Envelope, WhitelistAction};
use crate::auth::{check_freshness, TrustAnchor};
use crate::error::ApiError;
use crate::firewall::FirewallManager;

/// Header carrying the base64 body signature
pub const SIGNATURE_HEADER: &str = "signature";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<FirewallManager>,
    pub anchor: Arc<TrustAnchor>,
}

/// Build the control API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/alive", any(alive))
        .route(
            "/whitelist/{slug}",
            post(add_ranges)
                .delete(remove_ranges)
                .fallback(unknown_method),
        )
        .fallback(unknown_route)
        .layer(middleware::from_fn(log_request))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Serve until `shutdown` resolves; in-flight requests are allowed to finish.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn log_request(req: Request, next: Next) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("(api) {}: {} {}", remote, req.method(), req.uri().path());
    next.run(req).await
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!("Error in request handler: {}", detail);
    ApiError::Internal.into_response()
}

async fn alive() -> Json<Envelope<()>> {
    Json(Envelope::success("alive !"))
}

async fn unknown_route() -> ApiError {
    ApiError::NotFound
}

async fn unknown_method() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn add_ranges(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let body = body.map_err(body_rejection)?;
    let slug = path_slug(slug);
    handle_whitelist(&state, slug.as_deref(), &headers, &body, WhitelistAction::Add).await
}

async fn remove_ranges(
    State(state): State<AppState>,
    slug: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let body = body.map_err(body_rejection)?;
    let slug = path_slug(slug);
    handle_whitelist(&state, slug.as_deref(), &headers, &body, WhitelistAction::Remove).await
}

/// An undecodable slug matches no server; it fails at the slug check.
fn path_slug(slug: Result<Path<String>, PathRejection>) -> Option<String> {
    match slug {
        Ok(Path(slug)) => Some(slug),
        Err(e) => {
            info!("Rejected slug path parameter: {}", e.body_text());
            None
        }
    }
}

fn body_rejection(rejection: BytesRejection) -> ApiError {
    info!("Rejected request body: {}", rejection.body_text());
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::Validation("Wrong body json format")
    }
}

/// Signature, body shape, freshness, slug, then the rule changes.
async fn handle_whitelist(
    state: &AppState,
    slug: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    action: WhitelistAction,
) -> Result<Json<Envelope<()>>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(ApiError::Authentication("Missing signature header"))?;

    // A header that is not visible ASCII cannot be base64 either
    let authentic = signature
        .to_str()
        .map(|sig| state.anchor.verify_signature(body, sig))
        .unwrap_or(false);
    if !authentic {
        return Err(ApiError::Authentication("Request authenticity check failure"));
    }

    let request: ControlRequest = serde_json::from_slice(body)
        .map_err(|_| ApiError::Validation("Wrong body json format"))?;

    if !check_freshness(request.timestamp, request.ttl) {
        return Err(ApiError::Authentication("Request expired"));
    }

    let slug = match slug {
        Some(slug) if state.manager.has_server(slug).await => slug,
        _ => return Err(ApiError::Validation("Slug mismatch")),
    };

    if let Err(e) = state.manager.apply(slug, action, &request.ranges).await {
        error!("{} for server {}: {}", action.failure_message(), slug, e);
        return Err(ApiError::Operation(action.failure_message()));
    }

    Ok(Json(Envelope::success("Success")))
}
