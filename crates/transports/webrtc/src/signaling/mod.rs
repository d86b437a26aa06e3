//! HTTP signaling
//!
//! Single-round-trip offer/answer exchange: the viewer POSTs an SDP offer
//! plus loose device options, the server answers with the negotiated
//! description and the ordered synthetic track identifiers. CORS is wide
//! open for browser clients, as the transport security lives in DTLS, not
//! here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use stereocast_core::DeviceConfig;

use crate::error::Error;
use crate::session::{SessionAnswer, SessionManager};

/// Signaling offer from a viewer: SDP plus optional device options. Unknown
/// option fields are ignored so older clients keep working.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(default)]
    pub options: DeviceConfig,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub tracks: usize,
    pub device_initialized: bool,
}

/// Build the signaling router over a session manager.
pub fn router(manager: Arc<SessionManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/offer", post(offer))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(manager)
}

async fn offer(
    State(manager): State<Arc<SessionManager>>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<SessionAnswer>, ApiError> {
    if request.sdp_type != "offer" {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("expected an offer, got '{}'", request.sdp_type),
        ));
    }
    debug!(options = ?request.options, "Signaling offer received");

    let answer = manager
        .create_session(request.sdp, request.options)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(answer))
}

async fn healthz(State(manager): State<Arc<SessionManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: manager.session_count().await,
        tracks: manager.registry().track_count().await,
        device_initialized: manager.devices().is_initialized().await,
    })
}

async fn index() -> Html<&'static str> {
    // Asset serving proper is out of scope; this page just points at the
    // signaling endpoint so a bare GET isn't a 404.
    Html(
        "<!doctype html><title>stereocast</title>\
         <h1>stereocast</h1>\
         <p>POST an SDP offer to <code>/offer</code> to start viewing.</p>",
    )
}

/// HTTP error mapping for signaling failures.
struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Signaling(_) => StatusCode::BAD_REQUEST,
            Error::Core(stereocast_core::Error::Config(_)) => StatusCode::BAD_REQUEST,
            // Device initialization failure and everything else is on us.
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.0, "Signaling request failed: {}", self.1);
        (self.0, self.1).into_response()
    }
}
