use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    chat::{Sender, Turn},
    client::{AskRequest, AskResponse, SubmitResponse, SESSION_HEADER},
    jobs::{LeadJob, LoggingLeadJob},
    lead::Lead,
    responder::Responder,
    store::Store,
};

/// Session used for requests that arrive without an `X-Session-Id` header.
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// How many earlier turns are handed to the responder.
pub const HISTORY_WINDOW: i64 = 20;

pub const LEAD_ACCEPTED_MESSAGE: &str =
    "Your request has been received. The chat will open shortly.";

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorDetail {
    detail: String,
}

#[derive(Debug)]
pub enum ApiError {
    InvalidLead(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidLead(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(SubmitResponse {
                    status: "error".to_string(),
                    message: Some(message),
                }),
            )
                .into_response(),
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorDetail {
                        detail: e.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub responder: Arc<dyn Responder>,
    /// Started in the background for every accepted lead.
    pub lead_job: Arc<dyn LeadJob>,
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct LeadServer {
    state: AppState,
    allowed_origin: String,
}

impl LeadServer {
    pub fn new(store: Store, responder: Arc<dyn Responder>, allowed_origin: impl Into<String>) -> Self {
        Self {
            state: AppState {
                store,
                responder,
                lead_job: Arc::new(LoggingLeadJob),
            },
            allowed_origin: allowed_origin.into(),
        }
    }

    pub fn with_lead_job(mut self, job: Arc<dyn LeadJob>) -> Self {
        self.state.lead_job = job;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/lead/submit", post(lead_submit_handler))
            .route("/chat", post(chat_handler))
            .with_state(Arc::new(self.state.clone()))
            .layer(cors_layer(&self.allowed_origin))
            .layer(TraceLayer::new_for_http())
    }
}

/// CORS for the widget: credentials plus the session header.
///
/// `*` mirrors the caller's origin, since browsers refuse a literal wildcard
/// on credentialed requests.
fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(allowed_origin) {
        Ok(value) if allowed_origin != "*" => AllowOrigin::exact(value),
        Ok(_) => AllowOrigin::mirror_request(),
        Err(_) => {
            warn!("ALLOWED_ORIGIN '{}' is not a valid header value, mirroring", allowed_origin);
            AllowOrigin::mirror_request()
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-session-id")])
        .allow_credentials(true)
        .allow_private_network(true)
}

fn session_id(headers: &HeaderMap) -> String {
    match headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(id) => id.to_string(),
        None => {
            warn!("No session id in request headers, using '{}'", ANONYMOUS_SESSION);
            ANONYMOUS_SESSION.to_string()
        }
    }
}

async fn lead_submit_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(lead): Json<Lead>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let session_id = session_id(&headers);
    info!("Lead submitted for session {}: site={}", session_id, lead.site);

    lead.validate().map_err(ApiError::InvalidLead)?;

    state.store.save_lead(&session_id, &lead).await?;
    // Seed the conversation so the agent's first answer already knows the visitor.
    state
        .store
        .save_turn(&Turn::new(&session_id, Sender::User, lead.summary()))
        .await?;

    // The visitor gets the answer now; the sample build runs on its own.
    let job = state.lead_job.clone();
    tokio::spawn(async move {
        if let Err(e) = job.run(&session_id, &lead).await {
            error!("Lead job failed for session {}: {:#}", session_id, e);
        }
    });

    Ok(Json(SubmitResponse {
        status: "ok".to_string(),
        message: Some(LEAD_ACCEPTED_MESSAGE.to_string()),
    }))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let session_id = session_id(&headers);
    info!("/chat called for session {}", session_id);

    let history = state.store.session_history(&session_id, HISTORY_WINDOW).await?;
    let answer = state.responder.answer(&request.question, &history).await?;

    state
        .store
        .save_turn(&Turn::new(&session_id, Sender::User, request.question))
        .await?;
    state
        .store
        .save_turn(&Turn::new(&session_id, Sender::Agent, answer.clone()))
        .await?;

    Ok(Json(AskResponse { answer }))
}
