use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sitewall_reconcile::{SiteAccessError, SiteAccessReconciler};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<SiteAccessReconciler>,
    /// `host:port` of the managed appliance, reported by `/status`
    pub appliance: String,
}

#[derive(Debug, Deserialize)]
pub struct SiteRequest {
    pub site: Option<String>,
    pub action: Option<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub appliance: String,
}

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(error) => (StatusCode::BAD_REQUEST, error),
            ApiError::Internal(error) => (StatusCode::INTERNAL_SERVER_ERROR, error),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<SiteAccessError> for ApiError {
    fn from(err: SiteAccessError) -> Self {
        match err {
            SiteAccessError::Validation(e) => {
                warn!(error = %e, "Rejected site request");
                ApiError::BadRequest(e.to_string())
            }
            SiteAccessError::Reconciliation(e) => {
                error!(
                    site = %e.site,
                    operation = %e.operation,
                    error = %e.source,
                    "Reconciliation failed"
                );
                ApiError::Internal(e.to_string())
            }
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/sites", post(sites_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn sites_handler(
    State(state): State<AppState>,
    payload: Result<Json<SiteRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let site = request.site.unwrap_or_default();
    let action = request.action.unwrap_or_default();

    let result = state.reconciler.handle(&site, &action).await?;
    let message = result.message();
    info!(site = %result.site, action = %result.action, "{}", message);

    Ok(Json(MessageResponse { message }))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        appliance: state.appliance.clone(),
    })
}
