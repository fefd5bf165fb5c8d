//! HTTP handlers for the eras API.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AnalysisSettings;
use crate::eras::{Era, EraPipeline, SegmentationPolicy};
use crate::error::AppError;
use crate::narrate::{rename_eras, write_biography, Narrator};
use crate::retry::RetryPolicy;
use crate::spotify::{Credentials, SpotifyClient, SpotifyLibrary};

/// Header carrying the user's refresh token on analysis requests, and a rotated
/// one on the response.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";
/// Response header set when the access token was renewed during a request.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub spotify: SpotifyClient,
    pub narrator: Arc<dyn Narrator>,
    pub analysis: AnalysisSettings,
}

/// Query parameters for the eras endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ErasQuery {
    /// `window`, `quarter` or `clustered`; defaults to the configured policy.
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BiographyRequest {
    pub eras: Vec<Era>,
}

#[derive(Debug, Serialize)]
pub struct BiographyResponse {
    pub biography: String,
}

/// GET /health - Health check.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/v1/eras - Segment the caller's saved tracks into eras.
pub async fn eras(
    State(state): State<AppState>,
    Query(params): Query<ErasQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let credentials = credentials_from(&headers)?;
    let policy = match params.policy.as_deref() {
        Some(raw) => SegmentationPolicy::parse(raw, state.analysis.era_count)
            .ok_or_else(|| AppError::BadRequest(format!("unknown policy '{}'", raw)))?,
        None => state.analysis.policy,
    };

    if !policy.supports(state.analysis.feature_kind) {
        return Err(AppError::BadRequest(format!(
            "{:?} segmentation needs audio features",
            policy
        )));
    }

    let retry = RetryPolicy::with_max_attempts(state.analysis.retry_max_attempts);
    let library = SpotifyLibrary::new(state.spotify.clone(), credentials.clone(), state.analysis.feature_kind)
        .with_retry(retry.clone());

    let outcome = EraPipeline::new(&library, &library, policy)
        .with_retry(retry)
        .run()
        .await;
    // renewed tokens go back even when the run failed after refreshing
    let renewed = renewed_credentials(&credentials, &library.credentials().await)?;

    let mut response = match outcome {
        Ok(mut eras) => {
            if policy == SegmentationPolicy::Clustered && !eras.is_empty() {
                if let Err(e) = rename_eras(state.narrator.as_ref(), &mut eras).await {
                    warn!(error = %e, "era naming failed, keeping placeholder names");
                }
            }
            Json(eras).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    };
    response.headers_mut().extend(renewed);
    Ok(response)
}

/// POST /api/v1/biography - Narrate previously computed eras.
pub async fn biography(
    State(state): State<AppState>,
    Json(body): Json<BiographyRequest>,
) -> Result<Json<BiographyResponse>, AppError> {
    if body.eras.is_empty() {
        return Err(AppError::BadRequest("'eras' must not be empty".into()));
    }

    let biography = write_biography(state.narrator.as_ref(), &body.eras).await?;
    Ok(Json(BiographyResponse { biography }))
}

/// Reads the bearer access token and optional refresh token.
fn credentials_from(headers: &HeaderMap) -> Result<Credentials, AppError> {
    let access_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("bearer access token is required".into()))?;

    let refresh_token = headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(Credentials {
        access_token: access_token.to_string(),
        refresh_token,
    })
}

/// Response headers for tokens that changed since the request came in.
fn renewed_credentials(sent: &Credentials, current: &Credentials) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    if current.access_token != sent.access_token {
        headers.insert(HeaderName::from_static(ACCESS_TOKEN_HEADER), token_value(&current.access_token)?);
    }
    if let Some(rotated) = current.refresh_token.as_deref() {
        if sent.refresh_token.as_deref() != Some(rotated) {
            headers.insert(HeaderName::from_static(REFRESH_TOKEN_HEADER), token_value(rotated)?);
        }
    }
    Ok(headers)
}

fn token_value(token: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(token)
        .map_err(|e| AppError::Internal(format!("refreshed token unusable as header: {}", e)))
}

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/eras", get(eras))
        .route("/api/v1/biography", post(biography))
}
