use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// POST /api/login: verify credentials and issue a bearer token.
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body.map_err(|_| ApiError::InvalidBody)?;

    let identity = req
        .email
        .or(req.username)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("Email and password are required".to_string()))?;
    let password = req
        .password
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("Email and password are required".to_string()))?;

    if !state.credentials.verify(&identity, &password) {
        tracing::warn!(identity = %identity, "authentication failed");
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .tokens
        .issue(&identity, Utc::now())
        .map_err(|e| {
            tracing::error!(error = %e, "token signing failed");
            ApiError::internal("Failed to generate token")
        })?;

    tracing::info!(identity = %identity, "user authenticated");

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
    })))
}
