use axum::{extract::State, routing::get, Json, Router};
use tracing::instrument;

use super::dto::{ProfileResponse, UpdateProfileRequest};
use super::services;
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(get_profile).patch(update_profile))
}

#[instrument(skip(state, who))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = services::get_profile(&state, &who).await?;
    Ok(Json(profile.into()))
}

#[instrument(skip(state, who, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = services::update_profile(&state, &who, payload).await?;
    Ok(Json(profile.into()))
}
