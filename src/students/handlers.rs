use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{Pagination, StudentPayload, StudentResponse};
use super::services;
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn student_routes() -> Router<AppState> {
    Router::new()
        .route("/students", get(list_students).post(create_student))
        .route(
            "/students/:id",
            get(get_student).put(update_student).delete(delete_student),
        )
}

#[instrument(skip(state, who))]
pub async fn list_students(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<StudentResponse>>, AppError> {
    let rows = services::list(&state, &who, p.into()).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, who))]
pub async fn get_student(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentResponse>, AppError> {
    Ok(Json(services::get(&state, &who, id).await?.into()))
}

/// POST /students
#[instrument(skip(state, who, payload))]
pub async fn create_student(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Json(payload): Json<StudentPayload>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<StudentResponse>), AppError> {
    let student = services::create(&state, &who, payload).await?;
    let location = format!("/api/v1/students/{}", student.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(student.into()),
    ))
}

#[instrument(skip(state, who, payload))]
pub async fn update_student(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StudentPayload>,
) -> Result<Json<StudentResponse>, AppError> {
    Ok(Json(services::update(&state, &who, id, payload).await?.into()))
}

#[instrument(skip(state, who))]
pub async fn delete_student(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    services::delete(&state, &who, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
