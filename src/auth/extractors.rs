use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use time::OffsetDateTime;
use tracing::{error, warn};

use super::jwt::JwtKeys;
use super::session::SessionEventKind;
use crate::{error::AppError, state::AppState, store::Requester};

/// Validates the bearer access token and its session, yielding the requester.
///
/// Rejections happen before any profile or student data is touched.
pub struct AuthUser(pub Requester);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthorized("Invalid Authorization header"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::unauthorized("Invalid or expired token")
        })?;

        let session = match state.store.find_session(claims.sid).await {
            Ok(Some(s)) if s.user_id == claims.sub => s,
            Ok(_) => return Err(AppError::unauthorized("Session not found")),
            Err(e) => {
                error!(error = %e, session_id = %claims.sid, "session lookup failed");
                return Err(AppError::Internal("Could not verify session".into()));
            }
        };

        if session.revoked_at.is_some() {
            return Err(AppError::unauthorized("Session has ended"));
        }
        if !session.is_live_at(OffsetDateTime::now_utc()) {
            state
                .sessions
                .publish(SessionEventKind::Expired, session.user_id, session.id);
            return Err(AppError::unauthorized("Session expired"));
        }

        Ok(AuthUser(Requester::new(claims.sub, claims.sid)))
    }
}
