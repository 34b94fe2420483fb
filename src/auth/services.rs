use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use super::repo_types::{Identity, NewIdentity};
use super::session::SessionEventKind;
use crate::error::{AppError, ValidationError};
use crate::profiles::services::MAX_NAME_LEN;
use crate::state::AppState;
use crate::store::{Requester, StoreError, UniqueField};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn invalid_credentials() -> AppError {
    AppError::unauthorized("Invalid credentials")
}

/// Opens a session for `identity` and issues its token pair.
async fn open_session(state: &AppState, identity: &Identity) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let expires_at = keys.session_expiry(OffsetDateTime::now_utc());
    let session = state
        .store
        .create_session(identity.id, expires_at)
        .await
        .map_err(|e| AppError::internal("Could not start session", e))?;

    let access_token = keys
        .sign_access(identity.id, session.id)
        .map_err(|e| AppError::internal("Could not issue token", e))?;
    let refresh_token = keys
        .sign_refresh(identity.id, session.id)
        .map_err(|e| AppError::internal("Could not issue token", e))?;

    state
        .sessions
        .publish(SessionEventKind::SignedIn, identity.id, session.id);
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser {
            id: identity.id,
            email: identity.email.clone(),
        },
    })
}

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<AuthResponse, AppError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ValidationError::new("email", "Invalid email").into());
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ValidationError::new("password", "Password too short").into());
    }
    let name = req.name.as_deref().map(str::trim).unwrap_or_default();
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::new("name", "Name must be at most 100 characters").into());
    }

    // Ensure email is not taken
    match state.store.find_identity_by_email(&email).await {
        Ok(Some(_)) => {
            warn!(%email, "email already registered");
            return Err(email_taken());
        }
        Ok(None) => {}
        Err(e) => return Err(AppError::internal("Could not register", e)),
    }

    let password_hash =
        hash_password(&req.password).map_err(|e| AppError::internal("Could not register", e))?;
    let metadata = if name.is_empty() {
        json!({})
    } else {
        json!({ "name": name })
    };

    let (identity, profile) = state
        .store
        .create_identity(NewIdentity {
            id: Uuid::new_v4(),
            email,
            password_hash,
            metadata,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(UniqueField::IdentityEmail | UniqueField::ProfileEmail) => {
                email_taken()
            }
            other => AppError::internal("Could not register", other),
        })?;

    info!(user_id = %identity.id, profile_id = %profile.id, "user registered");
    open_session(state, &identity).await
}

fn email_taken() -> AppError {
    AppError::Conflict {
        field: "email",
        message: "Email already registered".into(),
    }
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<AuthResponse, AppError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(ValidationError::new("email", "Invalid email").into());
    }

    let identity = match state.store.find_identity_by_email(&email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(%email, "login unknown email");
            return Err(invalid_credentials());
        }
        Err(e) => return Err(AppError::internal("Could not sign in", e)),
    };

    let ok = verify_password(&req.password, &identity.password_hash)
        .map_err(|e| AppError::internal("Could not sign in", e))?;
    if !ok {
        warn!(%email, user_id = %identity.id, "login invalid password");
        return Err(invalid_credentials());
    }

    info!(user_id = %identity.id, "user logged in");
    open_session(state, &identity).await
}

/// Exchanges a refresh token of a live session for a new pair on the same session.
pub async fn refresh(state: &AppState, req: RefreshRequest) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(&req.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        AppError::unauthorized("Invalid or expired token")
    })?;

    let session = state
        .store
        .find_session(claims.sid)
        .await
        .map_err(|e| AppError::internal("Could not refresh session", e))?
        .filter(|s| s.user_id == claims.sub)
        .ok_or_else(|| AppError::unauthorized("Session not found"))?;
    if !session.is_live_at(OffsetDateTime::now_utc()) {
        return Err(AppError::unauthorized("Session has ended"));
    }

    let identity = state
        .store
        .find_identity(claims.sub)
        .await
        .map_err(|e| AppError::internal("Could not refresh session", e))?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    let access_token = keys
        .sign_access(identity.id, session.id)
        .map_err(|e| AppError::internal("Could not issue token", e))?;
    let refresh_token = keys
        .sign_refresh(identity.id, session.id)
        .map_err(|e| AppError::internal("Could not issue token", e))?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser {
            id: identity.id,
            email: identity.email,
        },
    })
}

pub async fn sign_out(state: &AppState, who: &Requester) -> Result<(), AppError> {
    let revoked = state
        .store
        .revoke_session(who.session_id())
        .await
        .map_err(|e| AppError::internal("Could not sign out", e))?;
    if revoked {
        state
            .sessions
            .publish(SessionEventKind::SignedOut, who.user_id(), who.session_id());
        info!(user_id = %who.user_id(), session_id = %who.session_id(), "user signed out");
    }
    Ok(())
}

pub async fn current_identity(state: &AppState, who: &Requester) -> Result<PublicUser, AppError> {
    match state.store.find_identity(who.user_id()).await {
        Ok(Some(identity)) => Ok(PublicUser {
            id: identity.id,
            email: identity.email,
        }),
        Ok(None) => Err(AppError::unauthorized("User not found")),
        Err(e) => {
            error!(error = %e, user_id = %who.user_id(), "identity lookup failed");
            Err(AppError::Internal("Could not load user".into()))
        }
    }
}

/// Removes the identity; profile, students and sessions go with it.
pub async fn delete_account(state: &AppState, who: &Requester) -> Result<(), AppError> {
    state
        .store
        .delete_identity(who)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound("User not found".into()),
            other => AppError::internal("Could not delete account", other),
        })?;
    state
        .sessions
        .publish(SessionEventKind::SignedOut, who.user_id(), who.session_id());
    info!(user_id = %who.user_id(), "account deleted");
    Ok(())
}
