use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::{debug, instrument, warn};

use super::{
    dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
    extractors::AuthUser,
    repo_types::Session,
    services,
    session::{SessionEvent, SessionEventKind},
};
use crate::{error::AppError, state::AppState};

const EVENT_BUFFER: usize = 16;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/events", get(session_events))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).delete(delete_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let res = services::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(services::login(&state, payload).await?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(services::refresh(&state, payload).await?))
}

#[instrument(skip(state, who))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
) -> Result<StatusCode, AppError> {
    services::sign_out(&state, &who).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, who))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::current_identity(&state, &who).await?))
}

#[instrument(skip(state, who))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
) -> Result<StatusCode, AppError> {
    services::delete_account(&state, &who).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/events: server-sent session events for the caller's identity.
///
/// The stream closes once the caller's own session is signed out or expires.
#[instrument(skip(state, who))]
pub async fn session_events(
    State(state): State<AppState>,
    AuthUser(who): AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let session = state
        .store
        .find_session(who.session_id())
        .await
        .map_err(|e| AppError::internal("Could not load session", e))?
        .ok_or_else(|| AppError::unauthorized("Session not found"))?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(forward_session_events(state.sessions.subscribe(), session, tx));

    let stream = ReceiverStream::new(rx)
        .map(|ev: SessionEvent| Event::default().event(ev.kind.as_str()).json_data(&ev));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Forwards the owner's events to one subscriber and emits `expired` when the
/// session runs out, even if no request ever observes the expiry.
async fn forward_session_events(
    mut events: broadcast::Receiver<SessionEvent>,
    session: Session,
    tx: mpsc::Sender<SessionEvent>,
) {
    let (user_id, session_id) = (session.user_id, session.id);
    let remaining: std::time::Duration = (session.expires_at - OffsetDateTime::now_utc())
        .try_into()
        .unwrap_or_default();
    let expiry = tokio::time::sleep(remaining);
    tokio::pin!(expiry);

    loop {
        let ev = tokio::select! {
            _ = tx.closed() => break,
            _ = &mut expiry => SessionEvent {
                kind: SessionEventKind::Expired,
                user_id,
                session_id,
            },
            msg = events.recv() => match msg {
                Ok(ev) if ev.user_id == user_id => ev,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, %user_id, "session event stream lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let ends_own = ev.kind.ends_session() && ev.session_id == session_id;
        if tx.send(ev).await.is_err() {
            break;
        }
        if ends_own {
            debug!(%user_id, %session_id, "subscriber session ended");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{body::Body, extract::FromRef, http::Request};
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::app::build_app;
    use crate::auth::jwt::JwtKeys;
    use crate::auth::repo_types::NewIdentity;

    async fn short_session(state: &AppState, ttl: time::Duration) -> (Session, String) {
        let (identity, _) = state
            .store
            .create_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: "prof@x.com".into(),
                password_hash: "hash".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        let session = state
            .store
            .create_session(identity.id, OffsetDateTime::now_utc() + ttl)
            .await
            .unwrap();
        let token = JwtKeys::from_ref(state)
            .sign_access(identity.id, session.id)
            .unwrap();
        (session, token)
    }

    #[tokio::test]
    async fn idle_subscriber_is_told_when_session_expires() {
        let state = AppState::fake();
        let (_, token) = short_session(&state, time::Duration::seconds(1)).await;

        let res = build_app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/events")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        // The body completes because the stream closes after `expired`.
        let body = tokio::time::timeout(
            Duration::from_secs(4),
            axum::body::to_bytes(res.into_body(), usize::MAX),
        )
        .await
        .expect("stream should close after expiry")
        .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: expired"), "got: {text}");
    }

    #[tokio::test]
    async fn forwarding_stops_after_own_sign_out() {
        let state = AppState::fake();
        let (session, _) = short_session(&state, time::Duration::hours(1)).await;
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(forward_session_events(
            state.sessions.subscribe(),
            session.clone(),
            tx,
        ));

        let other_session = Uuid::new_v4();
        state.sessions.publish(SessionEventKind::SignedIn, Uuid::new_v4(), other_session);
        state.sessions.publish(SessionEventKind::SignedOut, session.user_id, other_session);
        state.sessions.publish(SessionEventKind::SignedOut, session.user_id, session.id);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session_id, other_session);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.session_id, session.id);
        assert_eq!(second.kind, SessionEventKind::SignedOut);
        assert!(rx.recv().await.is_none());
        task.await.unwrap();
    }
}
