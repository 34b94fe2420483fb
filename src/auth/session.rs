//! Session lifecycle notifications.
//!
//! Sign-in, sign-out and expiry are published on a broadcast channel. The
//! `/auth/events` stream forwards them to clients, which redirect to login
//! when their own session ends.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    SignedIn,
    SignedOut,
    Expired,
}

impl SessionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::Expired => "expired",
        }
    }

    /// Whether a client holding this session must go back to the login screen.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::SignedOut | Self::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Clone)]
pub struct SessionHub {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, kind: SessionEventKind, user_id: Uuid, session_id: Uuid) {
        let event = SessionEvent {
            kind,
            user_id,
            session_id,
        };
        // No subscribers is not an error.
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!(%user_id, %session_id, kind = kind.as_str(), receivers, "session event");
    }
}
