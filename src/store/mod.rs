//! Storage boundary.
//!
//! Every profile and student operation takes a [`Requester`]; implementations
//! must scope reads and guard writes with `owner == requester` inside the same
//! transaction as the data operation.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Identity, NewIdentity, Session};
use crate::profiles::repo_types::{Profile, ProfileChanges};
use crate::students::repo_types::{NewStudent, Student, StudentFields};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Authenticated identity on whose behalf a store call runs.
///
/// Produced by the auth extractor from a verified token bound to a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    user_id: Uuid,
    session_id: Uuid,
}

impl Requester {
    pub(crate) fn new(user_id: Uuid, session_id: Uuid) -> Self {
        Self { user_id, session_id }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// Unique constraints the store can report a conflict on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    IdentityEmail,
    ProfileEmail,
    StudentEmail,
    StudentMatricula,
}

impl UniqueField {
    /// Maps a Postgres constraint name to the field it guards.
    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "users_email_key" => Some(Self::IdentityEmail),
            "profiles_email_key" => Some(Self::ProfileEmail),
            "alunos_email_key" => Some(Self::StudentEmail),
            "alunos_matricula_key" => Some(Self::StudentMatricula),
            _ => None,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            Self::IdentityEmail | Self::ProfileEmail | Self::StudentEmail => "email",
            Self::StudentMatricula => "matricula",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("duplicate value for {}", .0.field())]
    Conflict(UniqueField),

    /// Declared owner differs from the requester.
    #[error("row ownership check failed")]
    OwnerMismatch,

    #[error("check constraint {0} violated")]
    Check(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => return StoreError::NotFound,
            sqlx::Error::Database(db) => {
                let code = db.code();
                match code.as_deref() {
                    // unique_violation
                    Some("23505") => {
                        if let Some(field) = db.constraint().and_then(UniqueField::from_constraint) {
                            return StoreError::Conflict(field);
                        }
                    }
                    // check_violation
                    Some("23514") => {
                        let name = db.constraint().unwrap_or("unknown").to_string();
                        return StoreError::Check(name);
                    }
                    // insufficient_privilege, raised by RLS WITH CHECK
                    Some("42501") => return StoreError::OwnerMismatch,
                    _ => {}
                }
            }
            _ => {}
        }
        StoreError::Database(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Window over an owner's student list. `limit: None` returns every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the identity and its profile atomically.
    async fn create_identity(&self, new: NewIdentity) -> StoreResult<(Identity, Profile)>;
    async fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;
    async fn find_identity(&self, id: Uuid) -> StoreResult<Option<Identity>>;
    /// Deletes the requester's identity, cascading to profile, students and sessions.
    async fn delete_identity(&self, who: &Requester) -> StoreResult<()>;

    async fn create_session(&self, user_id: Uuid, expires_at: OffsetDateTime)
        -> StoreResult<Session>;
    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>>;
    /// Returns false when the session was unknown or already revoked.
    async fn revoke_session(&self, id: Uuid) -> StoreResult<bool>;

    async fn get_profile(&self, who: &Requester) -> StoreResult<Profile>;
    async fn update_profile(&self, who: &Requester, changes: ProfileChanges)
        -> StoreResult<Profile>;

    /// Owned students, newest first.
    async fn list_students(&self, who: &Requester, page: Page) -> StoreResult<Vec<Student>>;
    async fn get_student(&self, who: &Requester, id: Uuid) -> StoreResult<Student>;
    async fn insert_student(&self, who: &Requester, new: NewStudent) -> StoreResult<Student>;
    async fn update_student(
        &self,
        who: &Requester,
        id: Uuid,
        fields: StudentFields,
    ) -> StoreResult<Student>;
    async fn delete_student(&self, who: &Requester, id: Uuid) -> StoreResult<()>;
}
