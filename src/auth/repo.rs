use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Identity, NewIdentity, Session};

impl Identity {
    /// Find an identity by (normalized) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> sqlx::Result<Option<Identity>> {
        sqlx::query_as::<_, Identity>(
            r#"
            SELECT id, email, password_hash, metadata, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> sqlx::Result<Option<Identity>> {
        sqlx::query_as::<_, Identity>(
            r#"
            SELECT id, email, password_hash, metadata, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Insert the identity; the `users_provision_profile` trigger adds the profile.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewIdentity,
    ) -> sqlx::Result<Identity> {
        sqlx::query_as::<_, Identity>(
            r#"
            INSERT INTO users (id, email, password_hash, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, metadata, created_at
            "#,
        )
        .bind(new.id)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.metadata)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> sqlx::Result<u64> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected())
    }
}

impl Session {
    /// Drops the user's sessions whose lifetime has passed, revoked or not.
    pub async fn prune_expired(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> sqlx::Result<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at <= now()")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> sqlx::Result<Session> {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, created_at, expires_at, revoked_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn find(db: &PgPool, id: Uuid) -> sqlx::Result<Option<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, created_at, expires_at, revoked_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn revoke(db: &PgPool, id: Uuid) -> sqlx::Result<bool> {
        let res = sqlx::query(
            "UPDATE sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
