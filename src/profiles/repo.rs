use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{Profile, ProfileChanges};

pub async fn find_owned(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> sqlx::Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>(
        r#"
        SELECT id, name, email, created_at, updated_at
          FROM profiles
         WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn update_owned(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    changes: &ProfileChanges,
) -> sqlx::Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles
           SET name = COALESCE($2, name),
               email = COALESCE($3, email)
         WHERE id = $1
        RETURNING id, name, email, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(changes.name.as_deref())
    .bind(changes.email.as_deref())
    .fetch_optional(&mut **tx)
    .await
}
