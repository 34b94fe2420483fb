use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{NewStudent, Student, StudentFields};
use crate::store::Page;

/// Owned students, newest first. A NULL limit returns all rows.
pub async fn list_by_owner(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    page: Page,
) -> sqlx::Result<Vec<Student>> {
    sqlx::query_as::<_, Student>(
        r#"
        SELECT id, name, email, matricula, idade, user_id, created_at, updated_at
          FROM alunos
         WHERE user_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2 OFFSET $3
        "#,
    )
    .bind(owner)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(&mut **tx)
    .await
}

pub async fn find_owned(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    id: Uuid,
) -> sqlx::Result<Option<Student>> {
    sqlx::query_as::<_, Student>(
        r#"
        SELECT id, name, email, matricula, idade, user_id, created_at, updated_at
          FROM alunos
         WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewStudent,
) -> sqlx::Result<Student> {
    sqlx::query_as::<_, Student>(
        r#"
        INSERT INTO alunos (id, name, email, matricula, idade, user_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, email, matricula, idade, user_id, created_at, updated_at
        "#,
    )
    .bind(new.id)
    .bind(&new.fields.name)
    .bind(&new.fields.email)
    .bind(&new.fields.matricula)
    .bind(new.fields.idade)
    .bind(new.user_id)
    .fetch_one(&mut **tx)
    .await
}

/// `updated_at` is maintained by the `alunos_touch_updated_at` trigger.
pub async fn update_owned(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    id: Uuid,
    fields: &StudentFields,
) -> sqlx::Result<Option<Student>> {
    sqlx::query_as::<_, Student>(
        r#"
        UPDATE alunos
           SET name = $3, email = $4, matricula = $5, idade = $6
         WHERE id = $1 AND user_id = $2
        RETURNING id, name, email, matricula, idade, user_id, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(&fields.name)
    .bind(&fields.email)
    .bind(&fields.matricula)
    .bind(fields.idade)
    .fetch_optional(&mut **tx)
    .await
}

/// Returns the number of deleted rows (0 or 1).
pub async fn delete_owned(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    id: Uuid,
) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM alunos WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(owner)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}
