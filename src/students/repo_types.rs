use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Row of the `alunos` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub matricula: String,
    pub idade: i32,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Validated student fields, shared by insert and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentFields {
    pub name: String,
    pub email: String,
    pub matricula: String,
    pub idade: i32,
}

/// Insert payload. `user_id` is the declared owner and must match the requester.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fields: StudentFields,
}
