use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::Student;
use crate::store::Page;

/// Create/update body. Fields default to empty so missing values are
/// reported by validation rather than by the JSON extractor.
#[derive(Debug, Default, Deserialize)]
pub struct StudentPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub matricula: String,
    #[serde(default)]
    pub idade: Option<serde_json::Value>,
    /// Declared owner; when present it must be the caller.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub matricula: String,
    pub idade: i32,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Student> for StudentResponse {
    fn from(s: Student) -> Self {
        Self {
            id: s.id,
            name: s.name,
            email: s.email,
            matricula: s.matricula,
            idade: s.idade,
            user_id: s.user_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
}

impl From<Pagination> for Page {
    fn from(p: Pagination) -> Self {
        Page {
            limit: p.limit.map(|l| l.max(0)),
            offset: p.offset.max(0),
        }
    }
}
