use tracing::info;
use uuid::Uuid;

use super::dto::StudentPayload;
use super::repo_types::{NewStudent, Student};
use super::validation::validate_student;
use crate::error::{AppError, ValidationError};
use crate::state::AppState;
use crate::store::{Page, Requester, StoreError, UniqueField};

const EMAIL_TAKEN: &str = "A student with this email already exists";
const MATRICULA_TAKEN: &str = "A student with this registration number already exists";
const OWNER_ONLY: &str = "Students can only be managed by their owner";

/// Turns a store failure on a student write into the message shown to the user.
fn write_error(e: StoreError, failure: &'static str) -> AppError {
    match e {
        StoreError::Conflict(UniqueField::StudentEmail) => AppError::Conflict {
            field: "email",
            message: EMAIL_TAKEN.into(),
        },
        StoreError::Conflict(UniqueField::StudentMatricula) => AppError::Conflict {
            field: "matricula",
            message: MATRICULA_TAKEN.into(),
        },
        StoreError::NotFound => AppError::NotFound("Student not found".into()),
        StoreError::OwnerMismatch => AppError::Forbidden(OWNER_ONLY.into()),
        StoreError::Check(ref name) if name == "alunos_idade_check" => {
            ValidationError::new("idade", "Age must be between 1 and 150").into()
        }
        other => AppError::internal(failure, other),
    }
}

pub async fn list(state: &AppState, who: &Requester, page: Page) -> Result<Vec<Student>, AppError> {
    state
        .store
        .list_students(who, page)
        .await
        .map_err(|e| AppError::internal("Could not load students", e))
}

pub async fn get(state: &AppState, who: &Requester, id: Uuid) -> Result<Student, AppError> {
    state
        .store
        .get_student(who, id)
        .await
        .map_err(|e| write_error(e, "Could not load student"))
}

pub async fn create(
    state: &AppState,
    who: &Requester,
    payload: StudentPayload,
) -> Result<Student, AppError> {
    let fields = validate_student(&payload)?;
    let new = NewStudent {
        id: Uuid::new_v4(),
        user_id: payload.user_id.unwrap_or(who.user_id()),
        fields,
    };
    let student = state
        .store
        .insert_student(who, new)
        .await
        .map_err(|e| write_error(e, "Could not create student"))?;
    info!(user_id = %who.user_id(), student_id = %student.id, "student created");
    Ok(student)
}

pub async fn update(
    state: &AppState,
    who: &Requester,
    id: Uuid,
    payload: StudentPayload,
) -> Result<Student, AppError> {
    let fields = validate_student(&payload)?;
    if payload.user_id.is_some_and(|owner| owner != who.user_id()) {
        return Err(AppError::Forbidden(OWNER_ONLY.into()));
    }
    let student = state
        .store
        .update_student(who, id, fields)
        .await
        .map_err(|e| write_error(e, "Could not update student"))?;
    info!(user_id = %who.user_id(), student_id = %id, "student updated");
    Ok(student)
}

pub async fn delete(state: &AppState, who: &Requester, id: Uuid) -> Result<(), AppError> {
    state
        .store
        .delete_student(who, id)
        .await
        .map_err(|e| write_error(e, "Could not delete student"))?;
    info!(user_id = %who.user_id(), student_id = %id, "student deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflicts_name_the_colliding_field() {
        let e = write_error(StoreError::Conflict(UniqueField::StudentEmail), "x");
        assert!(matches!(e, AppError::Conflict { field: "email", .. }));
        assert_eq!(e.to_string(), EMAIL_TAKEN);

        let e = write_error(StoreError::Conflict(UniqueField::StudentMatricula), "x");
        assert!(matches!(e, AppError::Conflict { field: "matricula", .. }));
    }

    #[test]
    fn unclassified_errors_get_the_generic_message() {
        let e = write_error(StoreError::Check("something_else".into()), "Could not create student");
        assert!(matches!(e, AppError::Internal(_)));
        assert_eq!(e.to_string(), "Could not create student");
    }

    async fn requester(state: &AppState, email: &str) -> Requester {
        use crate::auth::repo_types::NewIdentity;
        let (identity, _) = state
            .store
            .create_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: email.into(),
                password_hash: "hash".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        Requester::new(identity.id, Uuid::new_v4())
    }

    fn ana() -> StudentPayload {
        StudentPayload {
            name: "Ana Silva".into(),
            email: "ana@x.com".into(),
            matricula: "M001".into(),
            idade: Some(json!(20)),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn create_attaches_requester_as_owner() {
        let state = AppState::fake();
        let who = requester(&state, "t@x.com").await;
        let s = create(&state, &who, ana()).await.unwrap();
        assert_eq!(s.user_id, who.user_id());
    }

    #[tokio::test]
    async fn declared_foreign_owner_is_forbidden() {
        let state = AppState::fake();
        let who = requester(&state, "t@x.com").await;
        let other = requester(&state, "o@x.com").await;

        let mut payload = ana();
        payload.user_id = Some(other.user_id());
        let err = create(&state, &who, payload).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let s = create(&state, &who, ana()).await.unwrap();
        let mut payload = ana();
        payload.user_id = Some(other.user_id());
        let err = update(&state, &who, s.id, payload).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(list(&state, &other, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_the_store() {
        let state = AppState::fake();
        let who = requester(&state, "t@x.com").await;
        let mut payload = ana();
        payload.idade = Some(json!(151));
        let err = create(&state, &who, payload).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref v) if v.field == "idade"));
        assert!(list(&state, &who, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_student_is_not_found() {
        let state = AppState::fake();
        let who = requester(&state, "t@x.com").await;
        let err = delete(&state, &who, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
