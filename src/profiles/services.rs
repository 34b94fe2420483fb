use tracing::info;

use super::dto::UpdateProfileRequest;
use super::repo_types::{Profile, ProfileChanges};
use crate::auth::services::{is_valid_email, normalize_email};
use crate::error::{AppError, ValidationError};
use crate::state::AppState;
use crate::students::validation::EMAIL_MAX_LEN;
use crate::store::{Requester, StoreError, UniqueField};

pub const MAX_NAME_LEN: usize = 100;

/// Checks a profile edit; the name may be blank, as provisioned profiles start that way.
pub fn validate_changes(req: UpdateProfileRequest) -> Result<ProfileChanges, ValidationError> {
    let name = req.name.map(|n| n.trim().to_string());
    if let Some(name) = &name {
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::new("name", "Name must be at most 100 characters"));
        }
    }
    let email = req.email.map(|e| normalize_email(&e));
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(ValidationError::new("email", "Invalid email address"));
        }
        if email.chars().count() > EMAIL_MAX_LEN {
            return Err(ValidationError::new("email", "Email must be at most 255 characters"));
        }
    }
    Ok(ProfileChanges { name, email })
}

pub async fn get_profile(state: &AppState, who: &Requester) -> Result<Profile, AppError> {
    state.store.get_profile(who).await.map_err(|e| match e {
        StoreError::NotFound => AppError::NotFound("Profile not found".into()),
        other => AppError::internal("Could not load profile", other),
    })
}

pub async fn update_profile(
    state: &AppState,
    who: &Requester,
    req: UpdateProfileRequest,
) -> Result<Profile, AppError> {
    let changes = validate_changes(req)?;
    let profile = state
        .store
        .update_profile(who, changes)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound("Profile not found".into()),
            StoreError::Conflict(UniqueField::ProfileEmail) => AppError::Conflict {
                field: "email",
                message: "Email already in use by another profile".into(),
            },
            other => AppError::internal("Could not update profile", other),
        })?;
    info!(user_id = %who.user_id(), "profile updated");
    Ok(profile)
}
