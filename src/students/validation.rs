//! Field rules for student submissions.
//!
//! Fields are checked in form order (name, email, matricula, idade) and the
//! first broken rule is returned; later fields are not inspected.

use serde_json::Value;

use super::dto::StudentPayload;
use super::repo_types::StudentFields;
use crate::auth::services::{is_valid_email, normalize_email};
use crate::error::ValidationError;

pub const NAME_LEN: (usize, usize) = (2, 100);
pub const EMAIL_MAX_LEN: usize = 255;
pub const MATRICULA_LEN: (usize, usize) = (3, 50);
pub const IDADE_RANGE: (i64, i64) = (1, 150);

const NAME_TOO_SHORT: ValidationError =
    ValidationError::new("name", "Name must be at least 2 characters");
const NAME_TOO_LONG: ValidationError =
    ValidationError::new("name", "Name must be at most 100 characters");
const EMAIL_INVALID: ValidationError = ValidationError::new("email", "Invalid email address");
const EMAIL_TOO_LONG: ValidationError =
    ValidationError::new("email", "Email must be at most 255 characters");
const MATRICULA_TOO_SHORT: ValidationError =
    ValidationError::new("matricula", "Registration number must be at least 3 characters");
const MATRICULA_TOO_LONG: ValidationError =
    ValidationError::new("matricula", "Registration number must be at most 50 characters");
const IDADE_NOT_INTEGER: ValidationError =
    ValidationError::new("idade", "Age must be a whole number");
const IDADE_TOO_LOW: ValidationError = ValidationError::new("idade", "Age must be at least 1");
const IDADE_TOO_HIGH: ValidationError = ValidationError::new("idade", "Age must be at most 150");

fn check_len(
    value: &str,
    (min, max): (usize, usize),
    short: ValidationError,
    long: ValidationError,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min {
        return Err(short);
    }
    if len > max {
        return Err(long);
    }
    Ok(())
}

pub fn validate_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    check_len(name, NAME_LEN, NAME_TOO_SHORT, NAME_TOO_LONG)?;
    Ok(name.to_string())
}

pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(EMAIL_INVALID);
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(EMAIL_TOO_LONG);
    }
    Ok(email)
}

pub fn validate_matricula(raw: &str) -> Result<String, ValidationError> {
    let matricula = raw.trim();
    check_len(matricula, MATRICULA_LEN, MATRICULA_TOO_SHORT, MATRICULA_TOO_LONG)?;
    Ok(matricula.to_string())
}

/// Accepts JSON integers, and floats with no fractional part.
pub fn validate_idade(raw: Option<&Value>) -> Result<i32, ValidationError> {
    let n = raw.and_then(Value::as_number).ok_or(IDADE_NOT_INTEGER)?;
    let (min, max) = IDADE_RANGE;
    let idade = if let Some(i) = n.as_i64() {
        i
    } else if n.is_u64() {
        // Above i64::MAX.
        return Err(IDADE_TOO_HIGH);
    } else {
        let f = n.as_f64().ok_or(IDADE_NOT_INTEGER)?;
        if !f.is_finite() || f.fract() != 0.0 {
            return Err(IDADE_NOT_INTEGER);
        }
        if f < min as f64 {
            return Err(IDADE_TOO_LOW);
        }
        if f > max as f64 {
            return Err(IDADE_TOO_HIGH);
        }
        f as i64
    };
    if idade < min {
        return Err(IDADE_TOO_LOW);
    }
    if idade > max {
        return Err(IDADE_TOO_HIGH);
    }
    Ok(idade as i32)
}

pub fn validate_student(input: &StudentPayload) -> Result<StudentFields, ValidationError> {
    Ok(StudentFields {
        name: validate_name(&input.name)?,
        email: validate_email(&input.email)?,
        matricula: validate_matricula(&input.matricula)?,
        idade: validate_idade(input.idade.as_ref())?,
    })
}
