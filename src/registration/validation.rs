use lazy_static::lazy_static;
use regex::Regex;

use crate::registration::error::RegistrationError;

const MAX_EMAIL_LEN: usize = 254;
const MAX_IDENTIFIER_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    static ref LOCALE_RE: Regex = Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Trimmed, lower-cased email, or `ValidationFailed`.
pub fn normalize_email(raw: &str) -> Result<String, RegistrationError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(RegistrationError::ValidationFailed("invalid email".into()));
    }
    Ok(email)
}

pub fn validate_identifier(label: &str, value: &str) -> Result<(), RegistrationError> {
    if value.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER_RE.is_match(value) {
        return Err(RegistrationError::ValidationFailed(format!(
            "{label} must be 1-{MAX_IDENTIFIER_LEN} letters, digits or underscores"
        )));
    }
    Ok(())
}

pub fn validate_password(label: &str, value: &str) -> Result<(), RegistrationError> {
    let len = value.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(RegistrationError::ValidationFailed(format!(
            "{label} must be {MIN_PASSWORD_LEN}-{MAX_PASSWORD_LEN} characters"
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RegistrationError::ValidationFailed(format!(
            "{label} must not contain whitespace"
        )));
    }
    Ok(())
}

/// The requested locale when it looks like `en` or `pt-BR`, otherwise `en`.
pub fn sanitize_locale(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(l) if LOCALE_RE.is_match(l) => l.to_string(),
        _ => "en".to_string(),
    }
}

/// Treat blank form fields as absent.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
