//! Common validation utilities.

use validator::{ValidateEmail, ValidationError};

/// Maximum length of a person's display name.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 100;

/// Maximum length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Returns the trimmed value, or `None` if nothing is left after trimming.
pub fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Trims an optional input, collapsing blank strings to `None`.
pub fn non_blank_owned(value: Option<&str>) -> Option<String> {
    value.and_then(non_blank).map(str::to_string)
}

/// Validates that a value is not empty after trimming.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    match non_blank(value) {
        Some(_) => Ok(()),
        None => {
            let mut err = ValidationError::new("blank");
            err.message = Some("Value must not be empty".into());
            Err(err)
        }
    }
}

/// Validates an email address after trimming surrounding whitespace.
pub fn validate_email_address(value: &str) -> Result<(), ValidationError> {
    let Some(trimmed) = non_blank(value) else {
        let mut err = ValidationError::new("email_required");
        err.message = Some("Email is required".into());
        return Err(err);
    };

    if trimmed.len() > MAX_EMAIL_LENGTH || !trimmed.validate_email() {
        let mut err = ValidationError::new("email_format");
        err.message = Some("Email address is not valid".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: required and at most 100 characters.
pub fn validate_display_name(value: &str) -> Result<(), ValidationError> {
    let Some(trimmed) = non_blank(value) else {
        let mut err = ValidationError::new("name_required");
        err.message = Some("Name is required".into());
        return Err(err);
    };

    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some("Name must be at most 100 characters".into());
        return Err(err);
    }

    Ok(())
}
