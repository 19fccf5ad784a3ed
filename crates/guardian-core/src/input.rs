use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::url_validator::UrlValidationError;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

/// Problems with user input that are reported before any network call is made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Email is required")]
    EmptyEmail,
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Password is required")]
    EmptyPassword,
    #[error("Please paste the {what} content to analyze")]
    EmptyContent { what: String },
    #[error("APK file not found: {path}")]
    MissingFile { path: String },
    #[error(transparent)]
    Url(#[from] UrlValidationError),
}

/// Trim and syntax-check an email address.
pub fn validate_email(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InputError::EmptyEmail);
    }
    if !EMAIL_PATTERN.is_match(trimmed) {
        return Err(InputError::InvalidEmail);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert_eq!(
            validate_email("  test@example.com ").unwrap(),
            "test@example.com"
        );
        assert!(validate_email("first.last+tag@sub.example.co.uk").is_ok());
    }

    #[test]
    fn rejects_blank_and_malformed_addresses() {
        assert_eq!(validate_email("  "), Err(InputError::EmptyEmail));
        assert_eq!(validate_email("no-at-sign.com"), Err(InputError::InvalidEmail));
        assert_eq!(validate_email("user@localhost"), Err(InputError::InvalidEmail));
        assert_eq!(validate_email("us er@example.com"), Err(InputError::InvalidEmail));
    }

    #[test]
    fn url_errors_convert_transparently() {
        let err: InputError = UrlValidationError::Empty.into();
        assert_eq!(err.to_string(), UrlValidationError::Empty.to_string());
    }
}
