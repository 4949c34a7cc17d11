//! Field checks applied before any request reaches the store.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{donors::repo_types::BloodType, error::AppError};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_LOCATION_LEN: usize = 128;

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    static ref CONTACT_RE: Regex = Regex::new(r"^\+?[0-9][0-9 ()-]{4,19}$").unwrap();
}

pub fn username(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if !USERNAME_RE.is_match(name) {
        return Err(AppError::Validation(
            "username must be 3-32 characters of letters, digits, '_', '.' or '-'".into(),
        ));
    }
    Ok(name.to_string())
}

pub fn password(raw: &str) -> Result<(), AppError> {
    if raw.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn blood_type(raw: &str) -> Result<BloodType, AppError> {
    raw.parse::<BloodType>().map_err(AppError::Validation)
}

pub fn contact_number(raw: &str) -> Result<String, AppError> {
    let contact = raw.trim();
    if !CONTACT_RE.is_match(contact) {
        return Err(AppError::Validation("contact number is malformed".into()));
    }
    Ok(contact.to_string())
}

pub fn location(raw: &str) -> Result<String, AppError> {
    let loc = raw.trim();
    if loc.is_empty() {
        return Err(AppError::Validation("location is required".into()));
    }
    if loc.chars().count() > MAX_LOCATION_LEN {
        return Err(AppError::Validation(format!(
            "location must be at most {MAX_LOCATION_LEN} characters"
        )));
    }
    Ok(loc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_trimmed_and_checked() {
        assert_eq!(username("  alice ").unwrap(), "alice");
        assert!(username("al").is_err());
        assert!(username("has space").is_err());
        assert!(username(&"x".repeat(33)).is_err());
        assert!(username("bob.smith-2_").is_ok());
    }

    #[test]
    fn password_needs_min_length() {
        assert!(password("short").is_err());
        assert!(password("secret").is_ok());
        assert!(password("long-enough").is_ok());
    }

    #[test]
    fn contact_number_accepts_common_formats() {
        assert_eq!(contact_number(" +1 (555) 010-0199 ").unwrap(), "+1 (555) 010-0199");
        assert!(contact_number("5550100").is_ok());
        assert!(contact_number("call me").is_err());
        assert!(contact_number("12").is_err());
    }

    #[test]
    fn location_must_be_present_and_bounded() {
        assert_eq!(location("  Springfield ").unwrap(), "Springfield");
        assert!(location("   ").is_err());
        assert!(location(&"l".repeat(MAX_LOCATION_LEN + 1)).is_err());
    }

    #[test]
    fn blood_type_errors_are_validation_errors() {
        assert!(matches!(blood_type("Q+"), Err(AppError::Validation(_))));
        assert_eq!(blood_type("o+").unwrap(), BloodType::OPos);
    }
}
