//! Input checks run before any state mutation or backend call.
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const NAME_MIN_LENGTH: usize = 2;
pub const NAME_MAX_LENGTH: usize = 100;
pub const PHONE_MIN_LENGTH: usize = 8;
pub const PHONE_MAX_LENGTH: usize = 15;
pub const MESSAGE_MAX_LENGTH: usize = 500;
pub const PASSWORD_MAX_LENGTH: usize = 100;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-ZáéíóúÁÉÍÓÚñÑ\s]+$").expect("valid name regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9+() -]*$").expect("valid phone regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$").expect("valid time regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must be between {NAME_MIN_LENGTH} and {NAME_MAX_LENGTH} characters")]
    NameLength,
    #[error("name may only contain letters and spaces")]
    NameCharacters,
    #[error("phone must be between {PHONE_MIN_LENGTH} and {PHONE_MAX_LENGTH} characters")]
    PhoneLength,
    #[error("phone may only contain digits and the characters +() -")]
    PhoneCharacters,
    #[error("message must be between 1 and {MESSAGE_MAX_LENGTH} characters")]
    MessageLength,
    #[error("time must use the HH:mm format, got {0:?}")]
    Time(String),
    #[error("date must use the YYYY-MM-DD format, got {0:?}")]
    Date(String),
    #[error("password must be between 1 and {PASSWORD_MAX_LENGTH} characters")]
    PasswordLength,
    #[error("range bounds must be positive integers")]
    RangeBound,
}

pub fn name(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if !(NAME_MIN_LENGTH..=NAME_MAX_LENGTH).contains(&len) {
        return Err(ValidationError::NameLength);
    }
    if !NAME_RE.is_match(value) {
        return Err(ValidationError::NameCharacters);
    }
    Ok(())
}

pub fn phone(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if !(PHONE_MIN_LENGTH..=PHONE_MAX_LENGTH).contains(&len) {
        return Err(ValidationError::PhoneLength);
    }
    if !PHONE_RE.is_match(value) {
        return Err(ValidationError::PhoneCharacters);
    }
    Ok(())
}

pub fn message(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 || len > MESSAGE_MAX_LENGTH {
        return Err(ValidationError::MessageLength);
    }
    Ok(())
}

pub fn call_time(value: &str) -> Result<(), ValidationError> {
    if TIME_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Time(value.to_string()))
    }
}

/// Checks the `YYYY-MM-DD` shape and that the day exists.
pub fn date(value: &str) -> Result<NaiveDate, ValidationError> {
    if !DATE_RE.is_match(value) {
        return Err(ValidationError::Date(value.to_string()));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ValidationError::Date(value.to_string()))
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 || len > PASSWORD_MAX_LENGTH {
        return Err(ValidationError::PasswordLength);
    }
    Ok(())
}

pub fn range_bound(value: u32) -> Result<u32, ValidationError> {
    if value == 0 {
        Err(ValidationError::RangeBound)
    } else {
        Ok(value)
    }
}
