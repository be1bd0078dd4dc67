//! Rules backing the `validator` derives on request bodies.
//!
//! Request DTOs keep every field optional so that a missing value becomes a
//! `{field, message}` entry instead of a JSON rejection. Per-field rules live
//! in `#[validate(...)]` attributes; the functions here are their `custom`
//! hooks. [`Checks`] collects those results together with the rules that span
//! several fields.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use service_core::error::flatten_validation_errors;
use service_core::response::FieldError;
use validator::{ValidationError, ValidationErrors};

use crate::models::{
    DiscoverSource, EssayTopic, FileKind, Gender, PaymentMethod, RegistrationStatus,
    ScholarshipType,
};

/// Trims a string field; blank becomes absent so that `required` catches it.
pub fn trimmed<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// `validator` errors keyed by the JSON (camelCase) field names.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    flatten_validation_errors(errors)
        .into_iter()
        .map(|e| FieldError::new(camel_case(&e.field), e.message))
        .collect()
}

fn camel_case(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut upper = false;
    for c in path.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn invalid(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Phone number with country code: optional `+`, then 8 to 15 digits.
/// Spaces and dashes are accepted.
pub fn phone(value: &str) -> Result<(), ValidationError> {
    let compact = compact_phone(value);
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid("phone", "Invalid phone number"))
    }
}

pub fn compact_phone(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

pub fn iso_date(value: &str) -> Result<(), ValidationError> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| invalid("date", "Date must use the YYYY-MM-DD format"))
}

pub fn alphanumeric(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(invalid("alphanumeric", "Passport number must be alphanumeric"))
    }
}

pub fn accepted(value: &bool) -> Result<(), ValidationError> {
    if *value {
        Ok(())
    } else {
        Err(invalid("accepted", "You must accept the program policies"))
    }
}

fn one_of<T: FromStr>(field: &str, value: &str, names: &[&str]) -> Result<(), ValidationError> {
    value.parse::<T>().map(|_| ()).map_err(|_| {
        invalid(
            "one_of",
            format!("{field} must be one of: {}", names.join(", ")),
        )
    })
}

pub fn gender(value: &str) -> Result<(), ValidationError> {
    one_of::<Gender>("gender", value, Gender::NAMES)
}

pub fn discover_source(value: &str) -> Result<(), ValidationError> {
    one_of::<DiscoverSource>("discoverSource", value, DiscoverSource::NAMES)
}

pub fn essay_topic(value: &str) -> Result<(), ValidationError> {
    one_of::<EssayTopic>("essayTopic", value, EssayTopic::NAMES)
}

pub fn scholarship_type(value: &str) -> Result<(), ValidationError> {
    one_of::<ScholarshipType>("scholarshipType", value, ScholarshipType::NAMES)
}

pub fn payment_method(value: &str) -> Result<(), ValidationError> {
    one_of::<PaymentMethod>("paymentMethod", value, PaymentMethod::NAMES)
}

pub fn registration_status(value: &str) -> Result<(), ValidationError> {
    one_of::<RegistrationStatus>("status", value, RegistrationStatus::NAMES)
}

pub fn file_kind(value: &str) -> Result<(), ValidationError> {
    one_of::<FileKind>("kind", value, FileKind::NAMES)
}

/// A value the derive rules already vouched for.
pub fn required<T>(field: &str, value: Option<T>) -> Result<T, Vec<FieldError>> {
    value.ok_or_else(|| vec![FieldError::new(field, format!("{field} is required"))])
}

pub fn parse<T: FromStr>(field: &str, value: &str) -> Result<T, Vec<FieldError>> {
    value
        .parse()
        .map_err(|_| vec![FieldError::new(field, format!("{field} is invalid"))])
}

/// Errors from derive rules plus cross-field rules of one request.
#[derive(Debug, Default)]
pub struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn absorb(&mut self, result: Result<(), ValidationErrors>) {
        if let Err(errors) = result {
            self.errors.extend(field_errors(&errors));
        }
    }

    pub fn finish(mut self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            return Ok(());
        }
        self.errors.sort_by(|a, b| a.field.cmp(&b.field));
        Err(self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Debug, Default, Deserialize, Validate)]
    #[serde(rename_all = "camelCase")]
    struct Contact {
        #[serde(default, deserialize_with = "trimmed")]
        #[validate(
            required(message = "fullName is required"),
            length(min = 2, max = 10, message = "fullName must be between 2 and 10 characters")
        )]
        full_name: Option<String>,
        #[serde(default, deserialize_with = "trimmed")]
        #[validate(custom(function = "phone"))]
        whatsapp: Option<String>,
    }

    #[test]
    fn blank_text_counts_as_missing() {
        let contact: Contact =
            serde_json::from_value(serde_json::json!({ "fullName": "   " })).unwrap();
        assert_eq!(contact.full_name, None);

        let mut checks = Checks::new();
        checks.absorb(contact.validate());
        let errors = checks.finish().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "fullName");
        assert_eq!(errors[0].message, "fullName is required");
    }

    #[test]
    fn derive_errors_use_json_field_names() {
        let contact: Contact = serde_json::from_value(serde_json::json!({
            "fullName": " Ada Lovelace King ",
            "whatsapp": "+62 abc 4567 890"
        }))
        .unwrap();
        assert_eq!(contact.full_name.as_deref(), Some("Ada Lovelace King"));

        let mut checks = Checks::new();
        checks.absorb(contact.validate());
        checks.fail("email", "email is required");
        let errors = checks.finish().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "fullName", "whatsapp"]);
        assert_eq!(errors[2].message, "Invalid phone number");
    }

    #[test]
    fn phone_numbers_are_compacted() {
        assert!(phone("+62 812-3456-7890").is_ok());
        assert_eq!(compact_phone("+62 812-3456-7890"), "+6281234567890");
        assert!(phone("1234").is_err());
    }

    #[test]
    fn dates_need_iso_format() {
        assert!(iso_date("2000-01-01").is_ok());
        assert!(iso_date("01/01/2000").is_err());
    }

    #[test]
    fn vocabulary_errors_list_the_choices() {
        let error = gender("ROBOT").unwrap_err();
        let message = error.message.unwrap();
        assert!(message.starts_with("gender must be one of: "));
        assert!(message.contains("FEMALE"));
        assert!(gender("MALE").is_ok());
    }
}
