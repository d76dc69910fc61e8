//! Input checks for `POST /outbound-call`. Everything here runs before any
//! provider request is made.

use std::fmt;

pub const MIN_YEAR: i32 = -1500;
pub const MAX_YEAR: i32 = 3000;
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "es"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
    pub hint: &'static str,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>, hint: &'static str) -> Self {
        Self {
            field,
            message: message.into(),
            hint,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

const PHONE_HINT: &str = "Include the country code, e.g. +1234567890.";

/// Normalise a destination number to `+` followed by digits.
pub fn validate_phone_number(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();

    let digits = match cleaned.strip_prefix('+') {
        Some(digits) => digits,
        None => {
            return Err(ValidationError::new(
                "to",
                "Phone number must start with country code (e.g., +1234567890)",
                PHONE_HINT,
            ))
        }
    };

    if digits.contains('+') {
        return Err(ValidationError::new("to", "Invalid country code format", PHONE_HINT));
    }
    if digits.len() < 10 {
        return Err(ValidationError::new(
            "to",
            "Phone number must have at least 10 digits",
            PHONE_HINT,
        ));
    }
    if digits.len() > 15 {
        return Err(ValidationError::new(
            "to",
            "Phone number is too long (maximum 15 digits)",
            PHONE_HINT,
        ));
    }

    Ok(cleaned)
}

pub fn validate_year(year: i32) -> Result<i32, ValidationError> {
    const HINT: &str = "Pick a year between -1500 (1500 BC) and 3000.";
    if year < MIN_YEAR {
        return Err(ValidationError::new("year", "Year must be after 1500 BC", HINT));
    }
    if year > MAX_YEAR {
        return Err(ValidationError::new("year", "Year must be before 3000 AD", HINT));
    }
    Ok(year)
}

pub fn validate_language(lang: &str) -> Result<&'static str, ValidationError> {
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|supported| *supported == lang)
        .ok_or_else(|| {
            ValidationError::new(
                "lang",
                r#"Language must be either "en" or "es""#,
                r#"Use "en" for English or "es" for Spanish."#,
            )
        })
}

/// A validated outbound call request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCallParams {
    pub to: String,
    pub lang: &'static str,
    pub year: i32,
}

pub fn validate_outbound_call(to: &str, lang: &str, year: i32) -> Result<OutboundCallParams, ValidationError> {
    Ok(OutboundCallParams {
        to: validate_phone_number(to)?,
        lang: validate_language(lang)?,
        year: validate_year(year)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_numbers() {
        assert_eq!(validate_phone_number("+1 (555) 123-4567").unwrap(), "+15551234567");
        assert_eq!(validate_phone_number("+34 612 345 678").unwrap(), "+34612345678");

        let missing_plus = validate_phone_number("5551234567").unwrap_err();
        assert_eq!(missing_plus.field, "to");
        assert!(missing_plus.message.contains("country code"));

        assert!(validate_phone_number("+123456789").unwrap_err().message.contains("at least 10"));
        assert!(validate_phone_number("+1234567890123456").unwrap_err().message.contains("too long"));
        assert!(validate_phone_number("+1+5551234567").is_err());
        assert!(validate_phone_number("").is_err());
    }

    #[test]
    fn test_year_bounds() {
        assert_eq!(validate_year(-1500), Ok(-1500));
        assert_eq!(validate_year(3000), Ok(3000));
        assert!(validate_year(-1501).is_err());
        assert!(validate_year(3001).is_err());
    }

    #[test]
    fn test_languages() {
        assert_eq!(validate_language("es"), Ok("es"));
        assert_eq!(validate_language("fr").unwrap_err().field, "lang");
        assert!(validate_language("EN").is_err());
    }

    #[test]
    fn test_first_failure_is_reported() {
        let err = validate_outbound_call("+15551234567", "de", 5000).unwrap_err();
        assert_eq!(err.field, "lang");

        let params = validate_outbound_call("+1 555 123 4567", "en", 1969).unwrap();
        assert_eq!(params.to, "+15551234567");
        assert_eq!(params.year, 1969);
    }
}
