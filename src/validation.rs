use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ApiError, FieldError};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref OTP_RE: Regex = Regex::new(r"^[0-9]{6}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Collects field errors and turns them into a single 400.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &'static str, message: &'static str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    pub fn email(&mut self, email: &str) -> &mut Self {
        self.check(
            is_valid_email(email),
            "email",
            "Please provide a valid email address",
        )
    }

    pub fn password(&mut self, field: &'static str, password: &str) -> &mut Self {
        if password.chars().count() < 6 {
            return self.check(false, field, "Password must be at least 6 characters long");
        }
        let strong = password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_ascii_digit());
        self.check(
            strong,
            field,
            "Password must contain at least one uppercase letter, one lowercase letter, and one number",
        )
    }

    pub fn otp(&mut self, otp: &str) -> &mut Self {
        self.check(OTP_RE.is_match(otp), "otp", "OTP must be exactly 6 digits")
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        let len = name.chars().count();
        self.check(
            (2..=50).contains(&len),
            "name",
            "Name must be between 2 and 50 characters",
        )
    }

    pub fn token(&mut self, token: &str) -> &mut Self {
        if token.is_empty() {
            return self.check(false, "token", "Token is required");
        }
        self.check(token.len() >= 10, "token", "Invalid token format")
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), ApiError>) -> Vec<&'static str> {
        match result {
            Err(ApiError::Validation(errs)) => errs.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(()) => vec![],
        }
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("new@x.com"));
        assert!(!is_valid_email("new@x"));
        assert!(!is_valid_email("no at sign.com"));
        assert_eq!(normalize_email("  New@X.com "), "new@x.com");
    }

    #[test]
    fn password_rules() {
        assert!(fields(Validator::new().password("password", "Abc123x").finish()).is_empty());
        assert_eq!(
            fields(Validator::new().password("password", "Ab1").finish()),
            vec!["password"]
        );
        assert_eq!(
            fields(Validator::new().password("password", "abcdef1").finish()),
            vec!["password"]
        );
    }

    #[test]
    fn otp_must_be_six_digits() {
        assert!(fields(Validator::new().otp("012345").finish()).is_empty());
        assert_eq!(fields(Validator::new().otp("12345").finish()), vec!["otp"]);
        assert_eq!(fields(Validator::new().otp("12a456").finish()), vec!["otp"]);
    }

    #[test]
    fn errors_accumulate() {
        let got = fields(
            Validator::new()
                .email("bad")
                .password("password", "x")
                .name("A")
                .token("short")
                .finish(),
        );
        assert_eq!(got, vec!["email", "password", "name", "token"]);
    }
}
