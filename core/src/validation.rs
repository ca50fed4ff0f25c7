//! Client-side form validation.
//!
//! Everything here runs before a request is sent. A form either passes or
//! yields every failing field at once, so a screen can flag all of them in
//! one go.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Minimum password length accepted by the login form.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Minimum party title length.
pub const MIN_TITLE_LEN: usize = 3;
/// Minimum party description length.
pub const MIN_DESCRIPTION_LEN: usize = 10;
/// Minimum party location length.
pub const MIN_LOCATION_LEN: usize = 3;

/// One failing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Form field name
    pub field: &'static str,
    /// User-facing message
    pub message: String,
}

/// All failing fields of a form.
#[derive(Debug, Error, Clone, PartialEq, Eq, Default)]
#[error("invalid form ({})", summarize(.0))]
pub struct ValidationErrors(Vec<ValidationError>);

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(ValidationError {
            field,
            message: message.into(),
        });
    }

    fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }

    /// Failing fields in form order.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Message for `field`, if it failed.
    #[must_use]
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

/// Form that can be checked locally.
pub trait Validate {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing each failing field.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

fn char_len(value: &str) -> usize {
    value.trim().chars().count()
}

/// Validate email address format.
///
/// - Must contain exactly one `@`
/// - Must have non-empty local and domain parts
/// - Domain must contain a dot that is neither first nor last
/// - Length must be between 3 and 255 characters
///
/// # Examples
///
/// ```
/// use guestpass_core::validation::is_valid_email;
///
/// assert!(is_valid_email("door@example.com"));
/// assert!(is_valid_email("first.last+tag@sub.example.org"));
/// assert!(!is_valid_email("invalid"));
/// assert!(!is_valid_email("@example.com"));
/// assert!(!is_valid_email("user@example"));
/// ```
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 255 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }

    let valid_local = |c: char| c.is_alphanumeric() || matches!(c, '.' | '-' | '+' | '_');
    let valid_domain = |c: char| c.is_alphanumeric() || matches!(c, '.' | '-');

    local.chars().all(valid_local) && domain.chars().all(valid_domain)
}

/// Credentials typed on the login screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Email
    pub email: String,
    /// Password
    pub password: String,
}

impl LoginForm {
    /// Build a login form.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl Validate for LoginForm {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if !is_valid_email(self.email.trim()) {
            errors.push("email", "Invalid email");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        errors.into_result()
    }
}

/// Party creation / edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyForm {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Date; required
    pub date: Option<DateTime<Utc>>,
    /// Location
    pub location: String,
}

impl Validate for PartyForm {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if char_len(&self.title) < MIN_TITLE_LEN {
            errors.push(
                "title",
                format!("Title must be at least {MIN_TITLE_LEN} characters"),
            );
        }
        if char_len(&self.description) < MIN_DESCRIPTION_LEN {
            errors.push(
                "description",
                format!("Description must be at least {MIN_DESCRIPTION_LEN} characters"),
            );
        }
        if self.date.is_none() {
            errors.push("date", "Date is required");
        }
        if char_len(&self.location) < MIN_LOCATION_LEN {
            errors.push(
                "location",
                format!("Location must be at least {MIN_LOCATION_LEN} characters"),
            );
        }
        errors.into_result()
    }
}

/// Guest registration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeForm {
    /// Guest name
    pub name: String,
    /// Guest phone number
    pub phone: String,
}

impl Validate for AttendeeForm {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.name.trim().is_empty() {
            errors.push("name", "Name is required");
        }
        if self.phone.trim().is_empty() {
            errors.push("phone", "Phone is required");
        }
        errors.into_result()
    }
}
