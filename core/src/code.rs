//! Short human-enterable codes.
//!
//! Parties get a six-character join code that guests can type by hand, and
//! every invitation gets a code of the same shape. Codes are drawn
//! uniformly from `A-Z0-9`; they are identifiers, not secrets, so the
//! thread-local generator is sufficient.

use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Number of characters in a code.
pub const CODE_LENGTH: usize = 6;

/// Symbols a code is drawn from.
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a code with the thread-local random generator.
///
/// # Examples
///
/// ```
/// let code = guestpass_core::generate_code();
/// assert_eq!(code.len(), 6);
/// assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
/// ```
#[must_use]
pub fn generate_code() -> String {
    generate_code_with(&mut rand::thread_rng())
}

/// Generate a code from the given random source.
pub fn generate_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Why a manually entered code was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinCodeError {
    /// Nothing was entered.
    #[error("code is empty")]
    Empty,

    /// Wrong number of characters.
    #[error("code must be {CODE_LENGTH} characters, got {0}")]
    WrongLength(usize),

    /// A character outside `A-Z0-9`.
    #[error("code contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// A syntactically valid join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    /// Normalise manual input: trim, upper-case, then check the shape.
    ///
    /// # Errors
    ///
    /// Returns [`JoinCodeError`] describing the first problem found.
    ///
    /// # Examples
    ///
    /// ```
    /// use guestpass_core::JoinCode;
    ///
    /// assert_eq!(JoinCode::normalize("  ab12cd ").unwrap().as_str(), "AB12CD");
    /// assert!(JoinCode::normalize("AB-12C").is_err());
    /// ```
    pub fn normalize(raw: &str) -> Result<Self, JoinCodeError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(JoinCodeError::Empty);
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit()))
        {
            return Err(JoinCodeError::InvalidCharacter(bad));
        }
        let len = code.chars().count();
        if len != CODE_LENGTH {
            return Err(JoinCodeError::WrongLength(len));
        }
        Ok(Self(code))
    }

    /// Draw a fresh random code.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_code())
    }

    /// Borrow the code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
