//! Authenticated session and role guard.
//!
//! Each app owns one [`SessionContext`]; nothing about the signed-in
//! account lives in global state. The role check runs once, when the session
//! is established: an account with the wrong role never gets a session.

use crate::error::{Result, ServiceError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use guestpass_core::backend::{AuthGrant, Authenticator};
use guestpass_core::model::{Account, AccountId, Role};
use guestpass_core::validation::{LoginForm, Validate};
use serde::Deserialize;

/// An authenticated account and its bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Bearer token
    pub token: String,
    /// Signed-in account
    pub account: Account,
    /// Token expiry, when the token carries one
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Expiry from the `exp` claim of a JWT, if it has one.
///
/// Tokens that are not JWTs yield `None` rather than an error.
#[must_use]
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

impl Session {
    /// Build a session from a sign-in grant.
    #[must_use]
    pub fn from_grant(grant: AuthGrant) -> Self {
        let expires_at = token_expiry(&grant.token);
        Self {
            token: grant.token,
            account: grant.account,
            expires_at,
        }
    }

    /// Signed-in account id.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account.id
    }

    /// Whether the token is present and not yet expired at `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// Holder of the current session for one app.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    current: Option<Session>,
}

impl SessionContext {
    /// Context with nobody signed in.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Validate the form, authenticate, then apply the role guard.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if the form is invalid (no request is
    ///   sent)
    /// - [`ServiceError::Unauthenticated`] for wrong credentials
    /// - [`ServiceError::Forbidden`] if the account's role is not
    ///   `required_role`; the context is left signed out
    /// - [`ServiceError::Connectivity`] if the store is unreachable
    pub async fn sign_in(
        &mut self,
        authenticator: &dyn Authenticator,
        form: &LoginForm,
        required_role: Role,
    ) -> Result<&Session> {
        form.validate()?;
        self.current = None;

        let grant = authenticator
            .sign_in_with_password(form.email.trim(), &form.password)
            .await?;
        self.establish(Session::from_grant(grant), required_role)
    }

    /// Exchange the current token for a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unauthenticated`] if nobody is signed in or
    /// the token was rejected (the context is then signed out).
    pub async fn refresh(
        &mut self,
        authenticator: &dyn Authenticator,
        required_role: Role,
    ) -> Result<&Session> {
        let token = self
            .current
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(ServiceError::Unauthenticated)?;

        match authenticator.refresh(&token).await {
            Ok(grant) => self.establish(Session::from_grant(grant), required_role),
            Err(error) => {
                let error = ServiceError::from(error);
                if error == ServiceError::Unauthenticated {
                    self.sign_out();
                }
                Err(error)
            },
        }
    }

    /// Adopt a previously persisted session, applying the role guard.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Forbidden`] if the role does not match.
    pub fn restore(&mut self, session: Session, required_role: Role) -> Result<&Session> {
        self.establish(session, required_role)
    }

    fn establish(&mut self, session: Session, required_role: Role) -> Result<&Session> {
        if session.account.role != Some(required_role) {
            tracing::warn!(
                account = %session.account.id,
                role = ?session.account.role,
                required = %required_role,
                "Rejected sign-in with wrong role"
            );
            self.current = None;
            return Err(ServiceError::Forbidden(format!(
                "this app requires the {required_role} role"
            )));
        }
        tracing::info!(account = %session.account.id, role = %required_role, "Signed in");
        Ok(&*self.current.insert(session))
    }

    /// Whether a non-expired session is held.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.current.as_ref().is_some_and(|s| s.is_valid(now))
    }

    /// The signed-in account, expired or not.
    #[must_use]
    pub fn current_user(&self) -> Option<&Account> {
        self.current.as_ref().map(|s| &s.account)
    }

    /// The current session, if still valid at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unauthenticated`] otherwise.
    pub fn require(&self, now: DateTime<Utc>) -> Result<&Session> {
        self.current
            .as_ref()
            .filter(|s| s.is_valid(now))
            .ok_or(ServiceError::Unauthenticated)
    }

    /// Forget the session.
    pub fn sign_out(&mut self) {
        if let Some(session) = self.current.take() {
            tracing::info!(account = %session.account.id, "Signed out");
        }
    }
}
