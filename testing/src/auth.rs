//! In-memory password authentication.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use guestpass_core::backend::{AuthGrant, Authenticator, BackendError, BackendFuture, Result};
use guestpass_core::model::{Account, AccountId, Role};
use guestpass_core::Clock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Credentials {
    password: String,
    account: Account,
}

/// Authenticator backed by a map of registered accounts.
///
/// Issued tokens are unsigned JWTs whose `exp` claim is derived from the
/// injected clock, so session expiry can be tested deterministically.
#[derive(Clone)]
pub struct InMemoryAuthenticator {
    accounts: Arc<Mutex<HashMap<String, Credentials>>>,
    issued: Arc<Mutex<HashMap<String, AccountId>>>,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
}

impl InMemoryAuthenticator {
    /// Create an authenticator with no accounts; tokens live one hour.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            issued: Arc::new(Mutex::new(HashMap::new())),
            clock,
            token_ttl: Duration::hours(1),
        }
    }

    /// Set the lifetime of issued tokens.
    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Register an account.
    pub fn register(&self, id: &str, email: &str, password: &str, role: Option<Role>) -> Account {
        let account = Account {
            id: AccountId::new(id),
            email: email.to_string(),
            name: String::new(),
            role,
        };
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(
                email.to_lowercase(),
                Credentials {
                    password: password.to_string(),
                    account: account.clone(),
                },
            );
        }
        account
    }

    /// Stop accepting every token issued so far.
    pub fn revoke_all(&self) {
        if let Ok(mut issued) = self.issued.lock() {
            issued.clear();
        }
    }

    fn issue(&self, account: Account) -> Result<AuthGrant> {
        let expires = self.clock.now() + self.token_ttl;
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none", "typ": "JWT"}).to_string());
        let claims = URL_SAFE_NO_PAD.encode(
            json!({
                "id": account.id.as_str(),
                "type": "authRecord",
                "exp": expires.timestamp(),
            })
            .to_string(),
        );
        let sequence = self.issued.lock().map(|issued| issued.len()).unwrap_or(0);
        let token = format!("{header}.{claims}.sig{sequence}");

        self.issued
            .lock()
            .map_err(|_| BackendError::Transport("token table lock poisoned".to_string()))?
            .insert(token.clone(), account.id.clone());
        Ok(AuthGrant { token, account })
    }
}

impl std::fmt::Debug for InMemoryAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAuthenticator")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl Authenticator for InMemoryAuthenticator {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BackendFuture<'a, AuthGrant> {
        Box::pin(async move {
            let account = {
                let accounts = self
                    .accounts
                    .lock()
                    .map_err(|_| BackendError::Transport("account table lock poisoned".to_string()))?;
                match accounts.get(&email.trim().to_lowercase()) {
                    Some(credentials) if credentials.password == password => {
                        credentials.account.clone()
                    },
                    _ => return Err(BackendError::Unauthorized),
                }
            };
            self.issue(account)
        })
    }

    fn refresh<'a>(&'a self, token: &'a str) -> BackendFuture<'a, AuthGrant> {
        Box::pin(async move {
            let account = {
                let issued = self
                    .issued
                    .lock()
                    .map_err(|_| BackendError::Transport("token table lock poisoned".to_string()))?;
                let id = issued.get(token).ok_or(BackendError::Unauthorized)?;
                let accounts = self
                    .accounts
                    .lock()
                    .map_err(|_| BackendError::Transport("account table lock poisoned".to_string()))?;
                accounts
                    .values()
                    .find(|c| &c.account.id == id)
                    .map(|c| c.account.clone())
                    .ok_or(BackendError::Unauthorized)?
            };
            self.issue(account)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_clock;

    #[tokio::test]
    async fn signs_in_with_matching_password() {
        let auth = InMemoryAuthenticator::new(Arc::new(test_clock()));
        auth.register("g1", "door@example.com", "secret", Some(Role::Guard));

        let grant = auth
            .sign_in_with_password("Door@Example.com", "secret")
            .await
            .unwrap();
        assert_eq!(grant.account.id.as_str(), "g1");
        assert_eq!(grant.token.split('.').count(), 3);

        let err = auth
            .sign_in_with_password("door@example.com", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Unauthorized);
    }

    #[tokio::test]
    async fn revoked_tokens_cannot_refresh() {
        let auth = InMemoryAuthenticator::new(Arc::new(test_clock()));
        auth.register("o1", "host@example.com", "secret", Some(Role::Organizer));
        let grant = auth
            .sign_in_with_password("host@example.com", "secret")
            .await
            .unwrap();

        assert!(auth.refresh(&grant.token).await.is_ok());
        auth.revoke_all();
        assert_eq!(auth.refresh(&grant.token).await, Err(BackendError::Unauthorized));
    }
}
