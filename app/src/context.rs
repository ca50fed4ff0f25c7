//! Wiring of backend, clock and configuration into services.
//!
//! One [`AppContext`] is built at start-up and handed to the screens; it
//! replaces a process-wide client handle. Every backend call made through
//! services it builds is bounded by the configured request timeout.

use crate::attendees::AttendeeService;
use crate::codes::CodeAllocator;
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::parties::PartyService;
use crate::redemption::Redeemer;
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionContext};
use crate::timeout::TimeoutBackend;
use crate::views::Views;
use guestpass_core::backend::{Authenticator, Backend, BackendError};
use guestpass_core::environment::{Clock, SystemClock};
use guestpass_core::model::Role;
use guestpass_core::validation::LoginForm;
use guestpass_pocketbase::PocketBaseClient;
use std::sync::Arc;

/// Shared dependencies of one app.
#[derive(Clone)]
pub struct AppContext {
    backend: Arc<dyn Backend>,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    config: Config,
    client: Option<PocketBaseClient>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Build a context over arbitrary collaborators.
    ///
    /// `backend` is wrapped so every call is bounded by
    /// `config.request_timeout`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let backend = Arc::new(TimeoutBackend::new(backend, config.request_timeout));
        Self {
            backend,
            authenticator,
            clock,
            config,
            client: None,
        }
    }

    /// Connect to the PocketBase server named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Connectivity`] if the HTTP client cannot be
    /// built.
    pub fn connect(config: Config) -> Result<Self> {
        let client = PocketBaseClient::new(config.backend_url.as_str(), config.request_timeout)?;
        tracing::info!(url = client.base_url(), "Connected to record store");

        let mut context = Self::new(
            Arc::new(client.clone()),
            Arc::new(client.clone()),
            Arc::new(SystemClock),
            config,
        );
        context.client = Some(client);
        Ok(context)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The timeout-bounded backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    /// Injected clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn codes(&self) -> CodeAllocator {
        CodeAllocator::new(self.config.code_attempts)
    }

    /// Redemption for the guard app.
    #[must_use]
    pub fn redeemer(&self) -> Redeemer {
        Redeemer::new(self.backend(), self.clock())
            .with_policy(self.config.write_policy)
            .with_audit_retry(
                RetryPolicy::builder()
                    .max_retries(self.config.audit_retries)
                    .build(),
            )
    }

    /// Party operations for the organizer app.
    #[must_use]
    pub fn parties(&self) -> PartyService {
        PartyService::new(self.backend())
            .with_codes(self.codes())
            .with_cascade(self.config.cascade_policy)
            .with_share_base_url(self.config.share_base_url.clone())
    }

    /// Guest registration for the organizer app.
    #[must_use]
    pub fn attendees(&self) -> AttendeeService {
        AttendeeService::new(self.backend()).with_codes(self.codes())
    }

    /// Query views.
    #[must_use]
    pub fn views(&self) -> Views {
        Views::new(self.backend())
    }

    /// Sign in to an app requiring `role`, bounded by the request timeout.
    ///
    /// A rejected sign-in leaves no credentials behind on the client.
    ///
    /// # Errors
    ///
    /// See [`SessionContext::sign_in`]; a timeout yields
    /// [`ServiceError::Connectivity`].
    pub async fn sign_in(
        &self,
        sessions: &mut SessionContext,
        form: &LoginForm,
        role: Role,
    ) -> Result<Session> {
        let limit = self.config.request_timeout;
        let signed_in = tokio::time::timeout(
            limit,
            sessions.sign_in(self.authenticator.as_ref(), form, role),
        )
        .await
        .unwrap_or(Err(ServiceError::Connectivity(BackendError::Timeout(limit))))
        .cloned();

        if signed_in.is_err() {
            self.clear_client_token();
        }
        signed_in
    }

    /// Adopt a persisted session, re-arming the client with its token.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Forbidden`] if the role does not match.
    pub fn restore(
        &self,
        sessions: &mut SessionContext,
        session: Session,
        role: Role,
    ) -> Result<Session> {
        let token = session.token.clone();
        let restored = sessions.restore(session, role).cloned()?;
        if let Some(client) = &self.client {
            client.set_token(Some(token));
        }
        Ok(restored)
    }

    /// Sign out and forget the client's credentials.
    pub fn sign_out(&self, sessions: &mut SessionContext) {
        sessions.sign_out();
        self.clear_client_token();
    }

    fn clear_client_token(&self) {
        if let Some(client) = &self.client {
            client.set_token(None);
        }
    }
}
