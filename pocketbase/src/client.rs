//! PocketBase HTTP client.

use crate::sse::{SseMessage, SseParser};
use async_stream::stream;
use futures::{Stream, StreamExt};
use guestpass_core::backend::{
    AuthGrant, Authenticator, Backend, BackendError, BackendFuture, ListQuery, Page, Record,
    RecordEvent, Result, Subscription, collections, guard_holds,
};
use guestpass_core::model::Account;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default bound on every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    record: Record,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connect {
    client_id: String,
}

/// Client for one PocketBase server.
///
/// Implements [`Backend`] over the records API and [`Authenticator`] over
/// the `users` auth collection. A successful sign-in stores the token on the
/// client; clones share it, so every service built from the same client acts
/// as the signed-in account.
#[derive(Clone)]
pub struct PocketBaseClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for PocketBaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketBaseClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PocketBaseClient {
    /// Create a client for the server at `base_url`.
    ///
    /// `timeout` bounds every request except the long-lived realtime
    /// stream, which is only bounded while connecting.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be
    /// built (e.g. TLS backend initialisation failure).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Use an existing token.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    /// Replace (or clear) the stored token.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    /// Currently stored token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    /// Server base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.base_url)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{id}", self.records_url(collection))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))
    }

    fn transport_error(&self, error: &reqwest::Error) -> BackendError {
        if error.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(error.to_string())
        }
    }

    /// Decode a successful response, or map the failure status.
    async fn record_response(
        &self,
        response: Response,
        collection: &str,
        id: &str,
    ) -> Result<Record> {
        let response = check_status(response, collection, id).await?;
        response
            .json::<Record>()
            .await
            .map_err(|e| self.body_error(&e))
    }

    fn body_error(&self, error: &reqwest::Error) -> BackendError {
        if error.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Malformed(error.to_string())
        }
    }

    async fn patch(&self, collection: &str, id: &str, fields: &Record) -> Result<Record> {
        let response = self
            .send(self.http.patch(self.record_url(collection, id)).json(fields))
            .await?;
        self.record_response(response, collection, id).await
    }

    async fn auth_request(
        &self,
        url: String,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<AuthGrant> {
        let mut request = self.http.post(url).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(token) = token {
            request = request.header("Authorization", token);
        }
        let response = request.send().await.map_err(|e| self.transport_error(&e))?;

        let response = match response.status() {
            // Wrong credentials come back as a generic 400.
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                return Err(BackendError::Unauthorized);
            },
            _ => check_status(response, collections::USERS, "").await?,
        };
        let auth: AuthResponse = response.json().await.map_err(|e| self.body_error(&e))?;
        let account =
            Account::from_record(&auth.record).map_err(|e| BackendError::Malformed(e.to_string()))?;

        self.set_token(Some(auth.token.clone()));
        tracing::info!(account = %account.id, "Authenticated against PocketBase");
        Ok(AuthGrant {
            token: auth.token,
            account,
        })
    }

    async fn open_realtime(&self, collection: &str, topic: &str) -> Result<Subscription> {
        let response = self
            .authorize(self.http.get(format!("{}/api/realtime", self.base_url)))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let response = check_status(response, collection, topic).await?;

        let mut bytes = Box::pin(response.bytes_stream());
        let mut parser = SseParser::default();
        let mut pending = VecDeque::new();

        let client_id = tokio::time::timeout(
            self.timeout,
            await_connect(&mut bytes, &mut parser, &mut pending),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout))??;

        let subscription = format!("{collection}/{topic}");
        let response = self
            .send(self.http.post(format!("{}/api/realtime", self.base_url)).json(&json!({
                "clientId": client_id,
                "subscriptions": [subscription],
            })))
            .await?;
        check_status(response, collection, topic).await?;
        tracing::debug!(%client_id, %subscription, "Realtime subscription established");

        let name = subscription.clone();
        let events = stream! {
            let mut queued = pending;
            while let Some(message) = queued.pop_front() {
                if let Some(event) = decode_event(&name, &message.event, &message.data) {
                    yield event;
                }
            }
            while let Some(chunk) = bytes.next().await {
                let Ok(chunk) = chunk else {
                    tracing::warn!(subscription = %name, "Realtime stream interrupted");
                    break;
                };
                for message in parser.push(&chunk) {
                    if let Some(event) = decode_event(&name, &message.event, &message.data) {
                        yield event;
                    }
                }
            }
        };

        let client = self.clone();
        Ok(Subscription::new(collection, topic, events, move || {
            // The stream is dropped with the subscription; also tell the
            // server so it stops routing events to this client id.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let request = client
                        .http
                        .post(format!("{}/api/realtime", client.base_url))
                        .json(&json!({"clientId": client_id, "subscriptions": []}));
                    if let Err(error) = client.send(request).await {
                        tracing::debug!(%error, "Realtime unsubscribe failed");
                    }
                });
            }
        }))
    }
}

/// Read the stream until the server announces our client id.
async fn await_connect<S, B>(
    bytes: &mut S,
    parser: &mut SseParser,
    pending: &mut VecDeque<SseMessage>,
) -> Result<String>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut client_id = None;
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| BackendError::Transport(e.to_string()))?;
        for message in parser.push(chunk.as_ref()) {
            if client_id.is_none() && message.event == "PB_CONNECT" {
                let connect: Connect = serde_json::from_str(&message.data)
                    .map_err(|e| BackendError::Malformed(e.to_string()))?;
                client_id = Some(connect.client_id);
            } else {
                pending.push_back(message);
            }
        }
        if let Some(client_id) = client_id {
            return Ok(client_id);
        }
    }
    Err(BackendError::Transport(
        "realtime stream closed before connecting".to_string(),
    ))
}

fn decode_event(subscription: &str, event: &str, data: &str) -> Option<RecordEvent> {
    if event != subscription {
        return None;
    }
    match serde_json::from_str::<RecordEvent>(data) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(%subscription, %error, "Skipping malformed realtime event");
            None
        },
    }
}

/// Map a non-success status to a [`BackendError`].
async fn check_status(response: Response, collection: &str, id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => BackendError::not_found(collection, id),
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized,
        StatusCode::FORBIDDEN => BackendError::Forbidden(message),
        status => BackendError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

fn list_params(query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("page", query.page.to_string())];
    if query.count_only {
        params.push(("perPage", "1".to_string()));
        params.push(("fields", "id".to_string()));
    } else {
        params.push(("perPage", query.per_page.to_string()));
    }
    if let Some(filter) = query.rendered_filter() {
        params.push(("filter", filter));
    }
    if let Some(sort) = query.rendered_sort() {
        params.push(("sort", sort));
    }
    if !query.expand.is_empty() {
        params.push(("expand", query.expand.join(",")));
    }
    params
}

impl Backend for PocketBaseClient {
    fn get_one<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, Record> {
        Box::pin(async move {
            let response = self.send(self.http.get(self.record_url(collection, id))).await?;
            self.record_response(response, collection, id).await
        })
    }

    fn get_list<'a>(
        &'a self,
        collection: &'a str,
        query: &'a ListQuery,
    ) -> BackendFuture<'a, Page> {
        Box::pin(async move {
            let request = self
                .http
                .get(self.records_url(collection))
                .query(&list_params(query));
            let response = check_status(self.send(request).await?, collection, "").await?;
            let mut page: Page = response.json().await.map_err(|e| self.body_error(&e))?;
            if query.count_only {
                page.items.clear();
                page.per_page = query.per_page;
            }
            Ok(page)
        })
    }

    fn create<'a>(&'a self, collection: &'a str, fields: Record) -> BackendFuture<'a, Record> {
        Box::pin(async move {
            let response = self
                .send(self.http.post(self.records_url(collection)).json(&fields))
                .await?;
            self.record_response(response, collection, "").await
        })
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Record,
    ) -> BackendFuture<'a, Record> {
        Box::pin(async move { self.patch(collection, id, &fields).await })
    }

    /// PocketBase has no conditional PATCH. The guard is checked against a
    /// fresh read, and a 404 on the PATCH itself is read as "guard no longer
    /// holds". Only a collection whose update rule encodes the guard rejects
    /// a losing writer that way; for attendees that is
    /// [`ATTENDEE_UPDATE_RULE`](crate::ATTENDEE_UPDATE_RULE). Without it two
    /// concurrent calls can both pass the read.
    fn update_where<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        guard: &'a Record,
        fields: Record,
    ) -> BackendFuture<'a, Option<Record>> {
        Box::pin(async move {
            let current = self.get_one(collection, id).await?;
            if !guard_holds(&current, guard) {
                return Ok(None);
            }
            match self.patch(collection, id, &fields).await {
                Ok(record) => Ok(Some(record)),
                Err(BackendError::NotFound { .. }) => Ok(None),
                Err(error) => Err(error),
            }
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let response = self.send(self.http.delete(self.record_url(collection, id))).await?;
            check_status(response, collection, id).await?;
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        topic: &'a str,
    ) -> BackendFuture<'a, Subscription> {
        Box::pin(self.open_realtime(collection, topic))
    }
}

impl Authenticator for PocketBaseClient {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BackendFuture<'a, AuthGrant> {
        Box::pin(async move {
            let url = format!(
                "{}/api/collections/{}/auth-with-password",
                self.base_url,
                collections::USERS
            );
            self.auth_request(
                url,
                Some(json!({"identity": email.trim(), "password": password})),
                None,
            )
            .await
        })
    }

    fn refresh<'a>(&'a self, token: &'a str) -> BackendFuture<'a, AuthGrant> {
        Box::pin(async move {
            let url = format!(
                "{}/api/collections/{}/auth-refresh",
                self.base_url,
                collections::USERS
            );
            self.auth_request(url, None, Some(token)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestpass_core::{Filter, Sort};

    #[test]
    fn list_params_render_query() {
        let query = ListQuery::new()
            .per_page(50)
            .filter(Filter::eq("scannedBy", "g1"))
            .sort(Sort::desc("scannedAt"))
            .expand("attendeeId");
        let params = list_params(&query);
        assert!(params.contains(&("perPage", "50".to_string())));
        assert!(params.contains(&("filter", r#"scannedBy = "g1""#.to_string())));
        assert!(params.contains(&("sort", "-scannedAt".to_string())));
        assert!(params.contains(&("expand", "attendeeId".to_string())));
    }

    #[test]
    fn count_only_requests_a_single_id() {
        let params = list_params(&ListQuery::new().count_only());
        assert!(params.contains(&("perPage", "1".to_string())));
        assert!(params.contains(&("fields", "id".to_string())));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = PocketBaseClient::new("http://127.0.0.1:8090/", DEFAULT_TIMEOUT);
        assert_eq!(
            client.map(|c| c.records_url("parties")).ok().as_deref(),
            Some("http://127.0.0.1:8090/api/collections/parties/records")
        );
    }
}
