use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    AuthBackend, AuthEvent, AuthSession, AuthUser, BackendResult, ObjectStore, Query, RowStore,
    Table,
};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// REST client for a hosted Supabase-style project (GoTrue auth, PostgREST
/// rows, object storage).
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
    subscribers: Mutex<Vec<flume::Sender<AuthEvent>>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

impl SupabaseClient {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            base_url: config.project_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            client: reqwest::Client::new(),
            session: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    fn set_session(&self, session: Option<AuthSession>) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn emit(&self, event: AuthEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let bearer = self
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> BackendResult<reqwest::Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body);
        self.check_user_gone(status, &message);
        Err(BackendError::http(status, message))
    }

    /// Drops the session when the server says the signed-in user no longer
    /// exists.
    fn check_user_gone(&self, status: u16, message: &str) {
        if self.access_token().is_none() || !user_gone(status, message) {
            return;
        }
        tracing::warn!("Signed-in user no longer exists: {}", message);
        self.set_session(None);
        self.emit(AuthEvent::UserDeleted);
    }

    fn rest_path(table: Table) -> String {
        format!("/rest/v1/{}", table.as_str())
    }
}

fn user_gone(status: u16, message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    matches!(status, 401 | 403 | 404)
        && (message.contains("user_not_found")
            || message.contains("user not found")
            || message.contains("does not exist"))
}

/// Pulls the human-readable message out of a GoTrue/PostgREST error body.
fn extract_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl AuthBackend for SupabaseClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> BackendResult<AuthUser> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/auth/v1/signup")
                    .json(&json!({ "email": email, "password": password, "data": metadata })),
            )
            .await?;
        let body: Value = response.json().await?;
        // Signup returns either a bare user or `{ user, session }` depending on
        // whether email confirmation is enabled for the project.
        let user = body.get("user").cloned().unwrap_or(body);
        Ok(serde_json::from_value(user)?)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/auth/v1/token?grant_type=password")
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let token: TokenResponse = response.json().await?;
        let session = AuthSession {
            access_token: token.access_token,
            user: token.user,
        };
        self.set_session(Some(session.clone()));
        tracing::info!("Signed in as {}", session.user.id);
        self.emit(AuthEvent::SignedIn {
            user: session.user.clone(),
        });
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.access_token().is_some() {
            self.send(self.request(reqwest::Method::POST, "/auth/v1/logout"))
                .await?;
        }
        self.set_session(None);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn resend_verification(&self, email: &str) -> BackendResult<()> {
        self.send(
            self.request(reqwest::Method::POST, "/auth/v1/resend")
                .json(&json!({ "type": "signup", "email": email })),
        )
        .await?;
        Ok(())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> BackendResult<()> {
        let mut request = self
            .request(reqwest::Method::POST, "/auth/v1/recover")
            .json(&json!({ "email": email }));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }
        self.send(request).await?;
        Ok(())
    }

    async fn update_password(&self, password: &str) -> BackendResult<()> {
        if self.access_token().is_none() {
            return Err(BackendError::Unauthenticated);
        }
        let response = self
            .send(
                self.request(reqwest::Method::PUT, "/auth/v1/user")
                    .json(&json!({ "password": password })),
            )
            .await?;
        let user: AuthUser = response.json().await?;
        self.emit(AuthEvent::TokenRefreshed { user });
        Ok(())
    }

    fn current_session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn subscribe(&self) -> flume::Receiver<AuthEvent> {
        let (tx, rx) = flume::unbounded();
        if let Some(session) = self.current_session() {
            let _ = tx.send(AuthEvent::SignedIn { user: session.user });
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }
}

#[async_trait]
impl RowStore for SupabaseClient {
    async fn insert(&self, table: Table, row: Value) -> BackendResult<Value> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, &Self::rest_path(table))
                    .header("Prefer", "return=representation")
                    .json(&json!([row])),
            )
            .await?;
        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(BackendError::Decode(format!(
                "insert into {} returned no rows",
                table.as_str()
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn select(&self, table: Table, query: &Query) -> BackendResult<Vec<Value>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query.to_rest_params());
        let response = self
            .send(self.request(reqwest::Method::GET, &Self::rest_path(table)).query(&params))
            .await?;
        Ok(response.json().await?)
    }

    async fn update(&self, table: Table, query: &Query, patch: Value) -> BackendResult<usize> {
        let response = self
            .send(
                self.request(reqwest::Method::PATCH, &Self::rest_path(table))
                    .query(&query.to_rest_params())
                    .header("Prefer", "return=representation")
                    .json(&patch),
            )
            .await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len())
    }

    async fn delete(&self, table: Table, query: &Query) -> BackendResult<usize> {
        let response = self
            .send(
                self.request(reqwest::Method::DELETE, &Self::rest_path(table))
                    .query(&query.to_rest_params())
                    .header("Prefer", "return=representation"),
            )
            .await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl ObjectStore for SupabaseClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<()> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/storage/v1/object/{}/{}", bucket, path),
            )
            .header("Content-Type", content_type)
            .header("Cache-Control", "max-age=3600")
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes),
        )
        .await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }
}
