//! Hosted auth/database/storage collaborator.
//!
//! The client never owns data directly: every read and write goes through one
//! of the three traits below. [`supabase::SupabaseClient`] talks to the hosted
//! project; [`sqlite::SqliteRowStore`] keeps rows on disk when history is
//! configured to stay local.

pub mod sqlite;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

pub type BackendResult<T> = Result<T, BackendError>;

/// Timestamp format used for every `created_at` column (UTC, millisecond
/// precision, `Z` suffix) so range filters compare lexically.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn timestamp_now() -> String {
    format_timestamp(chrono::Utc::now())
}

/// Named row collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Conversations,
    ConversationsAdd,
    DocumentAnalysis,
    Prompt,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Conversations => "conversations",
            Table::ConversationsAdd => "conversations_add",
            Table::DocumentAnalysis => "document_analysis",
            Table::Prompt => "prompt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lt,
}

impl FilterOp {
    fn rest_prefix(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

/// Row filter in the style of a PostgREST query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn gte(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl ToString) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.to_string(),
        });
        self
    }

    pub fn order(mut self, column: &str, descending: bool) -> Self {
        self.order_by = Some((column.to_string(), descending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs understood by PostgREST.
    pub fn to_rest_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.column.clone(), format!("{}.{}", f.op.rest_prefix(), f.value)))
            .collect();
        if let Some((column, descending)) = &self.order_by {
            let direction = if *descending { "desc" } else { "asc" };
            params.push(("order".to_string(), format!("{column}.{direction}")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

impl AuthUser {
    pub fn display_name(&self) -> Option<String> {
        self.user_metadata
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

/// Auth state change pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user: AuthUser },
    TokenRefreshed { user: AuthUser },
    SignedOut,
    UserDeleted,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> BackendResult<AuthUser>;
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession>;
    async fn sign_out(&self) -> BackendResult<()>;
    async fn resend_verification(&self, email: &str) -> BackendResult<()>;
    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> BackendResult<()>;
    async fn update_password(&self, password: &str) -> BackendResult<()>;
    fn current_session(&self) -> Option<AuthSession>;
    /// New receiver on the auth-state-change stream.
    fn subscribe(&self) -> flume::Receiver<AuthEvent>;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Inserts one row and returns it as stored (with generated columns).
    async fn insert(&self, table: Table, row: Value) -> BackendResult<Value>;
    async fn select(&self, table: Table, query: &Query) -> BackendResult<Vec<Value>>;
    /// Applies `patch` to matching rows and returns how many changed.
    async fn update(&self, table: Table, query: &Query, patch: Value) -> BackendResult<usize>;
    async fn delete(&self, table: Table, query: &Query) -> BackendResult<usize>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// The three collaborator surfaces, shared by every component.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthBackend>,
    pub rows: Arc<dyn RowStore>,
    pub storage: Arc<dyn ObjectStore>,
}

/// Row ids arrive as uuid strings or as bigserial integers depending on how
/// the table was created.
pub fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported row id {other}"))),
    }
}

/// Deserializes a list of rows, skipping (and logging) rows that do not fit.
pub fn decode_rows<T: serde::de::DeserializeOwned>(table: Table, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                tracing::warn!("Skipping malformed {} row: {}", table.as_str(), error);
                None
            }
        })
        .collect()
}
