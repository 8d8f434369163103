//! Remote data gateway.
//!
//! Every page talks to the backend through [`RemoteGateway`]: table-style
//! select/insert/update/delete with filter predicates, blob storage, and a
//! realtime change feed keyed by table + filter. The decision logic in this
//! crate depends only on these primitives.

pub mod rest;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{BackendConfig, BackendKind};

pub use rest::RestGateway;
pub use sqlite::SqliteGateway;

/// A row as it travels over the wire: column name → JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Remote table names.
pub mod tables {
    pub const EMPLOYEES: &str = "employees";
    pub const CLIENTS: &str = "clients";
    pub const CLIENT_ASSIGNMENTS: &str = "client_assignments";
    pub const CLIENT_STATUS_HISTORY: &str = "client_status_history";
    pub const CLIENT_CHECKLIST: &str = "client_checklist";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const QUOTATIONS: &str = "quotations";
    pub const SITE_VISITS: &str = "site_visits";
    pub const DOCUMENTS: &str = "documents";
    pub const AUDIT_LOG: &str = "audit_log";
}

/// Storage bucket for client documents.
pub const DOCUMENTS_BUCKET: &str = "documents";

/// Errors raised by gateway implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode row: {0}")]
    Decode(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Storage object not found: {bucket}/{path}")]
    ObjectNotFound { bucket: String, path: String },

    #[error("Realtime change feed is not available on this backend")]
    RealtimeUnavailable,

    #[error("Gateway configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Row predicate. Mirrors the remote query API (`eq`, `in`, `or`); `And`
/// is what chaining several filters on one query produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    /// Evaluate the predicate locally. Used by the SQLite backend and by
    /// subscriptions to route change events.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(col, v) => row.get(col).is_some_and(|x| x == v),
            Filter::In(col, vs) => row.get(col).is_some_and(|x| vs.contains(x)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(row)),
            Filter::And(fs) => fs.iter().all(|f| f.matches(row)),
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { table: String, new: Row },
    Update { table: String, old: Row, new: Row },
    Delete { table: String, old: Row },
}

impl ChangeEvent {
    pub fn table(&self) -> &str {
        match self {
            ChangeEvent::Insert { table, .. }
            | ChangeEvent::Update { table, .. }
            | ChangeEvent::Delete { table, .. } => table,
        }
    }

    /// An update is routed to a subscriber when either side matches, so a
    /// row moving out of a filter still reaches the view that held it.
    fn matches(&self, filter: &Filter) -> bool {
        match self {
            ChangeEvent::Insert { new, .. } => filter.matches(new),
            ChangeEvent::Update { old, new, .. } => filter.matches(old) || filter.matches(new),
            ChangeEvent::Delete { old, .. } => filter.matches(old),
        }
    }
}

/// A live change feed for one table + filter. Dropping it tears the
/// listener down.
pub struct Subscription {
    table: String,
    filter: Filter,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(table: &str, filter: Filter, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            table: table.to_string(),
            filter,
            rx,
        }
    }

    /// Next matching event, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.table() == self.table && event.matches(&self.filter) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscription on {}: lagged, {} events skipped",
                        self.table,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError>;

    /// Insert rows and return them as stored.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError>;

    /// Merge `patch` into every matching row; returns the updated rows.
    async fn update(&self, table: &str, filter: &Filter, patch: Row)
        -> Result<Vec<Row>, GatewayError>;

    /// Hard delete; returns the removed rows.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, GatewayError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, GatewayError>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), GatewayError>;

    async fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, GatewayError>;
}

/// Build the gateway named by the backend config.
pub fn connect(config: &BackendConfig) -> Result<Arc<dyn RemoteGateway>, GatewayError> {
    match config.kind {
        BackendKind::Sqlite => {
            let path = match &config.database_path {
                Some(p) => std::path::PathBuf::from(p),
                None => dirs::home_dir()
                    .ok_or_else(|| GatewayError::Configuration("Home directory not found".into()))?
                    .join(".sitedesk")
                    .join("sitedesk.db"),
            };
            let gateway = SqliteGateway::open_at(path, &config.signing_secret)?;
            Ok(Arc::new(gateway))
        }
        BackendKind::Rest => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| GatewayError::Configuration("backend.url is not set".into()))?;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| GatewayError::Configuration("backend.apiKey is not set".into()))?;
            Ok(Arc::new(RestGateway::new(url, api_key)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Typed helpers
// ---------------------------------------------------------------------------

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, GatewayError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(GatewayError::Decode(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, GatewayError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub async fn select_as<T: DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: &str,
    filter: &Filter,
) -> Result<Vec<T>, GatewayError> {
    gateway
        .select(table, filter)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

pub async fn select_one<T: DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: &str,
    id: &str,
) -> Result<Option<T>, GatewayError> {
    let mut rows = gateway.select(table, &Filter::eq("id", id)).await?;
    match rows.pop() {
        Some(row) => Ok(Some(from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn insert_as<T: Serialize + DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: &str,
    values: &[T],
) -> Result<Vec<T>, GatewayError> {
    let rows = values.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
    gateway
        .insert(table, rows)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

/// Build a patch row from `(column, value)` pairs.
pub fn patch<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
