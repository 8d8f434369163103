use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Roles & principals
// =============================================================================

/// Role string as stored on the employee row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "head")]
    Head,
    #[serde(rename = "employee")]
    Employee,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "e.head")]
    ExecutionHead,
    #[serde(rename = "e.employee")]
    ExecutionEmployee,
    #[serde(rename = "finance.employee")]
    FinanceEmployee,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Head,
        Role::Employee,
        Role::Admin,
        Role::ExecutionHead,
        Role::ExecutionEmployee,
        Role::FinanceEmployee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Head => "head",
            Role::Employee => "employee",
            Role::Admin => "admin",
            Role::ExecutionHead => "e.head",
            Role::ExecutionEmployee => "e.employee",
            Role::FinanceEmployee => "finance.employee",
        }
    }

    /// The visibility partition this role works in. There is no department
    /// column on clients; the partition follows the roles of the people who
    /// created or were assigned to a client.
    pub fn track(&self) -> Track {
        match self {
            Role::Head | Role::Employee | Role::Admin => Track::Marketing,
            Role::ExecutionHead | Role::ExecutionEmployee => Track::Execution,
            Role::FinanceEmployee => Track::Finance,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown role: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Marketing,
    Execution,
    Finance,
}

/// The authenticated identity every resolver receives explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A row from the `employees` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Employee {
    pub fn principal(&self) -> Principal {
        Principal::new(self.id.clone(), self.role)
    }
}

fn default_true() -> bool {
    true
}

/// Client lifecycle. `Ongoing` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Ongoing,
    Completed,
    #[serde(rename = "poreceived")]
    PoReceived,
    #[serde(rename = "ecomplete")]
    ExecutionComplete,
}

impl ClientStatus {
    pub const TERMINAL: [ClientStatus; 3] = [
        ClientStatus::Completed,
        ClientStatus::PoReceived,
        ClientStatus::ExecutionComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Ongoing => "ongoing",
            ClientStatus::Completed => "completed",
            ClientStatus::PoReceived => "poreceived",
            ClientStatus::ExecutionComplete => "ecomplete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClientStatus::Ongoing)
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A row from the `clients` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub address: String,
    pub status: ClientStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A row from `client_assignments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssignment {
    pub id: String,
    pub client_id: String,
    pub employee_id: String,
}

/// A row from `client_status_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: String,
    pub client_id: String,
    pub old_status: ClientStatus,
    pub new_status: ClientStatus,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
}

/// A row from the `notifications` table. One row per recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: String,
    pub assigned_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role: Option<Role>,
    #[serde(default)]
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotationStatus {
    Pending,
    Approved,
    Rejected,
}

/// A row from the `quotations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: String,
    pub client_id: String,
    pub created_by: String,
    pub title: String,
    pub amount: f64,
    pub status: QuotationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteVisitStatus {
    Scheduled,
    Visited,
    Approved,
}

/// A row from the `site_visits` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteVisit {
    pub id: String,
    pub client_id: String,
    pub created_by: String,
    pub visit_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    pub status: SiteVisitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row from the `documents` table. The bytes live in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub client_id: String,
    pub uploaded_by: String,
    pub file_name: String,
    pub bucket: String,
    pub storage_path: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Configuration
// =============================================================================

/// `~/.sitedesk/config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    /// Base URL of the hosted backend (REST only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// SQLite file; defaults to `~/.sitedesk/sitedesk.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// Secret mixed into local signed storage URLs.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Sqlite
}

fn default_signing_secret() -> String {
    "sitedesk-local".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            url: None,
            api_key: None,
            database_path: None,
            signing_secret: default_signing_secret(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Lifetime of signed document URLs.
    #[serde(default = "default_signed_url_secs")]
    pub signed_url_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_signed_url_secs() -> u64 {
    3600
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            signed_url_secs: default_signed_url_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_wire_strings() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("manager".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_tracks() {
        assert_eq!(Role::Head.track(), Track::Marketing);
        assert_eq!(Role::ExecutionEmployee.track(), Track::Execution);
        assert_eq!(Role::FinanceEmployee.track(), Track::Finance);
    }

    #[test]
    fn test_client_status_wire_strings() {
        let status: ClientStatus = serde_json::from_str("\"poreceived\"").unwrap();
        assert_eq!(status, ClientStatus::PoReceived);
        assert!(status.is_terminal());
        assert!(!ClientStatus::Ongoing.is_terminal());
        assert_eq!(ClientStatus::ExecutionComplete.to_string(), "ecomplete");
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend.kind, BackendKind::Sqlite);
        assert_eq!(config.notifications.poll_interval_secs, 30);
        assert!(config.backend.url.is_none());
    }

    #[test]
    fn test_config_camel_case_fields() {
        let config: Config = serde_json::from_str(
            r#"{"backend": {"kind": "rest", "url": "https://example.test", "apiKey": "k"},
                "notifications": {"pollIntervalSecs": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Rest);
        assert_eq!(config.backend.api_key.as_deref(), Some("k"));
        assert_eq!(config.notifications.poll_interval_secs, 10);
        assert_eq!(config.notifications.signed_url_secs, 3600);
    }
}
