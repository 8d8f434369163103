//! Error types for dashboard operations
//!
//! Errors are classified by how the page boundary surfaces them:
//! - RemoteFetch: logged, the view falls back to an empty/loading state
//! - Validation / NoRecipients / InvalidTransition: inline blocking message
//! - PermissionDenied: route redirect, never a visible error

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::types::{ClientStatus, Role};

/// Error types for dashboard operations
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Remote request failed: {0}")]
    RemoteFetch(#[from] GatewayError),

    #[error("{field} is required")]
    Validation { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No active employees with role {0}")]
    NoRecipients(Role),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Client status cannot change from {from} to {to}")]
    InvalidTransition { from: ClientStatus, to: ClientStatus },
}

impl DashboardError {
    pub fn required(field: &str) -> Self {
        DashboardError::Validation {
            field: field.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        DashboardError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// There is no retry policy; this only says whether re-triggering the
    /// same action by hand could succeed.
    pub fn can_retrigger(&self) -> bool {
        matches!(self, DashboardError::RemoteFetch(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DashboardError::RemoteFetch(_) => "Check your connection and try the action again.",
            DashboardError::Validation { .. } => "Fill in the required field and submit again.",
            DashboardError::InvalidField { .. } => "Correct the highlighted field and submit again.",
            DashboardError::PermissionDenied(_) => "Ask an administrator for access.",
            DashboardError::NoRecipients(_) => {
                "Pick a specific employee or a role that has active members."
            }
            DashboardError::NotFound { .. } => "Refresh the page; the record may have been removed.",
            DashboardError::InvalidTransition { .. } => {
                "This client has already been closed out and cannot be reopened."
            }
        }
    }
}

/// Reject an empty (after trimming) required form field.
pub fn require(field: &str, value: &str) -> Result<(), DashboardError> {
    if value.trim().is_empty() {
        Err(DashboardError::required(field))
    } else {
        Ok(())
    }
}

/// Serializable error representation for the view layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
    /// Set for permission failures: where the router should send the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    RemoteFetch,
    Validation,
    PermissionDenied,
    NoRecipients,
    NotFound,
    InvalidTransition,
}

impl From<&DashboardError> for UiError {
    fn from(err: &DashboardError) -> Self {
        let error_type = match err {
            DashboardError::RemoteFetch(_) => ErrorType::RemoteFetch,
            DashboardError::Validation { .. } | DashboardError::InvalidField { .. } => {
                ErrorType::Validation
            }
            DashboardError::PermissionDenied(_) => ErrorType::PermissionDenied,
            DashboardError::NoRecipients(_) => ErrorType::NoRecipients,
            DashboardError::NotFound { .. } => ErrorType::NotFound,
            DashboardError::InvalidTransition { .. } => ErrorType::InvalidTransition,
        };

        let redirect_to = match err {
            DashboardError::PermissionDenied(_) => {
                Some(crate::routing::Route::Dashboard.path().to_string())
            }
            _ => None,
        };

        UiError {
            message: err.to_string(),
            error_type,
            can_retry: err.can_retrigger(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            redirect_to,
        }
    }
}

/// Convert a page-level result into something the view can render. Errors are
/// logged here and never travel further up the view tree.
pub fn at_boundary<T>(context: &str, result: Result<T, DashboardError>) -> Result<T, UiError> {
    result.map_err(|e| {
        match &e {
            DashboardError::RemoteFetch(_) => log::error!("{}: {}", context, e),
            DashboardError::PermissionDenied(_) => log::info!("{}: {}", context, e),
            _ => log::warn!("{}: {}", context, e),
        }
        UiError::from(&e)
    })
}
