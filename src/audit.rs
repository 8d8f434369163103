//! Audit trail for privileged and user-visible state changes.
//!
//! Entries are rows in the remote `audit_log` table. The actor is the human
//! at the keyboard; the effective id differs only while impersonating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};

pub const IMPERSONATION_STARTED: &str = "impersonation.started";
pub const IMPERSONATION_ENDED: &str = "impersonation.ended";
pub const IMPERSONATION_REFUSED: &str = "impersonation.refused";
pub const NOTIFICATION_DELIVERED: &str = "notification.delivered";
pub const NOTIFICATION_DELETED: &str = "notification.deleted";
pub const NOTIFICATION_REASSIGNED: &str = "notification.reassigned";

/// A row from `audit_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub effective_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Who performed an audited action.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub actor_id: &'a str,
    pub effective_id: &'a str,
}

impl<'a> Actor<'a> {
    pub fn direct(id: &'a str) -> Self {
        Self {
            actor_id: id,
            effective_id: id,
        }
    }
}

/// Append an entry to the audit log.
pub async fn record(
    gateway: &dyn RemoteGateway,
    actor: Actor<'_>,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    detail: &str,
) -> Result<AuditEntry, DashboardError> {
    let entry = AuditEntry {
        id: crate::util::new_id(),
        actor_id: actor.actor_id.to_string(),
        effective_id: actor.effective_id.to_string(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        detail: detail.to_string(),
        created_at: Utc::now(),
    };
    gateway::insert_as(gateway, tables::AUDIT_LOG, std::slice::from_ref(&entry)).await?;
    log::info!(
        "Audit: {} by {} (as {}) on {} {}",
        action,
        entry.actor_id,
        entry.effective_id,
        entity_type,
        entity_id
    );
    Ok(entry)
}

/// Entries for one entity, oldest first.
pub async fn entries_for(
    gateway: &dyn RemoteGateway,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, DashboardError> {
    let filter = Filter::eq("entity_type", entity_type).and(Filter::eq("entity_id", entity_id));
    let mut entries: Vec<AuditEntry> =
        gateway::select_as(gateway, tables::AUDIT_LOG, &filter).await?;
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(entries)
}
