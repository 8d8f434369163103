//! Notification targeting and delivery.
//!
//! A notification is addressed to the sender, to every active employee of a
//! role, or to one employee, and fans out into one row per recipient at
//! write time. Delivery (`is_delivered`) is flipped by the recipient; a
//! delete marks the row delivered before removing it so concurrent viewers
//! never hold a deleted-but-unread ghost.

pub mod feed;
pub mod watcher;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit;
use crate::capabilities::{Capabilities, Capability};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::session::Session;
use crate::types::{Employee, Notification, Principal, Role};

pub use feed::{FeedView, NotificationFeed};
pub use watcher::NotificationWatcher;

/// Who a new notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    ToSelf,
    ToRole(Role),
    ToEmployee(String),
}

/// Form input for a new notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub description: String,
    pub scheduled_at: DateTime<Utc>,
    pub target: NotificationTarget,
}

/// Resolve the recipient ids for `target`.
pub async fn resolve_recipients(
    gw: &dyn RemoteGateway,
    sender: &Principal,
    target: &NotificationTarget,
) -> Result<Vec<String>, DashboardError> {
    match target {
        NotificationTarget::ToSelf => Ok(vec![sender.id.clone()]),
        NotificationTarget::ToEmployee(id) => {
            let employee = active_employee(gw, id).await?;
            Ok(vec![employee.id])
        }
        NotificationTarget::ToRole(role) => {
            Capabilities::for_principal(sender).require(Capability::BroadcastNotifications)?;
            let filter = Filter::eq("role", role.as_str()).and(Filter::eq("active", true));
            let employees: Vec<Employee> =
                gateway::select_as(gw, tables::EMPLOYEES, &filter).await?;
            let mut ids: Vec<String> = employees.into_iter().map(|e| e.id).collect();
            ids.sort();
            ids.dedup();
            if ids.is_empty() {
                return Err(DashboardError::NoRecipients(*role));
            }
            Ok(ids)
        }
    }
}

/// Create one notification row per recipient and return the stored rows.
pub async fn create_notification(
    gw: &dyn RemoteGateway,
    sender: &Principal,
    draft: NewNotification,
) -> Result<Vec<Notification>, DashboardError> {
    error::require("title", &draft.title)?;

    let recipients = resolve_recipients(gw, sender, &draft.target).await?;
    let target_role = match &draft.target {
        NotificationTarget::ToRole(role) => Some(*role),
        _ => None,
    };
    let now = Utc::now();
    let title = draft.title.trim().to_string();
    let description = draft.description.trim().to_string();

    let rows: Vec<Notification> = recipients
        .into_iter()
        .map(|assigned_to| Notification {
            id: crate::util::new_id(),
            title: title.clone(),
            description: description.clone(),
            scheduled_at: draft.scheduled_at,
            created_by: sender.id.clone(),
            assigned_to,
            target_role,
            is_delivered: false,
            created_at: now,
        })
        .collect();

    let stored = gateway::insert_as(gw, tables::NOTIFICATIONS, &rows).await?;
    log::info!(
        "Notifications: {} created {} row(s) for {:?}",
        sender.id,
        stored.len(),
        draft.target
    );
    Ok(stored)
}

/// Mark a notification delivered. Returns `false` (and records nothing) if
/// it already was.
pub async fn mark_delivered(
    gw: &dyn RemoteGateway,
    session: &Session,
    notification_id: &str,
) -> Result<bool, DashboardError> {
    let notification = load(gw, notification_id).await?;
    authorize_recipient(session, &notification)?;
    set_delivered(gw, session, &notification).await
}

/// Hard-delete a notification, marking it delivered first.
pub async fn delete_notification(
    gw: &dyn RemoteGateway,
    session: &Session,
    notification_id: &str,
) -> Result<Notification, DashboardError> {
    let notification = load(gw, notification_id).await?;
    let principal = session.effective();
    if notification.created_by != principal.id {
        authorize_recipient(session, &notification)?;
    }

    set_delivered(gw, session, &notification).await?;
    gw.delete(tables::NOTIFICATIONS, &Filter::eq("id", notification_id))
        .await?;

    audit::record(
        gw,
        session.audit_actor(),
        audit::NOTIFICATION_DELETED,
        "notification",
        notification_id,
        &notification.title,
    )
    .await?;
    Ok(notification)
}

/// Move a notification to another employee and reset its delivery state.
/// Concurrent reassignments are last-write-wins.
pub async fn reassign_notification(
    gw: &dyn RemoteGateway,
    session: &Session,
    notification_id: &str,
    new_assignee: &str,
) -> Result<Notification, DashboardError> {
    session
        .capabilities()
        .require(Capability::ManageNotifications)?;
    let notification = load(gw, notification_id).await?;
    let employee = active_employee(gw, new_assignee).await?;

    let mut rows = gw
        .update(
            tables::NOTIFICATIONS,
            &Filter::eq("id", notification_id),
            gateway::patch([
                ("assigned_to", json!(employee.id)),
                ("is_delivered", json!(false)),
            ]),
        )
        .await?;
    let updated: Notification = match rows.pop() {
        Some(row) => gateway::from_row(row)?,
        None => return Err(DashboardError::not_found("notification", notification_id)),
    };

    audit::record(
        gw,
        session.audit_actor(),
        audit::NOTIFICATION_REASSIGNED,
        "notification",
        notification_id,
        &format!("{} -> {}", notification.assigned_to, employee.id),
    )
    .await?;
    Ok(updated)
}

/// Notifications addressed to `principal`, latest schedule first.
pub async fn list_inbox(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<Notification>, DashboardError> {
    list(gw, FeedView::Inbox, &principal.id).await
}

/// Notifications `principal` sent, latest schedule first.
pub async fn list_sent(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<Notification>, DashboardError> {
    list(gw, FeedView::Sent, &principal.id).await
}

pub(crate) async fn list(
    gw: &dyn RemoteGateway,
    view: FeedView,
    owner_id: &str,
) -> Result<Vec<Notification>, DashboardError> {
    let mut rows: Vec<Notification> =
        gateway::select_as(gw, tables::NOTIFICATIONS, &view.filter(owner_id)).await?;
    feed::sort_newest_first(&mut rows);
    Ok(rows)
}

async fn load(gw: &dyn RemoteGateway, id: &str) -> Result<Notification, DashboardError> {
    gateway::select_one(gw, tables::NOTIFICATIONS, id)
        .await?
        .ok_or_else(|| DashboardError::not_found("notification", id))
}

async fn active_employee(gw: &dyn RemoteGateway, id: &str) -> Result<Employee, DashboardError> {
    let employee: Employee = gateway::select_one(gw, tables::EMPLOYEES, id)
        .await?
        .ok_or_else(|| DashboardError::not_found("employee", id))?;
    if !employee.active {
        return Err(DashboardError::InvalidField {
            field: "assigned_to".to_string(),
            reason: format!("{} is not an active employee", id),
        });
    }
    Ok(employee)
}

fn authorize_recipient(session: &Session, notification: &Notification) -> Result<(), DashboardError> {
    let principal = session.effective();
    if notification.assigned_to == principal.id
        || session.capabilities().has(Capability::ManageNotifications)
    {
        Ok(())
    } else {
        Err(DashboardError::PermissionDenied(format!(
            "notification {} is not addressed to {}",
            notification.id, principal.id
        )))
    }
}

/// Conditional on `is_delivered = false`, so two racing viewers produce a
/// single transition and a single audit entry.
async fn set_delivered(
    gw: &dyn RemoteGateway,
    session: &Session,
    notification: &Notification,
) -> Result<bool, DashboardError> {
    if notification.is_delivered {
        return Ok(false);
    }
    let filter = Filter::eq("id", notification.id.as_str()).and(Filter::eq("is_delivered", false));
    let updated = gw
        .update(
            tables::NOTIFICATIONS,
            &filter,
            gateway::patch([("is_delivered", json!(true))]),
        )
        .await?;
    if updated.is_empty() {
        return Ok(false);
    }

    audit::record(
        gw,
        session.audit_actor(),
        audit::NOTIFICATION_DELIVERED,
        "notification",
        &notification.id,
        "",
    )
    .await?;
    Ok(true)
}
