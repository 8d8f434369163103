// Logs service: status history and audit trail for the logs page.

use std::collections::HashMap;

use serde::Serialize;

use crate::audit::AuditEntry;
use crate::capabilities::{Capabilities, Capability};
use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Client, Employee, Principal, StatusChange};
use crate::workflow;

/// A status change with display names resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLogRow {
    #[serde(flatten)]
    pub change: StatusChange,
    pub client_name: Option<String>,
    pub changed_by_name: Option<String>,
}

/// Every status change, newest first.
pub async fn status_log(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<StatusLogRow>, DashboardError> {
    let mut history = workflow::full_history(gw, principal).await?;
    history.reverse();
    if history.is_empty() {
        return Ok(Vec::new());
    }

    let client_ids: Vec<&str> = history.iter().map(|c| c.client_id.as_str()).collect();
    let clients: Vec<Client> =
        gateway::select_as(gw, tables::CLIENTS, &Filter::is_in("id", client_ids)).await?;
    let employee_ids: Vec<&str> = history.iter().map(|c| c.changed_by.as_str()).collect();
    let employees: Vec<Employee> =
        gateway::select_as(gw, tables::EMPLOYEES, &Filter::is_in("id", employee_ids)).await?;

    let client_names: HashMap<String, String> =
        clients.into_iter().map(|c| (c.id, c.name)).collect();
    let employee_names: HashMap<String, String> =
        employees.into_iter().map(|e| (e.id, e.name)).collect();

    Ok(history
        .into_iter()
        .map(|change| StatusLogRow {
            client_name: client_names.get(&change.client_id).cloned(),
            changed_by_name: employee_names.get(&change.changed_by).cloned(),
            change,
        })
        .collect())
}

/// The most recent audit entries, newest first.
pub async fn audit_log(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    limit: usize,
) -> Result<Vec<AuditEntry>, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ViewLogs)?;
    let mut entries: Vec<AuditEntry> =
        gateway::select_as(gw, tables::AUDIT_LOG, &Filter::All).await?;
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries.truncate(limit);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{self, Actor};
    use crate::gateway::SqliteGateway;
    use crate::types::{ClientStatus, Role};
    use chrono::Utc;

    #[tokio::test]
    async fn test_status_log_resolves_names() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = Employee {
            id: "head-1".into(),
            name: "Meera".into(),
            email: "meera@example.test".into(),
            role: Role::Head,
            active: true,
            created_at: Utc::now(),
        };
        gateway::insert_as(&gw, tables::EMPLOYEES, std::slice::from_ref(&head))
            .await
            .unwrap();
        let client = Client {
            id: "c1".into(),
            name: "Acme".into(),
            company: String::new(),
            address: String::new(),
            status: ClientStatus::Ongoing,
            created_by: "head-1".into(),
            created_at: Utc::now(),
        };
        gateway::insert_as(&gw, tables::CLIENTS, &[client]).await.unwrap();

        let principal = head.principal();
        workflow::transition_client_status(&gw, &principal, "c1", ClientStatus::Completed)
            .await
            .unwrap();

        let rows = status_log(&gw, &principal).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_name.as_deref(), Some("Acme"));
        assert_eq!(rows[0].changed_by_name.as_deref(), Some("Meera"));
        assert_eq!(rows[0].change.new_status, ClientStatus::Completed);

        let emp = Principal::new("emp-1", Role::Employee);
        assert!(matches!(
            status_log(&gw, &emp).await,
            Err(DashboardError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_log_is_newest_first_and_limited() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        for i in 0..5 {
            audit::record(
                &gw,
                Actor::direct("admin-1"),
                audit::NOTIFICATION_DELETED,
                "notification",
                &format!("n{}", i),
                "",
            )
            .await
            .unwrap();
        }

        let admin = Principal::new("admin-1", Role::Admin);
        let entries = audit_log(&gw, &admin, 3).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].created_at >= entries[2].created_at);

        let ehead = Principal::new("ehead-1", Role::ExecutionHead);
        assert!(audit_log(&gw, &ehead, 3).await.is_err());
    }
}
