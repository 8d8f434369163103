//! Client status workflow.
//!
//! `ongoing` is the only entry state; `completed`, `poreceived` and
//! `ecomplete` are terminal exits, each authorized by its own capability.
//! Nothing moves a client back to `ongoing`. Every transition appends a row
//! to `client_status_history`.
//!
//! Two roles racing different terminal exits on the same client is
//! last-write-wins: the update is keyed on id only, and whichever history
//! row lands second reflects the final state.

use chrono::Utc;
use serde_json::json;

use crate::capabilities::{Capabilities, Capability};
use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{ClientStatus, Principal, StatusChange};
use crate::visibility;

/// Move a client into a terminal status on behalf of `principal`.
pub async fn transition_client_status(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
    to: ClientStatus,
) -> Result<StatusChange, DashboardError> {
    let client = visibility::require_client_access(gw, principal, client_id).await?;
    let from = client.status;

    if !to.is_terminal() || from.is_terminal() {
        return Err(DashboardError::InvalidTransition { from, to });
    }

    if let Some(capability) = Capabilities::status_capability(to) {
        Capabilities::for_principal(principal).require(capability)?;
    }

    let updated = gw
        .update(
            tables::CLIENTS,
            &Filter::eq("id", client_id),
            gateway::patch([("status", json!(to.as_str()))]),
        )
        .await?;
    if updated.is_empty() {
        return Err(DashboardError::not_found("client", client_id));
    }

    let change = StatusChange {
        id: crate::util::new_id(),
        client_id: client_id.to_string(),
        old_status: from,
        new_status: to,
        changed_at: Utc::now(),
        changed_by: principal.id.clone(),
    };
    gateway::insert_as(gw, tables::CLIENT_STATUS_HISTORY, std::slice::from_ref(&change)).await?;

    log::info!(
        "Workflow: client {} {} -> {} by {} ({})",
        client_id,
        from,
        to,
        principal.id,
        principal.role
    );
    Ok(change)
}

/// Terminal statuses `principal` may move this client into right now.
pub async fn available_transitions(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<Vec<ClientStatus>, DashboardError> {
    let client = visibility::require_client_access(gw, principal, client_id).await?;
    if client.status.is_terminal() {
        return Ok(Vec::new());
    }
    let capabilities = Capabilities::for_principal(principal);
    Ok(ClientStatus::TERMINAL
        .into_iter()
        .filter(|s| capabilities.can_set_status(*s))
        .collect())
}

/// Status history for one client, oldest first.
pub async fn status_history(
    gw: &dyn RemoteGateway,
    client_id: &str,
) -> Result<Vec<StatusChange>, DashboardError> {
    let mut rows: Vec<StatusChange> = gateway::select_as(
        gw,
        tables::CLIENT_STATUS_HISTORY,
        &Filter::eq("client_id", client_id),
    )
    .await?;
    rows.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
    Ok(rows)
}

/// Every recorded transition, oldest first. Requires the log capability.
pub async fn full_history(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<StatusChange>, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ViewLogs)?;
    let mut rows: Vec<StatusChange> =
        gateway::select_as(gw, tables::CLIENT_STATUS_HISTORY, &Filter::All).await?;
    rows.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SqliteGateway;
    use crate::types::{Client, ClientAssignment, Employee, Role};

    async fn employee(gw: &SqliteGateway, id: &str, role: Role) -> Principal {
        let e = Employee {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.test", id),
            role,
            active: true,
            created_at: Utc::now(),
        };
        gateway::insert_as(gw, tables::EMPLOYEES, std::slice::from_ref(&e))
            .await
            .unwrap();
        e.principal()
    }

    async fn client(gw: &SqliteGateway, id: &str, created_by: &str) {
        let c = Client {
            id: id.to_string(),
            name: "Acme".to_string(),
            company: "Acme Ltd".to_string(),
            address: "1 Main St".to_string(),
            status: ClientStatus::Ongoing,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };
        gateway::insert_as(gw, tables::CLIENTS, &[c]).await.unwrap();
    }

    async fn assign(gw: &SqliteGateway, client_id: &str, employee_id: &str) {
        let a = ClientAssignment {
            id: crate::util::new_id(),
            client_id: client_id.to_string(),
            employee_id: employee_id.to_string(),
        };
        gateway::insert_as(gw, tables::CLIENT_ASSIGNMENTS, &[a])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_assignment_then_completion_scenario() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = employee(&gw, "head-1", Role::Head).await;
        let e = employee(&gw, "emp-e", Role::Employee).await;
        let f = employee(&gw, "emp-f", Role::Employee).await;

        client(&gw, "c1", &head.id).await;
        assign(&gw, "c1", &e.id).await;

        let seen: Vec<String> = visibility::resolve_visible_clients(&gw, &e)
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(seen, vec!["c1"]);
        assert!(visibility::resolve_visible_clients(&gw, &f).await.is_empty());

        let change = transition_client_status(&gw, &head, "c1", ClientStatus::Completed)
            .await
            .unwrap();
        assert_eq!(change.old_status, ClientStatus::Ongoing);
        assert_eq!(change.new_status, ClientStatus::Completed);
        assert_eq!(change.changed_by, "head-1");

        assert!(visibility::resolve_visible_clients(&gw, &e).await.is_empty());

        let history = status_history(&gw, "c1").await.unwrap();
        assert_eq!(history, vec![change]);
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = employee(&gw, "head-1", Role::Head).await;
        let admin = employee(&gw, "admin-1", Role::Admin).await;
        client(&gw, "c1", &head.id).await;

        transition_client_status(&gw, &head, "c1", ClientStatus::PoReceived)
            .await
            .unwrap();

        for to in [
            ClientStatus::Ongoing,
            ClientStatus::Completed,
            ClientStatus::ExecutionComplete,
        ] {
            let err = transition_client_status(&gw, &admin, "c1", to)
                .await
                .unwrap_err();
            assert!(
                matches!(err, DashboardError::InvalidTransition { from: ClientStatus::PoReceived, .. }),
                "{:?}",
                err
            );
        }

        let stored: Client = gateway::select_one(&gw, tables::CLIENTS, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ClientStatus::PoReceived);
        assert_eq!(status_history(&gw, "c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_capability_gates_each_exit() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = employee(&gw, "head-1", Role::Head).await;
        let ehead = employee(&gw, "ehead-1", Role::ExecutionHead).await;
        let emp = employee(&gw, "emp-1", Role::Employee).await;

        client(&gw, "exec", &ehead.id).await;
        assign(&gw, "exec", &emp.id).await;

        let err = transition_client_status(&gw, &emp, "exec", ClientStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::PermissionDenied(_)));

        let err = transition_client_status(&gw, &head, "exec", ClientStatus::ExecutionComplete)
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::PermissionDenied(_)));

        assert_eq!(
            available_transitions(&gw, &ehead, "exec").await.unwrap(),
            vec![ClientStatus::Completed, ClientStatus::ExecutionComplete]
        );
        transition_client_status(&gw, &ehead, "exec", ClientStatus::ExecutionComplete)
            .await
            .unwrap();
        assert!(available_transitions(&gw, &ehead, "exec").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_scope_and_missing_clients() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = employee(&gw, "head-1", Role::Head).await;
        let fin = employee(&gw, "fin-1", Role::FinanceEmployee).await;
        client(&gw, "mkt", &head.id).await;

        assert!(matches!(
            transition_client_status(&gw, &fin, "mkt", ClientStatus::PoReceived).await,
            Err(DashboardError::PermissionDenied(_))
        ));
        assert!(matches!(
            transition_client_status(&gw, &head, "nope", ClientStatus::Completed).await,
            Err(DashboardError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_full_history_requires_logs_capability() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = employee(&gw, "head-1", Role::Head).await;
        let emp = employee(&gw, "emp-1", Role::Employee).await;
        client(&gw, "c1", &head.id).await;
        client(&gw, "c2", &head.id).await;
        transition_client_status(&gw, &head, "c1", ClientStatus::Completed)
            .await
            .unwrap();
        transition_client_status(&gw, &head, "c2", ClientStatus::PoReceived)
            .await
            .unwrap();

        assert_eq!(full_history(&gw, &head).await.unwrap().len(), 2);
        assert!(matches!(
            full_history(&gw, &emp).await,
            Err(DashboardError::PermissionDenied(_))
        ));
    }
}
