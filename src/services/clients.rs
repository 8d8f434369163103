// Clients service: creation, detail edits and employee assignment.

use chrono::Utc;
use serde_json::json;

use crate::capabilities::{Capabilities, Capability, ClientScope};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Client, ClientAssignment, ClientStatus, Employee, Principal};
use crate::visibility;

/// Client form fields.
#[derive(Debug, Clone, Default)]
pub struct ClientForm {
    pub name: String,
    pub company: String,
    pub address: String,
}

impl ClientForm {
    fn validate(&self) -> Result<(), DashboardError> {
        error::require("name", &self.name)?;
        error::require("company", &self.company)?;
        Ok(())
    }
}

/// Create an `ongoing` client. Creators who only see assigned clients are
/// assigned to it so it shows up on their dashboard.
pub async fn create_client(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    form: ClientForm,
) -> Result<Client, DashboardError> {
    let capabilities = Capabilities::for_principal(principal);
    capabilities.require(Capability::CreateClients)?;
    form.validate()?;

    let client = Client {
        id: crate::util::new_id(),
        name: form.name.trim().to_string(),
        company: form.company.trim().to_string(),
        address: form.address.trim().to_string(),
        status: ClientStatus::Ongoing,
        created_by: principal.id.clone(),
        created_at: Utc::now(),
    };
    let stored = gateway::insert_as(gw, tables::CLIENTS, std::slice::from_ref(&client))
        .await?
        .pop()
        .unwrap_or(client);

    if capabilities.client_scope() == ClientScope::Assigned {
        insert_assignment(gw, &stored.id, &principal.id).await?;
    }

    log::info!("Clients: {} created client {}", principal.id, stored.id);
    Ok(stored)
}

pub async fn get_client(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<Client, DashboardError> {
    visibility::require_client_access(gw, principal, client_id).await
}

/// Edit name, company and address. Status only changes through the workflow.
pub async fn update_client(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
    form: ClientForm,
) -> Result<Client, DashboardError> {
    visibility::require_client_access(gw, principal, client_id).await?;
    form.validate()?;

    let mut rows = gw
        .update(
            tables::CLIENTS,
            &Filter::eq("id", client_id),
            gateway::patch([
                ("name", json!(form.name.trim())),
                ("company", json!(form.company.trim())),
                ("address", json!(form.address.trim())),
            ]),
        )
        .await?;
    match rows.pop() {
        Some(row) => Ok(gateway::from_row(row)?),
        None => Err(DashboardError::not_found("client", client_id)),
    }
}

/// Assign an active employee to a client. Re-assigning returns the existing
/// assignment.
pub async fn assign_employee(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
    employee_id: &str,
) -> Result<ClientAssignment, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::AssignClients)?;
    visibility::require_client_access(gw, principal, client_id).await?;

    let employee: Employee = gateway::select_one(gw, tables::EMPLOYEES, employee_id)
        .await?
        .ok_or_else(|| DashboardError::not_found("employee", employee_id))?;
    if !employee.active {
        return Err(DashboardError::InvalidField {
            field: "employee".to_string(),
            reason: format!("{} is not an active employee", employee_id),
        });
    }

    let assignment = insert_assignment(gw, client_id, employee_id).await?;
    log::info!(
        "Clients: {} assigned {} to client {}",
        principal.id,
        employee_id,
        client_id
    );
    Ok(assignment)
}

/// Remove an assignment. Returns whether one existed.
pub async fn unassign_employee(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
    employee_id: &str,
) -> Result<bool, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::AssignClients)?;
    visibility::require_client_access(gw, principal, client_id).await?;

    let removed = gw
        .delete(tables::CLIENT_ASSIGNMENTS, &assignment_filter(client_id, employee_id))
        .await?;
    Ok(!removed.is_empty())
}

/// Employees assigned to a client.
pub async fn list_assignees(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<Vec<Employee>, DashboardError> {
    visibility::require_client_access(gw, principal, client_id).await?;
    let assignments: Vec<ClientAssignment> = gateway::select_as(
        gw,
        tables::CLIENT_ASSIGNMENTS,
        &Filter::eq("client_id", client_id),
    )
    .await?;
    if assignments.is_empty() {
        return Ok(Vec::new());
    }
    let mut employees: Vec<Employee> = gateway::select_as(
        gw,
        tables::EMPLOYEES,
        &Filter::is_in("id", assignments.into_iter().map(|a| a.employee_id)),
    )
    .await?;
    employees.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(employees)
}

fn assignment_filter(client_id: &str, employee_id: &str) -> Filter {
    Filter::eq("client_id", client_id).and(Filter::eq("employee_id", employee_id))
}

async fn insert_assignment(
    gw: &dyn RemoteGateway,
    client_id: &str,
    employee_id: &str,
) -> Result<ClientAssignment, DashboardError> {
    let existing: Vec<ClientAssignment> = gateway::select_as(
        gw,
        tables::CLIENT_ASSIGNMENTS,
        &assignment_filter(client_id, employee_id),
    )
    .await?;
    if let Some(a) = existing.into_iter().next() {
        return Ok(a);
    }

    let assignment = ClientAssignment {
        id: crate::util::new_id(),
        client_id: client_id.to_string(),
        employee_id: employee_id.to_string(),
    };
    gateway::insert_as(gw, tables::CLIENT_ASSIGNMENTS, std::slice::from_ref(&assignment)).await?;
    Ok(assignment)
}
