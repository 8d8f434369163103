// Employees service: roster management and sign-in lookup.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use crate::capabilities::{Capabilities, Capability};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::session::{Session, SessionStore};
use crate::types::{Employee, Principal, Role};

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

#[derive(Debug, Clone)]
pub struct EmployeeForm {
    pub name: String,
    pub email: String,
    pub role: Role,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn create_employee(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    form: EmployeeForm,
) -> Result<Employee, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ManageEmployees)?;
    error::require("name", &form.name)?;
    error::require("email", &form.email)?;

    let email = normalize_email(&form.email);
    if !email_re().is_match(&email) {
        return Err(DashboardError::InvalidField {
            field: "email".to_string(),
            reason: "not a valid email address".to_string(),
        });
    }
    if find_by_email(gw, &email).await?.is_some() {
        return Err(DashboardError::InvalidField {
            field: "email".to_string(),
            reason: format!("{} is already registered", email),
        });
    }

    let employee = Employee {
        id: crate::util::new_id(),
        name: form.name.trim().to_string(),
        email,
        role: form.role,
        active: true,
        created_at: Utc::now(),
    };
    gateway::insert_as(gw, tables::EMPLOYEES, std::slice::from_ref(&employee)).await?;
    log::info!(
        "Employees: {} added {} as {}",
        principal.id,
        employee.id,
        employee.role
    );
    Ok(employee)
}

/// Deactivate an employee. Inactive employees cannot sign in, receive role
/// broadcasts or take new assignments; their history stays.
pub async fn deactivate_employee(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    employee_id: &str,
) -> Result<Employee, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ManageEmployees)?;
    if principal.id == employee_id {
        return Err(DashboardError::PermissionDenied(
            "cannot deactivate your own account".into(),
        ));
    }

    let mut rows = gw
        .update(
            tables::EMPLOYEES,
            &Filter::eq("id", employee_id),
            gateway::patch([("active", json!(false))]),
        )
        .await?;
    match rows.pop() {
        Some(row) => Ok(gateway::from_row(row)?),
        None => Err(DashboardError::not_found("employee", employee_id)),
    }
}

pub async fn get_employee(
    gw: &dyn RemoteGateway,
    employee_id: &str,
) -> Result<Employee, DashboardError> {
    gateway::select_one(gw, tables::EMPLOYEES, employee_id)
        .await?
        .ok_or_else(|| DashboardError::not_found("employee", employee_id))
}

/// Active employees, optionally of one role, by name.
pub async fn list_active(
    gw: &dyn RemoteGateway,
    role: Option<Role>,
) -> Result<Vec<Employee>, DashboardError> {
    let mut filter = Filter::eq("active", true);
    if let Some(role) = role {
        filter = filter.and(Filter::eq("role", role.as_str()));
    }
    let mut employees: Vec<Employee> = gateway::select_as(gw, tables::EMPLOYEES, &filter).await?;
    employees.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(employees)
}

/// Resolve an email to an active employee and open a session for them.
pub async fn sign_in(
    gw: &dyn RemoteGateway,
    store: &SessionStore,
    email: &str,
) -> Result<Session, DashboardError> {
    error::require("email", email)?;
    let employee = find_by_email(gw, &normalize_email(email))
        .await?
        .filter(|e| e.active)
        .ok_or_else(|| DashboardError::PermissionDenied(format!("no active account for {}", email.trim())))?;
    Ok(store.login(employee.principal()))
}

async fn find_by_email(
    gw: &dyn RemoteGateway,
    email: &str,
) -> Result<Option<Employee>, DashboardError> {
    let mut rows: Vec<Employee> =
        gateway::select_as(gw, tables::EMPLOYEES, &Filter::eq("email", email)).await?;
    Ok(rows.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SqliteGateway;

    fn admin() -> Principal {
        Principal::new("admin-1", Role::Admin)
    }

    fn form(name: &str, email: &str, role: Role) -> EmployeeForm {
        EmployeeForm {
            name: name.to_string(),
            email: email.to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_create_validates_email() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();

        let e = create_employee(&gw, &admin(), form("Asha", " Asha@Example.com ", Role::Employee))
            .await
            .unwrap();
        assert_eq!(e.email, "asha@example.com");
        assert!(e.active);

        assert!(matches!(
            create_employee(&gw, &admin(), form("Bad", "not-an-email", Role::Employee)).await,
            Err(DashboardError::InvalidField { .. })
        ));
        assert!(matches!(
            create_employee(&gw, &admin(), form("Dup", "asha@example.com", Role::Head)).await,
            Err(DashboardError::InvalidField { .. })
        ));
        assert!(matches!(
            create_employee(&gw, &admin(), form("", "x@example.com", Role::Head)).await,
            Err(DashboardError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_admin_manages_roster() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let head = Principal::new("head-1", Role::Head);
        assert!(matches!(
            create_employee(&gw, &head, form("X", "x@example.com", Role::Employee)).await,
            Err(DashboardError::PermissionDenied(_))
        ));
        assert!(matches!(
            deactivate_employee(&gw, &admin(), "admin-1").await,
            Err(DashboardError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivated_employee_drops_out() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let a = create_employee(&gw, &admin(), form("Asha", "asha@example.com", Role::Employee))
            .await
            .unwrap();
        create_employee(&gw, &admin(), form("Ben", "ben@example.com", Role::Employee))
            .await
            .unwrap();
        create_employee(&gw, &admin(), form("Cy", "cy@example.com", Role::Head))
            .await
            .unwrap();

        assert_eq!(list_active(&gw, Some(Role::Employee)).await.unwrap().len(), 2);
        assert_eq!(list_active(&gw, None).await.unwrap().len(), 3);

        let gone = deactivate_employee(&gw, &admin(), &a.id).await.unwrap();
        assert!(!gone.active);
        let names: Vec<String> = list_active(&gw, Some(Role::Employee))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Ben"]);

        assert!(matches!(
            deactivate_employee(&gw, &admin(), "missing").await,
            Err(DashboardError::NotFound { .. })
        ));
        assert!(!get_employee(&gw, &a.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_sign_in_by_email() {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let store = SessionStore::new();
        let e = create_employee(&gw, &admin(), form("Asha", "asha@example.com", Role::ExecutionHead))
            .await
            .unwrap();

        let session = sign_in(&gw, &store, "ASHA@example.com").await.unwrap();
        assert_eq!(session.effective().id, e.id);
        assert_eq!(store.effective_principal().unwrap().role, Role::ExecutionHead);

        deactivate_employee(&gw, &admin(), &e.id).await.unwrap();
        assert!(matches!(
            sign_in(&gw, &store, "asha@example.com").await,
            Err(DashboardError::PermissionDenied(_))
        ));
        assert!(matches!(
            sign_in(&gw, &store, "nobody@example.com").await,
            Err(DashboardError::PermissionDenied(_))
        ));
    }
}
