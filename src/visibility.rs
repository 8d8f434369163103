//! Role-scoped visibility.
//!
//! Decides which clients (and which client-owned records) a principal may
//! see. Scope comes from [`Capabilities::client_scope`]:
//!
//! - `All`: every client (head, admin)
//! - `Track(t)`: clients whose creator or any assignee works in track `t`
//!   (e.head → execution, finance.employee → finance)
//! - `Assigned`: clients with an explicit assignment to the principal
//!
//! The dashboard lists only `ongoing` clients; record-level access ignores
//! status so a closed client's quotations stay reachable.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;

use crate::capabilities::{Capabilities, Capability, ClientScope};
use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{
    Client, ClientAssignment, ClientStatus, Document, Employee, Principal, Quotation, Role,
    SiteVisit, Track,
};

/// Clients shown on the principal's dashboard: in scope and `ongoing`.
///
/// Never fails: a remote error is logged and yields an empty list so the
/// view still renders.
pub async fn resolve_visible_clients(gw: &dyn RemoteGateway, principal: &Principal) -> Vec<Client> {
    match try_resolve_visible_clients(gw, principal).await {
        Ok(clients) => clients,
        Err(e) => {
            log::error!(
                "Visibility: failed to resolve clients for {} ({}): {}",
                principal.id,
                principal.role,
                e
            );
            Vec::new()
        }
    }
}

pub async fn try_resolve_visible_clients(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<Client>, DashboardError> {
    accessible_clients(gw, principal, Some(ClientStatus::Ongoing)).await
}

/// Clients in the principal's scope, optionally restricted to one status,
/// newest first.
pub async fn accessible_clients(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    status: Option<ClientStatus>,
) -> Result<Vec<Client>, DashboardError> {
    let status_filter = match status {
        Some(s) => Filter::eq("status", s.as_str()),
        None => Filter::All,
    };

    let mut clients: Vec<Client> = match Capabilities::for_principal(principal).client_scope() {
        ClientScope::All => gateway::select_as(gw, tables::CLIENTS, &status_filter).await?,
        ClientScope::Assigned => {
            let ids = assigned_client_ids(gw, &principal.id).await?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let filter = Filter::is_in("id", ids).and(status_filter);
            gateway::select_as(gw, tables::CLIENTS, &filter).await?
        }
        ClientScope::Track(track) => {
            let candidates: Vec<Client> =
                gateway::select_as(gw, tables::CLIENTS, &status_filter).await?;
            filter_by_track(gw, candidates, track).await?
        }
    };

    clients.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(clients)
}

/// Whether the principal may act on records of this client, whatever its
/// status.
pub async fn can_access_client(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<bool, DashboardError> {
    let client: Option<Client> = gateway::select_one(gw, tables::CLIENTS, client_id).await?;
    let client = match client {
        Some(c) => c,
        None => return Ok(false),
    };

    match Capabilities::for_principal(principal).client_scope() {
        ClientScope::All => Ok(true),
        ClientScope::Assigned => Ok(assigned_client_ids(gw, &principal.id)
            .await?
            .contains(&client.id)),
        ClientScope::Track(track) => Ok(!filter_by_track(gw, vec![client], track)
            .await?
            .is_empty()),
    }
}

/// `PermissionDenied` unless [`can_access_client`] holds; `NotFound` if the
/// client does not exist.
pub async fn require_client_access(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<Client, DashboardError> {
    let client: Client = gateway::select_one(gw, tables::CLIENTS, client_id)
        .await?
        .ok_or_else(|| DashboardError::not_found("client", client_id))?;
    if !can_access_client(gw, principal, client_id).await? {
        return Err(DashboardError::PermissionDenied(format!(
            "{} cannot access client {}",
            principal.id, client_id
        )));
    }
    Ok(client)
}

pub async fn resolve_visible_quotations(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<Quotation>, DashboardError> {
    let mut rows: Vec<Quotation> = visible_records(
        gw,
        principal,
        tables::QUOTATIONS,
        Capability::ViewAllQuotations,
        |q: &Quotation| &q.client_id,
    )
    .await?;
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}

pub async fn resolve_visible_site_visits(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<SiteVisit>, DashboardError> {
    let mut rows: Vec<SiteVisit> = visible_records(
        gw,
        principal,
        tables::SITE_VISITS,
        Capability::ViewAllSiteVisits,
        |v: &SiteVisit| &v.client_id,
    )
    .await?;
    rows.sort_by(|a, b| b.visit_date.cmp(&a.visit_date));
    Ok(rows)
}

pub async fn resolve_visible_documents(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<Vec<Document>, DashboardError> {
    let mut rows: Vec<Document> = visible_records(
        gw,
        principal,
        tables::DOCUMENTS,
        Capability::ViewAllDocuments,
        |d: &Document| &d.client_id,
    )
    .await?;
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Client-owned records: everything for holders of `view_all`, otherwise only
/// the records of accessible clients. Authorship grants nothing once the
/// client is out of reach.
async fn visible_records<T, F>(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    table: &str,
    view_all: Capability,
    client_of: F,
) -> Result<Vec<T>, DashboardError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> &String,
{
    let capabilities = Capabilities::for_principal(principal);
    let rows: Vec<T> = gateway::select_as(gw, table, &Filter::All).await?;
    if capabilities.has(view_all) || capabilities.client_scope() == ClientScope::All {
        return Ok(rows);
    }

    let client_ids: HashSet<String> = accessible_clients(gw, principal, None)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();

    Ok(rows
        .into_iter()
        .filter(|row| client_ids.contains(client_of(row)))
        .collect())
}

async fn assigned_client_ids(
    gw: &dyn RemoteGateway,
    employee_id: &str,
) -> Result<Vec<String>, DashboardError> {
    let assignments: Vec<ClientAssignment> = gateway::select_as(
        gw,
        tables::CLIENT_ASSIGNMENTS,
        &Filter::eq("employee_id", employee_id),
    )
    .await?;
    let mut ids: Vec<String> = assignments.into_iter().map(|a| a.client_id).collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Keep clients whose creator or any assignee belongs to `track`. A client
/// whose people are all unknown belongs to no track.
async fn filter_by_track(
    gw: &dyn RemoteGateway,
    clients: Vec<Client>,
    track: Track,
) -> Result<Vec<Client>, DashboardError> {
    if clients.is_empty() {
        return Ok(clients);
    }

    let client_ids: Vec<&str> = clients.iter().map(|c| c.id.as_str()).collect();
    let assignments: Vec<ClientAssignment> = gateway::select_as(
        gw,
        tables::CLIENT_ASSIGNMENTS,
        &Filter::is_in("client_id", client_ids),
    )
    .await?;

    let mut people: HashSet<&str> = clients.iter().map(|c| c.created_by.as_str()).collect();
    people.extend(assignments.iter().map(|a| a.employee_id.as_str()));

    let employees: Vec<Employee> = gateway::select_as(
        gw,
        tables::EMPLOYEES,
        &Filter::is_in("id", people.iter().copied()),
    )
    .await?;
    let roles: HashMap<&str, Role> = employees.iter().map(|e| (e.id.as_str(), e.role)).collect();

    let mut assignees: HashMap<&str, Vec<&str>> = HashMap::new();
    for a in &assignments {
        assignees
            .entry(a.client_id.as_str())
            .or_default()
            .push(a.employee_id.as_str());
    }

    let in_track = |id: &str| roles.get(id).is_some_and(|r| r.track() == track);

    let keep: HashSet<String> = clients
        .iter()
        .filter(|c| {
            in_track(&c.created_by)
                || assignees
                    .get(c.id.as_str())
                    .is_some_and(|ids| ids.iter().any(|id| in_track(id)))
        })
        .map(|c| c.id.clone())
        .collect();

    Ok(clients.into_iter().filter(|c| keep.contains(&c.id)).collect())
}
