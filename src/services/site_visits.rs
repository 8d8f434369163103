// Site visits service: scheduled → visited → approved.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::capabilities::{Capabilities, Capability};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Principal, SiteVisit, SiteVisitStatus};
use crate::visibility;

#[derive(Debug, Clone)]
pub struct SiteVisitForm {
    pub client_id: String,
    pub visit_date: DateTime<Utc>,
    pub notes: String,
}

pub async fn schedule_site_visit(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    form: SiteVisitForm,
) -> Result<SiteVisit, DashboardError> {
    error::require("client", &form.client_id)?;
    visibility::require_client_access(gw, principal, &form.client_id).await?;

    let visit = SiteVisit {
        id: crate::util::new_id(),
        client_id: form.client_id,
        created_by: principal.id.clone(),
        visit_date: form.visit_date,
        notes: form.notes.trim().to_string(),
        status: SiteVisitStatus::Scheduled,
        approved_by: None,
        created_at: Utc::now(),
    };
    gateway::insert_as(gw, tables::SITE_VISITS, std::slice::from_ref(&visit)).await?;
    log::info!(
        "Site visits: {} scheduled {} for client {}",
        principal.id,
        visit.id,
        visit.client_id
    );
    Ok(visit)
}

/// Record that a scheduled visit took place. Anyone who can reach the client
/// may do this; optional notes replace the scheduling notes.
pub async fn mark_visited(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    visit_id: &str,
    notes: Option<&str>,
) -> Result<SiteVisit, DashboardError> {
    let visit = load(gw, visit_id).await?;
    visibility::require_client_access(gw, principal, &visit.client_id).await?;

    let mut patch = gateway::patch([("status", json!("visited"))]);
    if let Some(notes) = notes {
        patch.insert("notes".to_string(), json!(notes.trim()));
    }
    advance(gw, &visit, SiteVisitStatus::Scheduled, patch).await
}

pub async fn approve_site_visit(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    visit_id: &str,
) -> Result<SiteVisit, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ApproveSiteVisit)?;
    let visit = load(gw, visit_id).await?;
    let approved = advance(
        gw,
        &visit,
        SiteVisitStatus::Visited,
        gateway::patch([
            ("status", json!("approved")),
            ("approved_by", json!(principal.id)),
        ]),
    )
    .await?;
    log::info!("Site visits: {} approved {}", principal.id, visit_id);
    Ok(approved)
}

async fn load(gw: &dyn RemoteGateway, id: &str) -> Result<SiteVisit, DashboardError> {
    gateway::select_one(gw, tables::SITE_VISITS, id)
        .await?
        .ok_or_else(|| DashboardError::not_found("site visit", id))
}

/// Apply `patch` only if the visit is still in `expected`.
async fn advance(
    gw: &dyn RemoteGateway,
    visit: &SiteVisit,
    expected: SiteVisitStatus,
    patch: gateway::Row,
) -> Result<SiteVisit, DashboardError> {
    let stale = || DashboardError::InvalidField {
        field: "status".to_string(),
        reason: format!("site visit {} is {:?}, expected {:?}", visit.id, visit.status, expected),
    };
    if visit.status != expected {
        return Err(stale());
    }
    let expected_str = match expected {
        SiteVisitStatus::Scheduled => "scheduled",
        SiteVisitStatus::Visited => "visited",
        SiteVisitStatus::Approved => "approved",
    };
    let filter = Filter::eq("id", visit.id.as_str()).and(Filter::eq("status", expected_str));
    let mut rows = gw.update(tables::SITE_VISITS, &filter, patch).await?;
    match rows.pop() {
        Some(row) => Ok(gateway::from_row(row)?),
        None => Err(stale()),
    }
}
