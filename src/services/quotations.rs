// Quotations service: submission and review.

use chrono::Utc;
use serde_json::json;

use crate::capabilities::{Capabilities, Capability};
use crate::error::{self, DashboardError};
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Principal, Quotation, QuotationStatus};
use crate::visibility;

#[derive(Debug, Clone)]
pub struct QuotationForm {
    pub client_id: String,
    pub title: String,
    pub amount: f64,
}

/// Submit a quotation for a client the principal can access.
pub async fn submit_quotation(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    form: QuotationForm,
) -> Result<Quotation, DashboardError> {
    error::require("client", &form.client_id)?;
    error::require("title", &form.title)?;
    if !form.amount.is_finite() || form.amount <= 0.0 {
        return Err(DashboardError::InvalidField {
            field: "amount".to_string(),
            reason: "must be a positive number".to_string(),
        });
    }
    visibility::require_client_access(gw, principal, &form.client_id).await?;

    let quotation = Quotation {
        id: crate::util::new_id(),
        client_id: form.client_id,
        created_by: principal.id.clone(),
        title: form.title.trim().to_string(),
        amount: form.amount,
        status: QuotationStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        created_at: Utc::now(),
    };
    gateway::insert_as(gw, tables::QUOTATIONS, std::slice::from_ref(&quotation)).await?;
    log::info!(
        "Quotations: {} submitted {} for client {}",
        principal.id,
        quotation.id,
        quotation.client_id
    );
    Ok(quotation)
}

pub async fn approve_quotation(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    quotation_id: &str,
) -> Result<Quotation, DashboardError> {
    review(gw, principal, quotation_id, QuotationStatus::Approved).await
}

pub async fn reject_quotation(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    quotation_id: &str,
) -> Result<Quotation, DashboardError> {
    review(gw, principal, quotation_id, QuotationStatus::Rejected).await
}

/// Only pending quotations can be reviewed; a second review of the same
/// quotation is rejected rather than overwriting the first. Reviewers see
/// every quotation, so no per-client check applies.
async fn review(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    quotation_id: &str,
    decision: QuotationStatus,
) -> Result<Quotation, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ApproveQuotation)?;

    let current: Quotation = gateway::select_one(gw, tables::QUOTATIONS, quotation_id)
        .await?
        .ok_or_else(|| DashboardError::not_found("quotation", quotation_id))?;
    if current.status != QuotationStatus::Pending {
        return Err(DashboardError::InvalidField {
            field: "status".to_string(),
            reason: format!("quotation {} was already reviewed", quotation_id),
        });
    }

    let decision_str = match decision {
        QuotationStatus::Approved => "approved",
        QuotationStatus::Rejected => "rejected",
        QuotationStatus::Pending => "pending",
    };
    let mut rows = gw
        .update(
            tables::QUOTATIONS,
            &Filter::eq("id", quotation_id).and(Filter::eq("status", "pending")),
            gateway::patch([
                ("status", json!(decision_str)),
                ("reviewed_by", json!(principal.id)),
                ("reviewed_at", json!(Utc::now())),
            ]),
        )
        .await?;
    match rows.pop() {
        Some(row) => {
            log::info!(
                "Quotations: {} marked {} {}",
                principal.id,
                quotation_id,
                decision_str
            );
            Ok(gateway::from_row(row)?)
        }
        None => Err(DashboardError::InvalidField {
            field: "status".to_string(),
            reason: format!("quotation {} was already reviewed", quotation_id),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SqliteGateway;
    use crate::types::{Client, ClientAssignment, ClientStatus, Role};

    async fn setup() -> SqliteGateway {
        let gw = SqliteGateway::open_in_memory("s").unwrap();
        let client = Client {
            id: "c1".into(),
            name: "Acme".into(),
            company: "Acme Ltd".into(),
            address: String::new(),
            status: ClientStatus::Ongoing,
            created_by: "head-1".into(),
            created_at: Utc::now(),
        };
        gateway::insert_as(&gw, tables::CLIENTS, &[client]).await.unwrap();
        let a = ClientAssignment {
            id: "a1".into(),
            client_id: "c1".into(),
            employee_id: "emp-1".into(),
        };
        gateway::insert_as(&gw, tables::CLIENT_ASSIGNMENTS, &[a]).await.unwrap();
        gw
    }

    fn form(amount: f64) -> QuotationForm {
        QuotationForm {
            client_id: "c1".into(),
            title: "Solar install".into(),
            amount,
        }
    }

    #[tokio::test]
    async fn test_submit_and_approve() {
        let gw = setup().await;
        let emp = Principal::new("emp-1", Role::Employee);
        let head = Principal::new("head-1", Role::Head);

        let q = submit_quotation(&gw, &emp, form(1250.0)).await.unwrap();
        assert_eq!(q.status, QuotationStatus::Pending);

        assert!(matches!(
            approve_quotation(&gw, &emp, &q.id).await,
            Err(DashboardError::PermissionDenied(_))
        ));

        let approved = approve_quotation(&gw, &head, &q.id).await.unwrap();
        assert_eq!(approved.status, QuotationStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("head-1"));
        assert!(approved.reviewed_at.is_some());

        assert!(matches!(
            reject_quotation(&gw, &head, &q.id).await,
            Err(DashboardError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let gw = setup().await;
        let emp = Principal::new("emp-1", Role::Employee);
        let stranger = Principal::new("emp-2", Role::Employee);

        assert!(matches!(
            submit_quotation(&gw, &emp, form(0.0)).await,
            Err(DashboardError::InvalidField { .. })
        ));
        assert!(matches!(
            submit_quotation(&gw, &emp, form(f64::NAN)).await,
            Err(DashboardError::InvalidField { .. })
        ));
        assert!(matches!(
            submit_quotation(&gw, &stranger, form(10.0)).await,
            Err(DashboardError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_finance_reviews_any_quotation() {
        let gw = setup().await;
        let emp = Principal::new("emp-1", Role::Employee);
        let fin = Principal::new("fin-1", Role::FinanceEmployee);
        let q = submit_quotation(&gw, &emp, form(99.0)).await.unwrap();

        let rejected = reject_quotation(&gw, &fin, &q.id).await.unwrap();
        assert_eq!(rejected.status, QuotationStatus::Rejected);
        assert!(matches!(
            approve_quotation(&gw, &fin, "missing").await,
            Err(DashboardError::NotFound { .. })
        ));
    }
}
