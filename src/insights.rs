//! Time/status insights derived from clients and the status-history log.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::capabilities::{Capabilities, Capability};
use crate::checklist::format_duration_ms;
use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Client, ClientStatus, Principal, StatusChange};
use crate::visibility;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeToStatus {
    pub status: ClientStatus,
    pub clients: usize,
    pub average_ms: Option<i64>,
}

impl TimeToStatus {
    pub fn average_label(&self) -> String {
        match self.average_ms {
            Some(ms) => format_duration_ms(ms),
            None => "No data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInsights {
    pub total: usize,
    pub counts: Vec<(ClientStatus, usize)>,
    pub time_to_status: Vec<TimeToStatus>,
}

impl ClientInsights {
    pub fn compute(clients: &[Client], history: &[StatusChange]) -> Self {
        let all = [ClientStatus::Ongoing]
            .into_iter()
            .chain(ClientStatus::TERMINAL);

        let counts = all
            .map(|status| (status, clients.iter().filter(|c| c.status == status).count()))
            .collect();

        let created: HashMap<&str, &Client> = clients.iter().map(|c| (c.id.as_str(), c)).collect();

        // First arrival per (client, status); later duplicates are ignored.
        let mut sorted: Vec<&StatusChange> = history.iter().collect();
        sorted.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
        let mut seen: HashSet<(&str, ClientStatus)> = HashSet::new();
        let mut deltas: HashMap<ClientStatus, Vec<i64>> = HashMap::new();
        for change in sorted {
            let client = match created.get(change.client_id.as_str()) {
                Some(c) => c,
                None => continue,
            };
            if !seen.insert((change.client_id.as_str(), change.new_status)) {
                continue;
            }
            let ms = (change.changed_at - client.created_at)
                .num_milliseconds()
                .max(0);
            deltas.entry(change.new_status).or_default().push(ms);
        }

        let time_to_status = ClientStatus::TERMINAL
            .into_iter()
            .map(|status| {
                let values = deltas.get(&status).map(Vec::as_slice).unwrap_or(&[]);
                let average_ms = if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<i64>() / values.len() as i64)
                };
                TimeToStatus {
                    status,
                    clients: values.len(),
                    average_ms,
                }
            })
            .collect();

        Self {
            total: clients.len(),
            counts,
            time_to_status,
        }
    }
}

/// Insights over every client in the principal's scope, any status.
pub async fn client_insights(
    gw: &dyn RemoteGateway,
    principal: &Principal,
) -> Result<ClientInsights, DashboardError> {
    Capabilities::for_principal(principal).require(Capability::ViewInsights)?;
    let clients = visibility::accessible_clients(gw, principal, None).await?;
    if clients.is_empty() {
        return Ok(ClientInsights::compute(&[], &[]));
    }
    let ids: Vec<&str> = clients.iter().map(|c| c.id.as_str()).collect();
    let history: Vec<StatusChange> = gateway::select_as(
        gw,
        tables::CLIENT_STATUS_HISTORY,
        &Filter::is_in("client_id", ids),
    )
    .await?;
    Ok(ClientInsights::compute(&clients, &history))
}
