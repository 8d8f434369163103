//! Client workflow checklist and step-duration arithmetic.
//!
//! Every client walks the same ordered template. A step is complete once a
//! row exists for it in `client_checklist`. Durations are plain date
//! arithmetic over millisecond deltas.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DashboardError;
use crate::gateway::{self, tables, Filter, RemoteGateway};
use crate::types::{Client, Principal};
use crate::visibility;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDef {
    pub key: &'static str,
    pub label: &'static str,
}

pub const TEMPLATE: [StepDef; 7] = [
    StepDef { key: "first_contact", label: "First contact" },
    StepDef { key: "site_visit", label: "Site visit done" },
    StepDef { key: "quotation_sent", label: "Quotation sent" },
    StepDef { key: "quotation_approved", label: "Quotation approved" },
    StepDef { key: "po_received", label: "PO received" },
    StepDef { key: "execution_started", label: "Execution started" },
    StepDef { key: "execution_complete", label: "Execution complete" },
];

pub fn step_def(key: &str) -> Option<&'static StepDef> {
    TEMPLATE.iter().find(|s| s.key == key)
}

/// A row from `client_checklist`: one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    pub id: String,
    pub client_id: String,
    pub step: String,
    pub completed_at: DateTime<Utc>,
    pub completed_by: String,
}

/// One template step as seen for a given client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChecklistStep {
    pub key: &'static str,
    pub label: &'static str,
    /// When the client was created; the start of every step's duration.
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

/// Result of a duration query. Only `Elapsed` carries a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGap {
    Elapsed(i64),
    NotCompleted,
    PreviousNotCompleted,
    FirstStep,
}

impl fmt::Display for StepGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepGap::Elapsed(ms) => f.pad(&format_duration_ms(*ms)),
            StepGap::NotCompleted => f.pad("Not completed yet"),
            StepGap::PreviousNotCompleted => f.pad("Previous step not completed"),
            StepGap::FirstStep => f.pad("First step"),
        }
    }
}

/// Render a millisecond delta as days/hours/minutes, e.g. `1h 30m` or
/// `2d 3h 5m`. Zero units are dropped; negative deltas clamp to `0m`.
pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let days = ms / DAY_MS;
    let hours = (ms % DAY_MS) / HOUR_MS;
    let minutes = (ms % HOUR_MS) / MINUTE_MS;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{}m", minutes));
    }
    parts.join(" ")
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}

/// Time from step `index - 1` to step `index`.
pub fn time_between_steps(steps: &[ChecklistStep], index: usize) -> StepGap {
    let current = match steps.get(index).and_then(|s| s.completed_at) {
        Some(t) => t,
        None => return StepGap::NotCompleted,
    };
    if index == 0 {
        return StepGap::FirstStep;
    }
    match steps[index - 1].completed_at {
        Some(previous) => StepGap::Elapsed(millis_between(previous, current)),
        None => StepGap::PreviousNotCompleted,
    }
}

/// Time from client creation to the step's completion.
pub fn step_duration(step: &ChecklistStep) -> StepGap {
    match step.completed_at {
        Some(done) => StepGap::Elapsed(millis_between(step.started_at, done)),
        None => StepGap::NotCompleted,
    }
}

#[derive(Debug, Clone)]
pub struct ClientChecklist {
    pub client: Client,
    pub steps: Vec<ChecklistStep>,
}

impl ClientChecklist {
    /// Build the template view from stored entries. Unknown step keys are
    /// ignored; for a duplicated step the earliest completion wins.
    pub fn from_entries(client: Client, entries: Vec<ChecklistEntry>) -> Self {
        let mut done: HashMap<String, ChecklistEntry> = HashMap::new();
        for entry in entries {
            match done.get(&entry.step) {
                Some(existing) if existing.completed_at <= entry.completed_at => {}
                _ => {
                    done.insert(entry.step.clone(), entry);
                }
            }
        }

        let steps = TEMPLATE
            .iter()
            .map(|def| {
                let entry = done.remove(def.key);
                ChecklistStep {
                    key: def.key,
                    label: def.label,
                    started_at: client.created_at,
                    completed_at: entry.as_ref().map(|e| e.completed_at),
                    completed_by: entry.map(|e| e.completed_by),
                }
            })
            .collect();

        Self { client, steps }
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed_at.is_some()).count()
    }

    /// `(label, since previous step, since creation)` per step.
    pub fn rows(&self) -> Vec<(&'static str, StepGap, StepGap)> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.label, time_between_steps(&self.steps, i), step_duration(step)))
            .collect()
    }
}

pub async fn load_client_checklist(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
) -> Result<ClientChecklist, DashboardError> {
    let client = visibility::require_client_access(gw, principal, client_id).await?;
    let entries: Vec<ChecklistEntry> = gateway::select_as(
        gw,
        tables::CLIENT_CHECKLIST,
        &Filter::eq("client_id", client_id),
    )
    .await?;
    Ok(ClientChecklist::from_entries(client, entries))
}

/// Record a step as done now. Completing an already completed step returns
/// the existing entry unchanged.
pub async fn complete_step(
    gw: &dyn RemoteGateway,
    principal: &Principal,
    client_id: &str,
    step_key: &str,
) -> Result<ChecklistEntry, DashboardError> {
    let def = step_def(step_key).ok_or_else(|| DashboardError::InvalidField {
        field: "step".to_string(),
        reason: format!("unknown checklist step '{}'", step_key),
    })?;
    visibility::require_client_access(gw, principal, client_id).await?;

    let filter = Filter::eq("client_id", client_id).and(Filter::eq("step", def.key));
    let mut existing: Vec<ChecklistEntry> =
        gateway::select_as(gw, tables::CLIENT_CHECKLIST, &filter).await?;
    existing.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
    if let Some(entry) = existing.into_iter().next() {
        return Ok(entry);
    }

    let entry = ChecklistEntry {
        id: crate::util::new_id(),
        client_id: client_id.to_string(),
        step: def.key.to_string(),
        completed_at: Utc::now(),
        completed_by: principal.id.clone(),
    };
    gateway::insert_as(gw, tables::CLIENT_CHECKLIST, std::slice::from_ref(&entry)).await?;
    log::info!(
        "Checklist: {} completed '{}' for client {}",
        principal.id,
        def.key,
        client_id
    );
    Ok(entry)
}
