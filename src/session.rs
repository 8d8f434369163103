//! Session and impersonation.
//!
//! The store is process-wide (created at login, cleared at logout) but the
//! resolvers never read it: callers pass the effective [`Principal`] in.
//! Impersonation is a tagged state, and every begin, end, or refused
//! attempt goes to the audit log under the original admin's id.

use parking_lot::RwLock;

use crate::audit::{self, Actor};
use crate::capabilities::{Capabilities, Capability};
use crate::error::DashboardError;
use crate::gateway::{self, tables, RemoteGateway};
use crate::types::{Employee, Principal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Normal(Principal),
    Impersonating { original: Principal, target: Principal },
}

impl Session {
    /// Whose data the session acts on.
    pub fn effective(&self) -> &Principal {
        match self {
            Session::Normal(p) => p,
            Session::Impersonating { target, .. } => target,
        }
    }

    /// Who is actually signed in.
    pub fn actor(&self) -> &Principal {
        match self {
            Session::Normal(p) => p,
            Session::Impersonating { original, .. } => original,
        }
    }

    pub fn is_impersonating(&self) -> bool {
        matches!(self, Session::Impersonating { .. })
    }

    /// Capabilities of the effective principal.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_principal(self.effective())
    }

    pub fn audit_actor(&self) -> Actor<'_> {
        Actor {
            actor_id: &self.actor().id,
            effective_id: &self.effective().id,
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, principal: Principal) -> Session {
        let session = Session::Normal(principal);
        *self.current.write() = Some(session.clone());
        log::info!("Session: {} signed in as {}", session.actor().id, session.actor().role);
        session
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn effective_principal(&self) -> Option<Principal> {
        self.current.read().as_ref().map(|s| s.effective().clone())
    }

    /// Clear the session. An open impersonation is closed in the audit log
    /// first.
    pub async fn logout(&self, gw: &dyn RemoteGateway) -> Result<Option<Session>, DashboardError> {
        let snapshot = self.current();
        if let Some(session @ Session::Impersonating { .. }) = &snapshot {
            audit::record(
                gw,
                session.audit_actor(),
                audit::IMPERSONATION_ENDED,
                "employee",
                &session.effective().id,
                "logout",
            )
            .await?;
        }
        Ok(self.current.write().take())
    }

    /// Swap the effective identity to another employee. Admin only; refused
    /// (and audited) while already impersonating.
    pub async fn begin_impersonation(
        &self,
        gw: &dyn RemoteGateway,
        target_employee_id: &str,
    ) -> Result<Session, DashboardError> {
        let snapshot = self
            .current()
            .ok_or_else(|| DashboardError::PermissionDenied("not signed in".into()))?;

        let refusal = match &snapshot {
            Session::Impersonating { target, .. } => Some(format!(
                "nested impersonation of {} while acting as {}",
                target_employee_id, target.id
            )),
            Session::Normal(p) if !Capabilities::for_principal(p).has(Capability::Impersonate) => {
                Some(format!("{} may not impersonate", p.role))
            }
            Session::Normal(p) if p.id == target_employee_id => {
                Some("cannot impersonate yourself".to_string())
            }
            Session::Normal(_) => None,
        };

        if let Some(reason) = refusal {
            audit::record(
                gw,
                snapshot.audit_actor(),
                audit::IMPERSONATION_REFUSED,
                "employee",
                target_employee_id,
                &reason,
            )
            .await?;
            return Err(DashboardError::PermissionDenied(reason));
        }

        let employee: Employee = gateway::select_one(gw, tables::EMPLOYEES, target_employee_id)
            .await?
            .ok_or_else(|| DashboardError::not_found("employee", target_employee_id))?;
        if !employee.active {
            return Err(DashboardError::PermissionDenied(format!(
                "{} is not an active employee",
                employee.id
            )));
        }

        let next = Session::Impersonating {
            original: snapshot.actor().clone(),
            target: employee.principal(),
        };

        if !self.replace_if_current(&snapshot, next.clone()) {
            let reason = "session changed during impersonation".to_string();
            audit::record(
                gw,
                snapshot.audit_actor(),
                audit::IMPERSONATION_REFUSED,
                "employee",
                &employee.id,
                &reason,
            )
            .await?;
            return Err(DashboardError::PermissionDenied(reason));
        }

        let started = audit::record(
            gw,
            next.audit_actor(),
            audit::IMPERSONATION_STARTED,
            "employee",
            &employee.id,
            &format!("as {}", employee.role),
        )
        .await;
        if let Err(e) = started {
            // Roll back the swap when the start was never recorded.
            self.replace_if_current(&next, snapshot);
            return Err(e);
        }
        Ok(next)
    }

    /// Compare-and-swap on the current session.
    fn replace_if_current(&self, expected: &Session, next: Session) -> bool {
        let mut guard = self.current.write();
        if guard.as_ref() != Some(expected) {
            return false;
        }
        *guard = Some(next);
        true
    }

    /// Return to the original identity. A no-op outside impersonation.
    pub async fn end_impersonation(&self, gw: &dyn RemoteGateway) -> Result<Session, DashboardError> {
        let snapshot = self
            .current()
            .ok_or_else(|| DashboardError::PermissionDenied("not signed in".into()))?;

        let original = match &snapshot {
            Session::Normal(_) => return Ok(snapshot),
            Session::Impersonating { original, target } => {
                audit::record(
                    gw,
                    snapshot.audit_actor(),
                    audit::IMPERSONATION_ENDED,
                    "employee",
                    &target.id,
                    "",
                )
                .await?;
                original.clone()
            }
        };

        let next = Session::Normal(original);
        *self.current.write() = Some(next.clone());
        Ok(next)
    }
}
