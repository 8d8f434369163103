//! Named capabilities computed once from a role.
//!
//! Pages branch on a capability, never on the role string, so two screens
//! that gate the same action can't drift apart.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::{ClientStatus, Principal, Role, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Every ongoing client regardless of track.
    ViewAllClients,
    /// Every ongoing client in the role's own track.
    ViewTrackClients,
    /// Only clients with an explicit assignment.
    ViewAssignedClients,
    CreateClients,
    AssignClients,
    CompleteClient,
    MarkPoReceived,
    MarkExecutionComplete,
    ViewAllQuotations,
    ApproveQuotation,
    ViewAllSiteVisits,
    ApproveSiteVisit,
    ViewAllDocuments,
    ManageEmployees,
    BroadcastNotifications,
    ManageNotifications,
    ViewLogs,
    ViewInsights,
    Impersonate,
}

/// How far a principal's client visibility reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientScope {
    All,
    Track(Track),
    Assigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    role: Role,
    granted: HashSet<Capability>,
}

impl Capabilities {
    pub fn for_role(role: Role) -> Self {
        use Capability::*;

        let granted: &[Capability] = match role {
            Role::Admin => &[
                ViewAllClients,
                CreateClients,
                AssignClients,
                CompleteClient,
                MarkPoReceived,
                MarkExecutionComplete,
                ViewAllQuotations,
                ApproveQuotation,
                ViewAllSiteVisits,
                ApproveSiteVisit,
                ViewAllDocuments,
                ManageEmployees,
                BroadcastNotifications,
                ManageNotifications,
                ViewLogs,
                ViewInsights,
                Impersonate,
            ],
            Role::Head => &[
                ViewAllClients,
                CreateClients,
                AssignClients,
                CompleteClient,
                MarkPoReceived,
                ViewAllQuotations,
                ApproveQuotation,
                ViewAllSiteVisits,
                ApproveSiteVisit,
                ViewAllDocuments,
                BroadcastNotifications,
                ViewLogs,
                ViewInsights,
            ],
            Role::ExecutionHead => &[
                ViewTrackClients,
                CreateClients,
                AssignClients,
                CompleteClient,
                MarkExecutionComplete,
                ViewAllSiteVisits,
                ApproveSiteVisit,
                BroadcastNotifications,
                ViewInsights,
            ],
            Role::FinanceEmployee => &[
                ViewTrackClients,
                CreateClients,
                CompleteClient,
                MarkPoReceived,
                ViewAllQuotations,
                ApproveQuotation,
                ViewInsights,
            ],
            Role::Employee | Role::ExecutionEmployee => &[ViewAssignedClients, CreateClients],
        };

        Self {
            role,
            granted: granted.iter().copied().collect(),
        }
    }

    pub fn for_principal(principal: &Principal) -> Self {
        Self::for_role(principal.role)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    /// `PermissionDenied` unless the capability is granted.
    pub fn require(&self, capability: Capability) -> Result<(), crate::error::DashboardError> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(crate::error::DashboardError::PermissionDenied(format!(
                "{} lacks {:?}",
                self.role, capability
            )))
        }
    }

    pub fn client_scope(&self) -> ClientScope {
        if self.has(Capability::ViewAllClients) {
            ClientScope::All
        } else if self.has(Capability::ViewTrackClients) {
            ClientScope::Track(self.role.track())
        } else {
            ClientScope::Assigned
        }
    }

    /// The capability that authorizes moving a client into `status`.
    /// `Ongoing` has none: nothing reopens a client.
    pub fn status_capability(status: ClientStatus) -> Option<Capability> {
        match status {
            ClientStatus::Ongoing => None,
            ClientStatus::Completed => Some(Capability::CompleteClient),
            ClientStatus::PoReceived => Some(Capability::MarkPoReceived),
            ClientStatus::ExecutionComplete => Some(Capability::MarkExecutionComplete),
        }
    }

    pub fn can_set_status(&self, status: ClientStatus) -> bool {
        Self::status_capability(status).is_some_and(|c| self.has(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_scopes_per_role() {
        assert_eq!(Capabilities::for_role(Role::Head).client_scope(), ClientScope::All);
        assert_eq!(Capabilities::for_role(Role::Admin).client_scope(), ClientScope::All);
        assert_eq!(
            Capabilities::for_role(Role::ExecutionHead).client_scope(),
            ClientScope::Track(Track::Execution)
        );
        assert_eq!(
            Capabilities::for_role(Role::FinanceEmployee).client_scope(),
            ClientScope::Track(Track::Finance)
        );
        assert_eq!(
            Capabilities::for_role(Role::Employee).client_scope(),
            ClientScope::Assigned
        );
        assert_eq!(
            Capabilities::for_role(Role::ExecutionEmployee).client_scope(),
            ClientScope::Assigned
        );
    }

    #[test]
    fn test_completed_transition_roles() {
        let allowed: Vec<Role> = Role::ALL
            .iter()
            .copied()
            .filter(|r| Capabilities::for_role(*r).can_set_status(ClientStatus::Completed))
            .collect();
        assert_eq!(
            allowed,
            vec![Role::Head, Role::Admin, Role::ExecutionHead, Role::FinanceEmployee]
        );
    }

    #[test]
    fn test_nobody_can_set_ongoing() {
        for role in Role::ALL {
            assert!(!Capabilities::for_role(role).can_set_status(ClientStatus::Ongoing));
        }
    }

    #[test]
    fn test_only_admin_impersonates() {
        for role in Role::ALL {
            assert_eq!(
                Capabilities::for_role(role).has(Capability::Impersonate),
                role == Role::Admin
            );
        }
    }

    #[test]
    fn test_require_reports_role_and_capability() {
        let err = Capabilities::for_role(Role::Employee)
            .require(Capability::ApproveQuotation)
            .unwrap_err();
        assert_eq!(err.to_string(), "Permission denied: employee lacks ApproveQuotation");
    }
}
