//! Path-based route guards.
//!
//! Unauthenticated visitors go to the login page; a signed-in user who lacks
//! the route's capability goes back to the dashboard.

use crate::capabilities::Capability;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Clients,
    AllClients,
    ClientChecklist,
    Employees,
    SiteVisits,
    Quotations,
    Documents,
    Notifications,
    Logs,
    Insights,
    Impersonate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
    RedirectToDashboard,
}

impl RouteDecision {
    /// Where to navigate instead, if anywhere.
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            RouteDecision::Allow => None,
            RouteDecision::RedirectToLogin => Some(Route::Login.path()),
            RouteDecision::RedirectToDashboard => Some(Route::Dashboard.path()),
        }
    }
}

const ROUTES: [Route; 13] = [
    Route::Login,
    Route::Dashboard,
    Route::Clients,
    Route::AllClients,
    Route::ClientChecklist,
    Route::Employees,
    Route::SiteVisits,
    Route::Quotations,
    Route::Documents,
    Route::Notifications,
    Route::Logs,
    Route::Insights,
    Route::Impersonate,
];

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/dashboard",
            Route::Clients => "/clients",
            Route::AllClients => "/clients/all",
            Route::ClientChecklist => "/clients/checklist",
            Route::Employees => "/employees",
            Route::SiteVisits => "/site-visits",
            Route::Quotations => "/quotations",
            Route::Documents => "/documents",
            Route::Notifications => "/notifications",
            Route::Logs => "/logs",
            Route::Insights => "/insights",
            Route::Impersonate => "/admin/impersonate",
        }
    }

    /// Match a path, ignoring a trailing slash and any query string.
    pub fn from_path(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or("");
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        if path == "/" {
            return Some(Route::Dashboard);
        }
        ROUTES.iter().copied().find(|r| r.path() == path)
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login)
    }

    /// Capability needed beyond being signed in.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Route::AllClients => Some(Capability::ViewAllClients),
            Route::Employees => Some(Capability::ManageEmployees),
            Route::Logs => Some(Capability::ViewLogs),
            Route::Insights => Some(Capability::ViewInsights),
            Route::Impersonate => Some(Capability::Impersonate),
            _ => None,
        }
    }
}

/// Decide whether `session` may open `route`. Impersonation sessions are
/// judged by the effective principal, except the impersonation page itself,
/// which stays reachable so the admin can end it.
pub fn guard(session: Option<&Session>, route: Route) -> RouteDecision {
    if !route.requires_auth() {
        return RouteDecision::Allow;
    }
    let session = match session {
        Some(s) => s,
        None => return RouteDecision::RedirectToLogin,
    };

    let capabilities = if route == Route::Impersonate {
        crate::capabilities::Capabilities::for_principal(session.actor())
    } else {
        session.capabilities()
    };

    match route.required_capability() {
        Some(cap) if !capabilities.has(cap) => RouteDecision::RedirectToDashboard,
        _ => RouteDecision::Allow,
    }
}

/// Guard a raw path. Unknown paths fall back to the dashboard.
pub fn guard_path(session: Option<&Session>, path: &str) -> RouteDecision {
    match Route::from_path(path) {
        Some(route) => guard(session, route),
        None if session.is_none() => RouteDecision::RedirectToLogin,
        None => RouteDecision::RedirectToDashboard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Principal, Role};

    fn normal(role: Role) -> Session {
        Session::Normal(Principal::new("p1", role))
    }

    #[test]
    fn test_unauthenticated_redirects_to_login() {
        assert_eq!(guard(None, Route::Clients), RouteDecision::RedirectToLogin);
        assert_eq!(guard(None, Route::Login), RouteDecision::Allow);
        assert_eq!(
            RouteDecision::RedirectToLogin.redirect_path(),
            Some("/login")
        );
    }

    #[test]
    fn test_role_mismatch_redirects_to_dashboard() {
        let employee = normal(Role::Employee);
        assert_eq!(guard(Some(&employee), Route::Clients), RouteDecision::Allow);
        assert_eq!(
            guard(Some(&employee), Route::Logs),
            RouteDecision::RedirectToDashboard
        );
        assert_eq!(
            guard(Some(&employee), Route::AllClients),
            RouteDecision::RedirectToDashboard
        );
        assert_eq!(guard(Some(&normal(Role::Head)), Route::AllClients), RouteDecision::Allow);
        assert_eq!(guard(Some(&normal(Role::Admin)), Route::Employees), RouteDecision::Allow);
    }

    #[test]
    fn test_impersonation_uses_effective_role_except_admin_page() {
        let session = Session::Impersonating {
            original: Principal::new("admin-1", Role::Admin),
            target: Principal::new("emp-1", Role::Employee),
        };
        assert_eq!(
            guard(Some(&session), Route::Employees),
            RouteDecision::RedirectToDashboard
        );
        assert_eq!(guard(Some(&session), Route::Impersonate), RouteDecision::Allow);
    }

    #[test]
    fn test_path_matching() {
        assert_eq!(Route::from_path("/clients/"), Some(Route::Clients));
        assert_eq!(Route::from_path("/clients/all?tab=2"), Some(Route::AllClients));
        assert_eq!(Route::from_path("/"), Some(Route::Dashboard));
        assert_eq!(Route::from_path("/nope"), None);
        for route in ROUTES {
            assert_eq!(Route::from_path(route.path()), Some(route));
        }
    }

    #[test]
    fn test_unknown_paths() {
        assert_eq!(guard_path(None, "/nope"), RouteDecision::RedirectToLogin);
        assert_eq!(
            guard_path(Some(&normal(Role::Employee)), "/nope"),
            RouteDecision::RedirectToDashboard
        );
        assert_eq!(
            guard_path(Some(&normal(Role::Admin)), "/admin/impersonate"),
            RouteDecision::Allow
        );
    }
}
