//! sitedesk: role-scoped visibility, status workflow and notification
//! targeting for a client / site-visit / quotation dashboard.
//!
//! Every operation takes an explicit [`types::Principal`] and talks to the
//! backend through [`gateway::RemoteGateway`].

pub mod audit;
pub mod capabilities;
pub mod checklist;
pub mod error;
pub mod gateway;
pub mod insights;
mod migrations;
pub mod notifications;
pub mod routing;
pub mod services;
pub mod session;
pub mod state;
pub mod types;
pub mod util;
pub mod visibility;
pub mod workflow;
