//! Page-level services: validated, capability-gated CRUD over the gateway.

pub mod clients;
pub mod documents;
pub mod employees;
pub mod logs;
pub mod quotations;
pub mod site_visits;
