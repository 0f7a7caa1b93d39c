//! Order & profile lifecycle engine for prepaid eSIM plans.
//!
//! The engine creates provider orders, reconciles their asynchronous
//! provisioning state, derives display/eligibility status, and drives
//! top-up and cancellation. Front-end and CLI layers consume the services
//! in [`services`]; the `esim-engine` binary runs the background
//! reconciliation worker.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

#[cfg(test)]
pub mod testkit;
