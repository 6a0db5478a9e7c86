//! Controller module for Ingress annotation resolution.
//!
//! Contains the reconciliation loop, shared context and error handling.

pub mod context;
pub mod error;
pub mod reconciler;
